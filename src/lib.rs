pub mod clean;
pub mod cli;
pub mod config;
pub mod csv_text;
pub mod datasets;
pub mod detect;
pub mod error;
pub mod headers;
pub mod io_utils;
pub mod melt;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod table;
pub mod workbook;

use std::{collections::BTreeMap, env, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands, OutputFormat},
    config::IngestConfig,
    datasets::DatasetKind,
    error::IngestError,
    headers::ColumnOverrides,
    pipeline::{Selection, ingest_dataset_mapped, ingest_workbook},
    report::{ReportClient, ReportFilters, ReportRequest},
    source::{SourceLocation, fetch_text, fetch_workbook},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("housing_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => handle_load(&args),
        Commands::Scan(args) => handle_scan(&args),
        Commands::Melt(args) => handle_melt(&args),
        Commands::Report(args) => handle_report(&args),
        Commands::Chat(args) => handle_chat(&args),
    }
}

/// Wraps an ingestion error with `action` and, where the user can recover by
/// hand, the flags that do it.
fn with_recovery_hint(err: IngestError, action: String) -> anyhow::Error {
    let needs_selection = err.needs_manual_selection();
    let needs_mapping = err.needs_column_mapping();
    let err = anyhow::Error::new(err).context(action);
    if needs_selection {
        err.context("pass --sheet, --header-row and --orientation to choose the table")
    } else if needs_mapping {
        err.context("pass --column <field>=<index> to map it")
    } else {
        err
    }
}

fn load_dataset_text(
    kind: DatasetKind,
    input: &str,
    encoding: Option<&str>,
    columns: &ColumnOverrides,
) -> Result<pipeline::DatasetPayload> {
    let encoding = io_utils::resolve_encoding(encoding)?;
    let location = SourceLocation::parse(input);
    let text = fetch_text(&location, encoding)?;
    let payload = ingest_dataset_mapped(kind, &text, columns)
        .map_err(|err| with_recovery_hint(err, format!("Loading {kind} dataset from {location}")))?;
    Ok(payload)
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let columns = args.columns.iter().cloned().collect::<ColumnOverrides>();
    let payload = load_dataset_text(
        args.dataset,
        &args.input,
        args.input_encoding.as_deref(),
        &columns,
    )?;

    let output = args.output.as_deref();
    if args.grouped && args.dataset == DatasetKind::Definitions {
        return match args.format {
            OutputFormat::Json => io_utils::write_json(output, &payload.groups),
            OutputFormat::Table | OutputFormat::Csv => {
                let headers = ["country", "terms", "tags", "summary"].map(str::to_string);
                let rows = payload
                    .groups
                    .iter()
                    .map(|group| {
                        let tags = group
                            .tags
                            .iter()
                            .map(|tag| tag.as_str())
                            .collect::<Vec<_>>()
                            .join(" ");
                        let summary = group
                            .items
                            .first()
                            .map(|item| item.summary.clone())
                            .unwrap_or_default();
                        vec![group.country.clone(), group.terms_joined.clone(), tags, summary]
                    })
                    .collect::<Vec<_>>();
                emit_rows(args.format, output, &headers, &rows)
            }
        };
    }

    match args.format {
        OutputFormat::Json => io_utils::write_json(output, &payload.records),
        format => {
            let (headers, rows) = io_utils::record_rows(&args.dataset.profile(), &payload.records);
            emit_rows(format, output, &headers, &rows)
        }
    }
}

fn emit_rows(
    format: OutputFormat,
    output: Option<&Path>,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<()> {
    match format {
        OutputFormat::Csv => io_utils::write_csv(output, headers, rows),
        OutputFormat::Json => {
            let objects = rows
                .iter()
                .map(|row| headers.iter().cloned().zip(row.iter().cloned()).collect())
                .collect::<Vec<BTreeMap<String, String>>>();
            io_utils::write_json(output, &objects)
        }
        OutputFormat::Table => match output {
            Some(path) if !io_utils::is_dash(path) => {
                fs::write(path, table::render_table(headers, rows))
                    .with_context(|| format!("Writing table to {path:?}"))
            }
            _ => {
                table::print_table(headers, rows);
                Ok(())
            }
        },
    }
}

fn load_workbook(
    input: &str,
    encoding: Option<&str>,
    config: Option<&Path>,
) -> Result<(SourceLocation, workbook::Workbook, IngestConfig)> {
    let config = IngestConfig::load_or_default(config)
        .with_context(|| format!("Loading configuration {config:?}"))?;
    let encoding = io_utils::resolve_encoding(encoding)?;
    let location = SourceLocation::parse(input);
    let workbook = fetch_workbook(&location, encoding)?;
    debug!(
        "Workbook {} has sheet(s): {:?}",
        location,
        workbook.sheet_names()
    );
    Ok((location, workbook, config))
}

fn handle_scan(args: &cli::ScanArgs) -> Result<()> {
    let (location, workbook, config) = load_workbook(
        &args.input,
        args.input_encoding.as_deref(),
        args.config.as_deref(),
    )?;
    let mut candidates = detect::scan_workbook(&workbook, &config.detect);
    info!(
        "Found {} candidate header row(s) in {}",
        candidates.len(),
        location
    );
    if candidates.is_empty() {
        return Err(error::IngestError::NoTableDetected {
            sheets: workbook.sheets.len(),
        })
        .with_context(|| format!("Scanning {location}"));
    }
    // Stable sort keeps evaluation order among equal scores.
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    if args.top > 0 {
        candidates.truncate(args.top);
    }
    let headers = ["sheet", "header_row", "orientation", "score"].map(str::to_string);
    let rows = candidates
        .iter()
        .map(|c| {
            vec![
                c.sheet_name.clone(),
                c.header_row.to_string(),
                c.orientation.to_string(),
                format!("{:.3}", c.score),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    Ok(())
}

fn handle_melt(args: &cli::MeltArgs) -> Result<()> {
    let (location, workbook, mut config) = load_workbook(
        &args.input,
        args.input_encoding.as_deref(),
        args.config.as_deref(),
    )?;
    for (field, column) in &args.columns {
        config.columns.insert(field.as_str(), *column);
    }
    let selection = match (&args.sheet, args.header_row, args.orientation) {
        (Some(sheet), Some(header_row), Some(orientation)) => Selection::Manual {
            sheet: sheet.clone(),
            header_row,
            orientation,
        },
        (Some(sheet), _, _) => Selection::Sheet(sheet.clone()),
        _ => Selection::Auto,
    };

    let payload = ingest_workbook(&workbook, &selection, &config)
        .map_err(|err| with_recovery_hint(err, format!("Melting {location}")))?;

    let output = args.output.as_deref();
    match args.format {
        OutputFormat::Json => io_utils::write_json(output, &payload.records),
        format => {
            let (headers, rows) = io_utils::observation_rows(&payload.records);
            emit_rows(format, output, &headers, &rows)
        }
    }
}

const FALLBACK_NOTICE: &str = "<p>AI summary failed; showing a rule-based summary instead.</p>";

/// Prints the request (dry run), the service's answer, or the local summary
/// when no service is configured or it fails and `fallback` is allowed.
fn deliver(
    request: &ReportRequest,
    endpoint: Option<&str>,
    dry_run: bool,
    fallback: bool,
    output: Option<&Path>,
) -> Result<()> {
    if dry_run {
        return io_utils::write_json(output, request);
    }
    let html = match endpoint {
        None => {
            info!("No report endpoint configured; writing a local summary");
            request.local_html()
        }
        Some(endpoint) => {
            let client = ReportClient::new(endpoint)?;
            let answer = client
                .send(request)
                .and_then(|response| response.into_html())
                .with_context(|| format!("Requesting report from {}", client.endpoint()));
            match answer {
                Ok(html) => html,
                Err(err) if fallback => {
                    warn!("{err:#}");
                    format!("{FALLBACK_NOTICE}\n{}", request.local_html())
                }
                Err(err) => return Err(err),
            }
        }
    };
    match output {
        Some(path) if !io_utils::is_dash(path) => {
            fs::write(path, html).with_context(|| format!("Writing report to {path:?}"))
        }
        _ => {
            println!("{html}");
            Ok(())
        }
    }
}

fn handle_report(args: &cli::ReportArgs) -> Result<()> {
    let columns = args.columns.iter().cloned().collect::<ColumnOverrides>();
    let payload = load_dataset_text(
        args.dataset,
        &args.input,
        args.input_encoding.as_deref(),
        &columns,
    )?;
    let filters = ReportFilters {
        country: args.country.clone().unwrap_or_default(),
        search: args.search.clone().unwrap_or_default(),
        sort: args.sort,
        flag: args.flag.clone(),
        tags: args.tags.iter().copied().collect(),
    };
    let request =
        ReportRequest::for_table(args.dataset, &payload.records, filters, &args.language)?;
    deliver(
        &request,
        args.endpoint.as_deref(),
        args.dry_run,
        !args.no_fallback,
        args.output.as_deref(),
    )
}

fn handle_chat(args: &cli::ChatArgs) -> Result<()> {
    let mut datasets = BTreeMap::new();
    for (kind, input) in &args.sources {
        let payload = load_dataset_text(
            *kind,
            input,
            args.input_encoding.as_deref(),
            &ColumnOverrides::default(),
        )?;
        datasets
            .entry(kind.to_string())
            .or_insert_with(Vec::new)
            .extend(payload.records);
    }
    let request = ReportRequest::chat(&args.question, datasets, &args.language);
    deliver(
        &request,
        args.endpoint.as_deref(),
        args.dry_run,
        !args.no_fallback,
        args.output.as_deref(),
    )
}
