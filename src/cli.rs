use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    datasets::{DatasetKind, DefinitionTag},
    detect::Orientation,
    headers::parse_column_override,
    report::{DEFAULT_LANGUAGE, FlagFilter, SortOrder},
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest social-housing policy datasets and statistical workbooks",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a policy dataset CSV and resolve its columns
    Load(LoadArgs),
    /// List the table candidates found in a workbook, best first
    Scan(ScanArgs),
    /// Melt a workbook table into country/year/value observations
    Melt(MeltArgs),
    /// Build (and optionally send) a summary request for a dataset
    Report(ReportArgs),
    /// Ask the summarization service a question across several datasets
    Chat(ChatArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Dataset CSV path or http(s) URL ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Which dataset profile to resolve the headers against
    #[arg(short = 'd', long = "dataset", value_enum)]
    pub dataset: DatasetKind,
    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "table")]
    pub format: OutputFormat,
    /// Output file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Print definitions merged per country instead of one row per record
    #[arg(long = "grouped")]
    pub grouped: bool,
    /// Map a field to a zero-based column by hand, e.g. `country=0` (repeatable)
    #[arg(long = "column", value_parser = parse_column_override, action = clap::ArgAction::Append)]
    pub columns: Vec<(String, usize)>,
    /// Character encoding of the input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Workbook path or http(s) URL (.xlsx, .xls, .ods, or .csv)
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// YAML file overriding detection and cleaning settings
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Maximum candidates to list (0 = all)
    #[arg(long, default_value_t = 10)]
    pub top: usize,
    /// Character encoding of CSV input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct MeltArgs {
    /// Workbook path or http(s) URL (.xlsx, .xls, .ods, or .csv)
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Restrict detection to this sheet
    #[arg(long)]
    pub sheet: Option<String>,
    /// Zero-based header row; requires --sheet and --orientation
    #[arg(long = "header-row", requires_all = ["sheet", "orientation"])]
    pub header_row: Option<usize>,
    /// Table layout; requires --sheet and --header-row
    #[arg(long, value_enum, requires_all = ["sheet", "header_row"])]
    pub orientation: Option<Orientation>,
    /// Map a field to a zero-based column by hand, e.g. `value=3` (repeatable)
    #[arg(long = "column", value_parser = parse_column_override, action = clap::ArgAction::Append)]
    pub columns: Vec<(String, usize)>,
    /// YAML file overriding detection and cleaning settings
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "table")]
    pub format: OutputFormat,
    /// Output file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Character encoding of CSV input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Dataset CSV path or http(s) URL
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Which dataset profile to resolve the headers against
    #[arg(short = 'd', long = "dataset", value_enum)]
    pub dataset: DatasetKind,
    /// Summarize a single country
    #[arg(long)]
    pub country: Option<String>,
    /// Keep only rows containing this text
    #[arg(long)]
    pub search: Option<String>,
    /// Row order
    #[arg(long, value_enum, default_value = "country")]
    pub sort: SortOrder,
    /// Keep only rows where a field reads a value, e.g. `income=yes`
    #[arg(long, value_parser = FlagFilter::parse)]
    pub flag: Option<FlagFilter>,
    /// Definitions only: keep countries carrying this tag (repeatable)
    #[arg(long = "tag", value_enum, action = clap::ArgAction::Append)]
    pub tags: Vec<DefinitionTag>,
    /// Map a field to a zero-based column by hand, e.g. `country=0` (repeatable)
    #[arg(long = "column", value_parser = parse_column_override, action = clap::ArgAction::Append)]
    pub columns: Vec<(String, usize)>,
    /// Language tag requested from the summarizer
    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    pub language: String,
    /// Base URL of the summarization service; a local summary is printed without one
    #[arg(long, env = "HOUSING_REPORT_ENDPOINT")]
    pub endpoint: Option<String>,
    /// Print the request JSON instead of sending it
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Fail instead of printing a local summary when the service errors
    #[arg(long = "no-fallback")]
    pub no_fallback: bool,
    /// Write the returned HTML here (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Character encoding of the input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Question to ask
    #[arg(short = 'q', long = "question")]
    pub question: String,
    /// Dataset inputs as `kind=path-or-url`, e.g. `eligibility=elig.csv`
    #[arg(short = 's', long = "source", required = true, value_parser = parse_source, action = clap::ArgAction::Append)]
    pub sources: Vec<(DatasetKind, String)>,
    /// Language tag requested from the summarizer
    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    pub language: String,
    /// Base URL of the summarization service; a local summary is printed without one
    #[arg(long, env = "HOUSING_REPORT_ENDPOINT")]
    pub endpoint: Option<String>,
    /// Print the request JSON instead of sending it
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Fail instead of printing a local summary when the service errors
    #[arg(long = "no-fallback")]
    pub no_fallback: bool,
    /// Write the returned HTML here (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Character encoding of the inputs (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

pub fn parse_source(value: &str) -> Result<(DatasetKind, String), String> {
    let (kind, location) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected kind=location, got '{value}'"))?;
    let kind = DatasetKind::from_str(kind.trim(), true)?;
    let location = location.trim();
    if location.is_empty() {
        return Err(format!("Missing location for dataset '{kind}'"));
    }
    Ok((kind, location.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source_splits_kind_and_location() {
        assert_eq!(
            parse_source("Eligibility = data/elig.csv").unwrap(),
            (DatasetKind::Eligibility, "data/elig.csv".to_string())
        );
        assert!(parse_source("eligibility").is_err());
        assert!(parse_source("rents=x.csv").is_err());
        assert!(parse_source("priority=").is_err());
    }

    #[test]
    fn manual_melt_flags_travel_together() {
        let err = Cli::try_parse_from(["housing-ingest", "melt", "-i", "x.xlsx", "--header-row", "2"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from([
            "housing-ingest",
            "melt",
            "-i",
            "x.xlsx",
            "--sheet",
            "Data",
            "--header-row",
            "2",
            "--orientation",
            "wide-year-in-rows",
        ])
        .unwrap();
        let Commands::Melt(args) = cli.command else {
            panic!("expected melt");
        };
        assert_eq!(args.orientation, Some(Orientation::WideYearInRows));
    }

    #[test]
    fn report_flags_parse_into_filters() {
        let cli = Cli::try_parse_from([
            "housing-ingest",
            "report",
            "-i",
            "defs.csv",
            "-d",
            "definitions",
            "--sort",
            "score",
            "--flag",
            "terms=HLM",
            "--tag",
            "public_provider",
            "--tag",
            "legally_defined",
            "--column",
            "country=0",
        ])
        .unwrap();
        let Commands::Report(args) = cli.command else {
            panic!("expected report");
        };
        assert_eq!(args.sort, SortOrder::Score);
        assert_eq!(args.flag.unwrap().value, "HLM");
        assert_eq!(
            args.tags,
            vec![DefinitionTag::PublicProvider, DefinitionTag::LegallyDefined]
        );
        assert_eq!(args.columns, vec![("country".to_string(), 0)]);
        assert!(!args.dry_run);
    }
}
