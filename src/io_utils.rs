//! Output plumbing shared by the CLI commands.
//!
//! - **Encoding**: `--input-encoding` labels resolve through `encoding_rs`,
//!   defaulting to UTF-8.
//! - **Writers**: CSV and JSON output go to a file or stdout; the `-` path
//!   convention routes to stdout.
//! - **Quoting**: CSV output quotes only when a field requires it, so the
//!   result reparses through [`crate::csv_text::parse_csv_text`] unchanged.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use serde::Serialize;

use crate::{
    clean::ObservationRecord,
    datasets::{COUNTRY, COUNTRY_NORMALIZED, DatasetProfile, DatasetRecord},
};

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    })
}

pub fn open_csv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .flexible(true);
    builder.from_writer(writer)
}

pub fn write_json<T: Serialize + ?Sized>(path: Option<&Path>, value: &T) -> Result<()> {
    let mut out = open_output(path)?;
    serde_json::to_writer_pretty(&mut out, value).context("Serializing JSON output")?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Header row and string cells for dataset records, in profile order.
pub fn record_rows(
    profile: &DatasetProfile,
    records: &[DatasetRecord],
) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers = vec![COUNTRY.to_string(), COUNTRY_NORMALIZED.to_string()];
    headers.extend(profile.field_names().into_iter().map(str::to_string));
    let rows = records
        .iter()
        .map(|record| headers.iter().map(|h| record.get(h).to_string()).collect())
        .collect();
    (headers, rows)
}

pub fn observation_rows(records: &[ObservationRecord]) -> (Vec<String>, Vec<Vec<String>>) {
    let headers = ["country", "year", "value"].map(str::to_string).to_vec();
    let rows = records
        .iter()
        .map(|record| {
            vec![
                record.country.clone(),
                record.year.clone().unwrap_or_default(),
                record.value.to_string(),
            ]
        })
        .collect();
    (headers, rows)
}

pub fn write_csv(path: Option<&Path>, headers: &[String], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = open_csv_writer(open_output(path)?);
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush().context("Flushing CSV output")?;
    Ok(())
}
