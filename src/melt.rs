//! Reshapes a detected table into `{country, year, value}` observations.
//!
//! Values are carried through untouched as [`Cell`]s; numeric coercion is the
//! cleaner's job.

use log::debug;
use serde::Serialize;

use crate::{
    config::DetectConfig,
    detect::{LONG_FIELDS, Orientation, SheetCandidate, year_like_column},
    error::Result,
    headers::{ColumnOverrides, HeaderIndex},
    workbook::{Cell, Sheet, Workbook},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawObservation {
    pub country: String,
    pub year: Option<String>,
    pub value: Cell,
}

/// First run of exactly four ASCII digits that falls within the configured
/// year bounds.
pub fn extract_year(label: &str, cfg: &DetectConfig) -> Option<String> {
    let bytes = label.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |len| start + len);
        if end - start == 4 {
            let run = &label[start..end];
            let in_range = run
                .parse::<u32>()
                .is_ok_and(|year| (cfg.year_min..=cfg.year_max).contains(&year));
            if in_range {
                return Some(run.to_string());
            }
        }
        start = end;
    }
    None
}

pub fn melt_candidate(
    workbook: &Workbook,
    candidate: &SheetCandidate,
    columns: &ColumnOverrides,
    cfg: &DetectConfig,
) -> Result<Vec<RawObservation>> {
    let sheet = workbook.sheet(&candidate.sheet_name)?;
    melt_sheet_mapped(sheet, candidate.header_row, candidate.orientation, columns, cfg)
}

pub fn melt_sheet(
    sheet: &Sheet,
    header_row: usize,
    orientation: Orientation,
    cfg: &DetectConfig,
) -> Result<Vec<RawObservation>> {
    melt_sheet_mapped(sheet, header_row, orientation, &ColumnOverrides::default(), cfg)
}

/// [`melt_sheet`] with `columns` overriding the long-table header aliases.
/// Wide layouts are positional and ignore the overrides.
pub fn melt_sheet_mapped(
    sheet: &Sheet,
    header_row: usize,
    orientation: Orientation,
    columns: &ColumnOverrides,
    cfg: &DetectConfig,
) -> Result<Vec<RawObservation>> {
    if header_row >= sheet.height() {
        return Ok(Vec::new());
    }
    if !columns.is_empty() && orientation != Orientation::Long {
        debug!("Column overrides ignored for {orientation} table");
    }
    match orientation {
        Orientation::Long => melt_long(sheet, header_row, columns, cfg),
        Orientation::WideYearInColumns => Ok(melt_year_columns(sheet, header_row, cfg)),
        Orientation::WideYearInRows => Ok(melt_year_rows(sheet, header_row, cfg)),
    }
}

fn melt_long(
    sheet: &Sheet,
    header_row: usize,
    columns: &ColumnOverrides,
    cfg: &DetectConfig,
) -> Result<Vec<RawObservation>> {
    let mut labels = sheet.labels(header_row);
    labels.resize(labels.len().max(sheet.width()), String::new());
    let index = HeaderIndex::build_with(&labels, LONG_FIELDS, columns)?;
    let country_col = index.required_column("country")?;
    let value_col = index.required_column("value")?;
    let year_col = index
        .column("year")
        .or_else(|| year_like_column(sheet, header_row, &[country_col, value_col], cfg));

    let records = (header_row + 1..sheet.height())
        .filter(|&row| sheet.row(row).iter().any(|cell| !cell.is_blank()))
        .map(|row| RawObservation {
            country: sheet.cell(row, country_col).text().into_owned(),
            year: year_col
                .map(|col| sheet.cell(row, col).text().into_owned())
                .filter(|year| !year.is_empty()),
            value: sheet.cell(row, value_col).clone(),
        })
        .collect();
    Ok(records)
}

fn melt_year_columns(sheet: &Sheet, header_row: usize, cfg: &DetectConfig) -> Vec<RawObservation> {
    let years = sheet
        .labels(header_row)
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(col, label)| extract_year(label, cfg).map(|year| (col, year)))
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for row in header_row + 1..sheet.height() {
        let country = sheet.cell(row, 0).text();
        if country.is_empty() {
            continue;
        }
        for (col, year) in &years {
            records.push(RawObservation {
                country: country.to_string(),
                year: Some(year.clone()),
                value: sheet.cell(row, *col).clone(),
            });
        }
    }
    records
}

fn melt_year_rows(sheet: &Sheet, header_row: usize, cfg: &DetectConfig) -> Vec<RawObservation> {
    let countries = sheet.labels(header_row);

    let mut records = Vec::new();
    for row in header_row + 1..sheet.height() {
        let Some(year) = extract_year(&sheet.cell(row, 0).text(), cfg) else {
            continue;
        };
        for (col, country) in countries.iter().enumerate().skip(1) {
            records.push(RawObservation {
                country: country.clone(),
                year: Some(year.clone()),
                value: sheet.cell(row, col).clone(),
            });
        }
    }
    records
}
