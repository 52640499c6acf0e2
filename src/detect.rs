//! Locates the data table inside a workbook and classifies its shape.
//!
//! Every row among the first `scan_rows` of every sheet is treated as a
//! potential header. A row becomes a [`SheetCandidate`] when it fits one of the
//! three supported layouts; candidates are then ranked by a score that prefers
//! long tables, header rows that look like headers, and larger bodies.

use std::fmt;

use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    config::DetectConfig,
    error::{IngestError, Result},
    headers::{Fallback, FieldSpec, HeaderIndex, normalize_key},
    melt::extract_year,
    workbook::{Sheet, Workbook},
};

pub const COUNTRY_ALIASES: &[&str] = &[
    "country",
    "countryname",
    "countrynormalized",
    "countries",
    "economy",
    "location",
    "nation",
    "refarea",
    "area",
];
pub const YEAR_ALIASES: &[&str] = &["year", "years", "time", "timeperiod", "period", "date"];
pub const VALUE_ALIASES: &[&str] = &[
    "value",
    "obsvalue",
    "observation",
    "observationvalue",
    "amount",
    "share",
    "percent",
    "percentage",
    "pct",
    "rate",
];

/// Columns of an already-long table.
pub const LONG_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("country", COUNTRY_ALIASES),
    FieldSpec::optional("year", YEAR_ALIASES, Fallback::Empty),
    FieldSpec::required("value", VALUE_ALIASES),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum Orientation {
    /// One observation per row with country, year and value columns.
    Long,
    /// Countries down the first column, years across the header.
    WideYearInColumns,
    /// Countries across the header, years down the first column.
    WideYearInRows,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Long => "long",
            Orientation::WideYearInColumns => "wide-year-in-columns",
            Orientation::WideYearInRows => "wide-year-in-rows",
        }
    }

    fn bonus(self, cfg: &DetectConfig) -> f64 {
        match self {
            Orientation::Long => cfg.long_bonus,
            Orientation::WideYearInColumns => cfg.wide_columns_bonus,
            Orientation::WideYearInRows => cfg.wide_rows_bonus,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetCandidate {
    pub sheet_name: String,
    pub header_row: usize,
    pub orientation: Orientation,
    pub score: f64,
}

pub fn is_year_like(text: &str, cfg: &DetectConfig) -> bool {
    extract_year(text, cfg).is_some()
}

/// Column outside `exclude` holding at least `min_year_cells` year-like values
/// in the rows below `header_row`. Stands in for a missing year header.
pub fn year_like_column(
    sheet: &Sheet,
    header_row: usize,
    exclude: &[usize],
    cfg: &DetectConfig,
) -> Option<usize> {
    let body = body_rows(sheet, header_row, cfg);
    (0..sheet.width())
        .filter(|col| !exclude.contains(col))
        .find(|&col| {
            body.clone()
                .filter(|&row| is_year_like(&sheet.cell(row, col).text(), cfg))
                .count()
                >= cfg.min_year_cells
        })
}

fn body_rows(
    sheet: &Sheet,
    header_row: usize,
    cfg: &DetectConfig,
) -> std::ops::Range<usize> {
    let start = (header_row + 1).min(sheet.height());
    start..(start + cfg.probe_rows).min(sheet.height())
}

fn classify(sheet: &Sheet, header_row: usize, cfg: &DetectConfig) -> Option<Orientation> {
    let labels = sheet.labels(header_row);
    if let Ok(index) = HeaderIndex::build(&labels, LONG_FIELDS) {
        let taken = index.resolved().map(|(_, col)| col).collect::<Vec<_>>();
        if index.column("year").is_some()
            || year_like_column(sheet, header_row, &taken, cfg).is_some()
        {
            return Some(Orientation::Long);
        }
    }

    let year_labels = labels
        .iter()
        .skip(1)
        .filter(|label| is_year_like(label, cfg))
        .count();
    if year_labels >= cfg.min_year_labels {
        return Some(Orientation::WideYearInColumns);
    }

    // The header of a year-in-rows table names the countries after its corner cell.
    let has_country_labels = labels.iter().skip(1).any(|label| !label.is_empty());
    let year_rows = body_rows(sheet, header_row, cfg)
        .filter(|&row| is_year_like(&sheet.cell(row, 0).text(), cfg))
        .count();
    if has_country_labels && year_rows >= cfg.min_year_labels {
        return Some(Orientation::WideYearInRows);
    }
    None
}

/// Ranking score of `sheet` read with its header at `header_row`.
pub fn score(
    sheet: &Sheet,
    header_row: usize,
    orientation: Orientation,
    cfg: &DetectConfig,
) -> f64 {
    let labels = sheet.labels(header_row);
    let keys = labels.iter().map(|l| normalize_key(l)).collect::<Vec<_>>();
    let country_hit = keys
        .iter()
        .any(|key| COUNTRY_ALIASES.contains(&key.as_str()) || key.contains("country"));
    let year_hit = keys.iter().any(|key| YEAR_ALIASES.contains(&key.as_str()))
        || labels.iter().any(|label| is_year_like(label, cfg));
    let hits = usize::from(country_hit) + usize::from(year_hit);

    let data_rows = sheet.rows[(header_row + 1).min(sheet.height())..]
        .iter()
        .filter(|row| row.iter().any(|cell| !cell.is_blank()))
        .count();

    orientation.bonus(cfg)
        + cfg.header_hit_bonus * hits as f64
        + cfg.row_weight * (1.0 + data_rows as f64).ln()
}

/// Candidates found in one sheet, in row order.
pub fn scan_sheet(sheet: &Sheet, cfg: &DetectConfig) -> Vec<SheetCandidate> {
    let limit = cfg.scan_rows.min(sheet.height());
    (0..limit)
        .filter(|&row| sheet.row(row).iter().any(|cell| !cell.is_blank()))
        .filter_map(|row| {
            let orientation = classify(sheet, row, cfg)?;
            Some(SheetCandidate {
                sheet_name: sheet.name.clone(),
                header_row: row,
                orientation,
                score: score(sheet, row, orientation, cfg),
            })
        })
        .collect()
}

/// Every viable candidate across the workbook, sheets in workbook order.
pub fn scan_workbook(workbook: &Workbook, cfg: &DetectConfig) -> Vec<SheetCandidate> {
    workbook
        .sheets
        .iter()
        .flat_map(|sheet| scan_sheet(sheet, cfg))
        .collect()
}

/// Highest-scoring candidate; the earliest one wins a tie.
pub fn detect_table(workbook: &Workbook, cfg: &DetectConfig) -> Result<SheetCandidate> {
    let candidates = scan_workbook(workbook, cfg);
    debug!("Scanned {} candidate header row(s)", candidates.len());
    best_candidate(candidates).ok_or(IngestError::NoTableDetected {
        sheets: workbook.sheets.len(),
    })
}

pub fn best_candidate(candidates: Vec<SheetCandidate>) -> Option<SheetCandidate> {
    let mut best: Option<SheetCandidate> = None;
    for candidate in candidates {
        if best.as_ref().is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }
    best
}
