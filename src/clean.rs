//! Numeric coercion and row filtering for melted observations.
//!
//! Statistical tables annotate values in place (`1,234`, `56%`, `12.3e`,
//! `7¹`, `(p) 4.1`). [`to_number`] strips those markers before parsing; any
//! value that still fails to parse drops its row silently.

use log::debug;
use regex::Regex;
use serde::Serialize;

use crate::{
    config::CleanConfig,
    error::{IngestError, Result},
    melt::RawObservation,
    workbook::Cell,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRecord {
    pub country: String,
    pub year: Option<String>,
    pub value: f64,
}

impl From<ObservationRecord> for RawObservation {
    fn from(record: ObservationRecord) -> Self {
        RawObservation {
            country: record.country,
            year: record.year,
            value: Cell::Number(record.value),
        }
    }
}

fn is_annotation(ch: char) -> bool {
    ch.is_alphabetic()
        || ch.is_whitespace()
        || matches!(
            ch,
            '¹' | '²' | '³' | '⁰'..='⁹' | '[' | ']' | '(' | ')' | '*' | '†' | '‡' | '%'
        )
}

/// Finite number held by `cell`, or `None` when the cell has no usable value.
///
/// Footnote markers, units and brackets are trimmed from both ends of the
/// text; inside what remains only thousands separators and spaces are
/// removed. Anything else left inside (`1x3`) makes the cell unusable rather
/// than silently changing its value.
pub fn to_number(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(n) => n.is_finite().then_some(*n),
        Cell::Empty => None,
        other => {
            let text = other.to_string();
            let core = text.trim_matches(is_annotation);
            let stripped = core
                .chars()
                .filter(|ch| *ch != ',' && !ch.is_whitespace())
                .collect::<String>();
            if stripped.is_empty() || stripped == "-" {
                return None;
            }
            stripped.parse::<f64>().ok().filter(|n| n.is_finite())
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowCleaner {
    footnote: Option<Regex>,
    excluded: Vec<String>,
}

impl RowCleaner {
    pub fn new(cfg: &CleanConfig) -> Result<Self> {
        let footnote = if cfg.footnote_prefixes.is_empty() {
            None
        } else {
            let alternation = cfg
                .footnote_prefixes
                .iter()
                .map(|prefix| regex::escape(prefix))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!(r"(?i)^(?:{alternation})\s*:");
            Some(
                Regex::new(&pattern)
                    .map_err(|err| IngestError::Config(format!("footnote prefixes: {err}")))?,
            )
        };
        Ok(Self {
            footnote,
            excluded: cfg.excluded_countries.clone(),
        })
    }

    fn is_footnote(&self, country: &str) -> bool {
        self.footnote
            .as_ref()
            .is_some_and(|regex| regex.is_match(country))
    }

    fn is_excluded(&self, country: &str) -> bool {
        self.excluded.iter().any(|code| code == country)
    }

    pub fn clean_one(&self, raw: &RawObservation) -> Option<ObservationRecord> {
        let country = raw.country.trim();
        if country.is_empty() || raw.value.is_blank() {
            return None;
        }
        if self.is_footnote(country) || self.is_excluded(country) {
            return None;
        }
        let value = to_number(&raw.value)?;
        Some(ObservationRecord {
            country: country.to_string(),
            year: raw.year.clone(),
            value,
        })
    }

    /// Surviving records in input order.
    pub fn clean(&self, raws: &[RawObservation]) -> Vec<ObservationRecord> {
        let records = raws
            .iter()
            .filter_map(|raw| self.clean_one(raw))
            .collect::<Vec<_>>();
        let dropped = raws.len() - records.len();
        if dropped > 0 {
            debug!("Dropped {dropped} of {} raw observation(s)", raws.len());
        }
        records
    }
}

pub fn clean_observations(
    raws: &[RawObservation],
    cfg: &CleanConfig,
) -> Result<Vec<ObservationRecord>> {
    Ok(RowCleaner::new(cfg)?.clean(raws))
}
