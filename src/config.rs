//! Tuning knobs for table detection and row cleaning.
//!
//! Every heuristic constant used by [`crate::detect`], [`crate::melt`] and
//! [`crate::clean`] lives here with a default, and the whole set can be
//! overridden from a YAML file:
//!
//! ```yaml
//! detect:
//!   scan_rows: 80
//!   long_bonus: 4.0
//! clean:
//!   excluded_countries: ["OECD"]
//! columns:
//!   value: 3
//! ```

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{IngestError, Result},
    headers::ColumnOverrides,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub detect: DetectConfig,
    pub clean: CleanConfig,
    /// Long-table fields mapped to zero-based columns by hand.
    pub columns: ColumnOverrides,
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| IngestError::Config(format!("reading {path:?}: {err}")))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: IngestConfig = serde_yaml::from_str(raw)
            .map_err(|err| IngestError::Config(err.to_string()))?;
        config.detect.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectConfig {
    /// Rows per sheet considered as header candidates.
    pub scan_rows: usize,
    /// Body rows inspected below a candidate header when counting year-like cells.
    pub probe_rows: usize,
    /// Year-like header labels (or first-column values) needed for a wide table.
    pub min_year_labels: usize,
    /// Year-like values a body column needs to stand in for a missing year header.
    pub min_year_cells: usize,
    pub year_min: u32,
    pub year_max: u32,
    pub long_bonus: f64,
    pub wide_columns_bonus: f64,
    pub wide_rows_bonus: f64,
    /// Added once for a country-like header cell and once for a year-like one.
    pub header_hit_bonus: f64,
    /// Weight of `ln(1 + data_rows)`.
    pub row_weight: f64,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            scan_rows: 200,
            probe_rows: 200,
            min_year_labels: 3,
            min_year_cells: 3,
            year_min: 1850,
            year_max: 2100,
            long_bonus: 3.0,
            wide_columns_bonus: 2.0,
            wide_rows_bonus: 1.5,
            header_hit_bonus: 0.5,
            row_weight: 0.25,
        }
    }
}

impl DetectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.year_min > self.year_max {
            return Err(IngestError::Config(format!(
                "year_min ({}) must not exceed year_max ({})",
                self.year_min, self.year_max
            )));
        }
        if !(1000..=9999).contains(&self.year_min) || !(1000..=9999).contains(&self.year_max) {
            return Err(IngestError::Config(
                "year bounds must be four-digit years".to_string(),
            ));
        }
        if self.scan_rows == 0 {
            return Err(IngestError::Config("scan_rows must be positive".to_string()));
        }
        Ok(())
    }
}

pub const DEFAULT_EXCLUDED_COUNTRIES: &[&str] = &["OECD", "OECD average", "EU", "EU27"];
pub const DEFAULT_FOOTNOTE_PREFIXES: &[&str] = &["source", "sources", "note", "notes"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanConfig {
    /// Country labels dropped from every output, matched exactly.
    pub excluded_countries: Vec<String>,
    /// Lowercase prefixes that, followed by `:`, mark a footnote line.
    pub footnote_prefixes: Vec<String>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            excluded_countries: DEFAULT_EXCLUDED_COUNTRIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            footnote_prefixes: DEFAULT_FOOTNOTE_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let config = IngestConfig::from_yaml("detect:\n  scan_rows: 40\n").unwrap();
        assert_eq!(config.detect.scan_rows, 40);
        assert_eq!(config.detect.year_min, 1850);
        assert_eq!(config.clean, CleanConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = IngestConfig::from_yaml("detect:\n  scan_row: 40\n").unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn inverted_year_bounds_are_rejected() {
        let err =
            IngestConfig::from_yaml("detect:\n  year_min: 2100\n  year_max: 1900\n").unwrap_err();
        assert!(err.to_string().contains("year_min"));
    }

    #[test]
    fn column_overrides_load_from_yaml() {
        let config = IngestConfig::from_yaml("columns:\n  value: 3\n  country: 0\n").unwrap();
        assert_eq!(config.columns.get("value"), Some(3));
        assert_eq!(config.columns.get("year"), None);
    }

    #[test]
    fn empty_document_is_default() {
        let config = IngestConfig::from_yaml("{}").unwrap();
        assert_eq!(config, IngestConfig::default());
    }
}
