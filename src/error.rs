//! Error taxonomy for dataset ingestion.
//!
//! Transport and structural failures stop the pipeline and surface here.
//! Row-level numeric failures never do; the cleaner absorbs them and only the
//! record count reflects them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The source could not be fetched or read.
    #[error("could not load dataset from {source_name}: {reason}")]
    Transport { source_name: String, reason: String },

    /// The source was fetched but holds no rows at all.
    #[error("dataset {source_name} is empty")]
    EmptySource { source_name: String },

    /// No sheet and header row matched any supported table shape.
    #[error(
        "could not auto-detect a table in any of {sheets} sheet(s); choose a sheet, header row and orientation explicitly"
    )]
    NoTableDetected { sheets: usize },

    /// A caller-supplied field-to-column assignment does not fit the header.
    #[error("cannot map field '{field}': {reason}")]
    ColumnOverride { field: String, reason: String },

    #[error("sheet '{name}' not found in workbook")]
    SheetNotFound { name: String },

    /// A required canonical column has no matching header.
    #[error("missing required field '{field}'; expected a header matching one of: {aliases}")]
    MissingField { field: String, aliases: String },

    /// Everything was dropped during cleaning or record building.
    #[error("no usable data in {source_name} after cleaning")]
    NoUsableData { source_name: String },

    #[error("failed to read workbook: {0}")]
    Workbook(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The summarization endpoint rejected the request or answered `ok: false`.
    #[error("report request failed: {0}")]
    Report(String),
}

impl IngestError {
    pub fn missing_field(field: &str, aliases: &[&str]) -> Self {
        Self::MissingField {
            field: field.to_string(),
            aliases: aliases.join(", "),
        }
    }

    /// True when choosing the sheet, header row and orientation by hand can
    /// recover from the failure.
    pub fn needs_manual_selection(&self) -> bool {
        matches!(self, Self::NoTableDetected { .. })
    }

    /// True when pointing a field at a column by hand can recover from the
    /// failure.
    pub fn needs_column_mapping(&self) -> bool {
        matches!(self, Self::MissingField { .. })
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
