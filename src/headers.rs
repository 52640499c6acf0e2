//! Header normalization and alias resolution.
//!
//! Real-world source files spell the same column many ways
//! (`Country Normalized`, `country_normalized`, `COUNTRY-NORMALIZED`). Headers
//! are compared after [`normalize_key`], which keeps only lowercase ASCII
//! letters and digits, against ordered alias lists of already-normalized
//! spellings.
//!
//! When no alias matches, [`ColumnOverrides`] let the caller point a field at
//! a column by position instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

pub fn normalize_key(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Column of the first header equal to an alias, trying aliases in order.
pub fn resolve_alias<S: AsRef<str>>(headers: &[S], aliases: &[&str]) -> Option<usize> {
    let keys = headers
        .iter()
        .map(|h| normalize_key(h.as_ref()))
        .collect::<Vec<_>>();
    resolve_normalized(&keys, aliases)
}

fn resolve_normalized(keys: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| keys.iter().position(|key| key == alias))
}

/// What a field reads as when its column is absent or its cell is blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// The column must exist.
    Required,
    Empty,
    NotAvailable,
}

impl Fallback {
    pub fn value(self) -> &'static str {
        match self {
            Fallback::NotAvailable => "NA",
            Fallback::Required | Fallback::Empty => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub fallback: Fallback,
}

impl FieldSpec {
    pub const fn required(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            name,
            aliases,
            fallback: Fallback::Required,
        }
    }

    pub const fn optional(
        name: &'static str,
        aliases: &'static [&'static str],
        fallback: Fallback,
    ) -> Self {
        Self {
            name,
            aliases,
            fallback,
        }
    }
}

/// Zero-based field-to-column assignments that take precedence over alias
/// matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnOverrides(BTreeMap<String, usize>);

impl ColumnOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, column: usize) {
        self.0.insert(field.into(), column);
    }

    pub fn get(&self, field: &str) -> Option<usize> {
        self.0.get(field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rejects overrides naming a field outside `fields` or a column past
    /// `width`.
    fn check(&self, fields: &[FieldSpec], width: usize) -> Result<()> {
        for (field, &column) in &self.0 {
            if !fields.iter().any(|spec| spec.name == field) {
                let known = fields.iter().map(|spec| spec.name).collect::<Vec<_>>();
                return Err(IngestError::ColumnOverride {
                    field: field.clone(),
                    reason: format!("unknown field; expected one of: {}", known.join(", ")),
                });
            }
            if column >= width {
                return Err(IngestError::ColumnOverride {
                    field: field.clone(),
                    reason: format!("column {column} is past the last header column {}", width.saturating_sub(1)),
                });
            }
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<(S, usize)> for ColumnOverrides {
    fn from_iter<I: IntoIterator<Item = (S, usize)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(field, col)| (field.into(), col)).collect())
    }
}

/// Parses `field=column`, e.g. `value=3`.
pub fn parse_column_override(value: &str) -> std::result::Result<(String, usize), String> {
    let (field, column) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected field=column, got '{value}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("Missing field name in '{value}'"));
    }
    let column = column
        .trim()
        .parse::<usize>()
        .map_err(|err| format!("Invalid column index in '{value}': {err}"))?;
    Ok((field.to_string(), column))
}

/// Canonical field name to column position for one header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderIndex {
    columns: BTreeMap<&'static str, Option<usize>>,
}

impl HeaderIndex {
    /// Resolves every field; fails only when a required field has no column.
    pub fn build<S: AsRef<str>>(headers: &[S], fields: &[FieldSpec]) -> Result<Self> {
        Self::build_with(headers, fields, &ColumnOverrides::default())
    }

    /// Like [`HeaderIndex::build`], with `overrides` winning over aliases.
    pub fn build_with<S: AsRef<str>>(
        headers: &[S],
        fields: &[FieldSpec],
        overrides: &ColumnOverrides,
    ) -> Result<Self> {
        overrides.check(fields, headers.len())?;
        let keys = headers
            .iter()
            .map(|h| normalize_key(h.as_ref()))
            .collect::<Vec<_>>();
        let mut columns = BTreeMap::new();
        for field in fields {
            let position = overrides
                .get(field.name)
                .or_else(|| resolve_normalized(&keys, field.aliases));
            if position.is_none() && field.fallback == Fallback::Required {
                return Err(IngestError::missing_field(field.name, field.aliases));
            }
            columns.insert(field.name, position);
        }
        Ok(Self { columns })
    }

    pub fn column(&self, field: &str) -> Option<usize> {
        self.columns.get(field).copied().flatten()
    }

    /// Column of a field [`HeaderIndex::build`] guaranteed to resolve.
    pub fn required_column(&self, field: &str) -> Result<usize> {
        self.column(field)
            .ok_or_else(|| IngestError::missing_field(field, &[]))
    }

    pub fn resolved(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.columns
            .iter()
            .filter_map(|(name, idx)| idx.map(|idx| (*name, idx)))
    }

    pub fn missing(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .filter(|(_, idx)| idx.is_none())
            .map(|(name, _)| *name)
    }
}
