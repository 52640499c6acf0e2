//! Payloads exchanged with the HTML summarization service.
//!
//! The service receives the table a reader is looking at (column labels, row
//! values keyed by label, and per-column yes/no shares) and answers with an
//! HTML fragment. Chat requests send every dataset plus a free-text question.
//!
//! Without a service, or when it fails, [`ReportRequest::local_html`] gives a
//! short rule-based summary of the same data.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Duration,
};

use clap::ValueEnum;
use log::{debug, info};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::{
    datasets::{COUNTRY, DatasetKind, DatasetRecord, DefinitionTag, group_definitions},
    error::{IngestError, Result},
    headers::normalize_key,
};

const REPORT_PATH: &str = "/api/report";
const REPORT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_LANGUAGE: &str = "zh";

/// Column labels shown for each dataset, paired with the record field behind
/// each label.
fn column_labels(kind: DatasetKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        DatasetKind::Definitions => &[
            ("Country", COUNTRY),
            ("Terms", "terms"),
            ("Definition", "definition"),
        ],
        DatasetKind::Eligibility => &[
            ("Country", COUNTRY),
            ("All", "all"),
            ("Income", "income"),
            ("Citizenship/PR", "pr"),
            ("Residency", "residency"),
            ("Employment", "employment"),
            ("Notes", "note"),
        ],
        DatasetKind::Reassessment => &[
            ("Country", COUNTRY),
            ("Segment", "segment"),
            ("Frequency", "frequency"),
            ("Detail", "detail"),
        ],
        DatasetKind::Priority => &[
            ("Country", COUNTRY),
            ("Waiting list", "waiting_list"),
            ("Income", "income"),
            ("Disability", "disability"),
            ("Elderly", "elderly"),
            ("Asylum seekers", "asylum"),
            ("Ethnic minority", "ethnic_minority"),
            ("Household size", "household_size"),
            ("Current housing", "current_housing"),
            ("Notes", "note"),
        ],
        DatasetKind::Characteristics => &[
            ("Country", COUNTRY),
            ("Market-based", "market_based"),
            ("Cost-based", "cost_based"),
            ("Income-based", "income_based"),
            ("Utility-based", "utility_based"),
            ("Rent ↑ regular", "rent_increase_regular"),
            ("Rent ↑ not regular", "rent_increase_irregular"),
            ("Social rent % of market", "percent_of_market"),
            ("Sitting tenant right to buy", "right_to_buy"),
            ("Notes", "note"),
        ],
    }
}

/// Fields counted by [`SortOrder::Score`]: the restrictions a `YES` flags.
fn score_fields(kind: DatasetKind) -> &'static [&'static str] {
    match kind {
        DatasetKind::Eligibility => &["income", "pr", "residency", "employment"],
        DatasetKind::Priority => &[
            "waiting_list",
            "income",
            "disability",
            "elderly",
            "asylum",
            "ethnic_minority",
            "household_size",
            "current_housing",
        ],
        DatasetKind::Characteristics => &[
            "market_based",
            "cost_based",
            "income_based",
            "utility_based",
            "rent_increase_regular",
            "rent_increase_irregular",
        ],
        DatasetKind::Definitions | DatasetKind::Reassessment => &[],
    }
}

/// Standardized reassessment frequencies, most frequent first.
pub const FREQUENCY_ORDER: &[&str] = &[
    "Annually",
    "Every 6 months",
    "Bi-annually",
    "Continuous review",
    "Lease-end / ad hoc",
    "At lease expiration (usually every 3 years)",
    "Every 5 years",
    "Varies (typically every 3 years)",
    "Depends on local management",
    "Re-assessed (timing unspecified)",
    "Yes (unspecified)",
    "No regular reassessment",
    "NA",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum SortOrder {
    /// By normalized country name.
    #[default]
    Country,
    /// Most `YES` restrictions first, then by country.
    Score,
    /// Reassessment frequency, most frequent first, then by country.
    Frequency,
}

/// Keeps rows whose `field` reads `value`, ignoring case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagFilter {
    pub field: String,
    pub value: String,
}

impl FlagFilter {
    /// Parses `field=value`, e.g. `income=yes`.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let (field, value) = raw
            .split_once('=')
            .ok_or_else(|| format!("Expected field=value, got '{raw}'"))?;
        let field = field.trim();
        if field.is_empty() {
            return Err(format!("Missing field name in '{raw}'"));
        }
        Ok(Self {
            field: field.to_string(),
            value: value.trim().to_string(),
        })
    }

    /// Record field named by `self.field`, matched against field names and
    /// display labels.
    fn resolve(&self, kind: DatasetKind) -> Result<&'static str> {
        let wanted = normalize_key(&self.field);
        column_labels(kind)
            .iter()
            .find(|(label, field)| normalize_key(field) == wanted || normalize_key(label) == wanted)
            .map(|(_, field)| *field)
            .ok_or_else(|| {
                let known = column_labels(kind)
                    .iter()
                    .map(|(_, field)| *field)
                    .collect::<Vec<_>>();
                IngestError::Config(format!(
                    "unknown {kind} field '{}' in flag filter; expected one of: {}",
                    self.field,
                    known.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportFilters {
    pub country: String,
    pub search: String,
    pub sort: SortOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<FlagFilter>,
    /// Definitions only: countries whose merged definitions carry every tag.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<DefinitionTag>,
}

impl ReportFilters {
    /// Records that pass every filter, in display order.
    pub fn apply<'a>(
        &self,
        kind: DatasetKind,
        records: &'a [DatasetRecord],
    ) -> Result<Vec<&'a DatasetRecord>> {
        let country = self.country.trim().to_lowercase();
        let search = normalize_search(&self.search);
        let flag = match &self.flag {
            Some(flag) => Some((flag.resolve(kind)?, flag.value.to_uppercase())),
            None => None,
        };
        if !self.tags.is_empty() && kind != DatasetKind::Definitions {
            return Err(IngestError::Config(format!(
                "tag filters apply to definitions, not {kind}"
            )));
        }
        let country_tags = if self.tags.is_empty() {
            HashMap::new()
        } else {
            group_definitions(records)
                .into_iter()
                .map(|group| (group.country, group.tags))
                .collect()
        };

        let mut kept = records
            .iter()
            .filter(|record| {
                country.is_empty()
                    || record.country.to_lowercase() == country
                    || record.country_normalized.to_lowercase() == country
            })
            .filter(|record| search.is_empty() || search_haystack(record).contains(&search))
            .filter(|record| {
                flag.as_ref()
                    .is_none_or(|(field, value)| record.get(field).to_uppercase() == *value)
            })
            .filter(|record| {
                self.tags.is_empty()
                    || country_tags
                        .get(&record.country)
                        .is_some_and(|tags| tags.is_superset(&self.tags))
            })
            .collect::<Vec<_>>();

        match self.sort {
            SortOrder::Country => kept.sort_by_cached_key(|record| country_key(record)),
            SortOrder::Score => {
                let fields = score_fields(kind);
                kept.sort_by_cached_key(|record| {
                    (Reverse(yes_count(record, fields)), country_key(record))
                });
            }
            SortOrder::Frequency => kept.sort_by_cached_key(|record| {
                let rank = FREQUENCY_ORDER
                    .iter()
                    .position(|label| *label == record.get("frequency"))
                    .unwrap_or(FREQUENCY_ORDER.len());
                (rank, country_key(record))
            }),
        }
        Ok(kept)
    }
}

/// Lowercases, drops accents, and collapses everything but letters and
/// digits to single spaces, so `Curaçao` matches `curacao`.
pub fn normalize_search(text: &str) -> String {
    let folded = text
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect::<String>();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn search_haystack(record: &DatasetRecord) -> String {
    [record.country.as_str(), record.country_normalized.as_str()]
        .into_iter()
        .chain(record.fields.iter().map(|(_, value)| value.as_str()))
        .map(normalize_search)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn country_key(record: &DatasetRecord) -> String {
    record.country_normalized.to_lowercase()
}

fn yes_count(record: &DatasetRecord, fields: &[&str]) -> usize {
    fields
        .iter()
        .filter(|field| record.get(field).eq_ignore_ascii_case("yes"))
        .count()
}

/// The rows and labels of a dataset as a reader sees them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VisibleTable {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl VisibleTable {
    pub fn from_records<'a>(
        kind: DatasetKind,
        records: impl IntoIterator<Item = &'a DatasetRecord>,
    ) -> Self {
        let labels = column_labels(kind);
        let columns = labels.iter().map(|(label, _)| label.to_string()).collect();
        let rows = records
            .into_iter()
            .map(|record| {
                labels
                    .iter()
                    .map(|(label, field)| {
                        (label.to_string(), Value::String(record.get(field).to_string()))
                    })
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Projection of the records that pass `filters`, in display order.
    pub fn filtered(
        kind: DatasetKind,
        records: &[DatasetRecord],
        filters: &ReportFilters,
    ) -> Result<Self> {
        Ok(Self::from_records(kind, filters.apply(kind, records)?))
    }

    pub fn cell(&self, row: usize, column: &str) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YesShareStats {
    pub yes_share_by_field: BTreeMap<String, f64>,
}

/// Per column, the share of cells mentioning `YES` among cells mentioning
/// `YES` or `NO`, rounded to two decimals. Columns with neither are left out.
pub fn compute_yes_share(table: &VisibleTable) -> YesShareStats {
    let mut yes_share_by_field = BTreeMap::new();
    for column in &table.columns {
        let values = (0..table.rows.len())
            .map(|row| table.cell(row, column).to_uppercase())
            .collect::<Vec<_>>();
        let yes = values.iter().filter(|v| v.contains("YES")).count();
        let yes_or_no = values
            .iter()
            .filter(|v| v.contains("YES") || v.contains("NO"))
            .count();
        if yes_or_no > 0 {
            let share = (yes as f64 / yes_or_no as f64 * 100.0).round() / 100.0;
            yes_share_by_field.insert(column.clone(), share);
        }
    }
    YesShareStats { yes_share_by_field }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    Card,
    Table,
    Qa,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportData {
    Table {
        columns: Vec<String>,
        rows: Vec<Map<String, Value>>,
        stats: YesShareStats,
    },
    Chat {
        datasets: BTreeMap<String, Vec<DatasetRecord>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRequest {
    pub topic: String,
    pub mode: ReportMode,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<ReportFilters>,
    pub data: ReportData,
}

impl ReportRequest {
    /// Summary of one dataset's visible table. A country filter asks for a
    /// single-country card.
    pub fn for_table(
        kind: DatasetKind,
        records: &[DatasetRecord],
        filters: ReportFilters,
        language: &str,
    ) -> Result<Self> {
        let table = VisibleTable::filtered(kind, records, &filters)?;
        let stats = compute_yes_share(&table);
        let mode = if filters.country.trim().is_empty() {
            ReportMode::Table
        } else {
            ReportMode::Card
        };
        Ok(Self {
            topic: kind.to_string(),
            mode,
            language: language.to_string(),
            question: None,
            filters: Some(filters),
            data: ReportData::Table {
                columns: table.columns,
                rows: table.rows,
                stats,
            },
        })
    }

    pub fn chat(
        question: &str,
        datasets: BTreeMap<String, Vec<DatasetRecord>>,
        language: &str,
    ) -> Self {
        Self {
            topic: "chat".to_string(),
            mode: ReportMode::Qa,
            language: language.to_string(),
            question: Some(question.trim().to_string()),
            filters: None,
            data: ReportData::Chat { datasets },
        }
    }

    /// Rule-based stand-in for the service's answer.
    pub fn local_html(&self) -> String {
        match &self.data {
            ReportData::Table { columns, rows, .. } => local_table_summary(columns, rows),
            ReportData::Chat { .. } => format!(
                "<p>(Sample answer) Received your question: \u{201c}{}\u{201d}.</p>",
                escape_html(self.question.as_deref().unwrap_or(""))
            ),
        }
    }
}

/// Fields of the first visible row listed as a summary.
const LOCAL_SUMMARY_FIELDS: usize = 6;

fn local_table_summary(columns: &[String], rows: &[Map<String, Value>]) -> String {
    let Some(first) = rows.first() else {
        return "<p>There is no visible table to summarize.</p>".to_string();
    };
    let items = columns
        .iter()
        .take(LOCAL_SUMMARY_FIELDS)
        .map(|column| {
            let value = first.get(column).and_then(Value::as_str).unwrap_or("");
            format!(
                "  <li><strong>{}:</strong> {}</li>",
                escape_html(column),
                escape_html(value)
            )
        })
        .collect::<Vec<_>>();
    format!(
        "<p><strong>Overview:</strong> a quick summary of the {} visible row(s).</p>\n<ul>\n{}\n</ul>",
        rows.len(),
        items.join("\n")
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub ok: bool,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ReportResponse {
    /// HTML of a successful answer; `ok: false` becomes an error.
    pub fn into_html(self) -> Result<String> {
        if !self.ok {
            return Err(service_failure(self.error));
        }
        Ok(self.html.unwrap_or_default())
    }
}

fn service_failure(error: Option<String>) -> IngestError {
    IngestError::Report(error.unwrap_or_else(|| "service reported failure".to_string()))
}

pub struct ReportClient {
    endpoint: String,
    http: Client,
}

impl ReportClient {
    pub fn new(base: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REPORT_TIMEOUT)
            .build()
            .map_err(|err| IngestError::Report(err.to_string()))?;
        Ok(Self {
            endpoint: format!("{}{REPORT_PATH}", base.trim_end_matches('/')),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn send(&self, request: &ReportRequest) -> Result<ReportResponse> {
        info!("Requesting {} report from {}", request.topic, self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| IngestError::Report(err.to_string()))?;
        let parsed: ReportResponse = response
            .json()
            .map_err(|err| IngestError::Report(format!("malformed response: {err}")))?;
        debug!("Report service answered ok={}", parsed.ok);
        if !parsed.ok {
            return Err(service_failure(parsed.error));
        }
        Ok(parsed)
    }
}
