//! Per-dataset alias profiles and the CSV-path record builder.
//!
//! The five published CSV datasets share one ingestion routine,
//! parameterised by a [`DatasetProfile`]: an ordered table of canonical fields,
//! each with the header spellings observed in the wild and the marker used
//! when the column is missing.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::OnceLock,
};

use clap::ValueEnum;
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};

use crate::{
    csv_text::{Row, cell},
    error::Result,
    headers::{ColumnOverrides, Fallback, FieldSpec, HeaderIndex},
};

pub const COUNTRY: &str = "country";
pub const COUNTRY_NORMALIZED: &str = "country_normalized";

const COUNTRY_FIELD: FieldSpec = FieldSpec::required(COUNTRY, &["country"]);
const COUNTRY_NORMALIZED_FIELD: FieldSpec = FieldSpec::optional(
    COUNTRY_NORMALIZED,
    &["countrynormalized", "countryclean", "countrynorm"],
    Fallback::Empty,
);

const DEFINITION_FIELDS: &[FieldSpec] = &[
    COUNTRY_FIELD,
    FieldSpec::optional("terms", &["termsused", "terms"], Fallback::Empty),
    FieldSpec::optional(
        "definition",
        &[
            "definition",
            "definitionandsummaryoverview",
            "definitionoverview",
        ],
        Fallback::Empty,
    ),
];

const ELIGIBILITY_FIELDS: &[FieldSpec] = &[
    COUNTRY_FIELD,
    COUNTRY_NORMALIZED_FIELD,
    FieldSpec::optional(
        "all",
        &["alleligible", "allareeligible", "all"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "income",
        &["incomethreshold", "income"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "pr",
        &[
            "citizenshiporpr",
            "citizenshippermresidency",
            "citizenship",
            "permresidency",
        ],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "residency",
        &["localresidency", "residency", "local"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional("employment", &["employment"], Fallback::NotAvailable),
    FieldSpec::optional("note", &["othernotes", "notes", "note"], Fallback::Empty),
];

const REASSESSMENT_FIELDS: &[FieldSpec] = &[
    COUNTRY_FIELD,
    COUNTRY_NORMALIZED_FIELD,
    FieldSpec::optional("segment", &["segment", "scheme", "program"], Fallback::Empty),
    FieldSpec::optional(
        "frequency",
        &[
            "standardizedfrequency",
            "frequency",
            "freq",
            "reassessmentfrequency",
        ],
        Fallback::Empty,
    ),
    FieldSpec::optional(
        "detail",
        &["detail", "notes", "othernotes", "remark", "remarks"],
        Fallback::Empty,
    ),
];

const PRIORITY_FIELDS: &[FieldSpec] = &[
    COUNTRY_FIELD,
    COUNTRY_NORMALIZED_FIELD,
    FieldSpec::optional(
        "waiting_list",
        &["timeonwaitinglist", "waitinglist", "wait"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional("income", &["incomelevel", "income"], Fallback::NotAvailable),
    FieldSpec::optional(
        "disability",
        &["disability", "disabled"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "elderly",
        &["elderly", "older", "senior"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "asylum",
        &["asylumseekers", "asylum"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "ethnic_minority",
        &[
            "ethnicorracialminority",
            "ethnicminority",
            "racialminority",
            "minority",
        ],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "household_size",
        &[
            "householdcompositionorsize",
            "householdsize",
            "householdcomposition",
        ],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "current_housing",
        &[
            "currenthousingconditions",
            "housingconditions",
            "currenthousing",
        ],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional("note", &["othernotes", "notes", "note"], Fallback::Empty),
];

const CHARACTERISTICS_FIELDS: &[FieldSpec] = &[
    COUNTRY_FIELD,
    COUNTRY_NORMALIZED_FIELD,
    FieldSpec::optional(
        "market_based",
        &["rentsettingmarketbased", "marketbased"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "cost_based",
        &["rentsettingcostbased", "costbased"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "income_based",
        &["rentsettingincomebased", "incomebased"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "utility_based",
        &["rentsettingutilitybased", "utilitybased"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "rent_increase_regular",
        &["rentincreaseregular", "rentincreasereg"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "rent_increase_irregular",
        &[
            "rentincreasenotregular",
            "rentincreasenonregular",
            "notregular",
        ],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "percent_of_market",
        &[
            "socialrentpctofmarket",
            "socialrentpercentagemarket",
            "socialrentshareofmarket",
            "pct",
        ],
        Fallback::Empty,
    ),
    FieldSpec::optional(
        "right_to_buy",
        &["sittingtenantrighttobuynorm", "righttobuynorm", "righttobuy"],
        Fallback::NotAvailable,
    ),
    FieldSpec::optional(
        "note",
        &[
            "sittingtenantrighttobuynotes",
            "righttobuynotes",
            "notes",
            "othernotes",
        ],
        Fallback::Empty,
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum DatasetKind {
    Definitions,
    Eligibility,
    Reassessment,
    Priority,
    Characteristics,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 5] = [
        DatasetKind::Definitions,
        DatasetKind::Eligibility,
        DatasetKind::Reassessment,
        DatasetKind::Priority,
        DatasetKind::Characteristics,
    ];

    pub fn profile(self) -> DatasetProfile {
        let fields = match self {
            DatasetKind::Definitions => DEFINITION_FIELDS,
            DatasetKind::Eligibility => ELIGIBILITY_FIELDS,
            DatasetKind::Reassessment => REASSESSMENT_FIELDS,
            DatasetKind::Priority => PRIORITY_FIELDS,
            DatasetKind::Characteristics => CHARACTERISTICS_FIELDS,
        };
        DatasetProfile { kind: self, fields }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Definitions => "definitions",
            DatasetKind::Eligibility => "eligibility",
            DatasetKind::Reassessment => "reassessment",
            DatasetKind::Priority => "priority",
            DatasetKind::Characteristics => "characteristics",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetProfile {
    pub kind: DatasetKind,
    pub fields: &'static [FieldSpec],
}

impl DatasetProfile {
    /// Fields carried in [`DatasetRecord::fields`], in profile order.
    pub fn value_fields(&self) -> impl Iterator<Item = &'static FieldSpec> + '_ {
        self.fields
            .iter()
            .filter(|f| f.name != COUNTRY && f.name != COUNTRY_NORMALIZED)
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.value_fields().map(|f| f.name).collect()
    }
}

/// One body row of a CSV dataset. `fields` follows profile order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    pub country: String,
    pub country_normalized: String,
    pub fields: Vec<(&'static str, String)>,
}

impl Serialize for DatasetRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        map.serialize_entry(COUNTRY, &self.country)?;
        map.serialize_entry(COUNTRY_NORMALIZED, &self.country_normalized)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl DatasetRecord {
    /// Value of `field`, or `""` when the profile has no such field.
    pub fn get(&self, field: &str) -> &str {
        match field {
            COUNTRY => &self.country,
            COUNTRY_NORMALIZED => &self.country_normalized,
            _ => self
                .fields
                .iter()
                .find(|(name, _)| *name == field)
                .map(|(_, value)| value.as_str())
                .unwrap_or(""),
        }
    }
}

/// Builds one record per body row. Rows with a blank country are skipped;
/// for definitions, so are rows with a blank definition.
pub fn load_dataset(kind: DatasetKind, rows: &[Row]) -> Result<Vec<DatasetRecord>> {
    load_dataset_mapped(kind, rows, &ColumnOverrides::default())
}

/// [`load_dataset`] with fields pointed at columns by hand where the headers
/// do not match any alias.
pub fn load_dataset_mapped(
    kind: DatasetKind,
    rows: &[Row],
    columns: &ColumnOverrides,
) -> Result<Vec<DatasetRecord>> {
    let Some((header, body)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let profile = kind.profile();
    let index = HeaderIndex::build_with(header, profile.fields, columns)?;
    let country_col = index.required_column(COUNTRY)?;

    let mut records = Vec::with_capacity(body.len());
    for row in body {
        let country = cell(row, country_col).trim();
        if country.is_empty() {
            continue;
        }
        let fields = profile
            .value_fields()
            .map(|field| (field.name, field_value(row, index.column(field.name), field)))
            .collect::<Vec<_>>();
        let country_normalized = index
            .column(COUNTRY_NORMALIZED)
            .map(|idx| cell(row, idx).trim())
            .filter(|value| !value.is_empty())
            .unwrap_or(country)
            .to_string();
        let record = DatasetRecord {
            country: country.to_string(),
            country_normalized,
            fields,
        };
        if kind == DatasetKind::Definitions && record.get("definition").is_empty() {
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

fn field_value(row: &[String], column: Option<usize>, field: &FieldSpec) -> String {
    match column.and_then(|idx| row.get(idx)) {
        Some(value) => value.trim().to_string(),
        None => field.fallback.value().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum DefinitionTag {
    PublicProvider,
    NonProfitProvider,
    BelowMarketRent,
    IncomeTargeting,
    SubsidyOrLoans,
    LegallyDefined,
}

impl DefinitionTag {
    pub fn as_str(self) -> &'static str {
        match self {
            DefinitionTag::PublicProvider => "public_provider",
            DefinitionTag::NonProfitProvider => "non_profit_provider",
            DefinitionTag::BelowMarketRent => "below_market_rent",
            DefinitionTag::IncomeTargeting => "income_targeting",
            DefinitionTag::SubsidyOrLoans => "subsidy_or_loans",
            DefinitionTag::LegallyDefined => "legally_defined",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            DefinitionTag::PublicProvider => {
                r"(?i)(public|municipal|state[-\s]?owned|government|local authority|authorities)"
            }
            DefinitionTag::NonProfitProvider => r"(?i)(non[-\s]?profit|co-?operative|cooperative)",
            DefinitionTag::BelowMarketRent => {
                r"(?i)(below market|rent cap|capped rent|regulated rent|moderate rent)"
            }
            DefinitionTag::IncomeTargeting => {
                r"(?i)(income limit|low[-\s]?income|vulnerable|eligible|means[-\s]?test)"
            }
            DefinitionTag::SubsidyOrLoans => {
                r"(?i)(subsid(y|ies)|grants?|loans?|tax|preferential rate)"
            }
            DefinitionTag::LegallyDefined => r"(?i)(law|act|defined in law|regulation|legal)",
        }
    }

    const ALL: [DefinitionTag; 6] = [
        DefinitionTag::PublicProvider,
        DefinitionTag::NonProfitProvider,
        DefinitionTag::BelowMarketRent,
        DefinitionTag::IncomeTargeting,
        DefinitionTag::SubsidyOrLoans,
        DefinitionTag::LegallyDefined,
    ];
}

static TAG_RULES: OnceLock<Vec<(DefinitionTag, Regex)>> = OnceLock::new();

fn tag_rules() -> &'static [(DefinitionTag, Regex)] {
    TAG_RULES.get_or_init(|| {
        DefinitionTag::ALL
            .iter()
            .map(|tag| {
                let regex = Regex::new(tag.pattern()).expect("tag pattern should compile");
                (*tag, regex)
            })
            .collect()
    })
}

pub fn tag_text(terms: &str, definition: &str) -> BTreeSet<DefinitionTag> {
    let haystack = format!("{terms}\n{definition}");
    tag_rules()
        .iter()
        .filter(|(_, regex)| regex.is_match(&haystack))
        .map(|(tag, _)| *tag)
        .collect()
}

const SUMMARY_CHARS: usize = 200;
const SUMMARY_MIN_SENTENCE: usize = 60;

/// Whitespace-collapsed preview, cut at a sentence stop when one falls late
/// enough, otherwise with an ellipsis.
pub fn summarize(text: &str, limit: usize) -> String {
    let collapsed = text.split_whitespace().join(" ");
    if collapsed.chars().count() <= limit {
        return collapsed;
    }
    let cut = collapsed.chars().take(limit).collect::<Vec<_>>();
    let stop = cut.iter().rposition(|c| matches!(c, '.' | '。'));
    match stop {
        Some(idx) if idx > SUMMARY_MIN_SENTENCE => cut[..=idx].iter().collect(),
        _ => {
            let mut out = cut.into_iter().collect::<String>();
            out.push('…');
            out
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionItem {
    pub terms: String,
    pub definition: String,
    pub summary: String,
    pub tags: BTreeSet<DefinitionTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionGroup {
    pub country: String,
    pub items: Vec<DefinitionItem>,
    pub terms_joined: String,
    pub tags: BTreeSet<DefinitionTag>,
}

/// Merges definition records by country, sorted by country name.
pub fn group_definitions(records: &[DatasetRecord]) -> Vec<DefinitionGroup> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<DefinitionGroup> = Vec::new();

    for record in records {
        let terms = record.get("terms").to_string();
        let definition = record.get("definition").to_string();
        let item = DefinitionItem {
            tags: tag_text(&terms, &definition),
            summary: summarize(&definition, SUMMARY_CHARS),
            terms,
            definition,
        };
        let slot = *positions.entry(record.country.as_str()).or_insert_with(|| {
            groups.push(DefinitionGroup {
                country: record.country.clone(),
                items: Vec::new(),
                terms_joined: String::new(),
                tags: BTreeSet::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.tags.extend(item.tags.iter().copied());
        group.items.push(item);
    }

    for group in &mut groups {
        group.terms_joined = group
            .items
            .iter()
            .map(|item| item.terms.as_str())
            .filter(|terms| !terms.is_empty())
            .unique()
            .join("；");
    }
    groups.sort_by(|a, b| {
        a.country
            .to_lowercase()
            .cmp(&b.country.to_lowercase())
            .then_with(|| a.country.cmp(&b.country))
    });
    groups
}
