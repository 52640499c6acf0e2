//! End-to-end ingestion and the snapshot store that publishes its results.
//!
//! A load produces an immutable [`IngestSnapshot`]. Loads are numbered when
//! they start, and [`SnapshotStore::commit`] refuses a result whose load
//! started before the snapshot already installed, so a slow fetch can never
//! overwrite a newer one.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::{
    clean::{ObservationRecord, RowCleaner},
    config::IngestConfig,
    csv_text::parse_csv_text,
    datasets::{DatasetKind, DatasetRecord, DefinitionGroup, group_definitions, load_dataset_mapped},
    detect::{self, Orientation, SheetCandidate},
    error::{IngestError, Result},
    headers::ColumnOverrides,
    melt::melt_candidate,
    workbook::Workbook,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetPayload {
    pub kind: DatasetKind,
    pub records: Vec<DatasetRecord>,
    /// Populated for [`DatasetKind::Definitions`] only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<DefinitionGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationPayload {
    pub candidate: SheetCandidate,
    pub records: Vec<ObservationRecord>,
    /// Observations produced by the melt before cleaning.
    pub raw_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotPayload {
    Dataset(DatasetPayload),
    Observations(ObservationPayload),
}

impl SnapshotPayload {
    pub fn record_count(&self) -> usize {
        match self {
            SnapshotPayload::Dataset(payload) => payload.records.len(),
            SnapshotPayload::Observations(payload) => payload.records.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSnapshot {
    pub generation: u64,
    pub source: String,
    pub loaded_at: DateTime<Utc>,
    pub payload: SnapshotPayload,
}

/// How the table inside a workbook is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Auto,
    /// Best candidate within one named sheet.
    Sheet(String),
    Manual {
        sheet: String,
        header_row: usize,
        orientation: Orientation,
    },
}

pub fn ingest_dataset(kind: DatasetKind, text: &str) -> Result<DatasetPayload> {
    ingest_dataset_mapped(kind, text, &ColumnOverrides::default())
}

pub fn ingest_dataset_mapped(
    kind: DatasetKind,
    text: &str,
    columns: &ColumnOverrides,
) -> Result<DatasetPayload> {
    let rows = parse_csv_text(text);
    if rows.iter().all(|row| row.iter().all(|cell| cell.trim().is_empty())) {
        return Err(IngestError::EmptySource {
            source_name: kind.to_string(),
        });
    }
    let records = load_dataset_mapped(kind, &rows, columns)?;
    if records.is_empty() {
        return Err(IngestError::NoUsableData {
            source_name: kind.to_string(),
        });
    }
    let groups = match kind {
        DatasetKind::Definitions => group_definitions(&records),
        _ => Vec::new(),
    };
    info!(
        "Loaded {} {} record(s) from {} row(s)",
        records.len(),
        kind,
        rows.len().saturating_sub(1)
    );
    Ok(DatasetPayload {
        kind,
        records,
        groups,
    })
}

pub fn select_candidate(
    workbook: &Workbook,
    selection: &Selection,
    cfg: &IngestConfig,
) -> Result<SheetCandidate> {
    match selection {
        Selection::Auto => detect::detect_table(workbook, &cfg.detect),
        Selection::Sheet(name) => {
            let sheet = workbook.sheet(name)?;
            detect::best_candidate(detect::scan_sheet(sheet, &cfg.detect))
                .ok_or(IngestError::NoTableDetected { sheets: 1 })
        }
        Selection::Manual {
            sheet,
            header_row,
            orientation,
        } => {
            let found = workbook.sheet(sheet)?;
            Ok(SheetCandidate {
                sheet_name: sheet.clone(),
                header_row: *header_row,
                orientation: *orientation,
                score: detect::score(found, *header_row, *orientation, &cfg.detect),
            })
        }
    }
}

pub fn ingest_workbook(
    workbook: &Workbook,
    selection: &Selection,
    cfg: &IngestConfig,
) -> Result<ObservationPayload> {
    if workbook.sheets.iter().all(|sheet| sheet.height() == 0) {
        return Err(IngestError::EmptySource {
            source_name: workbook.sheet_names().join(", "),
        });
    }
    let candidate = select_candidate(workbook, selection, cfg)?;
    debug!(
        "Using sheet '{}' header row {} as {} (score {:.3})",
        candidate.sheet_name, candidate.header_row, candidate.orientation, candidate.score
    );
    let raws = melt_candidate(workbook, &candidate, &cfg.columns, &cfg.detect)?;
    let records = RowCleaner::new(&cfg.clean)?.clean(&raws);
    if records.is_empty() {
        return Err(IngestError::NoUsableData {
            source_name: candidate.sheet_name,
        });
    }
    info!(
        "Melted {} observation(s) from sheet '{}' ({} kept after cleaning)",
        raws.len(),
        candidate.sheet_name,
        records.len()
    );
    Ok(ObservationPayload {
        raw_count: raws.len(),
        candidate,
        records,
    })
}

/// Handed out when a load starts; redeemed by [`SnapshotStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    pub fn generation(self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    issued: AtomicU64,
    current: Mutex<Option<Arc<IngestSnapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_load(&self) -> LoadTicket {
        LoadTicket {
            generation: self.issued.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    /// Installs the result of `ticket`'s load unless a newer load has already
    /// committed. Returns whether the snapshot was installed.
    pub fn commit(
        &self,
        ticket: LoadTicket,
        source: impl Into<String>,
        payload: SnapshotPayload,
    ) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref() {
            if existing.generation > ticket.generation {
                debug!(
                    "Discarding load {} superseded by load {}",
                    ticket.generation, existing.generation
                );
                return false;
            }
        }
        *current = Some(Arc::new(IngestSnapshot {
            generation: ticket.generation,
            source: source.into(),
            loaded_at: Utc::now(),
            payload,
        }));
        true
    }

    pub fn current(&self) -> Option<Arc<IngestSnapshot>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observations(country: &str) -> SnapshotPayload {
        SnapshotPayload::Observations(ObservationPayload {
            candidate: SheetCandidate {
                sheet_name: "s".into(),
                header_row: 0,
                orientation: Orientation::Long,
                score: 1.0,
            },
            records: vec![ObservationRecord {
                country: country.into(),
                year: None,
                value: 1.0,
            }],
            raw_count: 1,
        })
    }

    #[test]
    fn dataset_ingest_groups_definitions() {
        let payload = ingest_dataset(
            DatasetKind::Definitions,
            "Country,Terms used,Definition\nJapan,Public housing,Owned by municipal governments.\n",
        )
        .unwrap();
        assert_eq!(payload.records.len(), 1);
        assert_eq!(payload.groups.len(), 1);

        let payload =
            ingest_dataset(DatasetKind::Reassessment, "Country,Frequency\nKorea,Annual\n").unwrap();
        assert!(payload.groups.is_empty());
    }

    #[test]
    fn empty_text_is_an_empty_source() {
        let err = ingest_dataset(DatasetKind::Eligibility, "\u{feff}").unwrap_err();
        assert!(matches!(err, IngestError::EmptySource { .. }));
        let err = ingest_dataset(DatasetKind::Eligibility, "\n\n").unwrap_err();
        assert!(matches!(err, IngestError::EmptySource { .. }));
    }

    #[test]
    fn header_only_has_no_usable_data() {
        let err = ingest_dataset(DatasetKind::Eligibility, "Country,Income\n").unwrap_err();
        assert!(matches!(err, IngestError::NoUsableData { .. }));
    }

    #[test]
    fn workbook_ingest_detects_and_cleans() {
        let workbook = Workbook::from_csv_text(
            "stock",
            "Social rental stock (% of dwellings),,,\n\
             Country,2018,2019,2020\n\
             Japan,3.1,3.0,2.9e\n\
             OECD,7,7,7\n\
             Source: OECD AHD,,,\n",
        );
        let payload = ingest_workbook(&workbook, &Selection::Auto, &IngestConfig::default()).unwrap();
        assert_eq!(payload.candidate.header_row, 1);
        assert_eq!(payload.raw_count, 9);
        assert_eq!(payload.records.len(), 3);
        assert_eq!(payload.records[2].value, 2.9);
    }

    #[test]
    fn year_in_rows_table_below_title_melts_fully() {
        let workbook = Workbook::from_csv_text(
            "rents",
            "Table 2. Social rent levels\n,Japan,Korea,France\n2018,1,2,3\n2019,4,5,6\n2020,7,8,9\n",
        );
        let payload = ingest_workbook(&workbook, &Selection::Auto, &IngestConfig::default()).unwrap();
        assert_eq!(payload.candidate.header_row, 1);
        assert_eq!(payload.records.len(), 9);
        assert_eq!(payload.records[0].country, "Japan");
        assert_eq!(payload.records[8].value, 9.0);
    }

    #[test]
    fn manual_long_table_uses_configured_columns() {
        let workbook = Workbook::from_csv_text(
            "rents",
            "Member,Period,Obs\nAUT,2019,22.4\nAUT,2020,21.9\n",
        );
        let selection = Selection::Manual {
            sheet: "rents".into(),
            header_row: 0,
            orientation: Orientation::Long,
        };
        let err = ingest_workbook(&workbook, &selection, &IngestConfig::default()).unwrap_err();
        assert!(err.needs_column_mapping());

        let mut cfg = IngestConfig::default();
        cfg.columns.insert("country", 0);
        cfg.columns.insert("value", 2);
        let payload = ingest_workbook(&workbook, &selection, &cfg).unwrap();
        assert_eq!(payload.records.len(), 2);
        assert_eq!(payload.records[1].year.as_deref(), Some("2020"));
    }

    #[test]
    fn manual_selection_overrides_detection() {
        let workbook = Workbook::from_csv_text("s", "Year,Japan,Korea\n2019,1,2\n2020,3,4\n");
        let selection = Selection::Manual {
            sheet: "s".into(),
            header_row: 0,
            orientation: Orientation::WideYearInRows,
        };
        let payload = ingest_workbook(&workbook, &selection, &IngestConfig::default()).unwrap();
        assert_eq!(payload.records.len(), 4);
        assert_eq!(payload.candidate.orientation, Orientation::WideYearInRows);

        let err = ingest_workbook(&workbook, &Selection::Auto, &IngestConfig::default())
            .unwrap_err();
        assert!(matches!(err, IngestError::NoTableDetected { .. }));
    }

    #[test]
    fn unknown_manual_sheet_is_reported() {
        let workbook = Workbook::from_csv_text("s", "Country,2019\nJapan,1\n");
        let err = ingest_workbook(
            &workbook,
            &Selection::Sheet("other".into()),
            &IngestConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::SheetNotFound { .. }));
    }

    #[test]
    fn store_discards_stale_commit() {
        let store = SnapshotStore::new();
        let slow = store.begin_load();
        let fast = store.begin_load();
        assert!(fast > slow);

        assert!(store.commit(fast, "fast.xlsx", observations("Korea")));
        assert!(!store.commit(slow, "slow.xlsx", observations("Japan")));

        let current = store.current().unwrap();
        assert_eq!(current.source, "fast.xlsx");
        assert_eq!(current.generation, fast.generation());
        assert_eq!(current.payload.record_count(), 1);
    }

    #[test]
    fn store_accepts_commits_in_order() {
        let store = SnapshotStore::new();
        assert!(store.current().is_none());
        let first = store.begin_load();
        assert!(store.commit(first, "a", observations("Japan")));
        let held = store.current().unwrap();
        let second = store.begin_load();
        assert!(store.commit(second, "b", observations("Korea")));
        assert_eq!(store.current().unwrap().source, "b");
        assert_eq!(held.source, "a");
    }
}
