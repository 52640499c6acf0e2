//! In-memory workbook model.
//!
//! Detection and melting operate on a plain grid of [`Cell`]s so they never
//! depend on the file format. Spreadsheet files go through `calamine`; CSV text
//! becomes a single-sheet workbook through [`crate::csv_text`].

use std::{
    borrow::Cow,
    fmt,
    io::{Cursor, Read, Seek},
};

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto_from_rs};
use log::debug;
use serde::Serialize;

use crate::{
    csv_text::parse_csv_text,
    error::{IngestError, Result},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

static EMPTY: Cell = Cell::Empty;

impl Cell {
    /// Cell rendered as trimmed text; numbers use their display form.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Cell::Text(s) => Cow::Borrowed(s.trim()),
            Cell::Empty => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<&Data> for Cell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::from(s.as_str()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::Error(_) => Cell::Empty,
            other => Cell::Text(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Cell at `(row, col)`, or an empty cell outside the grid.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn row(&self, row: usize) -> &[Cell] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Header labels of `row` as trimmed strings.
    pub fn labels(&self, row: usize) -> Vec<String> {
        self.row(row).iter().map(|c| c.text().into_owned()).collect()
    }

    /// Grid rebuilt from a calamine range, padded so row and column indices
    /// match the worksheet's own coordinates.
    fn from_range(name: &str, range: &Range<Data>) -> Self {
        let (top, left) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut rows = vec![Vec::new(); top];
        for source_row in range.rows() {
            let mut row = vec![Cell::Empty; left];
            row.extend(source_row.iter().map(Cell::from));
            while matches!(row.last(), Some(Cell::Empty)) {
                row.pop();
            }
            rows.push(row);
        }
        Self::new(name, rows)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    /// Reads a spreadsheet from memory, sniffing the container format.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let sheets = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|err| IngestError::Workbook(err.to_string()))?;
        Self::read_all(sheets)
    }

    /// Single-sheet workbook from CSV text; blank cells become [`Cell::Empty`].
    pub fn from_csv_text(name: &str, text: &str) -> Self {
        let rows = parse_csv_text(text)
            .into_iter()
            .map(|row| row.iter().map(|cell| Cell::from(cell.as_str())).collect())
            .collect();
        Self::new(vec![Sheet::new(name, rows)])
    }

    pub fn sheet(&self, name: &str) -> Result<&Sheet> {
        self.sheets
            .iter()
            .find(|sheet| sheet.name == name)
            .ok_or_else(|| IngestError::SheetNotFound {
                name: name.to_string(),
            })
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    fn read_all<RS: Read + Seek>(mut reader: Sheets<RS>) -> Result<Self> {
        let names = reader.sheet_names().to_vec();
        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = reader
                .worksheet_range(&name)
                .map_err(|err| IngestError::Workbook(format!("sheet '{name}': {err}")))?;
            let sheet = Sheet::from_range(&name, &range);
            debug!(
                "Read sheet '{}' ({} rows x {} columns)",
                sheet.name,
                sheet.height(),
                sheet.width()
            );
            sheets.push(sheet);
        }
        Ok(Self::new(sheets))
    }
}
