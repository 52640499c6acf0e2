//! Tolerant CSV tokenizer for dataset text.
//!
//! The published dataset files are RFC-4180-like but not reliably so: some
//! carry a UTF-8 byte order mark, some use CRLF, and a few contain quotes that
//! never close. [`parse_csv_text`] accepts all of them without failing. An
//! unterminated quote simply keeps the scanner in quoted mode, so the rest of
//! the input lands in one cell.
//!
//! Cells are returned untrimmed; trimming belongs to the caller.

const BOM: char = '\u{feff}';

pub type Row = Vec<String>;

pub fn parse_csv_text(text: &str) -> Vec<Row> {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    let mut rows = Vec::new();
    let mut row: Row = Vec::new();
    let mut cell = String::new();
    let mut inside_quoted_field = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if inside_quoted_field {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    cell.push('"');
                    chars.next();
                }
                '"' => inside_quoted_field = false,
                other => cell.push(other),
            }
            continue;
        }
        match ch {
            '"' => inside_quoted_field = true,
            ',' => row.push(std::mem::take(&mut cell)),
            '\n' => {
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            '\r' => {}
            other => cell.push(other),
        }
    }

    if !cell.is_empty() || !row.is_empty() {
        row.push(cell);
        rows.push(row);
    }
    rows
}

/// Cell `idx` of `row`, or `""` when the row is short.
pub fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}
