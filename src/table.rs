//! Plain-text table rendering for terminal output.
//!
//! Columns whose every non-empty cell parses as a number are right-aligned.
//! Cells wider than [`MAX_CELL_WIDTH`] are cut with an ellipsis so long
//! definitions do not blow up the layout.

use std::borrow::Cow;
use std::fmt::Write as _;

pub const MAX_CELL_WIDTH: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let cells = rows
        .iter()
        .map(|row| {
            (0..column_count)
                .map(|idx| fit_cell(row.get(idx).map(String::as_str).unwrap_or("")))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in &cells {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(1);
    }

    let aligns = (0..column_count)
        .map(|idx| column_alignment(cells.iter().map(|row| row[idx].as_ref())))
        .collect::<Vec<_>>();

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| fit_cell(h)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths, &aligns));

    let separator = widths.iter().map(|w| Cow::Owned("-".repeat(*w))).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths, &aligns));

    for row in &cells {
        let _ = writeln!(output, "{}", format_row(row, &widths, &aligns));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn column_alignment<'a>(mut values: impl Iterator<Item = &'a str>) -> Align {
    let mut seen = false;
    let numeric = values.all(|value| {
        let value = value.trim();
        if value.is_empty() {
            return true;
        }
        seen = true;
        value.parse::<f64>().is_ok()
    });
    if numeric && seen { Align::Right } else { Align::Left }
}

fn format_row(values: &[Cow<'_, str>], widths: &[usize], aligns: &[Align]) -> String {
    let cells = values
        .iter()
        .zip(widths.iter().zip(aligns))
        .map(|(value, (width, align))| {
            let padding = " ".repeat(width.saturating_sub(display_width(value)));
            match align {
                Align::Left => format!("{value}{padding}"),
                Align::Right => format!("{padding}{value}"),
            }
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

/// Flattens control whitespace and truncates to [`MAX_CELL_WIDTH`].
fn fit_cell(value: &str) -> Cow<'_, str> {
    let flat: Cow<'_, str> = if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    };
    if display_width(&flat) <= MAX_CELL_WIDTH {
        return flat;
    }
    let mut cut = flat.chars().take(MAX_CELL_WIDTH - 1).collect::<String>();
    cut.push('…');
    Cow::Owned(cut)
}
