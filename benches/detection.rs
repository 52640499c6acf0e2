use std::fmt::Write as _;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use housing_ingest::config::IngestConfig;
use housing_ingest::csv_text::parse_csv_text;
use housing_ingest::detect::detect_table;
use housing_ingest::pipeline::{Selection, ingest_workbook};
use housing_ingest::workbook::Workbook;

/// A wide sheet with a two-line title block and a footnote, `countries` rows by
/// `years` year columns.
fn wide_sheet_text(countries: usize, years: usize) -> String {
    let mut text = String::from("Social rental dwellings as % of total stock\n\n");
    text.push_str("Country");
    for year in 0..years {
        let _ = write!(text, ",{}", 1990 + year);
    }
    text.push('\n');
    for country in 0..countries {
        let _ = write!(text, "Country {country}");
        for year in 0..years {
            let value = (country * 7 + year * 3) % 40;
            if year % 9 == 4 {
                let _ = write!(text, ",{value}.5e");
            } else {
                let _ = write!(text, ",\"{},{:03}\"", value, year);
            }
        }
        text.push('\n');
    }
    text.push_str("Source: national statistical offices\n");
    text
}

fn bench_detection(c: &mut Criterion) {
    let text = wide_sheet_text(400, 30);
    let workbook = Workbook::from_csv_text("stock", &text);
    let config = IngestConfig::default();

    let mut group = c.benchmark_group("ingest");

    group.bench_function("parse_csv_text", |b| {
        b.iter(|| parse_csv_text(&text));
    });

    group.bench_function("detect_table", |b| {
        b.iter(|| detect_table(&workbook, &config.detect).expect("detect"));
    });

    group.bench_function("ingest_workbook_auto", |b| {
        b.iter_batched(
            || workbook.clone(),
            |wb| ingest_workbook(&wb, &Selection::Auto, &config).expect("ingest"),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_detection);
criterion_main!(benches);
