//! CSV parsing and serialization, kept free of any notion of object
//! schemas, reference columns or id maps — those live in `engine`. This
//! crate knows rows and headers, nothing else.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

#[derive(Debug, thiserror::Error)]
pub enum CsvIoError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("row {row} has {actual} cells, expected {expected} (header count)")]
    RowLength {
        row: usize,
        actual: usize,
        expected: usize,
    },
}

/// Forwarded verbatim from `UploadOptions.csvParseOptions` / construction
/// call sites; left permissive (all-`Default`) by design.
#[derive(Debug, Clone)]
pub struct CsvParseOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub has_headers: bool,
}

impl Default for CsvParseOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            has_headers: true,
        }
    }
}

/// The result of parsing one CSV document: the header row (first row when
/// `has_headers`, otherwise `col_0..col_n`) and every remaining row, still
/// as raw string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn build_reader<R: Read>(reader: R, options: &CsvParseOptions) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(options.delimiter)
        .quote(options.quote)
        .has_headers(options.has_headers)
        .flexible(false)
        .from_reader(reader)
}

pub fn parse_csv(text: &str, options: &CsvParseOptions) -> Result<ParsedCsv, CsvIoError> {
    parse_csv_reader(text.as_bytes(), options)
}

pub fn parse_csv_file(path: &Path, options: &CsvParseOptions) -> Result<ParsedCsv, CsvIoError> {
    let file = std::fs::File::open(path)?;
    parse_csv_reader(std::io::BufReader::new(file), options)
}

fn parse_csv_reader<R: Read>(reader: R, options: &CsvParseOptions) -> Result<ParsedCsv, CsvIoError> {
    let mut rdr = build_reader(reader, options);

    let headers: Vec<String> = if options.has_headers {
        rdr.headers()?.iter().map(str::to_string).collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        if options.has_headers {
            let actual = rows.last().unwrap().len();
            if actual != headers.len() {
                return Err(CsvIoError::RowLength {
                    row: i,
                    actual,
                    expected: headers.len(),
                });
            }
        }
    }

    let headers = if options.has_headers {
        headers
    } else {
        rows.first()
            .map(|r| (0..r.len()).map(|i| format!("col_{i}")).collect())
            .unwrap_or_default()
    };

    Ok(ParsedCsv { headers, rows })
}

/// One output column: `key` indexes into each record's map, `header` is
/// what gets written to the CSV header row. These are allowed to differ —
/// the dump driver uses this to restore a record's namespaced field name
/// as the header while the in-memory record was keyed by the
/// namespace-stripped name.
#[derive(Debug, Clone)]
pub struct Column {
    pub key: String,
    pub header: String,
}

impl Column {
    pub fn same(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            header: name.clone(),
            key: name,
        }
    }
}

pub type CsvRecord = HashMap<String, String>;

pub fn write_csv(records: &[CsvRecord], columns: &[Column]) -> Result<String, CsvIoError> {
    let mut wtr = WriterBuilder::new().from_writer(Vec::new());
    wtr.write_record(columns.iter().map(|c| c.header.as_str()))?;
    for record in records {
        let row: Vec<&str> = columns
            .iter()
            .map(|c| record.get(&c.key).map(String::as_str).unwrap_or(""))
            .collect();
        wtr.write_record(row)?;
    }
    let bytes = wtr.into_inner().map_err(|e| CsvIoError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
