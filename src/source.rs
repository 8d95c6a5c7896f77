//! Lazy CSV source reader.
//!
//! Streams one column of an uploaded CSV file as documents. Records are read
//! one at a time; the remaining columns of each row become the document's
//! metadata, in header order.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;

use crate::error::PipelineError;
use crate::models::{Document, Metadata};
use crate::stream::DocStream;

/// Open `path` and stream the `column` field of every row.
///
/// Fails before any row is read if the file cannot be opened or the column
/// is missing from the header. Rows that fail to parse are logged and
/// skipped.
pub fn read_column(path: &Path, column: &str) -> Result<DocStream> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open source file: {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header: {}", path.display()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let index = headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| PipelineError::MissingColumn {
            file: path.display().to_string(),
            column: column.to_string(),
        })?;

    let source = path.display().to_string();
    let records = reader.into_records().enumerate().filter_map(move |(row, record)| {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(source = %source, row, error = %e, "skipping unreadable CSV row");
                return None;
            }
        };
        let Some(text) = record.get(index) else {
            tracing::warn!(source = %source, row, "skipping CSV row without a text field");
            return None;
        };

        let mut metadata = Metadata::new();
        for (i, name) in headers.iter().enumerate() {
            if i == index {
                continue;
            }
            if let Some(value) = record.get(i) {
                metadata.insert(name.clone(), value.into());
            }
        }
        Some(Document::with_metadata(text, metadata))
    });

    Ok(Box::new(records))
}
