//! Two-column identifier mapping tables (`key\tvalue`, gzip-compressed, no header).
//!
//! Built from a wide tab-separated dump such as UniProt's `idmapping_selected.tab`
//! by picking one key column and one value column. Multi-valued cells (`a; b`)
//! become one row per value.

use csv::{QuoteStyle, StringRecord, WriterBuilder};
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::HashSet;
use std::path::Path;

use super::DatabaseError;
use crate::io::{create_writer, finish_writer, tsv_reader};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingStats {
    pub rows_read: usize,
    /// Rows without a key or a value.
    pub rows_skipped: usize,
    pub pairs_written: usize,
}

fn field<'r>(record: &'r StringRecord, column: usize) -> Option<&'r str> {
    record.get(column).map(str::trim).filter(|v| !v.is_empty())
}

/// Extracts `key_column` -> `value_column` pairs (0-based) from `source` into `output`.
pub fn write_mapping_table(
    source: impl AsRef<Path>,
    output: impl AsRef<Path>,
    key_column: usize,
    value_column: usize,
) -> Result<MappingStats, DatabaseError> {
    let source = source.as_ref();
    let mut reader = tsv_reader(source)?;
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(QuoteStyle::Never)
        .from_writer(create_writer(output.as_ref())?);

    let mut stats = MappingStats::default();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        stats.rows_read += 1;
        let (key, values) = match (field(&record, key_column), field(&record, value_column)) {
            (Some(key), Some(values)) => (key, values),
            _ => {
                stats.rows_skipped += 1;
                continue;
            }
        };
        let mut wrote_any = false;
        for value in values.split(';').map(str::trim).filter(|v| !v.is_empty()) {
            writer.write_record([key, value])?;
            stats.pairs_written += 1;
            wrote_any = true;
        }
        if !wrote_any {
            stats.rows_skipped += 1;
        }
    }

    let inner = writer
        .into_inner()
        .map_err(|e| DatabaseError::IoError(e.into_error()))?;
    finish_writer(inner)?;
    info!(
        "Mapping table from {}: {} rows, {} skipped, {} pairs written",
        source.display(),
        stats.rows_read,
        stats.rows_skipped,
        stats.pairs_written
    );
    Ok(stats)
}

/// Loads a mapping table, optionally restricted to `keys`.
///
/// Values of a key keep their file order without duplicates.
pub fn load_mapping_table(
    path: impl AsRef<Path>,
    keys: Option<&HashSet<String>>,
) -> Result<IndexMap<String, Vec<String>>, DatabaseError> {
    let path = path.as_ref();
    let mut reader = tsv_reader(path)?;
    let mut mapping: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        if record.len() != 2 {
            let line = record.position().map_or(0, |p| p.line());
            return Err(DatabaseError::FormatError(format!(
                "{}:{}: expected 2 columns, found {}",
                path.display(),
                line,
                record.len()
            )));
        }
        let (key, value) = (&record[0], &record[1]);
        if keys.map_or(false, |keys| !keys.contains(key)) {
            continue;
        }
        let values = mapping.entry(key.to_string()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
    debug!("Loaded {} keys from {}", mapping.len(), path.display());
    Ok(mapping)
}
