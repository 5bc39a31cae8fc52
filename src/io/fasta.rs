//! FASTA helpers on top of `needletail` (reading) and `bio` (writing).

use anyhow::{Context, Result};
use indexmap::IndexMap;
use needletail::{parse_fastx_file, FastxReader};
use std::path::Path;

use super::is_empty_input;

/// A FASTA record with an owned header (everything after `>`) and sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub header: String,
    pub seq: Vec<u8>,
}

impl FastaRecord {
    /// The identifier: the header up to the first whitespace.
    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }
}

/// Opens a FASTA/FASTQ file for parsing; `None` when it holds no records.
pub fn open_fastx(path: &Path) -> Result<Option<Box<dyn FastxReader>>> {
    let empty = is_empty_input(path)
        .with_context(|| format!("Failed to open sequence file {}", path.display()))?;
    if empty {
        return Ok(None);
    }
    let reader = parse_fastx_file(path)
        .with_context(|| format!("Failed to open sequence file {}", path.display()))?;
    Ok(Some(reader))
}

/// Streams every record of a FASTA/FASTQ file (compressed or not) to `f`.
pub fn for_each_record<F>(path: impl AsRef<Path>, mut f: F) -> Result<()>
where
    F: FnMut(FastaRecord) -> Result<()>,
{
    let path = path.as_ref();
    let mut reader = match open_fastx(path)? {
        Some(reader) => reader,
        None => return Ok(()),
    };
    while let Some(record) = reader.next() {
        let record =
            record.with_context(|| format!("Failed to parse record in {}", path.display()))?;
        f(FastaRecord {
            header: String::from_utf8_lossy(record.id()).into_owned(),
            seq: record.seq().into_owned(),
        })?;
    }
    Ok(())
}

pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<FastaRecord>> {
    let mut records = Vec::new();
    for_each_record(path, |record| {
        records.push(record);
        Ok(())
    })?;
    Ok(records)
}

/// Sequence lengths keyed by identifier, in file order.
pub fn sequence_lengths(path: impl AsRef<Path>) -> Result<IndexMap<String, usize>> {
    let mut lengths = IndexMap::new();
    for_each_record(path, |record| {
        lengths.insert(record.id().to_string(), record.seq.len());
        Ok(())
    })?;
    Ok(lengths)
}

/// Buffered FASTA output; the header is written verbatim.
pub struct FastaWriter<W: std::io::Write> {
    inner: ::bio::io::fasta::Writer<W>,
}

impl<W: std::io::Write> FastaWriter<W> {
    pub fn new(writer: W) -> Self {
        FastaWriter {
            inner: ::bio::io::fasta::Writer::new(writer),
        }
    }

    pub fn write(&mut self, header: &str, seq: &[u8]) -> std::io::Result<()> {
        let (id, desc) = match header.split_once(char::is_whitespace) {
            Some((id, desc)) => (id, Some(desc)),
            None => (header, None),
        };
        self.inner.write(id, desc, seq)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
