//! Paired-end FASTQ preprocessing.
//!
//! Leverages the `needletail` crate for parsing, handling compressed input
//! automatically.

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use super::fasta::open_fastx;
use super::{create_writer, finish_writer};

/// Quality control parameters for read preprocessing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityControlParams {
    /// Trailing bases below this Phred score are trimmed.
    pub trim_quality: u8,
    /// Pairs where either mate is shorter than this after trimming are dropped.
    pub min_length: usize,
}

impl Default for QualityControlParams {
    fn default() -> Self {
        QualityControlParams {
            trim_quality: 20,
            min_length: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterleaveStats {
    pub pairs_read: usize,
    pub pairs_written: usize,
    pub bases_trimmed: usize,
}

/// Length of `qual` after removing the low-quality 3' tail (Phred+33).
pub fn trimmed_length(qual: &[u8], trim_quality: u8) -> usize {
    qual.iter()
        .rposition(|&q| q.saturating_sub(33) >= trim_quality)
        .map_or(0, |last| last + 1)
}

/// Read name without comment and without a `/1` or `/2` mate suffix.
fn pair_name(id: &[u8]) -> &[u8] {
    let name = id
        .split(|b| b.is_ascii_whitespace())
        .next()
        .unwrap_or(id);
    match name {
        [rest @ .., b'/', b'1' | b'2'] => rest,
        _ => name,
    }
}

fn write_record(out: &mut impl Write, id: &[u8], seq: &[u8], qual: Option<&[u8]>) -> Result<()> {
    out.write_all(b"@")?;
    out.write_all(id)?;
    out.write_all(b"\n")?;
    out.write_all(seq)?;
    out.write_all(b"\n+\n")?;
    match qual {
        Some(qual) => out.write_all(qual)?,
        // FASTA input carries no qualities; emit the highest Sanger score.
        None => out.write_all(&vec![b'I'; seq.len()])?,
    }
    out.write_all(b"\n")?;
    Ok(())
}

/// Interleaves two mate files into one FASTQ, trimming low-quality tails.
///
/// Mates must appear in the same order in both files.
pub fn interleave_and_trim(
    r1_path: impl AsRef<Path>,
    r2_path: impl AsRef<Path>,
    output: impl AsRef<Path>,
    params: &QualityControlParams,
) -> Result<InterleaveStats> {
    let (r1_path, r2_path) = (r1_path.as_ref(), r2_path.as_ref());
    let mut r1 = open_fastx(r1_path)?;
    let mut r2 = open_fastx(r2_path)?;
    let mut out = create_writer(output.as_ref())?;
    let mut stats = InterleaveStats::default();

    loop {
        let next1 = r1.as_mut().and_then(|reader| reader.next());
        let next2 = r2.as_mut().and_then(|reader| reader.next());
        let (rec1, rec2) = match (next1, next2) {
            (None, None) => break,
            (Some(rec1), Some(rec2)) => (
                rec1.with_context(|| format!("Failed to parse {}", r1_path.display()))?,
                rec2.with_context(|| format!("Failed to parse {}", r2_path.display()))?,
            ),
            _ => bail!(
                "Mate files {} and {} hold different numbers of reads (stopped after {} pairs)",
                r1_path.display(),
                r2_path.display(),
                stats.pairs_read
            ),
        };
        stats.pairs_read += 1;

        if pair_name(rec1.id()) != pair_name(rec2.id()) {
            return Err(anyhow!(
                "Mates out of sync at pair {}: '{}' vs '{}'",
                stats.pairs_read,
                String::from_utf8_lossy(rec1.id()),
                String::from_utf8_lossy(rec2.id())
            ));
        }

        let (seq1, seq2) = (rec1.seq(), rec2.seq());
        let len1 = rec1
            .qual()
            .map_or(seq1.len(), |q| trimmed_length(q, params.trim_quality));
        let len2 = rec2
            .qual()
            .map_or(seq2.len(), |q| trimmed_length(q, params.trim_quality));
        if len1 < params.min_length || len2 < params.min_length {
            continue;
        }
        stats.bases_trimmed += (seq1.len() - len1) + (seq2.len() - len2);

        write_record(&mut out, rec1.id(), &seq1[..len1], rec1.qual().map(|q| &q[..len1]))?;
        write_record(&mut out, rec2.id(), &seq2[..len2], rec2.qual().map(|q| &q[..len2]))?;
        stats.pairs_written += 1;
    }

    finish_writer(out)?;
    info!(
        "Interleaved {} of {} pairs ({} bases trimmed)",
        stats.pairs_written, stats.pairs_read, stats.bases_trimmed
    );
    Ok(stats)
}
