//! Six-frame translation of nucleotide sequences.
//!
//! Translated records are named `{name}-{f|r}{offset}`; the suffix is what
//! lets annotation map amino-acid hits back to contig coordinates.

use anyhow::{Context, Result};
use log::info;
use rayon::prelude::*;
use std::fmt;
use std::path::Path;

use super::reverse_complement;
use crate::io::fasta::{for_each_record, FastaWriter};
use crate::io::{create_writer, finish_writer};

/// NCBI genetic codes by table id, codons enumerated in TCAG order.
const GENETIC_CODES: &[(u8, &[u8; 64])] = &[
    (1, b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (2, b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIMMTTTTNNKKSS**VVVVAAAADDEEGGGG"),
    (3, b"FFLLSSSSYY**CCWWTTTTPPPPHHQQRRRRIIMMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (4, b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (5, b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIMMTTTTNNKKSSSSVVVVAAAADDEEGGGG"),
    (6, b"FFLLSSSSYYQQCC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (9, b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIIMTTTTNNNKSSSSVVVVAAAADDEEGGGG"),
    (10, b"FFLLSSSSYY**CCCWLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (11, b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (12, b"FFLLSSSSYY**CC*WLLLSPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (13, b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIMMTTTTNNKKSSGGVVVVAAAADDEEGGGG"),
    (14, b"FFLLSSSSYYY*CCWWLLLLPPPPHHQQRRRRIIIMTTTTNNNKSSSSVVVVAAAADDEEGGGG"),
    (16, b"FFLLSSSSYY*LCC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (21, b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIMMTTTTNNNKSSSSVVVVAAAADDEEGGGG"),
    (22, b"FFLLSS*SYY*LCC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (23, b"FF*LSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
    (24, b"FFLLSSSSYY**CCWWLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSSKVVVVAAAADDEEGGGG"),
    (25, b"FFLLSSSSYY**CCGWLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG"),
];

/// Records translated per parallel batch.
const BATCH_SIZE: usize = 50_000;

/// Reading frame of a translated sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    pub reverse: bool,
    /// 0, 1 or 2 nucleotides skipped before the first codon.
    pub offset: usize,
}

impl Frame {
    pub const ALL: [Frame; 6] = [
        Frame { reverse: false, offset: 0 },
        Frame { reverse: true, offset: 0 },
        Frame { reverse: false, offset: 1 },
        Frame { reverse: true, offset: 1 },
        Frame { reverse: false, offset: 2 },
        Frame { reverse: true, offset: 2 },
    ];

    /// Splits `contig-f1` style names into the contig name and the frame.
    pub fn split_name(name: &str) -> Option<(&str, Frame)> {
        let (base, suffix) = name.rsplit_once('-')?;
        let mut chars = suffix.chars();
        let reverse = match chars.next()? {
            'f' => false,
            'r' => true,
            _ => return None,
        };
        let offset = match chars.as_str() {
            "0" => 0,
            "1" => 1,
            "2" => 2,
            _ => return None,
        };
        Some((base, Frame { reverse, offset }))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.reverse { 'r' } else { 'f' }, self.offset)
    }
}

/// A genetic code selected by its NCBI translation table id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneticCode {
    id: u8,
    codons: &'static [u8; 64],
}

impl GeneticCode {
    /// Table 1, the standard code.
    pub fn standard() -> Self {
        GeneticCode {
            id: GENETIC_CODES[0].0,
            codons: GENETIC_CODES[0].1,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        GENETIC_CODES
            .iter()
            .find(|(table, _)| *table == id)
            .map(|&(id, codons)| GeneticCode { id, codons })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Table ids accepted by [`GeneticCode::from_id`].
    pub fn known_ids() -> Vec<u8> {
        GENETIC_CODES.iter().map(|(id, _)| *id).collect()
    }

    /// Translates one codon; anything ambiguous becomes `X`.
    pub fn translate_codon(&self, codon: &[u8]) -> u8 {
        match codon {
            [a, b, c] => match (base_index(*a), base_index(*b), base_index(*c)) {
                (Some(a), Some(b), Some(c)) => self.codons[a * 16 + b * 4 + c],
                _ => b'X',
            },
            _ => b'X',
        }
    }
}

impl Default for GeneticCode {
    fn default() -> Self {
        GeneticCode::standard()
    }
}

fn base_index(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'T' | b'U' => Some(0),
        b'C' => Some(1),
        b'A' => Some(2),
        b'G' => Some(3),
        _ => None,
    }
}

/// Translates `seq` from `offset`, ignoring a trailing partial codon.
pub fn translate(seq: &[u8], offset: usize, code: GeneticCode) -> Vec<u8> {
    seq.get(offset..)
        .unwrap_or(&[])
        .chunks_exact(3)
        .map(|codon| code.translate_codon(codon))
        .collect()
}

/// All six translations of a sequence, named after [`Frame`].
pub fn six_frame_translation(name: &str, seq: &[u8], code: GeneticCode) -> Vec<(String, Vec<u8>)> {
    let revcomp = reverse_complement(seq);
    Frame::ALL
        .iter()
        .map(|frame| {
            let source = if frame.reverse { &revcomp[..] } else { seq };
            (format!("{}-{}", name, frame), translate(source, frame.offset, code))
        })
        .collect()
}

/// Writes the six-frame translation of every record of `input` to `output`.
pub fn translate_fasta(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    code: GeneticCode,
) -> Result<usize> {
    let output = output.as_ref();
    let mut out = create_writer(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut translated = 0;
    {
        let mut writer = FastaWriter::new(&mut out);
        let mut batch: Vec<(String, Vec<u8>)> = Vec::with_capacity(BATCH_SIZE);

        let mut flush_batch = |batch: &mut Vec<(String, Vec<u8>)>| -> Result<()> {
            let frames: Vec<Vec<(String, Vec<u8>)>> = batch
                .par_iter()
                .map(|(name, seq)| six_frame_translation(name, seq, code))
                .collect();
            for (name, protein) in frames.into_iter().flatten() {
                writer.write(&name, &protein)?;
            }
            translated += batch.len();
            batch.clear();
            Ok(())
        };

        for_each_record(input, |record| {
            batch.push((record.id().to_string(), record.seq));
            if batch.len() >= BATCH_SIZE {
                flush_batch(&mut batch)?;
            }
            Ok(())
        })?;
        flush_batch(&mut batch)?;
        writer.flush()?;
    }
    finish_writer(out)?;
    info!(
        "Translated {} sequences in six frames (genetic code {})",
        translated,
        code.id()
    );
    Ok(translated)
}
