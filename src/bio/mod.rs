//! Bioinformatics utilities module.
//!
//! Sequence-level helpers that sit between the external tools: translation
//! of assembled contigs for profile searches and the frame naming shared with
//! the domain-table parser.

pub mod translate;

pub use translate::{translate_fasta, Frame, GeneticCode};

/// Calculates the reverse complement of a DNA sequence.
/// IUPAC codes are complemented, anything else becomes N.
pub fn reverse_complement(dna: &[u8]) -> Vec<u8> {
    ::bio::alphabets::dna::revcomp(dna)
        .into_iter()
        .map(|base| {
            if base.is_ascii_alphabetic() {
                base
            } else {
                b'N'
            }
        })
        .collect()
}
