//! Replaces contig names with opaque random tokens and restores them later.
//!
//! Assemblers emit long, tool-specific headers; downstream tools only need a
//! short unique identifier. The token -> header dictionary is kept as JSON.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{info, warn};
use rand::Rng;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::annotation::{read_gff, write_gff};
use crate::io::fasta::{for_each_record, FastaWriter};
use crate::io::{create_writer, finish_writer};

/// A 32 hex digit token.
pub fn new_token<R: Rng>(rng: &mut R) -> String {
    format!("{:032x}", rng.random::<u128>())
}

/// Relabels every record of `input` using tokens drawn from `rng`.
///
/// Returns the dictionary token -> original header, in record order.
pub fn relabel_with<R: Rng>(
    rng: &mut R,
    input: impl AsRef<Path>,
    output_fasta: impl AsRef<Path>,
) -> Result<IndexMap<String, String>> {
    let output_fasta = output_fasta.as_ref();
    let mut out = create_writer(output_fasta)
        .with_context(|| format!("Failed to create {}", output_fasta.display()))?;
    let mut names = IndexMap::new();
    let mut used = HashSet::new();
    {
        let mut writer = FastaWriter::new(&mut out);
        for_each_record(input, |record| {
            let mut token = new_token(&mut *rng);
            while !used.insert(token.clone()) {
                token = new_token(&mut *rng);
            }
            writer.write(&token, &record.seq)?;
            names.insert(token, record.header);
            Ok(())
        })?;
        writer.flush()?;
    }
    finish_writer(out)?;
    Ok(names)
}

/// Relabels `input` into `output_fasta` and writes the dictionary to `output_json`.
pub fn relabel_fasta(
    input: impl AsRef<Path>,
    output_fasta: impl AsRef<Path>,
    output_json: impl AsRef<Path>,
) -> Result<usize> {
    let names = relabel_with(&mut rand::rng(), input, output_fasta)?;
    let output_json = output_json.as_ref();
    let mut writer = BufWriter::new(File::create(output_json)?);
    serde_json::to_writer_pretty(&mut writer, &names)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!(
        "Relabeled {} sequences, dictionary in {}",
        names.len(),
        output_json.display()
    );
    Ok(names.len())
}

pub fn load_mapping(path: impl AsRef<Path>) -> Result<IndexMap<String, String>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let names = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid relabel dictionary {}", path.display()))?;
    Ok(names)
}

/// Rewrites the sequence ids of a GFF file back to the original contig names.
pub fn restore_names(
    gff_in: impl AsRef<Path>,
    json: impl AsRef<Path>,
    gff_out: impl AsRef<Path>,
) -> Result<usize> {
    let names = load_mapping(json)?;
    let mut annotations = read_gff(gff_in)?;
    let mut unknown = 0;
    for annotation in annotations.iter_mut() {
        match names.get(&annotation.seqid) {
            Some(header) => {
                let id = header.split_whitespace().next().unwrap_or(header);
                annotation.seqid = id.to_string();
            }
            None => unknown += 1,
        }
    }
    if unknown > 0 {
        warn!("{} annotations refer to unknown tokens and were left unchanged", unknown);
    }
    let written = write_gff(gff_out, &annotations)?;
    Ok(written - unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Annotation, Strand};
    use crate::io::fasta::read_records;
    use rand::RngCore;
    use std::fs;
    use tempfile::tempdir;

    /// Replays fixed words, repeating the last one.
    struct ScriptedRng {
        words: Vec<u64>,
        pos: usize,
    }

    impl RngCore for ScriptedRng {
        fn next_u32(&mut self) -> u32 {
            self.next_u64() as u32
        }

        fn next_u64(&mut self) -> u64 {
            let word = self.words[self.pos.min(self.words.len() - 1)];
            self.pos += 1;
            word
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for chunk in dest.chunks_mut(8) {
                let bytes = self.next_u64().to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }

    #[test]
    fn test_dictionary_is_a_bijection() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("final.contigs.fa");
        // Duplicate headers are still distinct records.
        fs::write(
            &input,
            ">k141_1 flag=1 len=4\nACGT\n>k141_2 flag=0\nGG\n>k141_2 flag=0\nTT\n",
        )
        .unwrap();
        let fasta = dir.path().join("contigs.fa");
        let json = dir.path().join("contigs.json");

        assert_eq!(relabel_fasta(&input, &fasta, &json).unwrap(), 3);

        let names = load_mapping(&json).unwrap();
        let records = read_records(&fasta).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.header.len(), 32);
            assert!(record.header.bytes().all(|b| b.is_ascii_hexdigit()));
            assert!(names.contains_key(&record.header));
        }
        let originals: Vec<&str> = names.values().map(String::as_str).collect();
        assert_eq!(
            originals,
            vec!["k141_1 flag=1 len=4", "k141_2 flag=0", "k141_2 flag=0"]
        );
        assert_eq!(records[2].seq, b"TT".to_vec());
    }

    #[test]
    fn test_colliding_token_is_redrawn() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.fa");
        fs::write(&input, ">a\nAC\n>b\nGT\n").unwrap();
        let mut rng = ScriptedRng {
            words: vec![7, 7, 7, 7, 9],
            pos: 0,
        };
        let names = relabel_with(&mut rng, &input, dir.path().join("out.fa")).unwrap();
        assert_eq!(names.len(), 2);
        let tokens: HashSet<&String> = names.keys().collect();
        assert_eq!(tokens.len(), 2);
        assert_eq!(names.values().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_restore_names_in_gff() {
        let dir = tempdir().unwrap();
        let json = dir.path().join("contigs.json");
        fs::write(&json, r#"{"00ff": "k141_7 flag=1 multi=3.0"}"#).unwrap();
        let gff_in = dir.path().join("final.gff");
        let gff_out = dir.path().join("restored.gff");
        write_gff(
            &gff_in,
            &[
                Annotation::new("00ff", "HMMER", "CDS", 1, 9, Strand::Forward),
                Annotation::new("beef", "HMMER", "CDS", 1, 9, Strand::Forward),
            ],
        )
        .unwrap();

        assert_eq!(restore_names(&gff_in, &json, &gff_out).unwrap(), 1);
        let restored = read_gff(&gff_out).unwrap();
        assert_eq!(restored[0].seqid, "k141_7");
        assert_eq!(restored[1].seqid, "beef");
    }

    #[test]
    fn test_empty_assembly_relabels_to_empty_dictionary() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("final.contigs.fa");
        fs::write(&input, "").unwrap();
        let fasta = dir.path().join("contigs.fa");
        let json = dir.path().join("contigs.json");

        assert_eq!(relabel_fasta(&input, &fasta, &json).unwrap(), 0);
        assert_eq!(fs::read_to_string(&fasta).unwrap(), "");
        assert_eq!(fs::read_to_string(&json).unwrap().trim(), "{}");
        assert!(load_mapping(&json).unwrap().is_empty());
    }
}
