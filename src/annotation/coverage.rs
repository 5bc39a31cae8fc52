//! Per-sample coverage of annotated features from `samtools depth` tables.

use anyhow::{bail, Context, Result};
use csv::StringRecord;
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{read_gff, write_gff, Annotation};
use crate::io::tsv_reader;

/// Total depth over each annotation, indexed like `annotations`.
///
/// The depth table (`contig`, 1-based `position`, `depth`) is streamed one
/// contig block at a time.
pub fn depth_sums(annotations: &[Annotation], depth_path: impl AsRef<Path>) -> Result<Vec<u64>> {
    let depth_path = depth_path.as_ref();
    let mut by_contig: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, annotation) in annotations.iter().enumerate() {
        by_contig.entry(annotation.seqid.as_str()).or_default().push(idx);
    }

    let mut sums = vec![0u64; annotations.len()];
    let mut current: Option<String> = None;
    let mut block: Vec<u64> = Vec::new();

    let flush = |contig: &str, block: &mut Vec<u64>, sums: &mut [u64]| {
        if let Some(indices) = by_contig.get(contig) {
            let mut prefix = Vec::with_capacity(block.len() + 1);
            prefix.push(0u64);
            for depth in block.iter() {
                prefix.push(prefix[prefix.len() - 1] + depth);
            }
            let upto = |pos: u64| prefix[(pos as usize).min(block.len())];
            for &idx in indices {
                let ann = &annotations[idx];
                sums[idx] += upto(ann.end) - upto(ann.start.saturating_sub(1));
            }
        }
        block.clear();
    };

    let mut reader = tsv_reader(depth_path)
        .with_context(|| format!("Failed to open depth table {}", depth_path.display()))?;
    let mut record = StringRecord::new();
    while reader
        .read_record(&mut record)
        .with_context(|| format!("Failed to read depth table {}", depth_path.display()))?
    {
        let line_no = record.position().map_or(0, |p| p.line());
        if record.len() < 3 {
            bail!(
                "{}:{}: expected contig, position and depth",
                depth_path.display(),
                line_no
            );
        }
        let contig = &record[0];
        let pos: usize = record[1]
            .trim()
            .parse()
            .with_context(|| format!("{}:{}: bad position", depth_path.display(), line_no))?;
        let depth: u64 = record[2]
            .trim()
            .parse()
            .with_context(|| format!("{}:{}: bad depth", depth_path.display(), line_no))?;
        if pos == 0 {
            bail!("{}:{}: positions are 1-based", depth_path.display(), line_no);
        }

        if current.as_deref() != Some(contig) {
            if let Some(previous) = current.take() {
                flush(&previous, &mut block, &mut sums[..]);
            }
            current = Some(contig.to_string());
        }
        if block.len() < pos {
            block.resize(pos, 0);
        }
        block[pos - 1] += depth;
    }
    if let Some(previous) = current.take() {
        flush(&previous, &mut block, &mut sums[..]);
    }
    Ok(sums)
}

/// Adds `{sample}_cov` (mean depth) for every sample and the summed `cov`.
pub fn add_coverage(annotations: &mut [Annotation], depths: &[(String, PathBuf)]) -> Result<()> {
    let mut totals = vec![0.0f64; annotations.len()];
    for (sample, path) in depths {
        let sums = depth_sums(annotations, path)?;
        for ((annotation, sum), total) in annotations.iter_mut().zip(sums).zip(totals.iter_mut()) {
            let mean = sum as f64 / annotation.len() as f64;
            annotation.set_attr(format!("{}_cov", sample), format!("{:.2}", mean));
            *total += mean;
        }
        debug!("Added coverage of sample {} from {}", sample, path.display());
    }
    for (annotation, total) in annotations.iter_mut().zip(totals) {
        annotation.set_attr("cov", format!("{:.2}", total));
    }
    Ok(())
}

pub fn coverage_gff(
    input: impl AsRef<Path>,
    depths: &[(String, PathBuf)],
    output: impl AsRef<Path>,
) -> Result<usize> {
    let mut annotations = read_gff(input)?;
    add_coverage(&mut annotations, depths)?;
    let written = write_gff(output, &annotations)?;
    info!(
        "Added coverage of {} samples to {} annotations",
        depths.len(),
        written
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Strand;
    use std::fs;
    use tempfile::tempdir;

    fn feature(seqid: &str, start: u64, end: u64) -> Annotation {
        Annotation::new(seqid, "HMMER", "CDS", start, end, Strand::Forward)
    }

    #[test]
    fn test_depth_sums_over_blocks() {
        let dir = tempdir().unwrap();
        let depth = dir.path().join("s1.depth");
        fs::write(
            &depth,
            "c1\t1\t1\nc1\t2\t2\nc1\t3\t3\nc1\t4\t4\nc2\t1\t10\nc2\t2\t10\nc3\t1\t7\n",
        )
        .unwrap();
        let annotations = vec![feature("c1", 2, 3), feature("c2", 1, 5), feature("c9", 1, 2)];
        let sums = depth_sums(&annotations, &depth).unwrap();
        assert_eq!(sums, vec![5, 20, 0]);
    }

    #[test]
    fn test_add_coverage_per_sample_and_total() {
        let dir = tempdir().unwrap();
        let s1 = dir.path().join("s1.depth");
        let s2 = dir.path().join("s2.depth");
        fs::write(&s1, "c1\t1\t4\nc1\t2\t4\n").unwrap();
        fs::write(&s2, "#CHROM\tPOS\tDEPTH\nc1\t1\t1\nc1\t2\t0\n").unwrap();

        let mut annotations = vec![feature("c1", 1, 2)];
        let depths = vec![("s1".to_string(), s1), ("s2".to_string(), s2)];
        add_coverage(&mut annotations, &depths).unwrap();

        let keys: Vec<&str> = annotations[0].attributes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["s1_cov", "s2_cov", "cov"]);
        assert_eq!(annotations[0].attr_f64("s1_cov"), Some(4.0));
        assert_eq!(annotations[0].attr_f64("s2_cov"), Some(0.5));
        assert_eq!(annotations[0].attr_f64("cov"), Some(4.5));
    }

    #[test]
    fn test_malformed_depth_line() {
        let dir = tempdir().unwrap();
        let depth = dir.path().join("bad.depth");
        fs::write(&depth, "c1\t1\n").unwrap();
        let err = depth_sums(&[feature("c1", 1, 1)], &depth).unwrap_err();
        assert!(err.to_string().contains("expected contig, position and depth"));

        fs::write(&depth, "c1\t1\t2\nc1\tx\t2\n").unwrap();
        let err = depth_sums(&[feature("c1", 1, 1)], &depth).unwrap_err();
        assert!(err.to_string().contains("bad.depth:2: bad position"));
    }

    #[test]
    fn test_depth_table_blank_lines_and_extra_columns() {
        let dir = tempdir().unwrap();
        let depth = dir.path().join("multi.depth");
        // samtools depth with several BAMs prints one depth column per file.
        fs::write(&depth, "#CHROM\tPOS\ts1\n\nc1\t1\t3\t9\n\nc1\t2\t5\t9\n").unwrap();
        let sums = depth_sums(&[feature("c1", 1, 2)], &depth).unwrap();
        assert_eq!(sums, vec![8]);
    }
}
