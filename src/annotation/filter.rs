//! Score and overlap filtering of profile hits.

use anyhow::Result;
use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

use super::{read_gff, write_gff, Annotation, Strand};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Hits scoring below this are dropped before overlap resolution.
    pub min_bitscore: f64,
    /// Two hits conflict when they share at least this many bases.
    pub min_overlap: u64,
    /// Only hits on the same strand can conflict.
    pub strand_specific: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            min_bitscore: 0.0,
            min_overlap: 100,
            strand_specific: false,
        }
    }
}

fn bitscore(annotation: &Annotation) -> f64 {
    annotation.attr_f64("bitscore").unwrap_or(0.0)
}

/// Applies the bitscore threshold, then resolves overlaps per contig keeping
/// the best-scoring hit. Survivors keep their input order.
pub fn filter_annotations(annotations: Vec<Annotation>, params: &FilterParams) -> Vec<Annotation> {
    let groups = annotations
        .iter()
        .enumerate()
        .filter(|(_, a)| bitscore(a) >= params.min_bitscore)
        .into_group_map_by(|(_, a)| {
            let strand = if params.strand_specific {
                a.strand
            } else {
                Strand::Unknown
            };
            (a.seqid.clone(), strand)
        });

    let mut keep = vec![false; annotations.len()];
    for (_, mut group) in groups {
        // Best score first; ties go to the earlier record.
        group.sort_by(|(ia, a), (ib, b)| {
            bitscore(b)
                .partial_cmp(&bitscore(a))
                .unwrap_or(Ordering::Equal)
                .then(ia.cmp(ib))
        });
        let mut kept: Vec<&Annotation> = Vec::new();
        for (idx, candidate) in group {
            let conflicts = kept
                .iter()
                .any(|k| k.overlap(candidate) >= params.min_overlap.max(1));
            if !conflicts {
                kept.push(candidate);
                keep[idx] = true;
            }
        }
    }

    annotations
        .into_iter()
        .zip(keep)
        .filter_map(|(a, k)| k.then_some(a))
        .collect()
}

/// Filters the features of `input` into `output`; returns (read, kept).
pub fn filter_gff(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    params: &FilterParams,
) -> Result<(usize, usize)> {
    let annotations = read_gff(input)?;
    let total = annotations.len();
    let filtered = filter_annotations(annotations, params);
    let kept = write_gff(output, &filtered)?;
    info!("Kept {} of {} annotations after filtering", kept, total);
    Ok((total, kept))
}
