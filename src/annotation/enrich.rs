//! Adds external database identifiers to annotations through a mapping table.

use anyhow::Result;
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::HashSet;
use std::path::Path;

use super::{read_gff, write_gff, Annotation};
use crate::database::mapping::load_mapping_table;

/// Sets `new_attribute` to the mapped values of `match_attribute`.
/// Returns the number of annotations that found a match.
pub fn enrich_annotations(
    annotations: &mut [Annotation],
    mapping: &IndexMap<String, Vec<String>>,
    match_attribute: &str,
    new_attribute: &str,
) -> usize {
    let mut enriched = 0;
    for annotation in annotations.iter_mut() {
        let values = annotation
            .attr(match_attribute)
            .and_then(|key| mapping.get(key))
            .map(|values| values.join(","));
        if let Some(values) = values {
            annotation.set_attr(new_attribute, values);
            enriched += 1;
        }
    }
    enriched
}

pub fn enrich_gff(
    input: impl AsRef<Path>,
    mapping_table: impl AsRef<Path>,
    output: impl AsRef<Path>,
    match_attribute: &str,
    new_attribute: &str,
) -> Result<usize> {
    let mut annotations = read_gff(input)?;
    // Only the keys present in the annotation are kept in memory.
    let wanted: HashSet<String> = annotations
        .iter()
        .filter_map(|a| a.attr(match_attribute).map(str::to_string))
        .collect();
    let mapping = load_mapping_table(mapping_table, Some(&wanted))?;

    let enriched = enrich_annotations(&mut annotations, &mapping, match_attribute, new_attribute);
    if enriched < annotations.len() {
        warn!(
            "{} of {} annotations have no '{}' mapping",
            annotations.len() - enriched,
            annotations.len(),
            match_attribute
        );
    }
    write_gff(output, &annotations)?;
    info!("Added '{}' to {} annotations", new_attribute, enriched);
    Ok(enriched)
}
