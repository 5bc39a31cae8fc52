//! Conversion of `hmmsearch --domtblout` tables into GFF features on contigs.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info};
use std::io::BufRead;
use std::path::Path;

use super::{write_gff, Annotation, AnnotationError, Strand};
use crate::bio::Frame;
use crate::database::mapping::load_mapping_table;
use crate::io::fasta::sequence_lengths;
use crate::io::open_reader;

pub const SOURCE: &str = "HMMER";
const MIN_COLUMNS: usize = 22;

/// One domain row of a domain table.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainHit {
    /// Translated sequence name, `{contig}-{frame}`.
    pub target: String,
    /// Profile name.
    pub query: String,
    /// Independent E-value of the domain.
    pub evalue: f64,
    pub bitscore: f64,
    pub ali_from: u64,
    pub ali_to: u64,
}

impl DomainHit {
    pub fn parse(line: &str) -> Result<Self, AnnotationError> {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < MIN_COLUMNS {
            return Err(AnnotationError::Malformed(format!(
                "domain table row has {} columns, expected at least {}",
                cols.len(),
                MIN_COLUMNS
            )));
        }
        let number = |idx: usize| -> Result<f64, AnnotationError> {
            cols[idx].parse().map_err(|_| {
                AnnotationError::Malformed(format!("column {} is not a number: '{}'", idx + 1, cols[idx]))
            })
        };
        let position = |idx: usize| -> Result<u64, AnnotationError> {
            cols[idx].parse().map_err(|_| {
                AnnotationError::Malformed(format!("column {} is not a position: '{}'", idx + 1, cols[idx]))
            })
        };
        Ok(DomainHit {
            target: cols[0].to_string(),
            query: cols[3].to_string(),
            evalue: number(12)?,
            bitscore: number(13)?,
            ali_from: position(17)?,
            ali_to: position(18)?,
        })
    }
}

/// Nucleotide interval covered by amino acids `aa_from..=aa_to` of a frame.
///
/// Reverse frames are counted from the end of the contig, so their interval
/// is mirrored through `contig_len`.
pub fn nucleotide_interval(
    frame: Frame,
    aa_from: u64,
    aa_to: u64,
    contig_len: u64,
) -> Option<(u64, u64)> {
    if aa_from == 0 || aa_to < aa_from {
        return None;
    }
    let offset = frame.offset as u64;
    let start = (aa_from - 1) * 3 + offset + 1;
    let end = aa_to * 3 + offset;
    if end > contig_len {
        return None;
    }
    if frame.reverse {
        Some((contig_len - end + 1, contig_len - start + 1))
    } else {
        Some((start, end))
    }
}

/// Builds the GFF feature of a hit on its contig.
pub fn hit_to_annotation(
    hit: &DomainHit,
    contig_lengths: &IndexMap<String, usize>,
) -> Result<Annotation, AnnotationError> {
    let (contig, frame) = Frame::split_name(&hit.target).ok_or_else(|| {
        AnnotationError::Malformed(format!("target '{}' has no frame suffix", hit.target))
    })?;
    let contig_len = *contig_lengths
        .get(contig)
        .ok_or_else(|| AnnotationError::UnknownSequence(contig.to_string()))?;
    let (start, end) = nucleotide_interval(frame, hit.ali_from, hit.ali_to, contig_len as u64)
        .ok_or_else(|| {
            AnnotationError::Malformed(format!(
                "alignment {}..{} of '{}' lies outside the contig ({} bp)",
                hit.ali_from, hit.ali_to, hit.target, contig_len
            ))
        })?;

    let strand = if frame.reverse {
        Strand::Reverse
    } else {
        Strand::Forward
    };
    let mut annotation = Annotation::new(contig, SOURCE, "CDS", start, end, strand);
    annotation.score = Some(hit.evalue);

    // Profiles are named gene_taxonid_taxon; the taxon part may contain underscores.
    let parts: Vec<&str> = hit.query.splitn(3, '_').collect();
    match parts.as_slice() {
        [gene, taxon_id, taxon] => {
            annotation.set_attr("gene_id", gene);
            annotation.set_attr("taxon_id", taxon_id);
            annotation.set_attr("taxon", taxon);
        }
        _ => annotation.set_attr("gene_id", &hit.query),
    }
    annotation.set_attr("name", &hit.query);
    annotation.set_attr("frame", frame);
    annotation.set_attr("aa_from", hit.ali_from);
    annotation.set_attr("aa_to", hit.ali_to);
    annotation.set_attr("bitscore", hit.bitscore);
    annotation.set_attr("evalue", super::format_number(hit.evalue));
    Ok(annotation)
}

/// Lookups applied to every converted hit.
#[derive(Debug, Clone, Default)]
pub struct HitLabels {
    /// gene_id -> text stored in the `description` attribute.
    pub descriptions: IndexMap<String, String>,
    /// Taxon names as spelled in profile names -> the name to report.
    pub taxon_corrections: IndexMap<String, String>,
}

impl HitLabels {
    /// Reads the optional two-column `key\tvalue` tables; the first value of a key wins.
    pub fn load(descriptions: Option<&Path>, taxon_corrections: Option<&Path>) -> Result<Self> {
        let table = |path: Option<&Path>| -> Result<IndexMap<String, String>> {
            let Some(path) = path else {
                return Ok(IndexMap::new());
            };
            let mapping = load_mapping_table(path, None)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            Ok(mapping
                .into_iter()
                .filter_map(|(key, values)| values.into_iter().next().map(|value| (key, value)))
                .collect())
        };
        Ok(HitLabels {
            descriptions: table(descriptions)?,
            taxon_corrections: table(taxon_corrections)?,
        })
    }

    /// Returns true when the taxon name was corrected.
    fn apply(&self, annotation: &mut Annotation) -> bool {
        let description = annotation
            .attr("gene_id")
            .and_then(|gene| self.descriptions.get(gene))
            .cloned();
        if let Some(description) = description {
            annotation.set_attr("description", description);
        }

        let corrected = annotation
            .attr("taxon")
            .and_then(|taxon| self.taxon_corrections.get(taxon))
            .cloned();
        match corrected {
            Some(taxon) => {
                debug!(
                    "Correcting taxon '{}' to '{}'",
                    annotation.attr("taxon").unwrap_or_default(),
                    taxon
                );
                annotation.set_attr("taxon", taxon);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HmmerStats {
    pub hits: usize,
    pub discarded: usize,
    pub written: usize,
    pub taxa_corrected: usize,
}

/// Converts a domain table into GFF, discarding hits with an E-value above `max_evalue`.
pub fn domtbl_to_gff(
    domtbl: impl AsRef<Path>,
    contigs: impl AsRef<Path>,
    output: impl AsRef<Path>,
    max_evalue: f64,
    labels: &HitLabels,
) -> Result<HmmerStats> {
    let domtbl = domtbl.as_ref();
    let lengths = sequence_lengths(contigs.as_ref())?;
    let reader = open_reader(domtbl)
        .with_context(|| format!("Failed to open domain table {}", domtbl.display()))?;

    let mut stats = HmmerStats::default();
    let mut annotations = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        stats.hits += 1;
        let hit = DomainHit::parse(&line)
            .and_then(|hit| {
                if hit.evalue > max_evalue {
                    return Ok(None);
                }
                hit_to_annotation(&hit, &lengths).map(Some)
            })
            .with_context(|| format!("{}:{}", domtbl.display(), idx + 1))?;
        match hit {
            Some(mut annotation) => {
                if labels.apply(&mut annotation) {
                    stats.taxa_corrected += 1;
                }
                annotations.push(annotation);
            }
            None => {
                debug!("Discarding hit on line {} (E-value above {})", idx + 1, max_evalue);
                stats.discarded += 1;
            }
        }
    }

    stats.written = write_gff(output.as_ref(), &annotations)?;
    info!(
        "Read {} hits, discarded {}, wrote {} features",
        stats.hits, stats.discarded, stats.written
    );
    if stats.taxa_corrected > 0 {
        info!("Corrected the taxon name of {} features", stats.taxa_corrected);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::read_gff;
    use std::fs;
    use tempfile::tempdir;

    fn row(target: &str, query: &str, evalue: &str, score: &str, from: u64, to: u64) -> String {
        format!(
            "{} - 10 {} - 50 1e-10 40.5 0.1 1 1 1e-12 {} {} 0.1 3 20 {} {} 1 5 0.9 some description",
            target, query, evalue, score, from, to
        )
    }

    #[test]
    fn test_parse_row() {
        let hit = DomainHit::parse(&row("c1-f1", "K1_4479_poaceae", "2e-11", "38.2", 2, 4)).unwrap();
        assert_eq!(hit.target, "c1-f1");
        assert_eq!(hit.query, "K1_4479_poaceae");
        assert_eq!(hit.evalue, 2e-11);
        assert_eq!(hit.bitscore, 38.2);
        assert_eq!((hit.ali_from, hit.ali_to), (2, 4));
        assert!(DomainHit::parse("c1-f1 - 10").is_err());
    }

    #[test]
    fn test_nucleotide_interval_per_strand() {
        let f1 = Frame { reverse: false, offset: 1 };
        assert_eq!(nucleotide_interval(f1, 2, 4, 30), Some((5, 13)));
        let r0 = Frame { reverse: true, offset: 0 };
        assert_eq!(nucleotide_interval(r0, 1, 2, 30), Some((25, 30)));
        let r2 = Frame { reverse: true, offset: 2 };
        assert_eq!(nucleotide_interval(r2, 1, 1, 30), Some((26, 28)));
        assert_eq!(nucleotide_interval(f1, 1, 10, 30), None);
    }

    #[test]
    fn test_domtbl_to_gff() {
        let dir = tempdir().unwrap();
        let contigs = dir.path().join("contigs.fa");
        fs::write(&contigs, format!(">c1\n{}\n", "A".repeat(30))).unwrap();
        let domtbl = dir.path().join("hits.domtbl");
        fs::write(
            &domtbl,
            format!(
                "# target name ...\n{}\n{}\n{}\n",
                row("c1-f1", "K1_4479_poaceae_sp", "2e-11", "38.2", 2, 4),
                row("c1-r0", "K2", "0.01", "12", 1, 2),
                row("c1-f0", "K3_1_x", "0.5", "3", 1, 2),
            ),
        )
        .unwrap();
        let out = dir.path().join("hits.gff");

        let stats = domtbl_to_gff(&domtbl, &contigs, &out, 0.05, &HitLabels::default()).unwrap();
        assert_eq!(
            stats,
            HmmerStats {
                hits: 3,
                discarded: 1,
                written: 2,
                taxa_corrected: 0,
            }
        );

        let features = read_gff(&out).unwrap();
        assert_eq!(features.len(), 2);
        let first = &features[0];
        assert_eq!((first.start, first.end, first.strand), (5, 13, Strand::Forward));
        assert_eq!(first.attr("gene_id"), Some("K1"));
        assert_eq!(first.attr("taxon_id"), Some("4479"));
        assert_eq!(first.attr("taxon"), Some("poaceae_sp"));
        assert_eq!(first.attr_f64("bitscore"), Some(38.2));
        assert_eq!(first.score, Some(2e-11));

        let second = &features[1];
        assert_eq!((second.start, second.end, second.strand), (25, 30, Strand::Reverse));
        assert_eq!(second.attr("gene_id"), Some("K2"));
        assert_eq!(second.attr("taxon"), None);
        assert_eq!(second.attr("description"), None);
    }

    #[test]
    fn test_descriptions_and_taxon_corrections() {
        let dir = tempdir().unwrap();
        let contigs = dir.path().join("contigs.fa");
        fs::write(&contigs, format!(">c1\n{}\n", "A".repeat(30))).unwrap();
        let domtbl = dir.path().join("hits.domtbl");
        fs::write(
            &domtbl,
            format!(
                "{}\n{}\n",
                row("c1-f0", "K1_1_rhyzobiales", "1e-20", "80", 1, 3),
                row("c1-f1", "K2_2_poaceae", "1e-20", "80", 1, 3),
            ),
        )
        .unwrap();
        let descriptions = dir.path().join("ko.tsv");
        fs::write(&descriptions, "K1\talcohol dehydrogenase [EC:1.1.1.1]\n").unwrap();
        let corrections = dir.path().join("taxa.tsv");
        fs::write(&corrections, "# spelled\tcorrect\nrhyzobiales\trhizobiales\n").unwrap();

        let labels = HitLabels::load(Some(descriptions.as_path()), Some(corrections.as_path())).unwrap();
        let out = dir.path().join("hits.gff");
        let stats = domtbl_to_gff(&domtbl, &contigs, &out, 1.0, &labels).unwrap();
        assert_eq!(stats.written, 2);
        assert_eq!(stats.taxa_corrected, 1);

        let features = read_gff(&out).unwrap();
        assert_eq!(
            features[0].attr("description"),
            Some("alcohol dehydrogenase [EC:1.1.1.1]")
        );
        assert_eq!(features[0].attr("taxon"), Some("rhizobiales"));
        assert_eq!(features[1].attr("description"), None);
        assert_eq!(features[1].attr("taxon"), Some("poaceae"));
    }

    #[test]
    fn test_empty_domain_table_writes_no_features() {
        let dir = tempdir().unwrap();
        let contigs = dir.path().join("contigs.fa");
        fs::write(&contigs, "").unwrap();
        let domtbl = dir.path().join("hits.domtbl");
        fs::write(&domtbl, "# no hits\n").unwrap();
        let out = dir.path().join("hits.gff");
        let stats = domtbl_to_gff(&domtbl, &contigs, &out, 1.0, &HitLabels::default()).unwrap();
        assert_eq!(stats, HmmerStats::default());
        assert!(read_gff(&out).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_contig_is_an_error() {
        let dir = tempdir().unwrap();
        let contigs = dir.path().join("contigs.fa");
        fs::write(&contigs, ">c1\nACGT\n").unwrap();
        let domtbl = dir.path().join("hits.domtbl");
        fs::write(&domtbl, format!("{}\n", row("c9-f0", "K1", "1e-5", "30", 1, 1))).unwrap();
        let err = domtbl_to_gff(&domtbl, &contigs, dir.path().join("o.gff"), 1.0, &HitLabels::default())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Unknown sequence 'c9'"));
    }
}
