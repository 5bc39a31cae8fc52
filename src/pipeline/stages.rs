//! Builds the steps of every pipeline stage from the configuration.
//!
//! All file names live in [`Layout`]; the stage builders only wire tools to
//! those paths. Each file is produced by exactly one step, which is what the
//! task graph relies on to derive the execution order.

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use log::debug;

use super::step::Step;
use super::tools::Tools;
use crate::annotation::{coverage, enrich, filter, hmmer};
use crate::bio::{translate_fasta, GeneticCode};
use crate::config::PipelineConfig;
use crate::database::{write_mapping_table, Downloader, Source};
use crate::io::concatenate;
use crate::io::fastq::interleave_and_trim;
use crate::relabel::relabel_fasta;

/// Suffixes of the files `bowtie2-build` writes for a small index.
const BOWTIE2_INDEX_SUFFIXES: [&str; 6] = ["1.bt2", "2.bt2", "3.bt2", "4.bt2", "rev.1.bt2", "rev.2.bt2"];

/// Paths of everything the pipeline writes below the work directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Layout {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn reference_dir(&self) -> PathBuf {
        self.dir("reference")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.dir("tools")
    }

    pub fn reads_dir(&self) -> PathBuf {
        self.dir("reads")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir("logs")
    }

    pub fn run_report(&self) -> PathBuf {
        self.root.join("run_report.json")
    }

    pub fn id_mapping_table(&self) -> PathBuf {
        self.reference_dir().join("id_mapping.tsv.gz")
    }

    pub fn interleaved(&self, sample: &str) -> PathBuf {
        self.dir("preprocess").join(format!("{}.interleaved.fastq.gz", sample))
    }

    pub fn normalized(&self, sample: &str) -> PathBuf {
        self.dir("preprocess").join(format!("{}.normalized.fastq.gz", sample))
    }

    /// Assembler output directory; the assembler refuses to reuse it.
    pub fn assembler_dir(&self) -> PathBuf {
        self.dir("assembly").join("megahit")
    }

    pub fn raw_contigs(&self) -> PathBuf {
        self.assembler_dir().join("final.contigs.fa")
    }

    pub fn contigs(&self) -> PathBuf {
        self.dir("assembly").join("contigs.fa")
    }

    pub fn contig_names(&self) -> PathBuf {
        self.dir("assembly").join("contigs.json")
    }

    pub fn contigs_fai(&self) -> PathBuf {
        self.dir("assembly").join("contigs.fa.fai")
    }

    pub fn family_alignment(&self, family: &str) -> PathBuf {
        self.dir("profiles").join(format!("{}.afa", family))
    }

    pub fn family_hmm(&self, family: &str) -> PathBuf {
        self.dir("profiles").join(format!("{}.hmm", family))
    }

    pub fn profiles(&self) -> PathBuf {
        self.dir("profiles").join("profiles.hmm")
    }

    pub fn translated_contigs(&self) -> PathBuf {
        self.dir("annotation").join("contigs.aa.fa")
    }

    pub fn domain_table(&self) -> PathBuf {
        self.dir("annotation").join("hits.domtbl")
    }

    pub fn search_output(&self) -> PathBuf {
        self.dir("annotation").join("hmmsearch.out")
    }

    pub fn hits_gff(&self) -> PathBuf {
        self.dir("annotation").join("hits.gff")
    }

    pub fn filtered_gff(&self) -> PathBuf {
        self.dir("annotation").join("filtered.gff")
    }

    pub fn enriched_gff(&self) -> PathBuf {
        self.dir("annotation").join("enriched.gff")
    }

    pub fn final_gff(&self) -> PathBuf {
        self.dir("annotation").join("final.gff")
    }

    pub fn index_prefix(&self) -> PathBuf {
        self.dir("mapping").join("index").join("contigs")
    }

    pub fn index_files(&self) -> Vec<PathBuf> {
        let prefix = self.index_prefix().display().to_string();
        BOWTIE2_INDEX_SUFFIXES
            .iter()
            .map(|suffix| PathBuf::from(format!("{}.{}", prefix, suffix)))
            .collect()
    }

    pub fn sam(&self, sample: &str) -> PathBuf {
        self.dir("mapping").join(format!("{}.sam", sample))
    }

    pub fn bam(&self, sample: &str) -> PathBuf {
        self.dir("mapping").join(format!("{}.bam", sample))
    }

    pub fn bam_index(&self, sample: &str) -> PathBuf {
        self.dir("mapping").join(format!("{}.bam.bai", sample))
    }

    pub fn depth(&self, sample: &str) -> PathBuf {
        self.dir("mapping").join(format!("{}.depth", sample))
    }

    pub fn pileup(&self, sample: &str) -> PathBuf {
        self.dir("variants").join(format!("{}.pileup.bcf", sample))
    }

    pub fn vcf(&self, sample: &str) -> PathBuf {
        self.dir("variants").join(format!("{}.vcf.gz", sample))
    }

    pub fn vcf_index(&self, sample: &str) -> PathBuf {
        self.dir("variants").join(format!("{}.vcf.gz.csi", sample))
    }

    pub fn merged_vcf(&self) -> PathBuf {
        self.dir("variants").join("merged.vcf.gz")
    }
}

/// Read files of one sample once acquisition is planned.
#[derive(Debug, Clone)]
struct SampleReads {
    name: String,
    r1: PathBuf,
    r2: PathBuf,
}

/// Name a remote file keeps locally, `fallback` when the URL does not end in one.
fn remote_name(source: &Source, fallback: &str) -> String {
    source.file_name().unwrap_or_else(|| fallback.to_string())
}

/// Step that makes `source` available at `dest`; local files need none.
fn fetch(name: String, source: Source, dest: PathBuf, tools: &Tools) -> (PathBuf, Option<Step>) {
    match source {
        Source::Local(path) => (path, None),
        Source::Http(url) => {
            let target = dest.clone();
            let step = Step::internal(name, format!("download {}", url), move || {
                Downloader::new()?.download(&url, &target)?;
                Ok(())
            })
            .output(&dest);
            (dest, Some(step))
        }
        Source::Ftp(url) => {
            let cmd = tools.curl.command().arg("-o").path(&dest).arg(url);
            let step = Step::command(name, cmd).output(&dest);
            (dest, Some(step))
        }
    }
}

/// Fetched reads are stored under a sample-based name whatever the remote file is called.
fn read_file_name(sample: &str, mate: &str, source: &Source) -> String {
    let compressed = source
        .file_name()
        .map_or(false, |name| name.ends_with(".gz"));
    format!(
        "{}_{}.fastq{}",
        sample,
        mate,
        if compressed { ".gz" } else { "" }
    )
}

fn acquisition(config: &PipelineConfig, layout: &Layout, steps: &mut Vec<Step>) -> Vec<SampleReads> {
    if let Some(mapping) = &config.id_mapping {
        let source = Source::parse(&mapping.source);
        let dest = layout
            .reference_dir()
            .join(remote_name(&source, "idmapping.tab.gz"));
        let (raw, fetch_step) = fetch("fetch_id_mapping".to_string(), source, dest, &config.tools);
        steps.extend(fetch_step);

        let table = layout.id_mapping_table();
        let (key, value) = (mapping.key_column, mapping.value_column);
        let (input, output) = (raw.clone(), table.clone());
        steps.push(
            Step::internal(
                "mapping_table",
                format!("extract columns {} and {} of {}", key, value, raw.display()),
                move || {
                    write_mapping_table(&input, &output, key, value)?;
                    Ok(())
                },
            )
            .input(&raw)
            .output(&table),
        );
    }

    if let Some(archive) = &config.utility_archive {
        let tools_dir = layout.tools_dir();
        let source = Source::parse(&archive.url);
        let dest = tools_dir.join(remote_name(&source, "utilities.tar.gz"));
        let (tarball, fetch_step) = fetch("fetch_utilities".to_string(), source, dest, &config.tools);
        steps.extend(fetch_step);
        let cmd = config
            .tools
            .tar
            .command()
            .arg("-xf")
            .path(&tarball)
            .arg("-C")
            .path(&tools_dir);
        steps.push(
            Step::command("extract_utilities", cmd)
                .input(&tarball)
                .outputs(archive.provides.iter().map(|p| tools_dir.join(p))),
        );
    }

    let mut samples = Vec::with_capacity(config.samples.len());
    for sample in &config.samples {
        let mut mates = Vec::with_capacity(2);
        for (mate, location) in [("R1", &sample.r1), ("R2", &sample.r2)] {
            let source = Source::parse(location);
            let dest = layout
                .reads_dir()
                .join(read_file_name(&sample.name, mate, &source));
            let (path, fetch_step) = fetch(
                format!("fetch_{}_{}", sample.name, mate),
                source,
                dest,
                &config.tools,
            );
            steps.extend(fetch_step);
            mates.push(path);
        }
        let r2 = mates.pop().unwrap_or_default();
        let r1 = mates.pop().unwrap_or_default();
        samples.push(SampleReads {
            name: sample.name.clone(),
            r1,
            r2,
        });
    }
    samples
}

fn preprocess(config: &PipelineConfig, layout: &Layout, samples: &[SampleReads], steps: &mut Vec<Step>) {
    for sample in samples {
        let interleaved = layout.interleaved(&sample.name);
        let normalized = layout.normalized(&sample.name);
        let (r1, r2, out) = (sample.r1.clone(), sample.r2.clone(), interleaved.clone());
        let params = config.preprocess.clone();
        steps.push(
            Step::internal(
                format!("interleave_{}", sample.name),
                format!(
                    "interleave {} and {}, trimming below Q{}",
                    sample.r1.display(),
                    sample.r2.display(),
                    params.trim_quality
                ),
                move || {
                    interleave_and_trim(&r1, &r2, &out, &params)?;
                    Ok(())
                },
            )
            .input(&sample.r1)
            .input(&sample.r2)
            .output(&interleaved),
        );

        let cmd = config
            .tools
            .normalizer
            .command()
            .arg(format!("in={}", interleaved.display()))
            .arg(format!("out={}", normalized.display()))
            .arg("interleaved=t")
            .arg(format!("threads={}", config.threads));
        steps.push(
            Step::command(format!("normalize_{}", sample.name), cmd)
                .input(&interleaved)
                .output(&normalized),
        );
    }
}

fn assembly(config: &PipelineConfig, layout: &Layout, samples: &[SampleReads], steps: &mut Vec<Step>) {
    let normalized: Vec<PathBuf> = samples.iter().map(|s| layout.normalized(&s.name)).collect();
    let reads = normalized
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",");
    let cmd = config
        .tools
        .assembler
        .command()
        .arg("-t")
        .arg(config.threads.to_string())
        .arg("--12")
        .arg(reads)
        .arg("-o")
        .path(layout.assembler_dir());
    steps.push(
        Step::command("assemble", cmd)
            .inputs(&normalized)
            .output(layout.raw_contigs())
            .scratch(layout.assembler_dir()),
    );

    let (raw, contigs, names) = (layout.raw_contigs(), layout.contigs(), layout.contig_names());
    let (input, fasta, json) = (raw.clone(), contigs.clone(), names.clone());
    steps.push(
        Step::internal("relabel", "replace contig names with random tokens", move || {
            relabel_fasta(&input, &fasta, &json)?;
            Ok(())
        })
        .input(&raw)
        .outputs([&contigs, &names]),
    );
}

/// Plans profile building and returns the HMM file searched during annotation.
fn profiles(config: &PipelineConfig, layout: &Layout, steps: &mut Vec<Step>) -> PathBuf {
    if let Some(hmm_file) = &config.profiles.hmm_file {
        return hmm_file.clone();
    }
    let tools = &config.tools;
    let mut hmms = Vec::with_capacity(config.profiles.families.len());
    for family in &config.profiles.families {
        let sequences = config.profiles.families_dir.join(format!("{}.fa", family));
        let alignment = layout.family_alignment(family);
        let hmm = layout.family_hmm(family);

        let align = tools
            .aligner_msa
            .command()
            .arg("--thread")
            .arg(config.threads.to_string())
            .path(&sequences)
            .stdout_to(&alignment);
        steps.push(Step::command(format!("msa_{}", family), align).input(&sequences));

        let build = tools
            .hmmbuild
            .command()
            .arg("--cpu")
            .arg(config.threads.to_string())
            .arg("-n")
            .arg(family)
            .arg("--informat")
            .arg("afa")
            .path(&hmm)
            .path(&alignment);
        steps.push(
            Step::command(format!("hmmbuild_{}", family), build)
                .input(&alignment)
                .output(&hmm),
        );
        hmms.push(hmm);
    }

    let profiles = layout.profiles();
    let (inputs, output) = (hmms.clone(), profiles.clone());
    steps.push(
        Step::internal(
            "concat_profiles",
            format!("concatenate {} profiles", hmms.len()),
            move || {
                concatenate(&inputs, &output)?;
                Ok(())
            },
        )
        .inputs(&hmms)
        .output(&profiles),
    );
    profiles
}

/// Plans annotation and returns the GFF file that coverage is added to.
fn annotation(config: &PipelineConfig, layout: &Layout, profiles: &Path, steps: &mut Vec<Step>) -> PathBuf {
    let contigs = layout.contigs();
    let translated = layout.translated_contigs();
    let (input, output) = (contigs.clone(), translated.clone());
    let table = config.annotation.translation_table;
    steps.push(
        Step::internal(
            "translate",
            format!("six-frame translation of contigs (genetic code {})", table),
            move || {
                let code = GeneticCode::from_id(table)
                    .ok_or_else(|| anyhow!("unknown translation table {}", table))?;
                translate_fasta(&input, &output, code)?;
                Ok(())
            },
        )
        .input(&contigs)
        .output(&translated),
    );

    let domtbl = layout.domain_table();
    let search = config
        .tools
        .hmmsearch
        .command()
        .arg("--cpu")
        .arg(config.threads.to_string())
        .arg("--domtblout")
        .path(&domtbl)
        .arg("-o")
        .path(layout.search_output())
        .path(profiles)
        .path(&translated);
    steps.push(
        Step::command("hmmsearch", search)
            .input(profiles)
            .input(&translated)
            .outputs([domtbl.clone(), layout.search_output()]),
    );

    let hits = layout.hits_gff();
    let max_evalue = config.annotation.max_evalue;
    let (table, nucleotides, output) = (domtbl.clone(), contigs.clone(), hits.clone());
    let descriptions = config.annotation.descriptions.clone();
    let corrections = config.annotation.taxon_corrections.clone();
    let lookups: Vec<PathBuf> = descriptions.iter().chain(corrections.iter()).cloned().collect();
    steps.push(
        Step::internal(
            "hmmer2gff",
            format!("convert domain hits with E-value <= {} to GFF", max_evalue),
            move || {
                let labels = hmmer::HitLabels::load(descriptions.as_deref(), corrections.as_deref())?;
                hmmer::domtbl_to_gff(&table, &nucleotides, &output, max_evalue, &labels)?;
                Ok(())
            },
        )
        .input(&domtbl)
        .input(&contigs)
        .inputs(&lookups)
        .output(&hits),
    );

    let filtered = layout.filtered_gff();
    let params = config.annotation.filter.clone();
    let (input, output) = (hits.clone(), filtered.clone());
    steps.push(
        Step::internal(
            "filter_gff",
            format!(
                "keep hits with bitscore >= {} and resolve overlaps >= {} bp",
                params.min_bitscore, params.min_overlap
            ),
            move || {
                filter::filter_gff(&input, &output, &params)?;
                Ok(())
            },
        )
        .input(&hits)
        .output(&filtered),
    );

    let mapping = match &config.id_mapping {
        Some(mapping) => mapping,
        None => return filtered,
    };
    let enriched = layout.enriched_gff();
    let table = layout.id_mapping_table();
    let (input, lookup, output) = (filtered.clone(), table.clone(), enriched.clone());
    let (match_attribute, new_attribute) =
        (mapping.match_attribute.clone(), mapping.new_attribute.clone());
    steps.push(
        Step::internal(
            "enrich_gff",
            format!("map '{}' to '{}'", match_attribute, new_attribute),
            move || {
                enrich::enrich_gff(&input, &lookup, &output, &match_attribute, &new_attribute)?;
                Ok(())
            },
        )
        .input(&filtered)
        .input(&table)
        .output(&enriched),
    );
    enriched
}

fn read_mapping(config: &PipelineConfig, layout: &Layout, samples: &[SampleReads], steps: &mut Vec<Step>) {
    let tools = &config.tools;
    let threads = config.threads.to_string();
    let contigs = layout.contigs();
    let index_files = layout.index_files();

    let build = tools
        .index_builder
        .command()
        .arg("--threads")
        .arg(&threads)
        .path(&contigs)
        .path(layout.index_prefix());
    steps.push(
        Step::command("bowtie2_index", build)
            .input(&contigs)
            .outputs(&index_files),
    );

    for sample in samples {
        let name = &sample.name;
        let sam = layout.sam(name);
        let bam = layout.bam(name);

        let align = tools
            .read_aligner
            .command()
            .arg("-p")
            .arg(&threads)
            .arg("-x")
            .path(layout.index_prefix())
            .arg("-1")
            .path(&sample.r1)
            .arg("-2")
            .path(&sample.r2)
            .arg("--rg-id")
            .arg(name)
            .arg("--rg")
            .arg(format!("SM:{}", name))
            .arg("-S")
            .path(&sam);
        steps.push(
            Step::command(format!("align_{}", name), align)
                .inputs(&index_files)
                .input(&sample.r1)
                .input(&sample.r2)
                .output(&sam),
        );

        let sort = tools
            .samtools_sort
            .subcommand("sort")
            .arg("-@")
            .arg(&threads)
            .arg("-o")
            .path(&bam)
            .path(&sam);
        steps.push(
            Step::command(format!("sort_{}", name), sort)
                .input(&sam)
                .output(&bam),
        );

        let index = tools.samtools_index.subcommand("index").path(&bam);
        steps.push(
            Step::command(format!("index_{}", name), index)
                .input(&bam)
                .output(layout.bam_index(name)),
        );
    }
}

fn coverage(
    config: &PipelineConfig,
    layout: &Layout,
    samples: &[SampleReads],
    annotations: &Path,
    steps: &mut Vec<Step>,
) {
    let mut depths = Vec::with_capacity(samples.len());
    for sample in samples {
        let depth = layout.depth(&sample.name);
        let cmd = config
            .tools
            .samtools_depth
            .subcommand("depth")
            .path(layout.bam(&sample.name))
            .stdout_to(&depth);
        steps.push(
            Step::command(format!("depth_{}", sample.name), cmd)
                .input(layout.bam(&sample.name))
                .input(layout.bam_index(&sample.name)),
        );
        depths.push((sample.name.clone(), depth));
    }

    let final_gff = layout.final_gff();
    let depth_files: Vec<PathBuf> = depths.iter().map(|(_, p)| p.clone()).collect();
    let (input, output) = (annotations.to_path_buf(), final_gff.clone());
    steps.push(
        Step::internal(
            "coverage",
            format!("add coverage of {} samples", depths.len()),
            move || {
                coverage::coverage_gff(&input, &depths, &output)?;
                Ok(())
            },
        )
        .input(annotations)
        .inputs(&depth_files)
        .output(&final_gff),
    );
}

fn variants(config: &PipelineConfig, layout: &Layout, samples: &[SampleReads], steps: &mut Vec<Step>) {
    let tools = &config.tools;
    let contigs = layout.contigs();
    let fai = layout.contigs_fai();
    steps.push(
        Step::command("faidx", tools.samtools_faidx.subcommand("faidx").path(&contigs))
            .input(&contigs)
            .output(&fai),
    );

    let mut vcfs = Vec::with_capacity(samples.len());
    let mut vcf_indices = Vec::with_capacity(samples.len());
    for sample in samples {
        let name = &sample.name;
        let (bam, pileup, vcf) = (layout.bam(name), layout.pileup(name), layout.vcf(name));

        let mpileup = tools
            .bcftools_mpileup
            .subcommand("mpileup")
            .arg("-f")
            .path(&contigs)
            .arg("-Ou")
            .arg("-o")
            .path(&pileup)
            .path(&bam);
        steps.push(
            Step::command(format!("mpileup_{}", name), mpileup)
                .inputs([&contigs, &fai, &bam])
                .input(layout.bam_index(name))
                .output(&pileup),
        );

        let call = tools
            .bcftools_call
            .subcommand("call")
            .arg("-Oz")
            .arg("-o")
            .path(&vcf)
            .path(&pileup);
        steps.push(
            Step::command(format!("call_{}", name), call)
                .input(&pileup)
                .output(&vcf),
        );

        let index = tools.bcftools_index.subcommand("index").path(&vcf);
        steps.push(
            Step::command(format!("vcfindex_{}", name), index)
                .input(&vcf)
                .output(layout.vcf_index(name)),
        );
        vcfs.push(vcf);
        vcf_indices.push(layout.vcf_index(name));
    }

    let merged = layout.merged_vcf();
    let mut merge = tools.bcftools_merge.subcommand("merge");
    if vcfs.len() == 1 {
        merge = merge.arg("--force-single");
    }
    merge = merge.arg("-Oz").arg("-o").path(&merged);
    for vcf in &vcfs {
        merge = merge.path(vcf);
    }
    steps.push(
        Step::command("merge_variants", merge)
            .inputs(&vcfs)
            .inputs(&vcf_indices)
            .output(&merged),
    );
}

/// Every step of the pipeline, in stage order.
pub fn build_plan(config: &PipelineConfig) -> Vec<Step> {
    let layout = Layout::new(&config.work_dir);
    let mut steps = Vec::new();

    let samples = acquisition(config, &layout, &mut steps);
    preprocess(config, &layout, &samples, &mut steps);
    assembly(config, &layout, &samples, &mut steps);
    let hmm_file = profiles(config, &layout, &mut steps);
    let annotations = annotation(config, &layout, &hmm_file, &mut steps);
    read_mapping(config, &layout, &samples, &mut steps);
    coverage(config, &layout, &samples, &annotations, &mut steps);
    variants(config, &layout, &samples, &mut steps);

    debug!("Planned {} steps for {} samples", steps.len(), samples.len());
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdMappingConfig, SampleConfig};
    use crate::pipeline::step::{Action, CommandSpec};
    use crate::pipeline::TaskGraph;
    use std::fs;
    use tempfile::tempdir;

    fn config(dir: &Path, samples: &[&str]) -> PipelineConfig {
        let families_dir = dir.join("families");
        fs::create_dir_all(&families_dir).unwrap();
        fs::write(families_dir.join("K1.fa"), ">p\nMKV\n").unwrap();
        let mut config = PipelineConfig {
            work_dir: dir.join("work"),
            threads: 2,
            ..PipelineConfig::default()
        };
        config.profiles.families_dir = families_dir;
        config.profiles.families = vec!["K1".to_string()];
        for sample in samples {
            let r1 = dir.join(format!("{}_1.fq", sample));
            let r2 = dir.join(format!("{}_2.fq", sample));
            fs::write(&r1, "@r/1\nACGT\n+\nIIII\n").unwrap();
            fs::write(&r2, "@r/2\nACGT\n+\nIIII\n").unwrap();
            config.samples.push(SampleConfig {
                name: sample.to_string(),
                r1: r1.display().to_string(),
                r2: r2.display().to_string(),
            });
        }
        config
    }

    fn command<'a>(steps: &'a [Step], name: &str) -> &'a CommandSpec {
        match &steps.iter().find(|s| s.name == name).unwrap().action {
            Action::Command(cmd) => cmd,
            other => panic!("{} is not a command: {:?}", name, other),
        }
    }

    #[test]
    fn test_plan_is_a_valid_graph() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), &["s1", "s2"]);
        let graph = TaskGraph::new(build_plan(&config)).unwrap();
        let order: Vec<&str> = graph
            .order()
            .iter()
            .map(|&i| graph.step(i).name.as_str())
            .collect();
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(pos("interleave_s1") < pos("normalize_s1"));
        assert!(pos("normalize_s2") < pos("assemble"));
        assert!(pos("relabel") < pos("translate"));
        assert!(pos("concat_profiles") < pos("hmmsearch"));
        assert!(pos("index_s1") < pos("depth_s1"));
        assert!(pos("filter_gff") < pos("coverage"));
        assert!(pos("vcfindex_s2") < pos("merge_variants"));
        assert!(!order.contains(&"enrich_gff"));
    }

    #[test]
    fn test_sample_names_cannot_shadow_other_steps() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), &["s1", "family_K1", "vcf_s1", "profile"]);
        let steps = build_plan(&config);
        let mut names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(names.contains(&"msa_K1"));
        assert!(names.contains(&"align_family_K1"));
        assert!(names.contains(&"vcfindex_s1"));
        assert!(names.contains(&"index_vcf_s1"));
        assert!(TaskGraph::new(steps).is_ok());
    }

    #[test]
    fn test_lookup_tables_are_hmmer2gff_inputs() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path(), &["s1"]);
        let descriptions = dir.path().join("ko_names.tsv");
        fs::write(&descriptions, "K1\tkinase\n").unwrap();
        config.annotation.descriptions = Some(descriptions.clone());
        config.annotation.translation_table = 11;
        let steps = build_plan(&config);

        let convert = steps.iter().find(|s| s.name == "hmmer2gff").unwrap();
        assert!(convert.inputs.contains(&descriptions));
        let translate = steps.iter().find(|s| s.name == "translate").unwrap();
        assert!(translate.action.to_string().contains("genetic code 11"));
        assert!(TaskGraph::new(steps).is_ok());
    }

    #[test]
    fn test_command_lines() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), &["s1", "s2"]);
        let layout = Layout::new(&config.work_dir);
        let steps = build_plan(&config);

        let assemble = command(&steps, "assemble");
        assert_eq!(assemble.program, "megahit");
        assert!(assemble.args.contains(&format!(
            "{},{}",
            layout.normalized("s1").display(),
            layout.normalized("s2").display()
        )));

        let align = command(&steps, "align_s2").to_string();
        assert!(align.contains("--rg-id s2 --rg SM:s2"));

        let merge = command(&steps, "merge_variants");
        assert_eq!(&merge.args[..2], &["merge".to_string(), "-Oz".to_string()]);
        assert!(!merge.args.contains(&"--force-single".to_string()));

        let depth = command(&steps, "depth_s1");
        assert_eq!(depth.stdout.as_deref(), Some(layout.depth("s1").as_path()));
        let bam = layout.bam("s1").display().to_string();
        assert_eq!(depth.args, vec!["depth", "-a", bam.as_str()]);
    }

    #[test]
    fn test_single_sample_merge_is_forced() {
        let dir = tempdir().unwrap();
        let steps = build_plan(&config(dir.path(), &["only"]));
        assert!(command(&steps, "merge_variants")
            .args
            .contains(&"--force-single".to_string()));
    }

    #[test]
    fn test_remote_sources_add_fetch_steps() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path(), &["s1"]);
        config.samples[0].r1 = "ftp://host/runs/ERR1_1.fastq.gz".to_string();
        config.samples[0].r2 = "https://host/runs/ERR1_2.fastq.gz".to_string();
        config.id_mapping = Some(IdMappingConfig {
            source: "ftp://host/idmapping_selected.tab.gz".to_string(),
            key_column: 0,
            value_column: 12,
            match_attribute: "gene_id".to_string(),
            new_attribute: "db_taxon_id".to_string(),
        });
        let layout = Layout::new(&config.work_dir);
        let steps = build_plan(&config);

        let fetch_r1 = steps.iter().find(|s| s.name == "fetch_s1_R1").unwrap();
        assert_eq!(fetch_r1.outputs, vec![layout.reads_dir().join("s1_R1.fastq.gz")]);
        let curl = command(&steps, "fetch_s1_R1").to_string();
        assert!(curl.ends_with(&format!(
            "-o {} ftp://host/runs/ERR1_1.fastq.gz",
            layout.reads_dir().join("s1_R1.fastq.gz").display()
        )));

        let fetch_r2 = steps.iter().find(|s| s.name == "fetch_s1_R2").unwrap();
        assert!(matches!(fetch_r2.action, Action::Internal { .. }));
        assert_eq!(fetch_r2.outputs, vec![layout.reads_dir().join("s1_R2.fastq.gz")]);

        let enrich = steps.iter().find(|s| s.name == "enrich_gff").unwrap();
        assert!(enrich.inputs.contains(&layout.id_mapping_table()));
        let coverage = steps.iter().find(|s| s.name == "coverage").unwrap();
        assert!(coverage.inputs.contains(&layout.enriched_gff()));

        TaskGraph::new(steps).unwrap();
    }
}
