use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;

use crate::annotation::filter::{filter_gff, FilterParams};
use crate::annotation::{coverage, enrich, hmmer};
use crate::bio::{translate_fasta, GeneticCode};
use crate::config::PipelineConfig;
use crate::database::write_mapping_table;
use crate::io::fastq::{interleave_and_trim, QualityControlParams};
use crate::pipeline::{
    build_plan, generate_report, ExistingOutputs, Layout, RunReport, Runner, RunnerOptions,
    StepStatus, TaskGraph,
};
use crate::relabel::{relabel_fasta, restore_names};

#[derive(Parser, Debug)]
#[command(author, version, about = "Checkpointed metagenome annotation pipeline", long_about = None)]
pub struct Cli {
    /// Log debug messages (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by `run` and `plan`; flags override the configuration file.
#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Pipeline configuration (JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    #[arg(short, long)]
    pub work_dir: Option<PathBuf>,

    /// Threads handed to each tool
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Steps run at the same time
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip steps whose outputs are up to date
    #[arg(long)]
    pub resume: bool,

    /// What to do with outputs left by an earlier run
    #[arg(long, value_enum, conflicts_with = "resume")]
    pub existing_outputs: Option<ExistingOutputs>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the whole pipeline
    Run(PipelineArgs),

    /// Print the steps of the pipeline, grouped by dependency level
    Plan(PipelineArgs),

    /// Extract a two-column identifier mapping table from a wide TSV dump
    MappingTable {
        source: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        key_column: usize,
        #[arg(long, default_value_t = 12)]
        value_column: usize,
    },

    /// Interleave paired reads, trimming low-quality 3' ends
    Interleave {
        r1: PathBuf,
        r2: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 20)]
        trim_quality: u8,
        #[arg(long, default_value_t = 50)]
        min_length: usize,
    },

    /// Replace FASTA headers with random tokens
    Relabel {
        input: PathBuf,
        output_fasta: PathBuf,
        output_json: PathBuf,
    },

    /// Put original contig names back into a GFF file
    RestoreNames {
        gff: PathBuf,
        json: PathBuf,
        output: PathBuf,
    },

    /// Six-frame translation of nucleotide FASTA
    Translate {
        input: PathBuf,
        output: PathBuf,
        /// NCBI translation table
        #[arg(long, default_value = "1", value_parser = parse_genetic_code)]
        table: GeneticCode,
    },

    /// Convert an hmmsearch domain table to GFF
    Hmmer2gff {
        domtbl: PathBuf,
        contigs: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 0.05)]
        max_evalue: f64,
        /// GENE_ID<TAB>DESCRIPTION table
        #[arg(long)]
        descriptions: Option<PathBuf>,
        /// MISSPELLED<TAB>CORRECT table of taxon names
        #[arg(long)]
        taxon_corrections: Option<PathBuf>,
    },

    /// Drop weak hits and resolve overlapping ones
    FilterGff {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        min_bitscore: f64,
        #[arg(long, default_value_t = 100)]
        min_overlap: u64,
        #[arg(long)]
        strand_specific: bool,
    },

    /// Add attributes looked up in a mapping table
    EnrichGff {
        input: PathBuf,
        table: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "gene_id")]
        match_attribute: String,
        #[arg(long, default_value = "db_taxon_id")]
        new_attribute: String,
    },

    /// Add per-sample mean depth to every feature
    Coverage {
        input: PathBuf,
        output: PathBuf,
        /// SAMPLE=DEPTH_FILE, repeated per sample
        #[arg(long = "depth", value_parser = parse_depth, required = true)]
        depths: Vec<(String, PathBuf)>,
    },
}

fn parse_depth(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((sample, path)) if !sample.is_empty() && !path.is_empty() => {
            Ok((sample.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected SAMPLE=FILE, got '{}'", value)),
    }
}

fn parse_genetic_code(value: &str) -> Result<GeneticCode, String> {
    value
        .parse::<u8>()
        .ok()
        .and_then(GeneticCode::from_id)
        .ok_or_else(|| {
            format!(
                "unknown translation table '{}' (known: {:?})",
                value,
                GeneticCode::known_ids()
            )
        })
}

fn load_config(args: &PipelineArgs) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(work_dir) = &args.work_dir {
        config.work_dir = work_dir.clone();
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if let Some(existing) = args.existing_outputs {
        config.existing_outputs = existing;
    }
    if args.resume {
        config.existing_outputs = ExistingOutputs::Resume;
    }
    config.validate()?;
    Ok(config)
}

fn run_pipeline(config: &PipelineConfig) -> Result<()> {
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
    {
        debug!("Keeping the existing thread pool: {}", e);
    }

    let layout = Layout::new(&config.work_dir);
    fs::create_dir_all(layout.root())
        .with_context(|| format!("Failed to create {}", layout.root().display()))?;
    let graph = TaskGraph::new(build_plan(config))?;
    debug!(
        "Execution order: {}",
        graph
            .order()
            .iter()
            .map(|&idx| graph.step(idx).name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!(
        "Running {} steps in {} levels under {}",
        graph.len(),
        graph.levels().len(),
        layout.root().display()
    );

    let mut options = RunnerOptions::new(layout.logs_dir());
    options.jobs = config.jobs;
    options.existing = config.existing_outputs;
    let mut report = RunReport::default();
    let result = Runner::new(options).run(&graph, &mut report);

    report.write_json(layout.run_report())?;
    println!("{}", generate_report(&report));
    result?;
    if report.count(StepStatus::Skipped) > 0 {
        info!(
            "{} steps were up to date and skipped",
            report.count(StepStatus::Skipped)
        );
    }
    Ok(())
}

fn print_plan(config: &PipelineConfig) -> Result<()> {
    let graph = TaskGraph::new(build_plan(config))?;
    for (level, indices) in graph.levels().iter().enumerate() {
        println!("level {}", level);
        for &idx in indices {
            let step = graph.step(idx);
            let after: Vec<&str> = graph
                .dependencies(idx)
                .iter()
                .map(|&dep| graph.step(dep).name.as_str())
                .collect();
            if after.is_empty() {
                println!("  {}: {}", step.name, step.action);
            } else {
                println!("  {} (after {}): {}", step.name, after.join(", "), step.action);
            }
        }
    }
    Ok(())
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline(&load_config(&args)?),
        Commands::Plan(args) => print_plan(&load_config(&args)?),
        Commands::MappingTable {
            source,
            output,
            key_column,
            value_column,
        } => {
            let stats = write_mapping_table(&source, &output, key_column, value_column)?;
            println!(
                "{} rows read, {} skipped, {} pairs written",
                stats.rows_read, stats.rows_skipped, stats.pairs_written
            );
            Ok(())
        }
        Commands::Interleave {
            r1,
            r2,
            output,
            trim_quality,
            min_length,
        } => {
            let params = QualityControlParams {
                trim_quality,
                min_length,
            };
            let stats = interleave_and_trim(&r1, &r2, &output, &params)?;
            println!(
                "{} of {} pairs written, {} bases trimmed",
                stats.pairs_written, stats.pairs_read, stats.bases_trimmed
            );
            Ok(())
        }
        Commands::Relabel {
            input,
            output_fasta,
            output_json,
        } => {
            let count = relabel_fasta(&input, &output_fasta, &output_json)?;
            println!("Relabeled {} sequences", count);
            Ok(())
        }
        Commands::RestoreNames { gff, json, output } => {
            let count = restore_names(&gff, &json, &output)?;
            println!("Restored names of {} features", count);
            Ok(())
        }
        Commands::Translate {
            input,
            output,
            table,
        } => {
            let count = translate_fasta(&input, &output, table)?;
            println!("Translated {} sequences", count);
            Ok(())
        }
        Commands::Hmmer2gff {
            domtbl,
            contigs,
            output,
            max_evalue,
            descriptions,
            taxon_corrections,
        } => {
            let labels =
                hmmer::HitLabels::load(descriptions.as_deref(), taxon_corrections.as_deref())?;
            let stats = hmmer::domtbl_to_gff(&domtbl, &contigs, &output, max_evalue, &labels)?;
            println!(
                "{} hits, {} discarded, {} features written",
                stats.hits, stats.discarded, stats.written
            );
            Ok(())
        }
        Commands::FilterGff {
            input,
            output,
            min_bitscore,
            min_overlap,
            strand_specific,
        } => {
            let params = FilterParams {
                min_bitscore,
                min_overlap,
                strand_specific,
            };
            let (read, kept) = filter_gff(&input, &output, &params)?;
            println!("Kept {} of {} features", kept, read);
            Ok(())
        }
        Commands::EnrichGff {
            input,
            table,
            output,
            match_attribute,
            new_attribute,
        } => {
            let count =
                enrich::enrich_gff(&input, &table, &output, &match_attribute, &new_attribute)?;
            println!("Enriched {} features", count);
            Ok(())
        }
        Commands::Coverage {
            input,
            output,
            depths,
        } => {
            let count = coverage::coverage_gff(&input, &depths, &output)?;
            println!("Added coverage to {} features", count);
            Ok(())
        }
    }
}
