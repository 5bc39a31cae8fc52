//! External programs the pipeline drives, with user-adjustable extra flags.
//!
//! The flags that name input and output files are always set by the stage
//! builders; `args` only carries tuning options.

use serde::{Deserialize, Serialize};

use super::step::CommandSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolConfig {
    pub fn new(program: &str, args: &[&str]) -> Self {
        ToolConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Starts a command line: program, then the configured extra flags.
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.program).args(&self.args)
    }

    /// Like [`ToolConfig::command`] for tools with a subcommand (`samtools sort`).
    pub fn subcommand(&self, sub: &str) -> CommandSpec {
        CommandSpec::new(&self.program).arg(sub).args(&self.args)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    /// Fetcher for `ftp://` sources.
    pub curl: ToolConfig,
    pub tar: ToolConfig,
    pub normalizer: ToolConfig,
    pub assembler: ToolConfig,
    pub aligner_msa: ToolConfig,
    pub hmmbuild: ToolConfig,
    pub hmmsearch: ToolConfig,
    pub index_builder: ToolConfig,
    pub read_aligner: ToolConfig,
    pub samtools_sort: ToolConfig,
    pub samtools_index: ToolConfig,
    pub samtools_depth: ToolConfig,
    pub samtools_faidx: ToolConfig,
    pub bcftools_mpileup: ToolConfig,
    pub bcftools_call: ToolConfig,
    pub bcftools_index: ToolConfig,
    pub bcftools_merge: ToolConfig,
}

impl Default for Tools {
    fn default() -> Self {
        Tools {
            curl: ToolConfig::new("curl", &["--silent", "--show-error", "--fail", "--location"]),
            tar: ToolConfig::new("tar", &[]),
            normalizer: ToolConfig::new("bbnorm.sh", &["target=20", "mindepth=2"]),
            assembler: ToolConfig::new("megahit", &[]),
            aligner_msa: ToolConfig::new("mafft", &["--auto", "--quiet"]),
            hmmbuild: ToolConfig::new("hmmbuild", &["--amino"]),
            hmmsearch: ToolConfig::new("hmmsearch", &[]),
            index_builder: ToolConfig::new("bowtie2-build", &["--quiet"]),
            read_aligner: ToolConfig::new("bowtie2", &[]),
            samtools_sort: ToolConfig::new("samtools", &[]),
            samtools_index: ToolConfig::new("samtools", &[]),
            samtools_depth: ToolConfig::new("samtools", &["-a"]),
            samtools_faidx: ToolConfig::new("samtools", &[]),
            bcftools_mpileup: ToolConfig::new("bcftools", &[]),
            bcftools_call: ToolConfig::new("bcftools", &["--multiallelic-caller", "--variants-only"]),
            bcftools_index: ToolConfig::new("bcftools", &[]),
            bcftools_merge: ToolConfig::new("bcftools", &[]),
        }
    }
}
