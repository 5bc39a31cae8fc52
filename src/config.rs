//! Pipeline configuration, read from a JSON file.
//!
//! Every section has defaults so a minimal file only lists the samples and
//! the profile families:
//!
//! ```json
//! {
//!   "samples": [{"name": "s1", "r1": "reads/s1_R1.fq.gz", "r2": "reads/s1_R2.fq.gz"}],
//!   "profiles": {"families_dir": "families", "families": ["K00001"]}
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::annotation::filter::FilterParams;
use crate::bio::GeneticCode;
use crate::io::fastq::QualityControlParams;
use crate::pipeline::tools::Tools;
use crate::pipeline::ExistingOutputs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    IoError { path: PathBuf, source: io::Error },

    #[error("Invalid configuration file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A paired-end sample. `r1` and `r2` are local paths or URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleConfig {
    pub name: String,
    pub r1: String,
    pub r2: String,
}

/// Identifier mapping table used to enrich annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMappingConfig {
    /// Wide tab-separated dump (local path, http(s) or ftp URL).
    pub source: String,
    #[serde(default)]
    pub key_column: usize,
    #[serde(default = "default_value_column")]
    pub value_column: usize,
    /// Annotation attribute looked up in the table.
    #[serde(default = "default_match_attribute")]
    pub match_attribute: String,
    /// Attribute receiving the mapped values.
    #[serde(default = "default_new_attribute")]
    pub new_attribute: String,
}

fn default_value_column() -> usize {
    12
}

fn default_match_attribute() -> String {
    "gene_id".to_string()
}

fn default_new_attribute() -> String {
    "db_taxon_id".to_string()
}

/// A tarball of helper programs unpacked into `tools/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub url: String,
    /// Paths, relative to `tools/`, that the archive is expected to contain.
    pub provides: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Directory holding one unaligned protein FASTA per family (`{family}.fa`).
    pub families_dir: PathBuf,
    pub families: Vec<String>,
    /// Ready-made HMM file; when set no profiles are built.
    pub hmm_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Hits with an independent E-value above this are discarded.
    pub max_evalue: f64,
    /// NCBI translation table used for the six-frame translation.
    pub translation_table: u8,
    /// `gene_id\tdescription` table; matches get a `description` attribute.
    pub descriptions: Option<PathBuf>,
    /// `spelled\tcorrect` table of taxon names to rewrite.
    pub taxon_corrections: Option<PathBuf>,
    #[serde(flatten)]
    pub filter: FilterParams,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        AnnotationConfig {
            max_evalue: 0.05,
            translation_table: 1,
            descriptions: None,
            taxon_corrections: None,
            filter: FilterParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    /// Threads handed to each multi-threaded tool.
    pub threads: usize,
    /// Steps run at the same time.
    pub jobs: usize,
    pub existing_outputs: ExistingOutputs,
    pub samples: Vec<SampleConfig>,
    pub id_mapping: Option<IdMappingConfig>,
    pub utility_archive: Option<ArchiveConfig>,
    pub profiles: ProfilesConfig,
    pub preprocess: QualityControlParams,
    pub annotation: AnnotationConfig,
    pub tools: Tools,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            work_dir: PathBuf::from("mgpipe_work"),
            threads: 4,
            jobs: 1,
            existing_outputs: ExistingOutputs::default(),
            samples: Vec::new(),
            id_mapping: None,
            utility_archive: None,
            profiles: ProfilesConfig::default(),
            preprocess: QualityControlParams::default(),
            annotation: AnnotationConfig::default(),
            tools: Tools::default(),
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 || self.jobs == 0 {
            return Err(ConfigError::Invalid(
                "threads and jobs must be at least 1".to_string(),
            ));
        }
        if self.samples.is_empty() {
            return Err(ConfigError::Invalid("no samples configured".to_string()));
        }
        let mut seen = HashSet::new();
        for sample in &self.samples {
            // Sample names end up in file names and read-group tags.
            if !valid_name(&sample.name) {
                return Err(ConfigError::Invalid(format!(
                    "sample name '{}' may only contain letters, digits, '_', '-' and '.'",
                    sample.name
                )));
            }
            if !seen.insert(sample.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "sample '{}' is listed twice",
                    sample.name
                )));
            }
        }
        if self.profiles.hmm_file.is_none() {
            if self.profiles.families.is_empty() {
                return Err(ConfigError::Invalid(
                    "profiles need either families or an hmm_file".to_string(),
                ));
            }
            if let Some(bad) = self.profiles.families.iter().find(|f| !valid_name(f)) {
                return Err(ConfigError::Invalid(format!("invalid family name '{}'", bad)));
            }
        }
        if let Some(archive) = &self.utility_archive {
            if archive.provides.is_empty() {
                return Err(ConfigError::Invalid(
                    "utility_archive.provides must list at least one path".to_string(),
                ));
            }
            if archive.provides.iter().any(|p| p.is_absolute()) {
                return Err(ConfigError::Invalid(
                    "utility_archive.provides paths are relative to the tools directory"
                        .to_string(),
                ));
            }
        }
        if GeneticCode::from_id(self.annotation.translation_table).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown translation table {} (known: {:?})",
                self.annotation.translation_table,
                GeneticCode::known_ids()
            )));
        }
        if let Some(mapping) = &self.id_mapping {
            if mapping.key_column == mapping.value_column {
                return Err(ConfigError::Invalid(
                    "id_mapping key and value columns must differ".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"{
        "samples": [{"name": "s1", "r1": "a_R1.fq", "r2": "a_R2.fq"}],
        "profiles": {"families_dir": "fam", "families": ["K00001"]}
    }"#;

    #[test]
    fn test_minimal_file_gets_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, MINIMAL).unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.jobs, 1);
        assert_eq!(config.existing_outputs, ExistingOutputs::Overwrite);
        assert_eq!(config.annotation.max_evalue, 0.05);
        assert_eq!(config.annotation.translation_table, 1);
        assert!(config.annotation.descriptions.is_none());
        assert_eq!(config.annotation.filter.min_overlap, 100);
        assert_eq!(config.preprocess.trim_quality, 20);
        assert_eq!(config.tools.assembler.program, "megahit");
        assert!(config.id_mapping.is_none());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "existing_outputs": "resume",
                "annotation": {
                    "max_evalue": 1e-5,
                    "translation_table": 11,
                    "descriptions": "ko_names.tsv",
                    "min_bitscore": 25,
                    "strand_specific": true
                },
                "id_mapping": {"source": "https://example.org/idmapping.tab.gz"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.existing_outputs, ExistingOutputs::Resume);
        assert_eq!(config.annotation.max_evalue, 1e-5);
        assert_eq!(config.annotation.translation_table, 11);
        assert_eq!(
            config.annotation.descriptions,
            Some(PathBuf::from("ko_names.tsv"))
        );
        assert!(config.annotation.taxon_corrections.is_none());
        assert_eq!(config.annotation.filter.min_bitscore, 25.0);
        assert!(config.annotation.filter.strand_specific);
        assert_eq!(config.annotation.filter.min_overlap, 100);
        let mapping = config.id_mapping.unwrap();
        assert_eq!((mapping.key_column, mapping.value_column), (0, 12));
        assert_eq!(mapping.match_attribute, "gene_id");
    }

    #[test]
    fn test_validation_errors() {
        let mut config: PipelineConfig = serde_json::from_str(MINIMAL).unwrap();
        assert!(config.validate().is_ok());

        config.samples.push(config.samples[0].clone());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("twice")));

        config.samples.truncate(1);
        config.samples[0].name = "s 1".to_string();
        assert!(config.validate().is_err());

        config.samples[0].name = "s1".to_string();
        config.profiles.families.clear();
        assert!(config.validate().is_err());
        config.profiles.hmm_file = Some(PathBuf::from("pfam.hmm"));
        assert!(config.validate().is_ok());

        config.annotation.translation_table = 7;
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("translation table 7"))
        );
        config.annotation.translation_table = 2;
        assert!(config.validate().is_ok());

        config.jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = PipelineConfig::from_file("/nonexistent/mgpipe.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mgpipe.json"));
    }
}
