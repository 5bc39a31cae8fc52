//! GFF3 annotation records and the passes that build the final annotation file.
//!
//! Each pass reads one GFF file and writes a new one:
//! `hmmer` (domain table to GFF), `filter`, `enrich` and `coverage`.

pub mod coverage;
pub mod enrich;
pub mod filter;
pub mod hmmer;

use indexmap::IndexMap;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::io::{create_writer, finish_writer, open_reader};

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Unknown sequence '{0}'")]
    UnknownSequence(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Strand of a feature (GFF column 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    Forward,
    Reverse,
    Unknown,
}

impl Strand {
    pub fn as_char(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
            Strand::Unknown => '.',
        }
    }
}

impl FromStr for Strand {
    type Err = AnnotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            "." | "?" => Ok(Strand::Unknown),
            other => Err(AnnotationError::Malformed(format!("invalid strand '{}'", other))),
        }
    }
}

/// One GFF3 feature line. Coordinates are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub seqid: String,
    pub source: String,
    pub feature_type: String,
    pub start: u64,
    pub end: u64,
    pub score: Option<f64>,
    pub strand: Strand,
    pub phase: Option<u8>,
    pub attributes: IndexMap<String, String>,
}

impl Annotation {
    pub fn new(
        seqid: impl Into<String>,
        source: impl Into<String>,
        feature_type: impl Into<String>,
        start: u64,
        end: u64,
        strand: Strand,
    ) -> Self {
        Annotation {
            seqid: seqid.into(),
            source: source.into(),
            feature_type: feature_type.into(),
            start,
            end,
            score: None,
            strand,
            phase: None,
            attributes: IndexMap::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Number of positions shared with `other` on the same sequence.
    pub fn overlap(&self, other: &Annotation) -> u64 {
        if self.seqid != other.seqid {
            return 0;
        }
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end >= start {
            end - start + 1
        } else {
            0
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attributes.insert(key.into(), value.to_string());
    }

    /// Numeric attribute, `None` when absent or not a number.
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attr(key).and_then(|v| v.parse().ok())
    }
}

impl FromStr for Annotation {
    type Err = AnnotationError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if fields.len() != 9 {
            return Err(AnnotationError::Malformed(format!(
                "expected 9 tab-separated columns, found {}",
                fields.len()
            )));
        }
        let coordinate = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| AnnotationError::Malformed(format!("invalid coordinate '{}'", s)))
        };
        let start = coordinate(fields[3])?;
        let end = coordinate(fields[4])?;
        if start == 0 || end < start {
            return Err(AnnotationError::Malformed(format!(
                "invalid interval {}..{}",
                start, end
            )));
        }
        let score = match fields[5] {
            "." => None,
            s => Some(
                s.parse::<f64>()
                    .map_err(|_| AnnotationError::Malformed(format!("invalid score '{}'", s)))?,
            ),
        };
        let phase = match fields[7] {
            "." => None,
            "0" => Some(0),
            "1" => Some(1),
            "2" => Some(2),
            s => return Err(AnnotationError::Malformed(format!("invalid phase '{}'", s))),
        };

        let mut attributes = IndexMap::new();
        if fields[8] != "." {
            for pair in fields[8].split(';').filter(|p| !p.trim().is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    AnnotationError::Malformed(format!("attribute without value '{}'", pair))
                })?;
                attributes.insert(unescape(key.trim()), unescape(value));
            }
        }

        Ok(Annotation {
            seqid: unescape(fields[0]),
            source: unescape(fields[1]),
            feature_type: unescape(fields[2]),
            start,
            end,
            score,
            strand: fields[6].parse()?,
            phase,
            attributes,
        })
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t",
            escape(&self.seqid, false),
            escape(&self.source, false),
            escape(&self.feature_type, false),
            self.start,
            self.end
        )?;
        match self.score {
            Some(score) => write!(f, "{}", format_number(score))?,
            None => write!(f, ".")?,
        }
        write!(f, "\t{}\t", self.strand.as_char())?;
        match self.phase {
            Some(phase) => write!(f, "{}\t", phase)?,
            None => write!(f, ".\t")?,
        }
        if self.attributes.is_empty() {
            return write!(f, ".");
        }
        for (i, (key, value)) in self.attributes.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{}={}", escape(key, true), escape(value, true))?;
        }
        Ok(())
    }
}

/// Shortest readable form; very small values (E-values) use scientific notation.
pub fn format_number(value: f64) -> String {
    if value != 0.0 && value.abs() < 1e-3 {
        format!("{:e}", value)
    } else {
        format!("{}", value)
    }
}

/// Percent-encodes characters GFF3 reserves.
///
/// Commas are kept literal: inside attributes they separate multiple values.
pub fn escape(s: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let reserved = c == '%'
            || c.is_control()
            || (attribute && matches!(c, ';' | '=' | '&'));
        if reserved {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub fn unescape(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Reads every feature of a (possibly gzip-compressed) GFF3 file.
///
/// Comment lines are skipped; an embedded `##FASTA` section ends the features.
pub fn read_gff(path: impl AsRef<Path>) -> Result<Vec<Annotation>, AnnotationError> {
    let path = path.as_ref();
    let reader = open_reader(path)?;
    let mut annotations = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with("##FASTA") {
            break;
        }
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let annotation = line.parse().map_err(|e| match e {
            AnnotationError::Malformed(message) => AnnotationError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                message,
            },
            other => other,
        })?;
        annotations.push(annotation);
    }
    Ok(annotations)
}

/// Writes features with a `##gff-version 3` header, gzip-compressed for `.gz` names.
pub fn write_gff<'a, I>(path: impl AsRef<Path>, annotations: I) -> Result<usize, AnnotationError>
where
    I: IntoIterator<Item = &'a Annotation>,
{
    let mut out = create_writer(path)?;
    writeln!(out, "##gff-version 3")?;
    let mut written = 0;
    for annotation in annotations {
        writeln!(out, "{}", annotation)?;
        written += 1;
    }
    finish_writer(out)?;
    Ok(written)
}
