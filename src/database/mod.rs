//! Reference data: remote downloads and the identifier mapping table.

pub mod downloader;
pub mod mapping;

use std::io;
use thiserror::Error;

pub use downloader::{Downloader, Source};
pub use mapping::write_mapping_table;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Table error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Download of {url} failed with status {status}")]
    StatusError { url: String, status: u16 },

    #[error("Format error: {0}")]
    FormatError(String),
}
