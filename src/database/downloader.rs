use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use reqwest::{blocking::Client, header};
use tempfile::NamedTempFile;

use super::DatabaseError;

/// Where a reference file or read file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Fetched in process over HTTP(S).
    Http(String),
    /// Fetched by an external tool; the HTTP client does not speak FTP.
    Ftp(String),
    /// Already on disk.
    Local(PathBuf),
}

impl Source {
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Source::Http(location.to_string())
        } else if lower.starts_with("ftp://") {
            Source::Ftp(location.to_string())
        } else {
            Source::Local(PathBuf::from(location))
        }
    }

    /// Last path segment of the location, without any query string.
    pub fn file_name(&self) -> Option<String> {
        match self {
            Source::Http(url) | Source::Ftp(url) => {
                let without_query = url.split(['?', '#']).next().unwrap_or(url);
                let (_, rest) = without_query.split_once("://")?;
                let (_, path) = rest.split_once('/')?;
                path.rsplit('/')
                    .next()
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            }
            Source::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Http(url) | Source::Ftp(url) => write!(f, "{}", url),
            Source::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Blocking HTTP downloader
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new() -> Result<Self, DatabaseError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(concat!("mgpipe/", env!("CARGO_PKG_VERSION"))),
        );

        // Reference dumps are large: only the connection attempt is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(60))
            .timeout(None::<Duration>)
            .build()?;

        Ok(Downloader { client })
    }

    /// Streams `url` into `dest`, returning the number of bytes written.
    ///
    /// The body goes to a temporary file next to `dest` that is renamed into
    /// place only once complete, so an interrupted transfer leaves no `dest`.
    pub fn download(&self, url: &str, dest: impl AsRef<Path>) -> Result<u64, DatabaseError> {
        let dest = dest.as_ref();
        let dir = match dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir,
            None => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        info!("Downloading {} to {}", url, dest.display());
        let mut response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(DatabaseError::StatusError {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut tmp = NamedTempFile::new_in(dir)?;
        let bytes = io::copy(&mut response, tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| DatabaseError::IoError(e.error))?;

        info!("Downloaded {} bytes to {}", bytes, dest.display());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_source_kinds() {
        assert_eq!(
            Source::parse("https://example.org/a/idmapping.dat.gz?x=1"),
            Source::Http("https://example.org/a/idmapping.dat.gz?x=1".to_string())
        );
        assert!(matches!(Source::parse("FTP://host/x.gz"), Source::Ftp(_)));
        assert_eq!(
            Source::parse("reads/s1_R1.fastq.gz"),
            Source::Local(PathBuf::from("reads/s1_R1.fastq.gz"))
        );
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            Source::parse("https://example.org/a/idmapping.dat.gz?x=1").file_name(),
            Some("idmapping.dat.gz".to_string())
        );
        assert_eq!(Source::parse("https://example.org").file_name(), None);
        assert_eq!(Source::parse("https://example.org/").file_name(), None);
        assert_eq!(
            Source::parse("/data/s1_R2.fq").file_name(),
            Some("s1_R2.fq".to_string())
        );
    }

    #[test]
    fn test_download_writes_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/data/table.tsv")
            .with_status(200)
            .with_body("a\t1\nb\t2\n")
            .create();

        let dir = tempdir().unwrap();
        let dest = dir.path().join("reference").join("table.tsv");
        let bytes = Downloader::new()
            .unwrap()
            .download(&format!("{}/data/table.tsv", server.url()), &dest)
            .unwrap();

        mock.assert();
        assert_eq!(bytes, 8);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "a\t1\nb\t2\n");
    }

    #[test]
    fn test_download_error_status_leaves_nothing() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/missing").with_status(404).create();

        let dir = tempdir().unwrap();
        let dest = dir.path().join("missing.gz");
        let err = Downloader::new()
            .unwrap()
            .download(&format!("{}/missing", server.url()), &dest)
            .unwrap_err();

        assert!(matches!(err, DatabaseError::StatusError { status: 404, .. }));
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
