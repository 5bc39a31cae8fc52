//! Input/Output operations module.
//!
//! Gzip-aware readers and writers shared by the in-process pipeline steps,
//! plus FASTA and FASTQ helpers.

pub mod fasta;
pub mod fastq;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Opens a text file for reading, decompressing it when it starts with the gzip magic bytes.
pub fn open_reader(path: impl AsRef<Path>) -> io::Result<Box<dyn BufRead + Send>> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Headerless tab-separated reader over [`open_reader`]; `#` lines are comments.
pub fn tsv_reader(path: impl AsRef<Path>) -> io::Result<csv::Reader<Box<dyn BufRead + Send>>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .comment(Some(b'#'))
        .from_reader(open_reader(path)?))
}

/// True when the file holds no data once decompressed.
pub fn is_empty_input(path: impl AsRef<Path>) -> io::Result<bool> {
    Ok(open_reader(path)?.fill_buf()?.is_empty())
}

/// Creates a file for writing, gzip-compressed when the name ends in `.gz`.
///
/// The returned writer must be finished with [`finish_writer`] so that the
/// gzip trailer is written and errors are reported.
pub fn create_writer(path: impl AsRef<Path>) -> io::Result<Writer> {
    let path = path.as_ref();
    let file = io::BufWriter::new(File::create(path)?);
    if is_gzip_name(path) {
        Ok(Writer::Gzip(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Writer::Plain(file))
    }
}

pub fn is_gzip_name(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

pub enum Writer {
    Plain(io::BufWriter<File>),
    Gzip(GzEncoder<io::BufWriter<File>>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(w) => w.write(buf),
            Writer::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(w) => w.flush(),
            Writer::Gzip(w) => w.flush(),
        }
    }
}

/// Flushes all buffers and closes the compressed stream.
pub fn finish_writer(writer: Writer) -> io::Result<()> {
    let mut inner = match writer {
        Writer::Plain(w) => w,
        Writer::Gzip(w) => w.finish()?,
    };
    inner.flush()
}

/// Concatenates `inputs`, byte for byte, into `output`.
pub fn concatenate<P: AsRef<Path>>(inputs: &[P], output: impl AsRef<Path>) -> io::Result<u64> {
    let mut out = io::BufWriter::new(File::create(output.as_ref())?);
    let mut total = 0;
    for input in inputs {
        total += io::copy(&mut File::open(input.as_ref())?, &mut out)?;
    }
    out.flush()?;
    Ok(total)
}

/// Reads a whole (possibly compressed) file into a string.
pub fn read_to_string(path: impl AsRef<Path>) -> io::Result<String> {
    let mut content = String::new();
    open_reader(path)?.read_to_string(&mut content)?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_gzip_writer_and_transparent_reader() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.tsv.gz");
        let mut writer = create_writer(&path).unwrap();
        writer.write_all(b"a\t1\nb\t2\n").unwrap();
        finish_writer(writer).unwrap();

        let raw = fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &GZIP_MAGIC);
        assert_eq!(read_to_string(&path).unwrap(), "a\t1\nb\t2\n");

        dir.close().unwrap();
    }

    #[test]
    fn test_plain_file_passes_through() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.tsv");
        let mut writer = create_writer(&path).unwrap();
        writer.write_all(b"plain\n").unwrap();
        finish_writer(writer).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "plain\n");
        assert_eq!(read_to_string(&path).unwrap(), "plain\n");
    }

    #[test]
    fn test_gzip_detected_by_content_not_name() {
        let dir = tempdir().unwrap();
        let gz = dir.path().join("x.gz");
        let mut writer = create_writer(&gz).unwrap();
        writer.write_all(b"hidden\n").unwrap();
        finish_writer(writer).unwrap();
        let renamed = dir.path().join("x.txt");
        fs::rename(&gz, &renamed).unwrap();

        assert_eq!(read_to_string(&renamed).unwrap(), "hidden\n");
    }

    #[test]
    fn test_concatenate_keeps_order() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.hmm");
        let b = dir.path().join("b.hmm");
        fs::write(&a, "HMMER3/f a\n//\n").unwrap();
        fs::write(&b, "HMMER3/f b\n//\n").unwrap();
        let out = dir.path().join("all.hmm");
        assert_eq!(concatenate(&[&a, &b], &out).unwrap(), 28);
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "HMMER3/f a\n//\nHMMER3/f b\n//\n"
        );
    }

    #[test]
    fn test_empty_file_reads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, "").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "");
        assert!(is_empty_input(&path).unwrap());

        let gz = dir.path().join("empty.gz");
        finish_writer(create_writer(&gz).unwrap()).unwrap();
        assert!(is_empty_input(&gz).unwrap());
        assert!(is_empty_input(dir.path().join("missing")).is_err());
    }
}
