//! Output sinks and input sources.
//!
//! `-` selects the standard stream; any other name is a file, gzip
//! compressed when it ends in `.gz`. Files are released when the value is
//! dropped; [`Sink::finish`] does the same but reports close errors.

use crate::error::Result;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const STD_STREAM: &str = "-";

fn is_gz(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

fn is_std_stream(path: &Path) -> bool {
    path.as_os_str() == STD_STREAM
}

/// Where reports go
pub enum Sink {
    Stdout(io::Stdout),
    File(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    /// Open for appending; a `.gz` target gets a new gzip member
    pub fn open(path: &Path) -> Result<Self> {
        if is_std_stream(path) {
            return Ok(Sink::Stdout(io::stdout()));
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = BufWriter::new(file);
        if is_gz(path) {
            Ok(Sink::Gzip(GzEncoder::new(writer, Compression::default())))
        } else {
            Ok(Sink::File(writer))
        }
    }

    /// Flush and close, surfacing errors that `Drop` would swallow
    pub fn finish(self) -> Result<()> {
        match self {
            Sink::Stdout(mut out) => out.flush()?,
            Sink::File(mut writer) => writer.flush()?,
            Sink::Gzip(encoder) => encoder.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Stdout(out) => out.write(buf),
            Sink::File(writer) => writer.write(buf),
            Sink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stdout(out) => out.flush(),
            Sink::File(writer) => writer.flush(),
            Sink::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Where corpora and metadata come from
pub enum Source {
    Stdin(io::StdinLock<'static>),
    File(BufReader<File>),
    Gzip(BufReader<MultiGzDecoder<File>>),
}

impl Source {
    pub fn open(path: &Path) -> Result<Self> {
        if is_std_stream(path) {
            return Ok(Source::Stdin(io::stdin().lock()));
        }
        let file = File::open(path)?;
        if is_gz(path) {
            Ok(Source::Gzip(BufReader::new(MultiGzDecoder::new(file))))
        } else {
            Ok(Source::File(BufReader::new(file)))
        }
    }
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Stdin(input) => input.read(buf),
            Source::File(reader) => reader.read(buf),
            Source::Gzip(reader) => reader.read(buf),
        }
    }
}

impl BufRead for Source {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            Source::Stdin(input) => input.fill_buf(),
            Source::File(reader) => reader.fill_buf(),
            Source::Gzip(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            Source::Stdin(input) => input.consume(amt),
            Source::File(reader) => reader.consume(amt),
            Source::Gzip(reader) => reader.consume(amt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(suffix: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gasforge-stream-{}-{}{}",
            std::process::id(),
            suffix.len(),
            suffix
        ))
    }

    fn write_lines(path: &Path, from: usize, to: usize) {
        let mut sink = Sink::open(path).unwrap();
        for i in from..to {
            writeln!(sink, "hello{}", i).unwrap();
        }
        sink.finish().unwrap();
    }

    fn read_lines(path: &Path) -> Vec<String> {
        Source::open(path)
            .unwrap()
            .lines()
            .map(|line| line.unwrap())
            .collect()
    }

    #[test]
    fn test_plain_file_roundtrip() {
        let path = temp_path(".txt");
        let _ = std::fs::remove_file(&path);
        write_lines(&path, 0, 100);
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 100);
        assert_eq!(lines[42], "hello42");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_gzip_file_is_compressed_and_appendable() {
        let path = temp_path(".txt.gz");
        let _ = std::fs::remove_file(&path);
        write_lines(&path, 0, 100);
        let size = std::fs::metadata(&path).unwrap().len();
        assert!(size > 50);
        assert!(size < 100 * "hello00\n".len() as u64);

        // second gzip member appended to the same file
        write_lines(&path, 100, 110);
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 110);
        assert_eq!(lines[105], "hello105");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_gzip_dropped_without_finish_is_readable() {
        let path = temp_path(".drop.gz");
        let _ = std::fs::remove_file(&path);
        {
            let mut sink = Sink::open(&path).unwrap();
            writeln!(sink, "only line").unwrap();
        }
        assert_eq!(read_lines(&path), vec!["only line".to_string()]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_source_is_io_error() {
        assert!(Source::open(Path::new("/nonexistent/gasforge.jsonl")).is_err());
    }
}
