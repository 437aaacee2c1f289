//! Hash record output: `digest<TAB>path` lines to a file or a stream.

#![allow(missing_docs)]

pub mod report;

use std::fs::File;
use std::io::{self, BufWriter, LineWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::config::OutputEncoding;
use crate::core::errors::{LhError, Result};
use crate::hasher::HashRecord;
use crate::logger::ActivityLog;

/// Receives hash records in output order.
pub trait HashSink {
    fn write_record(&mut self, record: &HashRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl HashSink for Vec<HashRecord> {
    fn write_record(&mut self, record: &HashRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Where formatted lines go.
pub enum OutputWriter {
    /// Buffered file, flushed at the end of the run.
    File { writer: BufWriter<File>, path: PathBuf },
    /// Line-buffered stream such as stdout.
    Stream(LineWriter<Box<dyn Write + Send>>),
}

impl OutputWriter {
    /// Create (or truncate) `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|err| LhError::io(path, err))?;
        Ok(Self::File {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn stream(stream: impl Write + Send + 'static) -> Self {
        Self::Stream(LineWriter::new(Box::new(stream)))
    }

    pub fn stdout() -> Self {
        Self::stream(io::stdout())
    }

    fn target(&self) -> &Path {
        match self {
            Self::File { path, .. } => path,
            Self::Stream(_) => Path::new("<stdout>"),
        }
    }

    fn write_all(&mut self, line: &[u8]) -> io::Result<()> {
        match self {
            Self::File { writer, .. } => writer.write_all(line),
            Self::Stream(writer) => writer.write_all(line),
        }
    }

    fn flush_inner(&mut self) -> io::Result<()> {
        match self {
            Self::File { writer, .. } => writer.flush(),
            Self::Stream(writer) => writer.flush(),
        }
    }
}

/// [`HashSink`] that renders records as text lines.
///
/// Lines always end in `\n`. With [`OutputEncoding::Ascii`] every non-ASCII
/// character becomes `?`; the first replacement is reported once.
pub struct LineOutput<'a> {
    writer: OutputWriter,
    encoding: OutputEncoding,
    log: &'a ActivityLog,
    replaced: bool,
    lines: u64,
}

impl<'a> LineOutput<'a> {
    pub fn new(writer: OutputWriter, encoding: OutputEncoding, log: &'a ActivityLog) -> Self {
        Self {
            writer,
            encoding,
            log,
            replaced: false,
            lines: 0,
        }
    }

    pub const fn lines(&self) -> u64 {
        self.lines
    }

    pub fn into_writer(self) -> OutputWriter {
        self.writer
    }

    fn render(&mut self, record: &HashRecord) -> String {
        let line = format!("{}\t{}\n", record.digest_or_marker(), record.display_path);
        match self.encoding {
            OutputEncoding::Utf8 => line,
            OutputEncoding::Ascii => {
                if line.is_ascii() {
                    return line;
                }
                if !self.replaced {
                    self.replaced = true;
                    self.log.warn(
                        "OUTPUT",
                        "output contains characters outside ASCII; replacing them with '?'",
                    );
                }
                line.chars().map(|c| if c.is_ascii() { c } else { '?' }).collect()
            }
        }
    }
}

impl HashSink for LineOutput<'_> {
    fn write_record(&mut self, record: &HashRecord) -> Result<()> {
        let line = self.render(record);
        self.writer
            .write_all(line.as_bytes())
            .map_err(|err| LhError::io(self.writer.target(), err))?;
        self.lines += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush_inner()
            .map_err(|err| LhError::io(self.writer.target(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    /// Cloneable in-memory stream for inspecting written bytes.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn record(path: &str, digest: Option<&str>) -> HashRecord {
        HashRecord {
            display_path: path.to_string(),
            digest: digest.map(ToString::to_string),
        }
    }

    #[test]
    fn lines_are_tab_separated_with_unix_endings() {
        let buffer = Shared::default();
        let log = ActivityLog::silent();
        let mut out = LineOutput::new(OutputWriter::stream(buffer.clone()), OutputEncoding::Utf8, &log);
        out.write_record(&record("/a", Some("abc123"))).unwrap();
        out.write_record(&record("/$BadClus:$Bad", None)).unwrap();
        out.flush().unwrap();
        assert_eq!(buffer.text(), "abc123\t/a\nN/A\t/$BadClus:$Bad\n");
        assert_eq!(out.lines(), 2);
    }

    #[test]
    fn ascii_encoding_replaces_and_warns_once() {
        let buffer = Shared::default();
        let log = ActivityLog::capturing();
        let mut out = LineOutput::new(OutputWriter::stream(buffer.clone()), OutputEncoding::Ascii, &log);
        out.write_record(&record("/caf\u{e9}", Some("00"))).unwrap();
        out.write_record(&record("/\u{65e5}\u{672c}", Some("01"))).unwrap();
        out.flush().unwrap();
        assert_eq!(buffer.text(), "00\t/caf?\n01\t/??\n");
        let warnings: Vec<String> = log
            .captured()
            .into_iter()
            .filter(|line| line.starts_with("[LH-OUTPUT] WARNING"))
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn utf8_encoding_keeps_text() {
        let buffer = Shared::default();
        let log = ActivityLog::capturing();
        let mut out = LineOutput::new(OutputWriter::stream(buffer.clone()), OutputEncoding::Utf8, &log);
        out.write_record(&record("/caf\u{e9}", Some("00"))).unwrap();
        assert_eq!(buffer.text(), "00\t/caf\u{e9}\n");
        assert!(log.captured().is_empty());
    }

    #[test]
    fn file_output_is_flushed_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.txt");
        let log = ActivityLog::silent();
        let mut out = LineOutput::new(OutputWriter::create(&path).unwrap(), OutputEncoding::Utf8, &log);
        out.write_record(&record("/x", Some("ff"))).unwrap();
        out.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ff\t/x\n");
    }

    #[test]
    fn unwritable_output_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OutputWriter::create(&dir.path().join("missing/hashes.txt")).err().unwrap();
        assert_eq!(err.code(), "LH-3004");
    }
}
