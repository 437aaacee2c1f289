//! Run logging: operator warnings on stderr plus an optional JSONL activity log.
//!
//! [`ActivityLog`] is shared by reference between the scanner, the hasher and
//! the hashing workers; both channels sit behind a `parking_lot::Mutex`.

#![allow(missing_docs)]

pub mod jsonl;

use std::fmt::Display;
use std::io::{self, Write};

use parking_lot::Mutex;

use self::jsonl::{JsonlConfig, JsonlWriter, LogEntry};

/// How much goes to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Nothing but fatal errors (reported by the caller).
    Quiet,
    #[default]
    Normal,
    /// Also informational progress lines.
    Verbose,
}

/// Combined stderr + JSONL logger.
pub struct ActivityLog {
    verbosity: Verbosity,
    jsonl: Option<Mutex<JsonlWriter>>,
    captured: Option<Mutex<Vec<String>>>,
}

impl ActivityLog {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            jsonl: None,
            captured: None,
        }
    }

    /// Logger that writes nothing anywhere.
    pub fn silent() -> Self {
        Self::new(Verbosity::Quiet)
    }

    /// Logger that keeps stderr lines in memory instead of printing them.
    pub fn capturing() -> Self {
        Self {
            verbosity: Verbosity::Verbose,
            jsonl: None,
            captured: Some(Mutex::new(Vec::new())),
        }
    }

    /// Also append structured events to a JSONL file.
    #[must_use]
    pub fn with_jsonl(mut self, config: JsonlConfig) -> Self {
        self.jsonl = Some(Mutex::new(JsonlWriter::open(config)));
        self
    }

    pub const fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Operator warning, e.g. `[LH-HASHER] WARNING: ...`.
    pub fn warn(&self, component: &str, message: impl Display) {
        if self.verbosity >= Verbosity::Normal {
            self.emit(format!("[LH-{component}] WARNING: {message}"));
        }
    }

    /// Progress line, shown only when verbose.
    pub fn info(&self, component: &str, message: impl Display) {
        if self.verbosity >= Verbosity::Verbose {
            self.emit(format!("[LH-{component}] {message}"));
        }
    }

    /// Append a structured event to the activity log, if one is open.
    pub fn record(&self, entry: &LogEntry) {
        if let Some(jsonl) = &self.jsonl {
            jsonl.lock().write_entry(entry);
        }
    }

    pub fn flush(&self) {
        if let Some(jsonl) = &self.jsonl {
            jsonl.lock().fsync();
        }
    }

    /// Lines captured by a [`ActivityLog::capturing`] logger.
    pub fn captured(&self) -> Vec<String> {
        self.captured
            .as_ref()
            .map(|lines| lines.lock().clone())
            .unwrap_or_default()
    }

    fn emit(&self, line: String) {
        if let Some(captured) = &self.captured {
            captured.lock().push(line);
        } else {
            let _ = writeln!(io::stderr(), "{line}");
        }
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(Verbosity::Normal)
    }
}
