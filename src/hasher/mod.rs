//! Recursive content hashing of file-system layers.

#![allow(missing_docs)]

pub mod digest;
pub mod display;
pub mod walk;

use serde::Serialize;

use crate::core::config::{DEFAULT_READ_BUFFER_SIZE, HasherConfig, IgnoreEntry};

pub use self::digest::{DIGEST_ALGORITHM, StreamDigester, hash_hex, sha256_hex};
pub use self::display::{escape_segment, format_display_path};
pub use self::walk::RecursiveHasher;

/// Placeholder digest for streams that were ignored or could not be read.
pub const UNREADABLE_MARKER: &str = "N/A";

/// One output record: a display path and its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashRecord {
    pub display_path: String,
    /// `None` when the stream was ignored or unreadable.
    pub digest: Option<String>,
}

impl HashRecord {
    pub fn hashed(display_path: String, digest: String) -> Self {
        Self {
            display_path,
            digest: Some(digest),
        }
    }

    pub fn unreadable(display_path: String) -> Self {
        Self {
            display_path,
            digest: None,
        }
    }

    /// Digest, or [`UNREADABLE_MARKER`].
    pub fn digest_or_marker(&self) -> &str {
        self.digest.as_deref().unwrap_or(UNREADABLE_MARKER)
    }
}

/// Counters for one hashing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HashSummary {
    pub base_path_specs: u64,
    pub skipped_base_path_specs: u64,
    pub hashed_streams: u64,
    pub unreadable_streams: u64,
    pub ignored_streams: u64,
    pub skipped_special_entries: u64,
    pub abandoned_subtrees: u64,
    pub bytes_hashed: u64,
}

impl HashSummary {
    /// Records written to the sink.
    pub const fn records(&self) -> u64 {
        self.hashed_streams + self.unreadable_streams + self.ignored_streams
    }

    /// Whether anything had to be skipped or marked unreadable.
    pub const fn is_partial(&self) -> bool {
        self.skipped_base_path_specs > 0 || self.unreadable_streams > 0 || self.abandoned_subtrees > 0
    }
}

/// `(path below the file-system root, stream name)` pairs that are never read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreSet {
    entries: Vec<(Vec<String>, String)>,
}

impl Default for IgnoreSet {
    /// NTFS bad-cluster stream: sparse, as large as the volume, not evidence.
    fn default() -> Self {
        Self {
            entries: vec![(vec!["$BadClus".to_string()], "$Bad".to_string())],
        }
    }
}

impl IgnoreSet {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Built-in entries plus configured ones.
    pub fn with_configured(entries: &[IgnoreEntry]) -> Self {
        let mut set = Self::default();
        for entry in entries {
            set.insert(entry.path.clone(), entry.stream.clone());
        }
        set
    }

    pub fn insert(&mut self, path: Vec<String>, stream: String) {
        if !self.contains(&path, &stream) {
            self.entries.push((path, stream));
        }
    }

    pub fn contains(&self, path: &[String], stream: &str) -> bool {
        self.entries
            .iter()
            .any(|(ignored, ignored_stream)| ignored.as_slice() == path && ignored_stream == stream)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tuning knobs for [`RecursiveHasher`].
#[derive(Debug, Clone)]
pub struct HasherOptions {
    pub read_buffer_size: usize,
    /// Streams hashed concurrently; 1 keeps everything on the calling thread.
    pub parallelism: usize,
    pub ignore: IgnoreSet,
}

impl Default for HasherOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            parallelism: 1,
            ignore: IgnoreSet::default(),
        }
    }
}

impl HasherOptions {
    pub fn from_config(config: &HasherConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            parallelism: config.parallelism.max(1),
            ignore: IgnoreSet::with_configured(&config.ignore),
        }
    }
}
