//! Storage backend trait and implementations.
//!
//! A backend resolves [`PathSpec`]s: it probes what layer lies beneath a
//! path spec, opens file systems and file entries, enumerates sub-entries and
//! hands out readable data streams. It also owns the unlock state of
//! encrypted layers, so credential attempts go through it as well.
//!
//! Two backends ship with the crate:
//! - [`OsBackend`] resolves host files and directories.
//! - [`MemoryBackend`] models an arbitrary layered image in memory.

#![allow(missing_docs)]

pub mod memory;
pub mod os;

use std::fmt;
use std::io::Read;

use serde::Serialize;

use crate::core::errors::Result;
use crate::pathspec::PathSpec;

pub use self::memory::{MemoryBackend, MemoryBackendBuilder, MemoryFileSystem, MemoryStream};
pub use self::os::OsBackend;

/// Boxed readable data stream.
pub type BoxRead = Box<dyn Read + Send>;

/// Lazily enumerated sub-entries of one file entry.
pub type SubEntries<'a> = Box<dyn Iterator<Item = Result<FileEntry>> + 'a>;

/// What kind of source a scan started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Directory,
    File,
    StorageMediaDevice,
    StorageMediaImage,
}

impl SourceType {
    /// Directory and file sources are hashed as-is, without layer probing.
    #[must_use]
    pub const fn is_plain(self) -> bool {
        matches!(self, Self::Directory | Self::File)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::File => "file",
            Self::StorageMediaDevice => "storage media device",
            Self::StorageMediaImage => "storage media image",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of probing beneath a path spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerProbe {
    /// Exactly one next layer.
    Single(PathSpec),
    /// Several sibling candidates, in discovery order.
    Multiple(Vec<PathSpec>),
    /// The layer is encrypted and has not been unlocked.
    Locked,
    /// No recognised layer beneath this path spec.
    Unsupported,
}

/// Kind of a file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Regular,
    Directory,
    Device,
    Pipe,
    Socket,
    Link,
}

impl EntryKind {
    /// Devices, pipes and sockets have no static content to digest.
    #[must_use]
    pub const fn is_special(self) -> bool {
        matches!(self, Self::Device | Self::Pipe | Self::Socket)
    }
}

/// Read-only view of one file entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Data stream names in backend order; `""` is the default stream.
    pub data_streams: Vec<String>,
    pub path_spec: PathSpec,
}

/// Description of an opened file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemInfo {
    /// Format label reported by the backend (`OS`, `NTFS`, `ext4`, ...).
    pub format: String,
    pub path_spec: PathSpec,
}

/// Secret used to unlock an encrypted layer.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    RecoveryPassword(String),
    KeyData(Vec<u8>),
}

impl Credential {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::RecoveryPassword(_) => "recovery password",
            Self::KeyData(_) => "key data",
        }
    }
}

/// Secrets never end up in debug output or logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.label())
    }
}

/// Unified interface for storage backends.
///
/// All methods take `&self`; implementations that track unlock state keep it
/// behind interior mutability so one backend can be shared by the scanner
/// and by parallel hashing workers.
pub trait StorageBackend: Send + Sync {
    /// Name of the backend, for logging only.
    fn name(&self) -> &str;

    /// Classify the physical source a scan starts from.
    fn source_type(&self, source: &PathSpec) -> Result<SourceType>;

    /// Probe the next layer beneath `path_spec`.
    ///
    /// An `Err` means the layer is present but could not be parsed.
    fn detect_layer(&self, path_spec: &PathSpec) -> Result<LayerProbe>;

    /// Open the file system exposed by `path_spec`.
    fn open_file_system(&self, path_spec: &PathSpec) -> Result<FileSystemInfo>;

    /// Open the file entry at `path_spec`; `None` when it does not exist.
    fn open_file_entry(&self, path_spec: &PathSpec) -> Result<Option<FileEntry>>;

    /// Enumerate the sub-entries of `entry` in backend order.
    fn sub_entries<'a>(&'a self, entry: &FileEntry) -> Result<SubEntries<'a>>;

    /// Open one data stream of `entry` for reading.
    fn open_stream(&self, entry: &FileEntry, stream: &str) -> Result<BoxRead>;

    /// Attempt to unlock an encrypted layer. `Ok(false)` means the credential
    /// was rejected.
    fn try_unlock(&self, path_spec: &PathSpec, credential: &Credential) -> Result<bool>;
}
