//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use layerhash::prelude::*;
//! ```

// Core
pub use crate::core::abort::AbortSignal;
pub use crate::core::config::Config;
pub use crate::core::errors::{LhError, Result};

// Path specs and backends
pub use crate::backend::{
    Credential, FileEntry, LayerProbe, MemoryBackend, OsBackend, SourceType, StorageBackend,
};
pub use crate::pathspec::{Attributes, LayerKind, PathSpec};

// Scanner
pub use crate::scanner::{
    CredentialSource, CredentialUnlocker, NoUnlock, ScanContext, ScanNodeId, SelectionPolicy,
    SourceScanner, StaticCredentials, VolumeScanner, VolumeSelection, VolumeUnlocker,
    select_base_path_specs,
};

// Hasher and output
pub use crate::hasher::{HashRecord, HashSummary, HasherOptions, RecursiveHasher, format_display_path};
pub use crate::logger::{ActivityLog, Verbosity};
pub use crate::output::report::ScanReport;
pub use crate::output::{HashSink, LineOutput, OutputWriter};
