#![forbid(unsafe_code)]

//! layerhash — layered storage discovery and recursive content hashing.
//!
//! A source (directory, file, device or storage media image) is scanned
//! layer by layer until file systems are reached:
//!
//! 1. **Scanner** — probes images, partitions, volumes, snapshots and
//!    encrypted volumes into a scan tree, unlocking where credentials allow
//! 2. **Selection** — flattens the tree into base path specs according to
//!    the operator's partition, snapshot and volume choices
//! 3. **Hasher** — walks every file system and emits one SHA-256 digest per
//!    data stream, in a stable order
//!
//! # Library usage
//!
//! ```rust,no_run
//! use layerhash::prelude::*;
//!
//! # fn main() -> layerhash::core::errors::Result<()> {
//! let backend = OsBackend::new();
//! let log = ActivityLog::default();
//! let source = OsBackend::source_path_spec(std::path::Path::new("/evidence"))?;
//!
//! let volumes = VolumeScanner::new(SourceScanner::new(&backend, &log), SelectionPolicy::default());
//! let (_, base_path_specs) = volumes.scan_source(source, &mut NoUnlock)?;
//!
//! let hasher = RecursiveHasher::new(&backend, &log, HasherOptions::default());
//! let mut records: Vec<HashRecord> = Vec::new();
//! hasher.process(&base_path_specs, &mut records)?;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod core;
pub mod hasher;
pub mod logger;
pub mod output;
pub mod pathspec;
pub mod scanner;
