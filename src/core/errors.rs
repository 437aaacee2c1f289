//! LH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LhError>;

/// Top-level error type for layerhash.
#[derive(Debug, Error)]
pub enum LhError {
    #[error("[LH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[LH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[LH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LH-1101] {kind} {index} does not exist ({available} available)")]
    InvalidSelection {
        kind: &'static str,
        index: u32,
        available: usize,
    },

    #[error("[LH-1102] unable to parse {kind} selection {input:?}: {details}")]
    SelectionParse {
        kind: &'static str,
        input: String,
        details: String,
    },

    #[error("[LH-2001] no such source: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("[LH-2002] unable to scan {path_spec}: {details}")]
    Scan { path_spec: String, details: String },

    #[error("[LH-2003] unable to unlock {path_spec}")]
    LockedVolume { path_spec: String },

    #[error("[LH-2004] unsupported layer {path_spec}: {details}")]
    UnsupportedLayer { path_spec: String, details: String },

    #[error("[LH-3001] unable to read stream {stream:?} of {path_spec}: {source}")]
    StreamIo {
        path_spec: String,
        stream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[LH-3002] unable to enumerate {path_spec}: {details}")]
    Enumeration { path_spec: String, details: String },

    #[error("[LH-3003] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[LH-3004] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LH-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[LH-4001] aborted by user")]
    UserAbort,

    #[error("[LH-4900] runtime failure: {details}")]
    Runtime { details: String },
}

impl LhError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LH-1001",
            Self::MissingConfig { .. } => "LH-1002",
            Self::ConfigParse { .. } => "LH-1003",
            Self::InvalidSelection { .. } => "LH-1101",
            Self::SelectionParse { .. } => "LH-1102",
            Self::SourceNotFound { .. } => "LH-2001",
            Self::Scan { .. } => "LH-2002",
            Self::LockedVolume { .. } => "LH-2003",
            Self::UnsupportedLayer { .. } => "LH-2004",
            Self::StreamIo { .. } => "LH-3001",
            Self::Enumeration { .. } => "LH-3002",
            Self::PermissionDenied { .. } => "LH-3003",
            Self::Io { .. } => "LH-3004",
            Self::Serialization { .. } => "LH-3101",
            Self::UserAbort => "LH-4001",
            Self::Runtime { .. } => "LH-4900",
        }
    }

    /// Whether the error must stop the whole run.
    ///
    /// Everything else is absorbed where it happens: a marker record for a
    /// stream, a skipped subtree, or a skipped scan branch.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::InvalidSelection { .. }
                | Self::SelectionParse { .. }
                | Self::SourceNotFound { .. }
                | Self::UserAbort
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// Permission failures map to [`LhError::PermissionDenied`] so callers can
    /// report access errors separately from other IO.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for LhError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for LhError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
