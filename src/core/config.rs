//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{LhError, Result};
use crate::scanner::selection::{SelectionPolicy, VolumeSelection};

/// Default read buffer for stream digests: 16 MiB.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound for the read buffer: 1 GiB.
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024 * 1024;

/// Full layerhash configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub hasher: HasherConfig,
    pub scanner: ScannerConfig,
    pub selection: SelectionConfig,
    pub credentials: CredentialsConfig,
    pub output: OutputConfig,
    pub paths: PathsConfig,
}

/// Digest engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HasherConfig {
    /// Size of the reusable read buffer, in bytes.
    pub read_buffer_size: usize,
    /// Number of hashing workers; 1 hashes on the calling thread.
    pub parallelism: usize,
    /// Extra (path, stream) pairs skipped without I/O, on top of the
    /// built-in ones.
    pub ignore: Vec<IgnoreEntry>,
}

/// One configured ignore entry. `path` excludes the root segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IgnoreEntry {
    pub path: Vec<String>,
    #[serde(default)]
    pub stream: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Follow single unambiguous layers within one scan call.
    pub auto_recurse: bool,
}

/// Textual selection clauses (`all`, `none`, `1,3..5`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelectionConfig {
    pub partitions: String,
    pub snapshots: String,
    pub volumes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialsConfig {
    pub passwords: Vec<String>,
    pub recovery_passwords: Vec<String>,
    /// Ask interactively once configured credentials are exhausted.
    pub prompt: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub encoding: OutputEncoding,
}

/// Text encoding of the hash listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "ascii")]
    Ascii,
}

impl OutputEncoding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Ascii => "ascii",
        }
    }
}

impl fmt::Display for OutputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputEncoding {
    type Err = LhError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            other => Err(LhError::InvalidConfig {
                details: format!("output.encoding must be utf-8 or ascii, got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
    pub activity_log_enabled: bool,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            parallelism: default_parallelism(),
            ignore: Vec::new(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { auto_recurse: true }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            partitions: "all".to_string(),
            snapshots: "none".to_string(),
            volumes: "all".to_string(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            passwords: Vec::new(),
            recovery_passwords: Vec::new(),
            prompt: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[LH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("layerhash").join("config.toml");
        let data = home_dir.join(".local").join("share").join("layerhash");
        Self {
            config_file: cfg,
            activity_log: data.join("activity.jsonl"),
            activity_log_enabled: false,
        }
    }
}

/// Half the available cores, at least one.
fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, |n| (n.get() / 2).max(1))
}

impl SelectionConfig {
    /// Parse the three clauses into a policy.
    pub fn policy(&self) -> Result<SelectionPolicy> {
        Ok(SelectionPolicy {
            partitions: VolumeSelection::parse("partition", &self.partitions)?,
            snapshots: VolumeSelection::parse("snapshot", &self.snapshots)?,
            volumes: VolumeSelection::parse("volume", &self.volumes)?,
        })
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| LhError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(LhError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Copy with credential secrets masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        for secret in cfg
            .credentials
            .passwords
            .iter_mut()
            .chain(cfg.credentials.recovery_passwords.iter_mut())
        {
            *secret = "********".to_string();
        }
        cfg
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // hasher
        if let Some(raw) = lookup("LH_HASHER_READ_BUFFER_SIZE") {
            self.hasher.read_buffer_size = parse_env("LH_HASHER_READ_BUFFER_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("LH_HASHER_PARALLELISM") {
            self.hasher.parallelism = parse_env("LH_HASHER_PARALLELISM", &raw)?;
        }

        // scanner
        if let Some(raw) = lookup("LH_SCANNER_AUTO_RECURSE") {
            self.scanner.auto_recurse = parse_env_bool("LH_SCANNER_AUTO_RECURSE", &raw)?;
        }

        // selection
        if let Some(raw) = lookup("LH_SELECTION_PARTITIONS") {
            self.selection.partitions = raw;
        }
        if let Some(raw) = lookup("LH_SELECTION_SNAPSHOTS") {
            self.selection.snapshots = raw;
        }
        if let Some(raw) = lookup("LH_SELECTION_VOLUMES") {
            self.selection.volumes = raw;
        }

        // output
        if let Some(raw) = lookup("LH_OUTPUT_ENCODING") {
            self.output.encoding = raw.parse()?;
        }

        // credentials
        if let Some(raw) = lookup("LH_CREDENTIALS_PROMPT") {
            self.credentials.prompt = parse_env_bool("LH_CREDENTIALS_PROMPT", &raw)?;
        }

        // paths: setting the log path also turns the log on.
        if let Some(raw) = lookup("LH_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
            self.paths.activity_log_enabled = true;
        }

        Ok(())
    }

    fn normalize(&mut self) {
        for clause in [
            &mut self.selection.partitions,
            &mut self.selection.snapshots,
            &mut self.selection.volumes,
        ] {
            *clause = clause.trim().to_ascii_lowercase();
        }
        for entry in &mut self.hasher.ignore {
            entry.path.retain(|segment| !segment.is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_READ_BUFFER_SIZE).contains(&self.hasher.read_buffer_size) {
            return Err(LhError::InvalidConfig {
                details: format!(
                    "hasher.read_buffer_size must be in [1, {MAX_READ_BUFFER_SIZE}], got {}",
                    self.hasher.read_buffer_size
                ),
            });
        }

        if self.hasher.parallelism == 0 {
            return Err(LhError::InvalidConfig {
                details: "hasher.parallelism must be >= 1".to_string(),
            });
        }

        for entry in &self.hasher.ignore {
            if entry.path.is_empty() {
                return Err(LhError::InvalidConfig {
                    details: "hasher.ignore entries need at least one path segment".to_string(),
                });
            }
        }

        self.selection.policy()?;

        if self.paths.activity_log_enabled && self.paths.activity_log.as_os_str().is_empty() {
            return Err(LhError::InvalidConfig {
                details: "paths.activity_log must be set when the activity log is enabled"
                    .to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| LhError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "on" => Ok(true),
        "0" | "no" | "off" => Ok(false),
        other => parse_env(name, other),
    }
}
