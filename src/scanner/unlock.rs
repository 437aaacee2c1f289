//! Credential hook for locked layers.
//!
//! A [`VolumeUnlocker`] is asked once per locked node. The stock
//! [`CredentialUnlocker`] pulls batches of candidates from a
//! [`CredentialSource`] until one is accepted or the source runs dry.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};

use crate::backend::Credential;
use crate::core::config::CredentialsConfig;
use crate::core::errors::{LhError, Result};
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::pathspec::PathSpec;
use crate::scanner::context::{ScanContext, ScanNodeId};
use crate::scanner::source::SourceScanner;

/// Supplier of candidate credentials for a locked layer.
pub trait CredentialSource {
    /// Next batch to try on `path_spec`. Called repeatedly until it returns an
    /// empty batch; an error (e.g. [`LhError::UserAbort`]) ends the run.
    fn candidate_credentials(&mut self, path_spec: &PathSpec) -> Result<Vec<Credential>>;
}

impl<S: CredentialSource + ?Sized> CredentialSource for Box<S> {
    fn candidate_credentials(&mut self, path_spec: &PathSpec) -> Result<Vec<Credential>> {
        (**self).candidate_credentials(path_spec)
    }
}

/// Fixed list of credentials, offered once per layer.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    credentials: Vec<Credential>,
    served: HashSet<PathSpec>,
}

impl StaticCredentials {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            credentials,
            served: HashSet::new(),
        }
    }

    /// Passwords first, then recovery passwords, in configured order.
    pub fn from_config(config: &CredentialsConfig) -> Self {
        let passwords = config.passwords.iter().cloned().map(Credential::Password);
        let recovery = config
            .recovery_passwords
            .iter()
            .cloned()
            .map(Credential::RecoveryPassword);
        Self::new(passwords.chain(recovery).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl CredentialSource for StaticCredentials {
    fn candidate_credentials(&mut self, path_spec: &PathSpec) -> Result<Vec<Credential>> {
        if self.served.insert(path_spec.clone()) {
            Ok(self.credentials.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

/// Sources consulted in order; the next one takes over once the current one
/// has nothing left for a layer.
#[derive(Default)]
pub struct ChainedCredentials {
    sources: Vec<Box<dyn CredentialSource>>,
    cursor: HashMap<PathSpec, usize>,
}

impl ChainedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl CredentialSource for ChainedCredentials {
    fn candidate_credentials(&mut self, path_spec: &PathSpec) -> Result<Vec<Credential>> {
        let cursor = self.cursor.entry(path_spec.clone()).or_insert(0);
        while let Some(source) = self.sources.get_mut(*cursor) {
            let batch = source.candidate_credentials(path_spec)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            *cursor += 1;
        }
        Ok(Vec::new())
    }
}

/// Hook invoked for a locked scan node. Returns whether it was unlocked.
pub trait VolumeUnlocker {
    fn unlock(
        &mut self,
        scanner: &SourceScanner<'_>,
        ctx: &mut ScanContext,
        id: ScanNodeId,
    ) -> Result<bool>;
}

/// Leaves every locked layer locked.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoUnlock;

impl VolumeUnlocker for NoUnlock {
    fn unlock(&mut self, _: &SourceScanner<'_>, _: &mut ScanContext, _: ScanNodeId) -> Result<bool> {
        Ok(false)
    }
}

/// Tries candidates from a [`CredentialSource`] in order.
pub struct CredentialUnlocker<S> {
    source: S,
}

impl<S: CredentialSource> CredentialUnlocker<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: CredentialSource> VolumeUnlocker for CredentialUnlocker<S> {
    fn unlock(
        &mut self,
        scanner: &SourceScanner<'_>,
        ctx: &mut ScanContext,
        id: ScanNodeId,
    ) -> Result<bool> {
        let path_spec = match ctx.get(id) {
            Some(node) if node.is_locked() => node.path_spec().clone(),
            Some(_) => return Ok(true),
            None => {
                return Err(LhError::Runtime {
                    details: format!("scan node {} does not exist", id.index()),
                });
            }
        };

        loop {
            let batch = self.source.candidate_credentials(&path_spec)?;
            if batch.is_empty() {
                let err = LhError::LockedVolume {
                    path_spec: path_spec.to_string(),
                };
                scanner.log().warn("SCANNER", &err);
                scanner.log().record(
                    &LogEntry::new(EventType::Error, Severity::Warning)
                        .with_path_spec(&path_spec)
                        .with_error(&err),
                );
                return Ok(false);
            }
            for credential in &batch {
                if scanner.unlock(ctx, id, credential)? {
                    return Ok(true);
                }
            }
        }
    }
}
