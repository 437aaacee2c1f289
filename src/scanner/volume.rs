//! Volume scanner: drives scanning and unlocking up to the base path specs.

#![allow(missing_docs)]

use std::collections::HashSet;

use crate::core::errors::Result;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::pathspec::PathSpec;
use crate::scanner::context::{ScanContext, ScanNodeId};
use crate::scanner::selection::{SelectionPolicy, select_base_path_specs};
use crate::scanner::source::SourceScanner;
use crate::scanner::unlock::VolumeUnlocker;

/// Scans a source and resolves the base path specs chosen by a policy.
///
/// Only branches the policy selects are scanned further or unlocked, so
/// credentials are never requested for volumes that will not be hashed.
pub struct VolumeScanner<'a> {
    scanner: SourceScanner<'a>,
    policy: SelectionPolicy,
    auto_recurse: bool,
}

impl<'a> VolumeScanner<'a> {
    pub fn new(scanner: SourceScanner<'a>, policy: SelectionPolicy) -> Self {
        Self {
            scanner,
            policy,
            auto_recurse: true,
        }
    }

    #[must_use]
    pub fn with_auto_recurse(mut self, auto_recurse: bool) -> Self {
        self.auto_recurse = auto_recurse;
        self
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Scan `source` to a fixed point and select its base path specs.
    ///
    /// Each locked, selected node is offered to `unlocker` exactly once.
    pub fn scan_source(
        &self,
        source: PathSpec,
        unlocker: &mut dyn VolumeUnlocker,
    ) -> Result<(ScanContext, Vec<PathSpec>)> {
        let mut ctx = ScanContext::new(source);
        self.scan_step(&mut ctx, None)?;

        let mut attempted = HashSet::new();
        while let Some(id) = self.next_pending(&ctx, &attempted) {
            if ctx.node(id).is_locked() {
                attempted.insert(id);
                if !unlocker.unlock(&self.scanner, &mut ctx, id)? {
                    continue;
                }
            }
            self.scan_step(&mut ctx, Some(id))?;
        }

        let base_path_specs = select_base_path_specs(&ctx, &self.policy, self.scanner.log())?;
        Ok((ctx, base_path_specs))
    }

    fn scan_step(&self, ctx: &mut ScanContext, focus: Option<ScanNodeId>) -> Result<()> {
        self.scanner.scan(ctx, self.auto_recurse, focus)?;
        if ctx.updated() {
            let at = focus.or_else(|| ctx.root()).map(|id| ctx.node(id).path_spec().to_string());
            let mut entry = LogEntry::new(EventType::ScanStep, Severity::Info).with_count(ctx.len() as u64);
            if let Some(at) = at {
                entry = entry.with_path_spec(at);
            }
            self.scanner.log().record(&entry);
        }
        Ok(())
    }

    /// First selected node, in pre-order, that still needs a probe or an
    /// unlock attempt.
    fn next_pending(&self, ctx: &ScanContext, attempted: &HashSet<ScanNodeId>) -> Option<ScanNodeId> {
        let mut stack: Vec<ScanNodeId> = ctx.root().into_iter().collect();
        while let Some(id) = stack.pop() {
            let node = ctx.node(id);
            if node.error().is_some() {
                continue;
            }
            if node.is_locked() {
                if attempted.contains(&id) {
                    continue;
                }
                return Some(id);
            }
            if !node.is_scanned() {
                return Some(id);
            }
            stack.extend(self.policy.selected_children(ctx, id).into_iter().rev());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Credential, MemoryBackend, MemoryFileSystem, SourceType};
    use crate::logger::ActivityLog;
    use crate::pathspec::{Attributes, LayerKind};
    use crate::scanner::selection::VolumeSelection;
    use crate::scanner::unlock::{CredentialUnlocker, NoUnlock, StaticCredentials};

    fn fs_at(parent: &PathSpec) -> PathSpec {
        parent.child(LayerKind::FileSystem, Attributes::default().with_location("/"))
    }

    struct Disk {
        source: PathSpec,
        p1: PathSpec,
        bde: PathSpec,
        backend: MemoryBackend,
    }

    fn disk() -> Disk {
        let source = PathSpec::os("/cases/disk.raw");
        let p1 = source.child(
            LayerKind::PartitionTable,
            Attributes::default().with_index(0).with_location("/p1"),
        );
        let p2 = source.child(
            LayerKind::PartitionTable,
            Attributes::default().with_index(1).with_location("/p2"),
        );
        let bde = p2.child(LayerKind::EncryptedVolume, Attributes::default());
        let backend = MemoryBackend::builder()
            .source(source.clone(), SourceType::StorageMediaImage)
            .layers(&source, [p1.clone(), p2.clone()])
            .layers(&p1, [fs_at(&p1)])
            .layers(&p2, [bde.clone()])
            .encrypted(&bde, Credential::Password("pw".to_string()), fs_at(&bde))
            .file_system(&fs_at(&p1), "ext4", MemoryFileSystem::new())
            .build();
        Disk {
            source,
            p1,
            bde,
            backend,
        }
    }

    #[test]
    fn locked_partition_without_credentials_is_left_out() {
        let d = disk();
        let log = ActivityLog::silent();
        let volumes = VolumeScanner::new(SourceScanner::new(&d.backend, &log), SelectionPolicy::default());

        let (ctx, base) = volumes.scan_source(d.source.clone(), &mut NoUnlock).unwrap();
        assert_eq!(base, [fs_at(&d.p1)]);
        let bde = ctx.find(&d.bde).unwrap();
        assert_eq!(ctx.locked_scan_nodes().collect::<Vec<_>>(), [bde]);
    }

    #[test]
    fn unlocked_partition_contributes_its_file_system() {
        let d = disk();
        let log = ActivityLog::silent();
        let volumes = VolumeScanner::new(SourceScanner::new(&d.backend, &log), SelectionPolicy::default());
        let mut unlocker =
            CredentialUnlocker::new(StaticCredentials::new(vec![Credential::Password("pw".to_string())]));

        let (ctx, base) = volumes.scan_source(d.source.clone(), &mut unlocker).unwrap();
        assert_eq!(base, [fs_at(&d.p1), fs_at(&d.bde)]);
        assert!(!ctx.has_locked_nodes());
    }

    #[test]
    fn deselected_volume_is_never_unlocked() {
        let d = disk();
        let log = ActivityLog::silent();
        let policy = SelectionPolicy {
            partitions: VolumeSelection::parse("partition", "1").unwrap(),
            ..SelectionPolicy::default()
        };
        let volumes = VolumeScanner::new(SourceScanner::new(&d.backend, &log), policy);
        let mut unlocker =
            CredentialUnlocker::new(StaticCredentials::new(vec![Credential::Password("pw".to_string())]));

        let (ctx, base) = volumes.scan_source(d.source.clone(), &mut unlocker).unwrap();
        assert_eq!(base, [fs_at(&d.p1)]);
        assert!(d.backend.unlock_attempts().is_empty());
        assert!(ctx.find(&d.bde).is_none(), "deselected branch is not probed");
    }

    #[test]
    fn stepwise_scanning_reaches_the_same_result() {
        let d = disk();
        let log = ActivityLog::silent();
        let volumes = VolumeScanner::new(SourceScanner::new(&d.backend, &log), SelectionPolicy::default())
            .with_auto_recurse(false);
        let (_, base) = volumes.scan_source(d.source.clone(), &mut NoUnlock).unwrap();
        assert_eq!(base, [fs_at(&d.p1)]);
    }

    #[test]
    fn each_locked_node_is_offered_once() {
        let d = disk();
        let log = ActivityLog::silent();
        let volumes = VolumeScanner::new(SourceScanner::new(&d.backend, &log), SelectionPolicy::default());
        let mut unlocker =
            CredentialUnlocker::new(StaticCredentials::new(vec![Credential::Password("wrong".to_string())]));

        let (_, base) = volumes.scan_source(d.source.clone(), &mut unlocker).unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(d.backend.unlock_attempts().len(), 1);
    }
}
