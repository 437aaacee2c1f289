//! Source scanner: probes a source layer by layer into a [`ScanContext`].
//!
//! One probe step asks the backend what lies beneath a node. The outcome
//! drives a small state machine per node:
//!
//! | probe            | effect                                            |
//! |------------------|---------------------------------------------------|
//! | `Single(ps)`     | child appended; followed only with auto-recursion |
//! | `Multiple(v)`    | all children appended; branch stops               |
//! | `Locked`         | node locked; no progress until unlocked           |
//! | `Unsupported`    | node becomes a leaf                               |
//! | error            | error marker; node becomes a leaf                 |

#![allow(missing_docs)]

use crate::backend::{Credential, LayerProbe, StorageBackend};
use crate::core::errors::{LhError, Result};
use crate::logger::ActivityLog;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::scanner::context::{ScanContext, ScanNodeId};

/// Synchronous, single-threaded layer scanner.
#[derive(Clone, Copy)]
pub struct SourceScanner<'a> {
    backend: &'a dyn StorageBackend,
    log: &'a ActivityLog,
}

impl<'a> SourceScanner<'a> {
    pub fn new(backend: &'a dyn StorageBackend, log: &'a ActivityLog) -> Self {
        Self { backend, log }
    }

    pub fn backend(&self) -> &'a dyn StorageBackend {
        self.backend
    }

    pub fn log(&self) -> &'a ActivityLog {
        self.log
    }

    /// Run one scan pass.
    ///
    /// Without `focus`, the pass starts at the source (creating the root node
    /// and detecting the source type on the first call) and revisits every
    /// node still waiting for a probe. With `focus`, only the subtree rooted
    /// at that node is probed. Afterwards [`ScanContext::updated`] tells
    /// whether the pass changed anything.
    pub fn scan(
        &self,
        ctx: &mut ScanContext,
        auto_recurse: bool,
        focus: Option<ScanNodeId>,
    ) -> Result<()> {
        ctx.updated = false;

        let start = match focus {
            Some(id) => {
                if ctx.get(id).is_none() {
                    return Err(LhError::Runtime {
                        details: format!("scan node {} does not exist", id.index()),
                    });
                }
                id
            }
            None => match ctx.root() {
                Some(root) => root,
                None => {
                    let source_type = self.backend.source_type(ctx.source())?;
                    ctx.set_source_type(source_type);
                    let root = ctx.add_node(ctx.source().clone(), None);
                    if source_type.is_plain() {
                        // Directories and single files are hashed as they are.
                        ctx.node_mut(root).scanned = true;
                        return Ok(());
                    }
                    root
                }
            },
        };

        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            self.step(ctx, id, auto_recurse, &mut stack);
        }
        Ok(())
    }

    /// Try one credential on a locked node.
    ///
    /// Success clears the locked flag; the node is probed again by the next
    /// scan pass focused on it. Backend failures count as a rejection.
    pub fn unlock(&self, ctx: &mut ScanContext, id: ScanNodeId, credential: &Credential) -> Result<bool> {
        let Some(node) = ctx.get(id) else {
            return Err(LhError::Runtime {
                details: format!("scan node {} does not exist", id.index()),
            });
        };
        if !node.is_locked() {
            return Ok(true);
        }
        let path_spec = node.path_spec().clone();

        match self.backend.try_unlock(&path_spec, credential) {
            Ok(true) => {
                ctx.mark_unlocked(id);
                self.log.info("SCANNER", format_args!("unlocked {path_spec} with {}", credential.label()));
                self.log.record(
                    &LogEntry::new(EventType::VolumeUnlocked, Severity::Info)
                        .with_path_spec(&path_spec)
                        .with_details(credential.label()),
                );
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => {
                self.log
                    .warn("SCANNER", format_args!("unlock attempt on {path_spec} failed: {err}"));
                Ok(false)
            }
        }
    }

    fn step(&self, ctx: &mut ScanContext, id: ScanNodeId, auto_recurse: bool, stack: &mut Vec<ScanNodeId>) {
        let node = ctx.node(id);
        if node.is_locked() || node.error().is_some() {
            return;
        }
        if node.is_scanned() {
            stack.extend(node.children().iter().rev().copied());
            return;
        }

        let path_spec = node.path_spec().clone();
        match self.backend.detect_layer(&path_spec) {
            Err(err) => {
                self.log
                    .warn("SCANNER", format_args!("unable to scan {path_spec}: {err}"));
                self.log.record(
                    &LogEntry::new(EventType::Error, Severity::Warning)
                        .with_path_spec(&path_spec)
                        .with_error(&err),
                );
                let node = ctx.node_mut(id);
                node.error = Some(err.to_string());
                node.scanned = true;
                ctx.updated = true;
            }
            Ok(LayerProbe::Locked) => {
                self.log.info("SCANNER", format_args!("{path_spec} is locked"));
                self.log.record(
                    &LogEntry::new(EventType::VolumeLocked, Severity::Info).with_path_spec(&path_spec),
                );
                ctx.mark_locked(id);
            }
            Ok(LayerProbe::Unsupported) => {
                ctx.node_mut(id).scanned = true;
                ctx.updated = true;
            }
            Ok(LayerProbe::Single(child)) => {
                self.log
                    .info("SCANNER", format_args!("{path_spec}: found {}", child.describe_layer()));
                ctx.node_mut(id).scanned = true;
                let child = ctx.add_node(child, Some(id));
                if auto_recurse {
                    stack.push(child);
                }
            }
            Ok(LayerProbe::Multiple(children)) => {
                self.log.info(
                    "SCANNER",
                    format_args!("{path_spec}: found {} candidates", children.len()),
                );
                ctx.node_mut(id).scanned = true;
                for child in children {
                    ctx.add_node(child, Some(id));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MemoryFileSystem, SourceType};
    use crate::pathspec::{Attributes, LayerKind, PathSpec};

    struct Fixture {
        source: PathSpec,
        image: PathSpec,
        p1: PathSpec,
        p2: PathSpec,
        bde: PathSpec,
        backend: MemoryBackend,
    }

    fn fs_at(parent: &PathSpec) -> PathSpec {
        parent.child(LayerKind::FileSystem, Attributes::default().with_location("/"))
    }

    /// raw → image → {p1: fs, p2: encrypted → fs}
    fn fixture() -> Fixture {
        let source = PathSpec::os("/cases/disk.qcow2");
        let image = source.child(LayerKind::StorageImage, Attributes::default());
        let p1 = image.child(
            LayerKind::PartitionTable,
            Attributes::default().with_index(0).with_location("/p1"),
        );
        let p2 = image.child(
            LayerKind::PartitionTable,
            Attributes::default().with_index(1).with_location("/p2"),
        );
        let bde = p2.child(LayerKind::EncryptedVolume, Attributes::default());
        let backend = MemoryBackend::builder()
            .source(source.clone(), SourceType::StorageMediaImage)
            .layers(&source, [image.clone()])
            .layers(&image, [p1.clone(), p2.clone()])
            .layers(&p1, [fs_at(&p1)])
            .layers(&p2, [bde.clone()])
            .encrypted(&bde, Credential::Password("secret".to_string()), fs_at(&bde))
            .file_system(&fs_at(&p1), "ntfs", MemoryFileSystem::new())
            .build();
        Fixture {
            source,
            image,
            p1,
            p2,
            bde,
            backend,
        }
    }

    #[test]
    fn auto_recursion_stops_at_multiple_candidates() {
        let f = fixture();
        let log = ActivityLog::silent();
        let scanner = SourceScanner::new(&f.backend, &log);
        let mut ctx = ScanContext::new(f.source.clone());

        scanner.scan(&mut ctx, true, None).unwrap();
        assert!(ctx.updated());
        assert_eq!(ctx.source_type(), Some(SourceType::StorageMediaImage));
        // source, image, p1, p2
        assert_eq!(ctx.len(), 4);
        let p1 = ctx.find(&f.p1).unwrap();
        assert!(!ctx.node(p1).is_scanned());
        assert_eq!(ctx.unscanned_node(), Some(p1));
        assert!(ctx.find(&f.image).is_some());
    }

    #[test]
    fn repeated_scans_reach_fixed_point() {
        let f = fixture();
        let log = ActivityLog::silent();
        let scanner = SourceScanner::new(&f.backend, &log);
        let mut ctx = ScanContext::new(f.source.clone());

        let mut passes = 0;
        loop {
            scanner.scan(&mut ctx, true, None).unwrap();
            passes += 1;
            if !ctx.updated() {
                break;
            }
            assert!(passes < 10, "scan never settled");
        }
        let bde = ctx.find(&f.bde).unwrap();
        assert_eq!(ctx.locked_scan_nodes().collect::<Vec<_>>(), [bde]);
        assert!(ctx.find(&fs_at(&f.p1)).is_some());
        assert!(ctx.find(&fs_at(&f.bde)).is_none());
    }

    #[test]
    fn locked_node_makes_no_progress() {
        let f = fixture();
        let log = ActivityLog::silent();
        let scanner = SourceScanner::new(&f.backend, &log);
        let mut ctx = ScanContext::new(f.source.clone());
        while {
            scanner.scan(&mut ctx, true, None).unwrap();
            ctx.updated()
        } {}

        let bde = ctx.find(&f.bde).unwrap();
        let before = ctx.len();
        scanner.scan(&mut ctx, true, Some(bde)).unwrap();
        assert!(!ctx.updated());
        assert_eq!(ctx.len(), before);
    }

    #[test]
    fn unlock_then_focused_scan_reveals_file_system() {
        let f = fixture();
        let log = ActivityLog::silent();
        let scanner = SourceScanner::new(&f.backend, &log);
        let mut ctx = ScanContext::new(f.source.clone());
        while {
            scanner.scan(&mut ctx, true, None).unwrap();
            ctx.updated()
        } {}
        let bde = ctx.find(&f.bde).unwrap();

        assert!(!scanner.unlock(&mut ctx, bde, &Credential::Password("guess".to_string())).unwrap());
        assert!(ctx.node(bde).is_locked());
        assert!(scanner.unlock(&mut ctx, bde, &Credential::Password("secret".to_string())).unwrap());
        assert!(!ctx.has_locked_nodes());

        scanner.scan(&mut ctx, true, Some(bde)).unwrap();
        assert!(ctx.updated());
        let fs = ctx.find(&fs_at(&f.bde)).unwrap();
        assert_eq!(ctx.node(fs).parent(), Some(bde));
    }

    #[test]
    fn without_auto_recursion_each_pass_probes_one_level() {
        let f = fixture();
        let log = ActivityLog::silent();
        let scanner = SourceScanner::new(&f.backend, &log);
        let mut ctx = ScanContext::new(f.source.clone());

        scanner.scan(&mut ctx, false, None).unwrap();
        assert_eq!(ctx.len(), 2, "source and image");
        let image = ctx.find(&f.image).unwrap();
        scanner.scan(&mut ctx, false, Some(image)).unwrap();
        assert_eq!(ctx.len(), 4, "plus both partitions");
        assert!(ctx.find(&f.p2).is_some());
    }

    #[test]
    fn probe_failure_marks_only_that_branch() {
        let source = PathSpec::os("/disk.raw");
        let p1 = source.child(LayerKind::PartitionTable, Attributes::default().with_index(0));
        let p2 = source.child(LayerKind::PartitionTable, Attributes::default().with_index(1));
        let backend = MemoryBackend::builder()
            .source(source.clone(), SourceType::StorageMediaImage)
            .layers(&source, [p1.clone(), p2.clone()])
            .corrupt(&p1, "bad boot sector")
            .layers(&p2, [fs_at(&p2)])
            .build();
        let log = ActivityLog::capturing();
        let scanner = SourceScanner::new(&backend, &log);
        let mut ctx = ScanContext::new(source);

        scanner.scan(&mut ctx, true, None).unwrap();
        scanner.scan(&mut ctx, true, None).unwrap();

        let p1 = ctx.find(&p1).unwrap();
        assert!(ctx.node(p1).error().unwrap().contains("bad boot sector"));
        assert!(ctx.find(&fs_at(&p2)).is_some());
        assert!(log.captured().iter().any(|line| line.contains("LH-2002")));
    }

    #[test]
    fn directory_source_is_not_probed() {
        let source = PathSpec::os("/evidence");
        let backend = MemoryBackend::builder()
            .source(source.clone(), SourceType::Directory)
            .corrupt(&source, "must not be probed")
            .build();
        let log = ActivityLog::silent();
        let scanner = SourceScanner::new(&backend, &log);
        let mut ctx = ScanContext::new(source);

        scanner.scan(&mut ctx, true, None).unwrap();
        let root = ctx.root().unwrap();
        assert!(ctx.node(root).is_scanned());
        assert!(ctx.node(root).error().is_none());
        scanner.scan(&mut ctx, true, None).unwrap();
        assert!(!ctx.updated());
    }

    #[test]
    fn missing_source_is_fatal() {
        let backend = MemoryBackend::builder().build();
        let log = ActivityLog::silent();
        let scanner = SourceScanner::new(&backend, &log);
        let mut ctx = ScanContext::new(PathSpec::os("/nowhere.raw"));
        let err = scanner.scan(&mut ctx, true, None).unwrap_err();
        assert_eq!(err.code(), "LH-2001");
    }
}
