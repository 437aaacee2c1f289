//! In-memory layered storage backend.
//!
//! Models a complete storage stack without any on-disk format: which layers
//! a probe reveals, which layers are encrypted (and with what credential),
//! which layers are corrupt, and the file-system trees exposed at the leaves.
//! Stream contents and failure points are scripted per entry, and every
//! stream open and unlock attempt is recorded so callers can assert on the
//! I/O that actually happened.
//!
//! ```
//! use layerhash::backend::{MemoryBackend, MemoryFileSystem, SourceType};
//! use layerhash::pathspec::{Attributes, LayerKind, PathSpec};
//!
//! let source = PathSpec::os("/evidence/disk.raw");
//! let fs = source.child(LayerKind::FileSystem, Attributes::default().with_location("/"));
//! let backend = MemoryBackend::builder()
//!     .source(source.clone(), SourceType::StorageMediaImage)
//!     .layers(&source, [fs.clone()])
//!     .file_system(&fs, "ext4", MemoryFileSystem::new().file("/notes.txt", "hello"))
//!     .build();
//! assert_eq!(backend.source_type_of(&source), Some(SourceType::StorageMediaImage));
//! ```

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    BoxRead, Credential, EntryKind, FileEntry, FileSystemInfo, LayerProbe, SourceType,
    StorageBackend, SubEntries,
};
use crate::core::errors::{LhError, Result};
use crate::pathspec::{Attributes, LayerKind, PathSpec};

/// Content of one scripted data stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryStream {
    Data(Arc<[u8]>),
    /// Opening the stream fails.
    OpenFails,
    /// Reading yields the first `after` bytes of `data`, then fails.
    ReadFailsAfter { data: Arc<[u8]>, after: usize },
}

impl MemoryStream {
    pub fn data(bytes: impl AsRef<[u8]>) -> Self {
        Self::Data(Arc::from(bytes.as_ref()))
    }

    pub fn read_fails_after(bytes: impl AsRef<[u8]>, after: usize) -> Self {
        Self::ReadFailsAfter {
            data: Arc::from(bytes.as_ref()),
            after,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enumeration {
    Ok,
    /// `sub_entries` itself fails.
    Fails,
    /// Yields this many children, then an error.
    FailsAfter(usize),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: EntryKind,
    streams: Vec<(String, MemoryStream)>,
    children: Vec<String>,
    enumeration: Enumeration,
}

impl MemoryNode {
    fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            streams: Vec::new(),
            children: Vec::new(),
            enumeration: Enumeration::Ok,
        }
    }
}

/// Scripted file-system tree, keyed by absolute `/`-separated path.
///
/// Children keep insertion order; intermediate directories are created on
/// demand.
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    nodes: HashMap<String, MemoryNode>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), MemoryNode::new(EntryKind::Directory));
        Self { nodes }
    }

    /// Regular file with a default data stream.
    #[must_use]
    pub fn file(self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.stream(path, "", MemoryStream::data(content))
    }

    /// Add a data stream to a regular file, creating the file if needed.
    #[must_use]
    pub fn stream(mut self, path: &str, name: &str, stream: MemoryStream) -> Self {
        let node = self.ensure_node(path, EntryKind::Regular);
        node.streams.push((name.to_string(), stream));
        self
    }

    #[must_use]
    pub fn dir(mut self, path: &str) -> Self {
        self.ensure_node(path, EntryKind::Directory);
        self
    }

    /// Entry of any kind without data streams (device, pipe, socket, link).
    #[must_use]
    pub fn special(mut self, path: &str, kind: EntryKind) -> Self {
        self.ensure_node(path, kind);
        self
    }

    /// Device entry that still advertises a default stream.
    #[must_use]
    pub fn device(self, path: &str, content: impl AsRef<[u8]>) -> Self {
        let mut fs = self.stream(path, "", MemoryStream::data(content));
        if let Some(node) = fs.nodes.get_mut(&normalize(path)) {
            node.kind = EntryKind::Device;
        }
        fs
    }

    /// Directory whose enumeration fails outright.
    #[must_use]
    pub fn unlistable_dir(mut self, path: &str) -> Self {
        self.ensure_node(path, EntryKind::Directory).enumeration = Enumeration::Fails;
        self
    }

    /// Directory whose enumeration fails after yielding `after` children.
    #[must_use]
    pub fn dir_failing_after(mut self, path: &str, after: usize) -> Self {
        self.ensure_node(path, EntryKind::Directory).enumeration = Enumeration::FailsAfter(after);
        self
    }

    fn ensure_node(&mut self, path: &str, kind: EntryKind) -> &mut MemoryNode {
        let path = normalize(path);
        if !self.nodes.contains_key(&path) {
            let (parent, name) = split_parent(&path);
            self.ensure_node(&parent, EntryKind::Directory)
                .children
                .push(name.to_string());
            self.nodes.insert(path.clone(), MemoryNode::new(kind));
        }
        let node = self
            .nodes
            .entry(path)
            .or_insert_with(|| MemoryNode::new(kind));
        if node.kind != kind && kind != EntryKind::Directory {
            node.kind = kind;
        }
        node
    }
}

#[derive(Debug, Clone)]
enum ProbeRule {
    Layers(Vec<PathSpec>),
    Encrypted {
        credential: Credential,
        revealed: PathSpec,
    },
    Corrupt(String),
}

#[derive(Debug, Clone)]
struct MountedFileSystem {
    format: String,
    path_spec: PathSpec,
    tree: MemoryFileSystem,
}

/// Builder for [`MemoryBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackendBuilder {
    sources: HashMap<PathSpec, SourceType>,
    probes: HashMap<PathSpec, ProbeRule>,
    file_systems: HashMap<Option<PathSpec>, MountedFileSystem>,
}

impl MemoryBackendBuilder {
    #[must_use]
    pub fn source(mut self, source: PathSpec, source_type: SourceType) -> Self {
        self.sources.insert(source, source_type);
        self
    }

    /// Layers revealed by probing `parent`, in discovery order.
    ///
    /// One layer probes as `Single`, several as `Multiple`.
    #[must_use]
    pub fn layers(mut self, parent: &PathSpec, children: impl IntoIterator<Item = PathSpec>) -> Self {
        self.probes.insert(
            parent.clone(),
            ProbeRule::Layers(children.into_iter().collect()),
        );
        self
    }

    /// Encrypted layer that reveals `revealed` once `credential` is accepted.
    #[must_use]
    pub fn encrypted(mut self, layer: &PathSpec, credential: Credential, revealed: PathSpec) -> Self {
        self.probes.insert(
            layer.clone(),
            ProbeRule::Encrypted {
                credential,
                revealed,
            },
        );
        self
    }

    /// Layer whose probe fails with a scan error.
    #[must_use]
    pub fn corrupt(mut self, layer: &PathSpec, details: impl Into<String>) -> Self {
        self.probes
            .insert(layer.clone(), ProbeRule::Corrupt(details.into()));
        self
    }

    /// File-system tree exposed by the `FileSystem` layer `fs`.
    #[must_use]
    pub fn file_system(mut self, fs: &PathSpec, format: &str, tree: MemoryFileSystem) -> Self {
        self.file_systems.insert(
            fs.parent().cloned(),
            MountedFileSystem {
                format: format.to_string(),
                path_spec: fs.clone(),
                tree,
            },
        );
        self
    }

    pub fn build(self) -> MemoryBackend {
        MemoryBackend {
            sources: self.sources,
            probes: self.probes,
            file_systems: self.file_systems,
            unlocked: Mutex::new(HashSet::new()),
            stream_opens: Mutex::new(Vec::new()),
            unlock_attempts: Mutex::new(Vec::new()),
        }
    }
}

/// In-memory [`StorageBackend`].
#[derive(Debug)]
pub struct MemoryBackend {
    sources: HashMap<PathSpec, SourceType>,
    probes: HashMap<PathSpec, ProbeRule>,
    file_systems: HashMap<Option<PathSpec>, MountedFileSystem>,
    unlocked: Mutex<HashSet<PathSpec>>,
    stream_opens: Mutex<Vec<(String, String)>>,
    unlock_attempts: Mutex<Vec<PathSpec>>,
}

impl MemoryBackend {
    pub fn builder() -> MemoryBackendBuilder {
        MemoryBackendBuilder::default()
    }

    pub fn source_type_of(&self, source: &PathSpec) -> Option<SourceType> {
        self.sources.get(source).copied()
    }

    /// `(entry location, stream name)` of every `open_stream` call so far.
    pub fn opened_streams(&self) -> Vec<(String, String)> {
        self.stream_opens.lock().clone()
    }

    /// Path specs of every `try_unlock` call so far.
    pub fn unlock_attempts(&self) -> Vec<PathSpec> {
        self.unlock_attempts.lock().clone()
    }

    fn mounted(&self, path_spec: &PathSpec) -> Result<&MountedFileSystem> {
        if path_spec.kind() != LayerKind::FileSystem {
            return Err(LhError::UnsupportedLayer {
                path_spec: path_spec.to_string(),
                details: "not a file system layer".to_string(),
            });
        }
        self.file_systems
            .get(&path_spec.parent().cloned())
            .ok_or_else(|| LhError::UnsupportedLayer {
                path_spec: path_spec.to_string(),
                details: "no file system registered".to_string(),
            })
    }

    fn node<'a>(
        &'a self,
        entry: &FileEntry,
    ) -> Result<(&'a MountedFileSystem, String, &'a MemoryNode)> {
        let mounted = self.mounted(&entry.path_spec)?;
        let location = normalize(entry.path_spec.location().unwrap_or("/"));
        let node = mounted
            .tree
            .nodes
            .get(&location)
            .ok_or_else(|| LhError::Enumeration {
                path_spec: entry.path_spec.to_string(),
                details: "entry vanished".to_string(),
            })?;
        Ok((mounted, location, node))
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn source_type(&self, source: &PathSpec) -> Result<SourceType> {
        self.sources
            .get(source)
            .copied()
            .ok_or_else(|| LhError::SourceNotFound {
                path: source.location().unwrap_or_default().into(),
            })
    }

    fn detect_layer(&self, path_spec: &PathSpec) -> Result<LayerProbe> {
        match self.probes.get(path_spec) {
            None => Ok(LayerProbe::Unsupported),
            Some(ProbeRule::Layers(children)) => Ok(match children.as_slice() {
                [] => LayerProbe::Unsupported,
                [single] => LayerProbe::Single(single.clone()),
                many => LayerProbe::Multiple(many.to_vec()),
            }),
            Some(ProbeRule::Encrypted { revealed, .. }) => {
                if self.unlocked.lock().contains(path_spec) {
                    Ok(LayerProbe::Single(revealed.clone()))
                } else {
                    Ok(LayerProbe::Locked)
                }
            }
            Some(ProbeRule::Corrupt(details)) => Err(LhError::Scan {
                path_spec: path_spec.to_string(),
                details: details.clone(),
            }),
        }
    }

    fn open_file_system(&self, path_spec: &PathSpec) -> Result<FileSystemInfo> {
        let mounted = self.mounted(path_spec)?;
        Ok(FileSystemInfo {
            format: mounted.format.clone(),
            path_spec: mounted.path_spec.clone(),
        })
    }

    fn open_file_entry(&self, path_spec: &PathSpec) -> Result<Option<FileEntry>> {
        let mounted = self.mounted(path_spec)?;
        let location = normalize(path_spec.location().unwrap_or("/"));
        Ok(mounted
            .tree
            .nodes
            .get(&location)
            .map(|node| make_entry(&mounted.path_spec, &location, node)))
    }

    fn sub_entries<'a>(&'a self, entry: &FileEntry) -> Result<SubEntries<'a>> {
        let (mounted, location, node) = self.node(entry)?;
        let yielded = match node.enumeration {
            Enumeration::Ok => node.children.len(),
            Enumeration::Fails => {
                return Err(LhError::Enumeration {
                    path_spec: entry.path_spec.to_string(),
                    details: "directory cannot be listed".to_string(),
                });
            }
            Enumeration::FailsAfter(after) => after.min(node.children.len()),
        };
        let fails = node.enumeration != Enumeration::Ok;

        let fs_spec = &mounted.path_spec;
        let nodes = &mounted.tree.nodes;
        let children = node.children[..yielded].iter().map(move |name| {
            let child_location = join(&location, name);
            nodes
                .get(&child_location)
                .map(|child| make_entry(fs_spec, &child_location, child))
                .ok_or_else(|| LhError::Enumeration {
                    path_spec: child_location.clone(),
                    details: "dangling child".to_string(),
                })
        });
        let path_spec = entry.path_spec.to_string();
        let failure = fails.then(|| {
            Err(LhError::Enumeration {
                path_spec,
                details: "directory listing interrupted".to_string(),
            })
        });
        Ok(Box::new(children.chain(failure)))
    }

    fn open_stream(&self, entry: &FileEntry, stream: &str) -> Result<BoxRead> {
        let (_, location, node) = self.node(entry)?;
        self.stream_opens
            .lock()
            .push((location, stream.to_string()));

        let stream_error = |source: io::Error| LhError::StreamIo {
            path_spec: entry.path_spec.to_string(),
            stream: stream.to_string(),
            source,
        };
        let content = node
            .streams
            .iter()
            .find(|(name, _)| name == stream)
            .map(|(_, content)| content)
            .ok_or_else(|| stream_error(io::Error::new(io::ErrorKind::NotFound, "no such stream")))?;

        match content {
            MemoryStream::Data(data) => Ok(Box::new(Cursor::new(Arc::clone(data)))),
            MemoryStream::OpenFails => Err(stream_error(io::Error::other("stream cannot be opened"))),
            MemoryStream::ReadFailsAfter { data, after } => Ok(Box::new(FailingReader {
                inner: Cursor::new(Arc::clone(data)),
                limit: *after as u64,
            })),
        }
    }

    fn try_unlock(&self, path_spec: &PathSpec, credential: &Credential) -> Result<bool> {
        self.unlock_attempts.lock().push(path_spec.clone());
        match self.probes.get(path_spec) {
            Some(ProbeRule::Encrypted {
                credential: accepted,
                ..
            }) if accepted == credential => {
                self.unlocked.lock().insert(path_spec.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Reader that fails once `limit` bytes have been delivered.
struct FailingReader {
    inner: Cursor<Arc<[u8]>>,
    limit: u64,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.limit.saturating_sub(self.inner.position());
        if remaining == 0 {
            return Err(io::Error::other("injected read failure"));
        }
        let take = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        self.inner.read(&mut buf[..take])
    }
}

fn make_entry(fs_spec: &PathSpec, location: &str, node: &MemoryNode) -> FileEntry {
    let (_, name) = split_parent(location);
    FileEntry {
        name: name.to_string(),
        kind: node.kind,
        data_streams: node.streams.iter().map(|(name, _)| name.clone()).collect(),
        path_spec: fs_spec.sibling(
            LayerKind::FileSystem,
            Attributes::default().with_location(location),
        ),
    }
}

fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

fn split_parent(path: &str) -> (String, &str) {
    match path.rfind('/') {
        Some(0) => ("/".to_string(), &path[1..]),
        Some(idx) => (path[..idx].to_string(), &path[idx + 1..]),
        None => ("/".to_string(), path),
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
