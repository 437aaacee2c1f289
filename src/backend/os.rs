//! Host file system backend.
//!
//! Resolves `Os` path specs to host files, directories and devices. No
//! container or file-system formats are parsed, so every probe ends at the
//! source: directories are hashed as file-system roots and regular files are
//! hashed as single files.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::backend::{
    BoxRead, Credential, EntryKind, FileEntry, FileSystemInfo, LayerProbe, SourceType,
    StorageBackend, SubEntries,
};
use crate::core::errors::{LhError, Result};
use crate::core::paths::resolve_absolute_path;
use crate::pathspec::{LayerKind, PathSpec};

/// Backend over the host file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsBackend;

impl OsBackend {
    pub const fn new() -> Self {
        Self
    }

    /// Resolve a host path into the source path spec of a scan.
    pub fn source_path_spec(path: &Path) -> Result<PathSpec> {
        let resolved = resolve_absolute_path(path);
        match fs::symlink_metadata(&resolved) {
            Ok(_) => Ok(PathSpec::os(resolved.to_string_lossy())),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(LhError::SourceNotFound {
                path: path.to_path_buf(),
            }),
            Err(err) => Err(LhError::io(resolved, err)),
        }
    }

    fn host_path(path_spec: &PathSpec) -> Result<PathBuf> {
        if path_spec.kind() != LayerKind::Os {
            return Err(LhError::UnsupportedLayer {
                path_spec: path_spec.to_string(),
                details: "host backend only resolves OS layers".to_string(),
            });
        }
        path_spec
            .location()
            .map(PathBuf::from)
            .ok_or_else(|| LhError::UnsupportedLayer {
                path_spec: path_spec.to_string(),
                details: "missing location".to_string(),
            })
    }

    fn entry_for(path: &Path) -> std::io::Result<FileEntry> {
        let meta = fs::symlink_metadata(path)?;
        let kind = entry_kind(&meta.file_type());
        let data_streams = match kind {
            EntryKind::Regular | EntryKind::Device => vec![String::new()],
            _ => Vec::new(),
        };
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileEntry {
            name,
            kind,
            data_streams,
            path_spec: PathSpec::os(path.to_string_lossy()),
        })
    }
}

impl StorageBackend for OsBackend {
    fn name(&self) -> &str {
        "os"
    }

    fn source_type(&self, source: &PathSpec) -> Result<SourceType> {
        let path = Self::host_path(source)?;
        let meta = fs::metadata(&path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                LhError::SourceNotFound { path: path.clone() }
            } else {
                LhError::io(&path, err)
            }
        })?;
        let file_type = meta.file_type();
        if file_type.is_dir() {
            return Ok(SourceType::Directory);
        }
        if matches!(entry_kind(&file_type), EntryKind::Device) {
            return Ok(SourceType::StorageMediaDevice);
        }
        Ok(SourceType::File)
    }

    fn detect_layer(&self, path_spec: &PathSpec) -> Result<LayerProbe> {
        Self::host_path(path_spec)?;
        Ok(LayerProbe::Unsupported)
    }

    fn open_file_system(&self, path_spec: &PathSpec) -> Result<FileSystemInfo> {
        Self::host_path(path_spec)?;
        Ok(FileSystemInfo {
            format: "OS".to_string(),
            path_spec: path_spec.clone(),
        })
    }

    fn open_file_entry(&self, path_spec: &PathSpec) -> Result<Option<FileEntry>> {
        let path = Self::host_path(path_spec)?;
        match Self::entry_for(&path) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LhError::io(&path, err)),
        }
    }

    fn sub_entries<'a>(&'a self, entry: &FileEntry) -> Result<SubEntries<'a>> {
        if entry.kind != EntryKind::Directory {
            return Ok(Box::new(std::iter::empty()));
        }
        let dir_path = Self::host_path(&entry.path_spec)?;
        let read_dir = fs::read_dir(&dir_path).map_err(|err| LhError::Enumeration {
            path_spec: entry.path_spec.to_string(),
            details: err.to_string(),
        })?;

        // Host directory order is not stable across runs; sort by name while
        // keeping per-child failures in place.
        let mut children: Vec<std::io::Result<PathBuf>> = read_dir
            .map(|child| child.map(|child| child.path()))
            .collect();
        children.sort_by(|a, b| match (a, b) {
            (Ok(a), Ok(b)) => a.file_name().cmp(&b.file_name()),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => std::cmp::Ordering::Equal,
        });

        let parent = entry.path_spec.to_string();
        Ok(Box::new(children.into_iter().map(move |child| {
            let path = child.map_err(|err| LhError::Enumeration {
                path_spec: parent.clone(),
                details: err.to_string(),
            })?;
            Self::entry_for(&path).map_err(|err| LhError::io(&path, err))
        })))
    }

    fn open_stream(&self, entry: &FileEntry, stream: &str) -> Result<BoxRead> {
        let path = Self::host_path(&entry.path_spec)?;
        if !stream.is_empty() {
            return Err(LhError::StreamIo {
                path_spec: entry.path_spec.to_string(),
                stream: stream.to_string(),
                source: std::io::Error::new(
                    ErrorKind::NotFound,
                    "host files only carry the default stream",
                ),
            });
        }
        let file = fs::File::open(&path).map_err(|err| LhError::StreamIo {
            path_spec: entry.path_spec.to_string(),
            stream: String::new(),
            source: err,
        })?;
        Ok(Box::new(file))
    }

    fn try_unlock(&self, _path_spec: &PathSpec, _credential: &Credential) -> Result<bool> {
        Ok(false)
    }
}

fn entry_kind(file_type: &fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        return EntryKind::Link;
    }
    if file_type.is_dir() {
        return EntryKind::Directory;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_block_device() || file_type.is_char_device() {
            return EntryKind::Device;
        }
        if file_type.is_fifo() {
            return EntryKind::Pipe;
        }
        if file_type.is_socket() {
            return EntryKind::Socket;
        }
    }
    EntryKind::Regular
}
