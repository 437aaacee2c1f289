//! Path specifications: immutable, composable descriptors of where a byte
//! stream lives.
//!
//! A [`PathSpec`] is one layer of a storage stack (raw source, image
//! container, partition, volume, snapshot, encrypted volume, file system)
//! plus an optional parent layer. Parents are reference-counted and shared:
//! every partition discovered in one image points at the same image layer.
//! Equality and hashing are structural over the whole chain.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// Closed set of storage layer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Host file, directory or device.
    Os,
    /// Storage media image container (QCOW, EWF, VHD, ...).
    StorageImage,
    /// Entry in a partition table.
    PartitionTable,
    /// Volume inside a volume manager or container (LVM, APFS, ...).
    VolumeManager,
    /// Point-in-time snapshot of a volume (VSS store, ...).
    Snapshot,
    /// Encrypted volume (BDE, LUKS, FVDE, ...).
    EncryptedVolume,
    /// Mounted file system view.
    FileSystem,
}

impl LayerKind {
    /// Short upper-case label used in reports and log lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Os => "OS",
            Self::StorageImage => "IMAGE",
            Self::PartitionTable => "PARTITION",
            Self::VolumeManager => "VOLUME",
            Self::Snapshot => "SNAPSHOT",
            Self::EncryptedVolume => "ENCRYPTED",
            Self::FileSystem => "FS",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind-specific attributes of one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Attributes {
    /// Location inside the parent layer (host path, `/p1`, `/vss2`, file path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Zero-based index of a partition, snapshot store or volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Byte offset of the layer inside its parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<u64>,
}

impl Attributes {
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub const fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    #[must_use]
    pub const fn with_start_offset(mut self, offset: u64) -> Self {
        self.start_offset = Some(offset);
        self
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct Layer {
    kind: LayerKind,
    attributes: Attributes,
    parent: Option<PathSpec>,
}

/// Immutable layer descriptor with a shared parent chain.
///
/// Cloning is cheap (one reference count increment).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PathSpec {
    layer: Arc<Layer>,
}

impl PathSpec {
    /// Create a layer on top of `parent` (or a physical source when `None`).
    #[must_use]
    pub fn new(kind: LayerKind, attributes: Attributes, parent: Option<Self>) -> Self {
        Self {
            layer: Arc::new(Layer {
                kind,
                attributes,
                parent,
            }),
        }
    }

    /// Host path source.
    #[must_use]
    pub fn os(location: impl Into<String>) -> Self {
        Self::new(
            LayerKind::Os,
            Attributes::default().with_location(location),
            None,
        )
    }

    /// Create a child layer of `self`.
    #[must_use]
    pub fn child(&self, kind: LayerKind, attributes: Attributes) -> Self {
        Self::new(kind, attributes, Some(self.clone()))
    }

    /// Sibling layer: same parent, different kind/attributes.
    ///
    /// Used for file entries inside a file system, which share the file
    /// system's parent and differ only in location.
    #[must_use]
    pub fn sibling(&self, kind: LayerKind, attributes: Attributes) -> Self {
        Self::new(kind, attributes, self.parent().cloned())
    }

    #[must_use]
    pub fn kind(&self) -> LayerKind {
        self.layer.kind
    }

    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.layer.attributes
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.layer.attributes.location.as_deref()
    }

    #[must_use]
    pub fn index(&self) -> Option<u32> {
        self.layer.attributes.index
    }

    #[must_use]
    pub fn start_offset(&self) -> Option<u64> {
        self.layer.attributes.start_offset
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.layer.parent.as_ref()
    }

    /// A path spec without a parent denotes a physical source.
    #[must_use]
    pub fn is_physical(&self) -> bool {
        self.layer.parent.is_none()
    }

    /// Iterate from this layer up to the physical source.
    pub fn ancestors(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |spec| spec.parent())
    }

    /// Nearest layer of `kind` in the chain, starting with `self`.
    #[must_use]
    pub fn nearest(&self, kind: LayerKind) -> Option<&Self> {
        self.ancestors().find(|spec| spec.kind() == kind)
    }

    /// Number of layers in the chain, including `self`.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Single-line description of this layer only.
    #[must_use]
    pub fn describe_layer(&self) -> String {
        let mut values = Vec::new();
        let attrs = self.attributes();
        if let Some(index) = attrs.index {
            values.push(format!("index: {index}"));
        }
        if let Some(offset) = attrs.start_offset {
            values.push(format!("start offset: {offset} (0x{offset:08x})"));
        }
        if let Some(location) = &attrs.location {
            values.push(format!("location: {location}"));
        }
        if values.is_empty() {
            self.kind().label().to_string()
        } else {
            format!("{}: {}", self.kind().label(), values.join(", "))
        }
    }
}

/// Chain rendering, physical source first: `OS(/img.raw) > PARTITION(/p1) > FS(/)`.
impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chain: Vec<&Self> = self.ancestors().collect();
        chain.reverse();
        for (i, spec) in chain.iter().enumerate() {
            if i > 0 {
                f.write_str(" > ")?;
            }
            f.write_str(spec.kind().label())?;
            let attrs = spec.attributes();
            let mut parts = Vec::new();
            if let Some(location) = &attrs.location {
                parts.push(location.clone());
            }
            if let Some(index) = attrs.index {
                parts.push(format!("#{index}"));
            }
            if let Some(offset) = attrs.start_offset {
                parts.push(format!("@{offset}"));
            }
            if !parts.is_empty() {
                write!(f, "({})", parts.join(" "))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathSpec({self})")
    }
}

impl Serialize for PathSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn partition(image: &PathSpec, n: u32) -> PathSpec {
        image.child(
            LayerKind::PartitionTable,
            Attributes::default()
                .with_location(format!("/p{}", n + 1))
                .with_index(n),
        )
    }

    #[test]
    fn structural_equality_over_chain() {
        let a = PathSpec::os("/images/disk.raw").child(LayerKind::StorageImage, Attributes::default());
        let b = PathSpec::os("/images/disk.raw").child(LayerKind::StorageImage, Attributes::default());
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));

        let other = PathSpec::os("/images/other.raw").child(LayerKind::StorageImage, Attributes::default());
        assert_ne!(b, other);
    }

    #[test]
    fn siblings_share_parent_instance() {
        let image = PathSpec::os("/disk.raw").child(LayerKind::StorageImage, Attributes::default());
        let p1 = partition(&image, 0);
        let p2 = partition(&image, 1);
        assert!(std::ptr::eq(
            p1.parent().unwrap().layer.as_ref(),
            p2.parent().unwrap().layer.as_ref()
        ));
        assert_ne!(p1, p2);
    }

    #[test]
    fn physical_source_has_no_parent() {
        let source = PathSpec::os("/dev/sda");
        assert!(source.is_physical());
        assert_eq!(source.depth(), 1);
        let fs = source.child(LayerKind::FileSystem, Attributes::default().with_location("/"));
        assert!(!fs.is_physical());
        assert_eq!(fs.depth(), 2);
    }

    #[test]
    fn nearest_finds_closest_layer() {
        let image = PathSpec::os("/disk.raw").child(LayerKind::StorageImage, Attributes::default());
        let p2 = partition(&image, 1);
        let fs = p2
            .child(LayerKind::EncryptedVolume, Attributes::default())
            .child(LayerKind::FileSystem, Attributes::default().with_location("/"));
        assert_eq!(
            fs.nearest(LayerKind::PartitionTable).and_then(PathSpec::location),
            Some("/p2")
        );
        assert!(fs.nearest(LayerKind::Snapshot).is_none());
    }

    #[test]
    fn sibling_keeps_parent() {
        let fs = PathSpec::os("/disk.raw")
            .child(LayerKind::FileSystem, Attributes::default().with_location("/"));
        let file = fs.sibling(
            LayerKind::FileSystem,
            Attributes::default().with_location("/passwords.txt"),
        );
        assert_eq!(file.parent(), fs.parent());
        assert_eq!(file.location(), Some("/passwords.txt"));
    }

    #[test]
    fn display_renders_chain_from_source() {
        let image = PathSpec::os("/disk.raw").child(LayerKind::StorageImage, Attributes::default());
        let fs = partition(&image, 0).child(
            LayerKind::FileSystem,
            Attributes::default().with_location("/"),
        );
        assert_eq!(
            fs.to_string(),
            "OS(/disk.raw) > IMAGE > PARTITION(/p1 #0) > FS(/)"
        );
    }

    #[test]
    fn describe_layer_lists_attributes() {
        let spec = PathSpec::os("/disk.raw").child(
            LayerKind::PartitionTable,
            Attributes::default()
                .with_location("/p1")
                .with_index(0)
                .with_start_offset(1_048_576),
        );
        assert_eq!(
            spec.describe_layer(),
            "PARTITION: index: 0, start offset: 1048576 (0x00100000), location: /p1"
        );
    }
}
