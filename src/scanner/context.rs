//! Scan context: the arena of scan nodes discovered beneath one source.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use serde::Serialize;

use crate::backend::SourceType;
use crate::pathspec::{LayerKind, PathSpec};

/// Handle of a node in a [`ScanContext`]; valid for the context's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScanNodeId(usize);

impl ScanNodeId {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One discovered layer.
#[derive(Debug, Clone)]
pub struct ScanNode {
    path_spec: PathSpec,
    parent: Option<ScanNodeId>,
    children: Vec<ScanNodeId>,
    pub(crate) scanned: bool,
    pub(crate) locked: bool,
    pub(crate) error: Option<String>,
}

impl ScanNode {
    pub fn path_spec(&self) -> &PathSpec {
        &self.path_spec
    }

    pub fn parent(&self) -> Option<ScanNodeId> {
        self.parent
    }

    /// Children in discovery order.
    pub fn children(&self) -> &[ScanNodeId] {
        &self.children
    }

    /// Whether the layer beneath this node has been probed.
    pub fn is_scanned(&self) -> bool {
        self.scanned
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Probe failure recorded on this node, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Per-invocation scan state.
#[derive(Debug, Clone)]
pub struct ScanContext {
    source: PathSpec,
    source_type: Option<SourceType>,
    nodes: Vec<ScanNode>,
    root: Option<ScanNodeId>,
    locked: BTreeSet<ScanNodeId>,
    pub(crate) updated: bool,
}

impl ScanContext {
    pub fn new(source: PathSpec) -> Self {
        Self {
            source,
            source_type: None,
            nodes: Vec::new(),
            root: None,
            locked: BTreeSet::new(),
            updated: false,
        }
    }

    pub fn source(&self) -> &PathSpec {
        &self.source
    }

    /// Detected on the first scan call.
    pub fn source_type(&self) -> Option<SourceType> {
        self.source_type
    }

    pub fn root(&self) -> Option<ScanNodeId> {
        self.root
    }

    /// Whether the last scan call added nodes or changed node state.
    pub fn updated(&self) -> bool {
        self.updated
    }

    /// Node behind a handle issued by this context.
    ///
    /// # Panics
    /// If `id` came from a different context holding more nodes. Use
    /// [`ScanContext::get`] for handles of unknown origin.
    pub fn node(&self, id: ScanNodeId) -> &ScanNode {
        &self.nodes[id.0]
    }

    /// Node behind `id`, or `None` if this context never issued it.
    pub fn get(&self, id: ScanNodeId) -> Option<&ScanNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that are locked and not yet unlocked, in discovery order.
    pub fn locked_scan_nodes(&self) -> impl Iterator<Item = ScanNodeId> + '_ {
        self.locked.iter().copied()
    }

    pub fn has_locked_nodes(&self) -> bool {
        !self.locked.is_empty()
    }

    /// Node whose path spec equals `path_spec`.
    pub fn find(&self, path_spec: &PathSpec) -> Option<ScanNodeId> {
        self.nodes
            .iter()
            .position(|node| &node.path_spec == path_spec)
            .map(ScanNodeId)
    }

    /// All node handles in depth-first pre-order from the root.
    pub fn preorder(&self) -> Vec<ScanNodeId> {
        self.preorder_from(self.root)
    }

    /// Handles of the subtree rooted at `start`, pre-order.
    pub fn preorder_from(&self, start: Option<ScanNodeId>) -> Vec<ScanNodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<ScanNodeId> = start.into_iter().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.iter().rev().copied());
        }
        order
    }

    /// First node in pre-order that still needs probing.
    ///
    /// Locked and failed nodes do not count: they make no progress until
    /// unlocked.
    pub fn unscanned_node(&self) -> Option<ScanNodeId> {
        self.preorder().into_iter().find(|&id| {
            let node = self.node(id);
            !node.scanned && !node.locked && node.error.is_none()
        })
    }

    /// Number of nodes between `id` and the root.
    pub fn depth(&self, id: ScanNodeId) -> usize {
        std::iter::successors(self.node(id).parent, |&parent| self.node(parent).parent).count()
    }

    // ──────────────────── mutation (scanner only) ────────────────────

    pub(crate) fn set_source_type(&mut self, source_type: SourceType) {
        self.source_type = Some(source_type);
    }

    /// Append a node. File-system layers are leaves and start out scanned.
    pub(crate) fn add_node(&mut self, path_spec: PathSpec, parent: Option<ScanNodeId>) -> ScanNodeId {
        let id = ScanNodeId(self.nodes.len());
        let scanned = path_spec.kind() == LayerKind::FileSystem;
        self.nodes.push(ScanNode {
            path_spec,
            parent,
            children: Vec::new(),
            scanned,
            locked: false,
            error: None,
        });
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.root = Some(id),
        }
        self.updated = true;
        id
    }

    pub(crate) fn node_mut(&mut self, id: ScanNodeId) -> &mut ScanNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn mark_locked(&mut self, id: ScanNodeId) {
        self.nodes[id.0].locked = true;
        self.locked.insert(id);
        self.updated = true;
    }

    pub(crate) fn mark_unlocked(&mut self, id: ScanNodeId) {
        self.nodes[id.0].locked = false;
        self.locked.remove(&id);
        self.updated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathspec::Attributes;

    fn partition(parent: &PathSpec, index: u32) -> PathSpec {
        parent.child(
            LayerKind::PartitionTable,
            Attributes::default()
                .with_index(index)
                .with_location(format!("/p{}", index + 1)),
        )
    }

    #[test]
    fn arena_tracks_parent_and_children() {
        let source = PathSpec::os("/disk.raw");
        let mut ctx = ScanContext::new(source.clone());
        let root = ctx.add_node(source.clone(), None);
        let p1 = ctx.add_node(partition(&source, 0), Some(root));
        let p2 = ctx.add_node(partition(&source, 1), Some(root));

        assert_eq!(ctx.root(), Some(root));
        assert_eq!(ctx.node(root).children(), [p1, p2]);
        assert_eq!(ctx.node(p2).parent(), Some(root));
        assert_eq!(ctx.depth(p2), 1);
        assert_eq!(ctx.find(&partition(&source, 1)), Some(p2));
        assert_eq!(ctx.preorder(), [root, p1, p2]);
    }

    #[test]
    fn foreign_handle_is_none_through_get() {
        let source = PathSpec::os("/disk.raw");
        let mut large = ScanContext::new(source.clone());
        let root = large.add_node(source.clone(), None);
        let p2 = large.add_node(partition(&source, 1), Some(root));

        let mut small = ScanContext::new(source.clone());
        small.add_node(source.clone(), None);
        assert!(small.get(p2).is_none());
        assert_eq!(small.get(root).map(ScanNode::path_spec), Some(&source));
    }

    #[test]
    #[should_panic]
    fn foreign_handle_panics_through_node() {
        let source = PathSpec::os("/disk.raw");
        let mut large = ScanContext::new(source.clone());
        let root = large.add_node(source.clone(), None);
        let p2 = large.add_node(partition(&source, 1), Some(root));

        let small = ScanContext::new(source);
        let _ = small.node(p2);
    }

    #[test]
    fn file_system_nodes_start_scanned() {
        let source = PathSpec::os("/disk.raw");
        let mut ctx = ScanContext::new(source.clone());
        let root = ctx.add_node(source.clone(), None);
        let fs = ctx.add_node(
            source.child(LayerKind::FileSystem, Attributes::default().with_location("/")),
            Some(root),
        );
        assert!(ctx.node(fs).is_scanned());
        assert!(!ctx.node(root).is_scanned());
        assert_eq!(ctx.unscanned_node(), Some(root));
    }

    #[test]
    fn locked_set_follows_flags() {
        let source = PathSpec::os("/disk.raw");
        let mut ctx = ScanContext::new(source.clone());
        let root = ctx.add_node(source.clone(), None);
        let bde = ctx.add_node(
            source.child(LayerKind::EncryptedVolume, Attributes::default()),
            Some(root),
        );
        ctx.node_mut(root).scanned = true;

        ctx.mark_locked(bde);
        assert!(ctx.node(bde).is_locked());
        assert_eq!(ctx.locked_scan_nodes().collect::<Vec<_>>(), [bde]);
        assert_eq!(ctx.unscanned_node(), None);

        ctx.mark_unlocked(bde);
        assert!(!ctx.has_locked_nodes());
        assert_eq!(ctx.unscanned_node(), Some(bde));
    }

    #[test]
    fn unscanned_node_skips_failed_nodes() {
        let source = PathSpec::os("/disk.raw");
        let mut ctx = ScanContext::new(source.clone());
        let root = ctx.add_node(source.clone(), None);
        let p1 = ctx.add_node(partition(&source, 0), Some(root));
        let p2 = ctx.add_node(partition(&source, 1), Some(root));
        ctx.node_mut(root).scanned = true;
        ctx.node_mut(p1).error = Some("[LH-2002] corrupt".to_string());
        assert_eq!(ctx.unscanned_node(), Some(p2));
    }
}
