//! Base path spec selection: flattening a scan tree into hash roots.
//!
//! Partitions, volumes and snapshots are ambiguous layers: a source may hold
//! several and the operator picks which ones to hash. Each clause addresses
//! siblings of one kind by their 1-based discovery position.

#![allow(missing_docs)]

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::errors::{LhError, Result};
use crate::logger::ActivityLog;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::pathspec::{LayerKind, PathSpec};
use crate::scanner::context::{ScanContext, ScanNodeId};

/// One item of a selection list: `3` or `3..5`.
static SELECTION_ITEM: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\s*(?P<start>\d+)\s*(?:\.\.\s*(?P<end>\d+)\s*)?$"));

/// Which siblings of one ambiguous kind to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSelection {
    All,
    None,
    /// 1-based positions.
    Indices(BTreeSet<u32>),
}

impl VolumeSelection {
    /// Parse `all`, `none` or a comma-separated list of indices and
    /// inclusive ranges (`1,3..5`). `kind` names the clause in errors.
    pub fn parse(kind: &'static str, input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let parse_error = |details: String| LhError::SelectionParse {
            kind,
            input: input.to_string(),
            details,
        };

        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        if trimmed.eq_ignore_ascii_case("none") {
            return Ok(Self::None);
        }
        if trimmed.is_empty() {
            return Err(parse_error("empty selection".to_string()));
        }

        let item_pattern = SELECTION_ITEM.as_ref().map_err(|err| LhError::Runtime {
            details: format!("selection pattern: {err}"),
        })?;
        let mut indices = BTreeSet::new();
        for item in trimmed.split(',') {
            let captures = item_pattern
                .captures(item)
                .ok_or_else(|| parse_error(format!("malformed item {:?}", item.trim())))?;
            let start = parse_index(&captures["start"]).map_err(&parse_error)?;
            let end = match captures.name("end") {
                Some(end) => parse_index(end.as_str()).map_err(&parse_error)?,
                None => start,
            };
            if start > end {
                return Err(parse_error(format!("range {start}..{end} is descending")));
            }
            indices.extend(start..=end);
        }
        Ok(Self::Indices(indices))
    }

    /// Whether the sibling at 1-based `position` is selected.
    pub fn contains(&self, position: u32) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Indices(indices) => indices.contains(&position),
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Indices(_))
    }
}

fn parse_index(raw: &str) -> std::result::Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(0) => Err("indices are 1-based".to_string()),
        Ok(index) => Ok(index),
        Err(err) => Err(format!("index {raw:?}: {err}")),
    }
}

impl fmt::Display for VolumeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::None => f.write_str("none"),
            Self::Indices(indices) => {
                let parts: Vec<String> = indices.iter().map(u32::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// One selection clause per ambiguous layer kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionPolicy {
    pub partitions: VolumeSelection,
    pub snapshots: VolumeSelection,
    pub volumes: VolumeSelection,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            partitions: VolumeSelection::All,
            snapshots: VolumeSelection::None,
            volumes: VolumeSelection::All,
        }
    }
}

impl SelectionPolicy {
    /// Clause governing siblings of `kind`, with its name for messages.
    pub fn clause(&self, kind: LayerKind) -> Option<(&'static str, &VolumeSelection)> {
        match kind {
            LayerKind::PartitionTable => Some(("partition", &self.partitions)),
            LayerKind::Snapshot => Some(("snapshot", &self.snapshots)),
            LayerKind::VolumeManager => Some(("volume", &self.volumes)),
            _ => None,
        }
    }

    /// Children of `id` that survive the policy, in discovery order.
    pub fn selected_children(&self, ctx: &ScanContext, id: ScanNodeId) -> Vec<ScanNodeId> {
        let children = ctx.node(id).children();
        let has_snapshots = children
            .iter()
            .any(|&child| ctx.node(child).path_spec().kind() == LayerKind::Snapshot);
        let mut positions: HashMap<LayerKind, u32> = HashMap::new();

        children
            .iter()
            .copied()
            .filter(|&child| {
                let kind = ctx.node(child).path_spec().kind();
                if let Some((_, clause)) = self.clause(kind) {
                    let position = positions.entry(kind).or_insert(0);
                    *position += 1;
                    return clause.contains(*position);
                }
                // The live view sits beside the snapshots and is dropped
                // once specific snapshots are requested.
                if kind == LayerKind::FileSystem && has_snapshots {
                    return !self.snapshots.is_explicit();
                }
                true
            })
            .collect()
    }

    /// Reject explicit indices beyond the siblings actually discovered.
    ///
    /// An explicit clause for a kind the tree does not contain at all
    /// reports `available: 0`.
    pub fn validate_against(&self, ctx: &ScanContext) -> Result<()> {
        for kind in [LayerKind::PartitionTable, LayerKind::Snapshot, LayerKind::VolumeManager] {
            let Some((name, VolumeSelection::Indices(indices))) = self.clause(kind) else {
                continue;
            };
            let present = ctx
                .preorder()
                .into_iter()
                .any(|id| ctx.node(id).path_spec().kind() == kind);
            if present {
                continue;
            }
            if let Some(&index) = indices.first() {
                return Err(LhError::InvalidSelection {
                    kind: name,
                    index,
                    available: 0,
                });
            }
        }

        for id in ctx.preorder() {
            let mut available: HashMap<LayerKind, usize> = HashMap::new();
            for &child in ctx.node(id).children() {
                *available.entry(ctx.node(child).path_spec().kind()).or_insert(0) += 1;
            }
            for (kind, count) in available {
                let Some((name, VolumeSelection::Indices(indices))) = self.clause(kind) else {
                    continue;
                };
                if let Some(&index) = indices.iter().find(|&&index| index as usize > count) {
                    return Err(LhError::InvalidSelection {
                        kind: name,
                        index,
                        available: count,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Flatten a scan tree into base path specs, in discovery order.
///
/// Plain sources yield the source itself. Locked, failed and format-less
/// leaves yield nothing and are reported through `log`.
pub fn select_base_path_specs(
    ctx: &ScanContext,
    policy: &SelectionPolicy,
    log: &ActivityLog,
) -> Result<Vec<PathSpec>> {
    let (Some(source_type), Some(root)) = (ctx.source_type(), ctx.root()) else {
        return Err(LhError::Runtime {
            details: "scan context has not been scanned".to_string(),
        });
    };
    policy.validate_against(ctx)?;
    if source_type.is_plain() {
        return Ok(vec![ctx.source().clone()]);
    }

    let mut base_path_specs = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let node = ctx.node(id);
        let path_spec = node.path_spec();

        if path_spec.kind() == LayerKind::FileSystem {
            base_path_specs.push(path_spec.clone());
            continue;
        }

        let reason = if node.is_locked() {
            Some("layer is locked")
        } else if node.error().is_some() {
            Some("layer could not be scanned")
        } else if node.children().is_empty() {
            Some("no file system found")
        } else {
            None
        };
        if let Some(reason) = reason {
            log.warn("SCANNER", format_args!("skipping {path_spec}: {reason}"));
            let mut entry = LogEntry::new(EventType::BasePathSpecSkipped, Severity::Warning)
                .with_path_spec(path_spec)
                .with_details(reason);
            if let Some(error) = node.error() {
                entry.error_message = Some(error.to_string());
            }
            log.record(&entry);
            continue;
        }

        let selected = policy.selected_children(ctx, id);
        stack.extend(selected.into_iter().rev());
    }
    Ok(base_path_specs)
}
