//! Scan tree reports for `layerhash analyze`.

#![allow(missing_docs)]

use std::fmt::Write as _;

use serde::Serialize;

use crate::backend::{SourceType, StorageBackend};
use crate::pathspec::{LayerKind, PathSpec};
use crate::scanner::context::ScanContext;

/// Serializable snapshot of a scan context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub source: PathSpec,
    pub source_type: Option<SourceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_step: Option<u64>,
    /// Pre-order, with depth for indentation.
    pub nodes: Vec<ReportNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportNode {
    pub depth: usize,
    pub layer: LayerKind,
    pub path_spec: PathSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// File-system format, when the backend can name it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub scanned: bool,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanReport {
    /// Capture `ctx`. With a backend, file-system nodes are annotated with
    /// their format.
    pub fn from_context(ctx: &ScanContext, backend: Option<&dyn StorageBackend>) -> Self {
        let nodes = ctx
            .preorder()
            .into_iter()
            .map(|id| {
                let node = ctx.node(id);
                let path_spec = node.path_spec().clone();
                let format = match (backend, path_spec.kind()) {
                    (Some(backend), LayerKind::FileSystem) => backend
                        .open_file_system(&path_spec)
                        .ok()
                        .map(|info| info.format),
                    _ => None,
                };
                let attrs = path_spec.attributes();
                ReportNode {
                    depth: ctx.depth(id),
                    layer: path_spec.kind(),
                    index: attrs.index,
                    start_offset: attrs.start_offset,
                    location: attrs.location.clone(),
                    format,
                    scanned: node.is_scanned(),
                    locked: node.is_locked(),
                    error: node.error().map(ToString::to_string),
                    path_spec,
                }
            })
            .collect();

        Self {
            source: ctx.source().clone(),
            source_type: ctx.source_type(),
            scan_step: None,
            nodes,
        }
    }

    #[must_use]
    pub const fn with_scan_step(mut self, step: u64) -> Self {
        self.scan_step = Some(step);
        self
    }

    /// Plain-text rendering, two spaces of indentation per layer:
    ///
    /// ```text
    /// Source type		: storage media image
    ///
    /// OS: location: /disk.raw
    ///   PARTITION: index: 0, location: /p1
    ///     FS: location: / [NTFS]
    /// ```
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if let Some(step) = self.scan_step {
            let _ = writeln!(out, "Scan step: {step}");
        }
        let source_type = self.source_type.map_or("unknown", SourceType::label);
        let _ = writeln!(out, "Source type\t\t: {source_type}");
        out.push('\n');

        for node in &self.nodes {
            let mut flags = Vec::new();
            if node.locked {
                flags.push("[LOCKED]".to_string());
            }
            if let Some(format) = &node.format {
                flags.push(format!("[{}]", format.to_uppercase()));
            }
            if node.error.is_some() {
                flags.push("[ERROR]".to_string());
            }

            let _ = write!(out, "{}{}", "  ".repeat(node.depth), node.path_spec.describe_layer());
            if !flags.is_empty() {
                let _ = write!(out, " {}", flags.join(" "));
            }
            if let Some(error) = &node.error {
                let _ = write!(out, " {error}");
            }
            out.push('\n');
        }
        out.push('\n');
        out
    }
}
