//! Display paths for hash records.

use std::fmt::Write as _;

use crate::pathspec::{LayerKind, PathSpec};

/// Render the path shown next to a digest.
///
/// `segments` are the entry names from the file-system root down; a
/// file-system root contributes an empty first segment so that its children
/// render as `/name`. Paths inside a partition are prefixed with the
/// partition location, e.g. `/p1/Windows/notepad.exe`.
pub fn format_display_path(path_spec: &PathSpec, segments: &[String], stream: &str) -> String {
    let mut display = path_spec
        .nearest(LayerKind::PartitionTable)
        .and_then(PathSpec::location)
        .unwrap_or_default()
        .to_string();

    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            display.push('/');
        }
        escape_into(&mut display, segment);
    }
    if !stream.is_empty() {
        display.push(':');
        escape_into(&mut display, stream);
    }

    if display.is_empty() {
        display.push('/');
    }
    display
}

/// Escape C0 and C1 control characters as `\xHH`.
pub fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    escape_into(&mut escaped, segment);
    escaped
}

fn escape_into(out: &mut String, segment: &str) {
    for c in segment.chars() {
        if is_control(c) {
            let _ = write!(out, "\\x{:02x}", u32::from(c));
        } else {
            out.push(c);
        }
    }
}

const fn is_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{1f}' | '\u{7f}'..='\u{9f}')
}
