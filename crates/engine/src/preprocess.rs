//! Line normalisation ahead of boundary detection.
//!
//! Concurrent writers inside the conversion pod interleave output without
//! line discipline, so a single physical line may carry several logical
//! lines. Every rule here only ever splits, never merges, which keeps the
//! output at least as long as the input and makes the pass idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

/// Literal that introduces a tool invocation (`exec: virt-v2v [...]`)
pub(crate) const COMMAND_MARKER: &str = "exec:";

/// Literal that introduces an appliance trace line
pub(crate) const TRACE_MARKER: &str = "libguestfs: trace: ";

static TIMESTAMP_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})\s+")
        .expect("valid timestamp regex")
});

/// Normalise raw lines: strip timestamps and split interleaved writes.
///
/// The output is never shorter than the input and re-running the pass on
/// its own output finds nothing further to split.
pub fn preprocess_lines<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len());
    for line in raw {
        preprocess_line(line.as_ref(), &mut out);
    }
    out
}

/// Normalise one physical line into one or more logical lines.
pub(crate) fn preprocess_line(raw: &str, out: &mut Vec<String>) {
    let line = strip_timestamp(raw.trim_end_matches('\r'));
    for piece in split_command_markers(line) {
        split_trace_markers(piece, out);
    }
}

/// Strip every leading timestamp; nested wrappers can stamp a line twice.
fn strip_timestamp(mut line: &str) -> &str {
    while let Some(m) = TIMESTAMP_PREFIX.find(line) {
        line = &line[m.end()..];
    }
    line
}

/// Byte offsets of command markers that start a token (not `reexec:` etc).
pub(crate) fn command_marker_positions(line: &str) -> Vec<usize> {
    line.match_indices(COMMAND_MARKER)
        .map(|(pos, _)| pos)
        .filter(|&pos| {
            line[..pos]
                .chars()
                .next_back()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '-' || c == '_'))
        })
        .collect()
}

fn split_command_markers(line: &str) -> Vec<&str> {
    let positions = command_marker_positions(line);
    if positions.len() < 2 {
        return vec![line];
    }

    let mut pieces = Vec::with_capacity(positions.len() + 1);
    let prefix = &line[..positions[0]];
    if !prefix.trim().is_empty() {
        pieces.push(prefix.trim_end());
    }
    for (idx, &start) in positions.iter().enumerate() {
        let end = positions.get(idx + 1).copied().unwrap_or(line.len());
        pieces.push(line[start..end].trim_end());
    }
    pieces
}

fn split_trace_markers(line: &str, out: &mut Vec<String>) {
    let mut rest = line;
    loop {
        // A well-formed trace line is allowed one marker, at its start.
        let search_from = if rest.starts_with(TRACE_MARKER) {
            TRACE_MARKER.len()
        } else {
            0
        };
        match rest[search_from..].find(TRACE_MARKER) {
            Some(rel) => {
                let pos = search_from + rel;
                let head = &rest[..pos];
                if !head.trim().is_empty() {
                    out.push(head.trim_end().to_string());
                }
                rest = &rest[pos..];
            }
            None => {
                out.push(rest.to_string());
                return;
            }
        }
    }
}
