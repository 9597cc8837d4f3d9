//! Tool-run segmentation.
//!
//! A boundary is a line carrying the invocation marker in either the spaced
//! (`exec: virt-v2v [-v -x ...]`) or the no-space (`exec: virt-v2v[-v -x ...]`)
//! form. Each boundary starts a section that runs until the next boundary or
//! the end of input.

use crate::preprocess::command_marker_positions;
use crate::types::ToolKind;
use once_cell::sync::Lazy;
use regex::Regex;

static INVOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^exec:\s*([^\s\[\]]+)\s?\[(.*)\]\s*$").expect("valid invocation regex")
});

/// Markers used to guess the tool when no invocation line exists.
/// Most specific first; the general tool is the fallback.
const GUESS_MARKERS: &[(&str, ToolKind)] = &[
    ("virt-v2v-in-place", ToolKind::VirtV2vInPlace),
    ("virt-v2v-inspector", ToolKind::VirtV2vInspector),
    ("virt-customize", ToolKind::VirtCustomize),
    ("virt-win-reg", ToolKind::VirtWinReg),
    ("guestfish", ToolKind::Guestfish),
];

/// A detected tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    /// Index into the preprocessed lines
    pub index: usize,
    pub tool: ToolKind,
    /// Tool token followed by its bracketed arguments
    pub command_line: String,
}

/// A contiguous slice of lines handled by one section parser
#[derive(Debug, Clone)]
pub(crate) struct Section<'a> {
    /// Index of the first line in the preprocessed input
    pub start: usize,
    pub tool: ToolKind,
    pub command_line: String,
    pub lines: &'a [String],
}

/// Parse a single line as an invocation boundary.
pub fn parse_invocation(line: &str) -> Option<(ToolKind, String)> {
    let positions = command_marker_positions(line);
    let start = *positions.first()?;
    let caps = INVOCATION.captures(&line[start..])?;
    let token = caps.get(1)?.as_str();
    let tool = ToolKind::from_token(token)?;
    let args = caps.get(2).map_or("", |m| m.as_str()).trim();
    let command_line = if args.is_empty() {
        token.to_string()
    } else {
        format!("{token} {args}")
    };
    Some((tool, command_line))
}

/// Scan preprocessed lines for invocation boundaries.
pub fn detect_boundaries(lines: &[String]) -> Vec<Boundary> {
    lines
        .iter()
        .enumerate()
        .filter_map(|(index, line)| {
            parse_invocation(line).map(|(tool, command_line)| Boundary {
                index,
                tool,
                command_line,
            })
        })
        .collect()
}

/// Guess the tool from markers in the first `window` lines.
pub fn guess_tool_kind<S: AsRef<str>>(lines: &[S], window: usize) -> ToolKind {
    for line in lines.iter().take(window) {
        let lower = line.as_ref().to_ascii_lowercase();
        if let Some((_, tool)) = GUESS_MARKERS
            .iter()
            .find(|(marker, _)| lower.contains(marker))
        {
            return *tool;
        }
    }
    ToolKind::DEFAULT
}

/// Split preprocessed lines into independent sections.
///
/// Lines before the first boundary belong to no run. Without any boundary
/// the whole input is one section.
pub(crate) fn split_sections(lines: &[String], guess_window: usize) -> Vec<Section<'_>> {
    if lines.is_empty() {
        return Vec::new();
    }

    let boundaries = detect_boundaries(lines);
    if boundaries.is_empty() {
        return vec![Section {
            start: 0,
            tool: guess_tool_kind(lines, guess_window),
            command_line: String::new(),
            lines,
        }];
    }

    log::debug!("detected {} tool invocation boundaries", boundaries.len());

    boundaries
        .iter()
        .enumerate()
        .map(|(idx, boundary)| {
            let end = boundaries
                .get(idx + 1)
                .map_or(lines.len(), |next| next.index);
            Section {
                start: boundary.index,
                tool: boundary.tool,
                command_line: boundary.command_line.clone(),
                lines: &lines[boundary.index..end],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_spaced_and_unspaced_forms() {
        assert_eq!(
            parse_invocation("exec: /usr/bin/virt-v2v [-v -x -o local]"),
            Some((
                ToolKind::VirtV2v,
                "/usr/bin/virt-v2v -v -x -o local".to_string()
            ))
        );
        assert_eq!(
            parse_invocation("exec: virt-v2v-in-place[-i libvirtxml /tmp/x.xml]"),
            Some((
                ToolKind::VirtV2vInPlace,
                "virt-v2v-in-place -i libvirtxml /tmp/x.xml".to_string()
            ))
        );
    }

    #[test]
    fn ignores_monitor_and_unknown_tokens() {
        assert_eq!(parse_invocation("exec: virt-v2v-monitor []"), None);
        assert_eq!(parse_invocation("exec: /bin/bash [-c true]"), None);
        assert_eq!(parse_invocation("exec: virt-v2v -v"), None);
    }

    #[test]
    fn sections_run_until_next_boundary() {
        let lines = owned(&[
            "preamble",
            "exec: virt-v2v [-v]",
            "[   0.0] Setting up the source",
            "exec: virt-customize [-a d.img]",
            "tail",
        ]);
        let sections = split_sections(&lines, 20);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].start, 1);
        assert_eq!(sections[0].lines.len(), 2);
        assert_eq!(sections[1].tool, ToolKind::VirtCustomize);
        assert_eq!(sections[1].lines.len(), 2);
    }

    #[test]
    fn guesses_tool_without_boundaries() {
        let lines = owned(&["hello", "virt-v2v-in-place: warning: x"]);
        let sections = split_sections(&lines, 20);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].tool, ToolKind::VirtV2vInPlace);

        let plain = owned(&["nothing to see"]);
        assert_eq!(guess_tool_kind(&plain, 20), ToolKind::VirtV2v);
    }
}
