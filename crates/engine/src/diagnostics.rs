//! Error/warning extraction and end-of-run outcome inference.
//!
//! Both are heuristics over free-form text. A line counts as an issue when
//! it carries an `error:` / `warning:` cue and is not on the false-positive
//! allow-list; its source is taken from the leading `component:` prefix.

use crate::preprocess::TRACE_MARKER;
use crate::types::{ExitStatus, IssueSource, LogIssue, PipelineStage, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

static ERROR_CUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:error|fatal)\s*:").expect("valid error regex"));
static WARNING_CUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwarning\s*:").expect("valid warning regex"));
static PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][\w.-]*)(?:\[\d+\])?:").expect("valid prefix regex"));
static TERMINAL_STAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^finishing off\b").expect("valid terminal stage regex"));
static FINISHED_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bmonitoring:\s*finished\b").expect("valid finished regex"));

/// Lines that look like diagnostics but are not.
static FALSE_POSITIVES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Kernel ring-buffer timestamps during appliance boot
        r"^\[\s*\d+\.\d{3,}\]",
        // Failed-call sentinels inside trace output
        r#""\(error\)""#,
        r"=\s*-?\d*\s*\(error\)\s*$",
        // fstab mount options and counters
        r"\berrors=(?:remount-ro|continue|panic)\b",
        r"\berror(?:_count)?\s*=\s*0\b",
        r"(?i)\bno errors?:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid allow-list regex"))
    .collect()
});

const TOOL_PREFIXES: &[&str] = &[
    "virt-v2v",
    "virt-v2v-in-place",
    "virt-v2v-inspector",
    "virt-customize",
    "virt-win-reg",
    "guestfish",
];
const APPLIANCE_PREFIXES: &[&str] = &["libguestfs", "guestfsd", "supermin", "febootstrap"];
const STORAGE_PREFIXES: &[&str] = &["nbdkit", "qemu-nbd", "qemu-img", "nbdcopy", "libnbd", "vddk"];
const GUEST_PREFIXES: &[&str] = &["command", "commandrvf", "chroot"];

/// Classify a line as an error or warning, if it is one.
pub(crate) fn classify_issue(line: &str) -> Option<(Severity, IssueSource)> {
    if line.starts_with(TRACE_MARKER) {
        return None;
    }

    let severity = if ERROR_CUE.is_match(line) {
        Severity::Error
    } else if WARNING_CUE.is_match(line) {
        Severity::Warning
    } else {
        return None;
    };

    if FALSE_POSITIVES.iter().any(|re| re.is_match(line)) {
        return None;
    }

    Some((severity, issue_source(line)))
}

/// Build a full issue record for a line.
pub(crate) fn extract_issue(line: &str, number: usize) -> Option<LogIssue> {
    let (severity, source) = classify_issue(line)?;
    let message = line.trim().to_string();
    let fatal = severity == Severity::Error
        && source == IssueSource::Tool
        && !message.ends_with("(ignored)");
    Some(LogIssue {
        severity,
        source,
        message,
        line: number,
        fatal,
    })
}

fn issue_source(line: &str) -> IssueSource {
    let Some(prefix) = PREFIX
        .captures(line.trim_start())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
    else {
        return IssueSource::Other;
    };

    if TOOL_PREFIXES.contains(&prefix.as_str()) {
        IssueSource::Tool
    } else if APPLIANCE_PREFIXES.contains(&prefix.as_str()) || prefix.starts_with("qemu-system") {
        IssueSource::Appliance
    } else if STORAGE_PREFIXES.contains(&prefix.as_str()) {
        IssueSource::Storage
    } else if GUEST_PREFIXES.contains(&prefix.as_str()) {
        IssueSource::Guest
    } else {
        IssueSource::Other
    }
}

pub(crate) fn is_terminal_stage(name: &str) -> bool {
    TERMINAL_STAGE.is_match(name.trim())
}

pub(crate) fn is_finished_marker(line: &str) -> bool {
    FINISHED_MARKER.is_match(line)
}

/// Infer the outcome of a run.
///
/// Precedence: a fatal tool error wins, then a terminal stage or finished
/// marker, then "stages but no terminal signal", then unknown.
pub(crate) fn infer_exit_status(
    stages: &[PipelineStage],
    issues: &[LogIssue],
    finished_marker: Option<usize>,
) -> ExitStatus {
    if issues.iter().any(|issue| issue.fatal) {
        return ExitStatus::Error;
    }

    let terminal = finished_marker.is_some() || stages.iter().any(|s| is_terminal_stage(&s.name));
    if terminal {
        ExitStatus::Success
    } else if !stages.is_empty() {
        ExitStatus::InProgress
    } else {
        ExitStatus::Unknown
    }
}
