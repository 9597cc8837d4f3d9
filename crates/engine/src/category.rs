use crate::diagnostics::classify_issue;
use crate::preprocess::TRACE_MARKER;
use crate::types::{LineCategory, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

static BOOT_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\[\s*\d+\.\d{3,}\]|SeaBIOS|iPXE|Booting from |Probing EDD|supermin:|\[\s*OK\s*\])")
        .expect("valid boot noise regex")
});
static STAGE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\s*\d+\.\d\]\s+\S").expect("valid stage header regex"));
static APPLIANCE_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^libguestfs: command:").expect("valid appliance command regex"));
static STORAGE_TOOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:nbdkit|qemu-nbd|nbdcopy)\b|(?i:running (?:nbdkit|qemu-nbd))|\s*LANG=C '?(?:nbdkit|qemu-nbd))")
        .expect("valid storage tool regex")
});
static QUOTED_ARGUMENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+(?:LANG=C\s+)?'").expect("valid quoted arguments regex"));
static GUEST_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:command|commandrvf|chroot|guestfsd):").expect("valid guest command regex")
});
static PROGRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:completed\s+\d+(?:\.\d+)?\s*%|copying disk \d+\s*(?:of|/)\s*\d+|\(\s*\d+(?:\.\d+)?/100%\))")
        .expect("valid progress regex")
});
static MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*</?[A-Za-z?!]").expect("valid markup regex"));
static INFO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:info:|libguestfs:|virt-[\w-]+:|guestfish:|i_\w+ = |fs: )")
        .expect("valid info regex")
});

/// Ordered category rules; first match wins.
///
/// Boot noise is evaluated before stage headers because both use the
/// bracketed-seconds shape.
static RULES: &[(LineCategory, fn(&str) -> bool)] = &[
    (LineCategory::BootNoise, |l| BOOT_NOISE.is_match(l)),
    (LineCategory::StageHeader, |l| STAGE_HEADER.is_match(l)),
    (LineCategory::ApplianceTrace, |l| l.starts_with(TRACE_MARKER)),
    (LineCategory::ApplianceCommand, |l| APPLIANCE_COMMAND.is_match(l)),
    (LineCategory::Error, |l| {
        matches!(classify_issue(l), Some((Severity::Error, _)))
    }),
    (LineCategory::Warning, |l| {
        matches!(classify_issue(l), Some((Severity::Warning, _)))
    }),
    (LineCategory::StorageTool, |l| STORAGE_TOOL.is_match(l)),
    (LineCategory::GuestCommand, |l| GUEST_COMMAND.is_match(l)),
    (LineCategory::Progress, |l| PROGRESS.is_match(l)),
    (LineCategory::Markup, |l| MARKUP.is_match(l)),
    (LineCategory::Info, |l| INFO.is_match(l)),
];

/// Assign exactly one display category to a line.
pub(crate) fn categorize(line: &str) -> LineCategory {
    RULES
        .iter()
        .find(|(_, matches)| matches(line))
        .map_or(LineCategory::Other, |(category, _)| *category)
}

/// Storage-tool lines continue an open connection block. Indented lines
/// only count when they carry the quoted argument vector of the command.
pub(crate) fn is_storage_line(line: &str) -> bool {
    STORAGE_TOOL.is_match(line) || QUOTED_ARGUMENTS.is_match(line)
}
