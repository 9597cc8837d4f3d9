//! # Loglens Engine
//!
//! Reconstructs structured tool runs from the verbose diagnostic logs of the
//! virt-v2v tool family (virt-v2v, virt-v2v-in-place, virt-v2v-inspector,
//! virt-customize, guestfish, virt-win-reg).
//!
//! ## Philosophy
//!
//! Best-effort reconstruction, not validation:
//! - Unrecognised lines contribute nothing and are never an error
//! - Correlation misses degrade to a fallback host instead of dropping data
//! - Any failure at the top degrades to an empty, well-typed result
//!
//! ## Architecture
//!
//! ```text
//! Log text
//!     │
//!     ├──> Pre-check (header markers in the first few KiB)
//!     │
//!     ├──> Preprocess (timestamps, glued writes) → logical lines
//!     │
//!     ├──> Boundary detection → sections, one per tool invocation
//!     │
//!     └──> Section parsing (sequential or on the rayon pool)
//!          ├─> Stages, progress, versions, storage connections
//!          ├─> Appliance calls with nested guest commands
//!          ├─> Registry hive sessions and file copies
//!          ├─> Guest inspection, source VM, issues
//!          └─> ToolRun with inferred exit status
//! ```
//!
//! ## Example
//!
//! ```rust
//! use loglens_engine::{parse_log, ExitStatus, ToolKind};
//!
//! let log = "\
//! exec: virt-v2v [-i libvirtxml guest.xml -o local -os /var/tmp]
//! [   0.0] Setting up the source
//! [   5.2] Finishing off
//! ";
//!
//! let result = parse_log(log);
//! assert_eq!(result.total_lines, 3);
//! let run = &result.runs[0];
//! assert_eq!(run.tool, ToolKind::VirtV2v);
//! assert_eq!(run.exit_status, ExitStatus::Success);
//! assert_eq!(run.stages.len(), 2);
//! ```

mod boundary;
mod calls;
mod category;
mod config;
mod connections;
mod diagnostics;
mod domain;
mod error;
mod file_copy;
mod guest;
mod guest_info;
mod preprocess;
mod registry;
mod section;
mod trace;
mod types;
mod versions;

pub use boundary::{detect_boundaries, guess_tool_kind, parse_invocation, Boundary};
pub use config::ParserConfig;
pub use error::{LogError, Result};
pub use preprocess::preprocess_lines;
pub use registry::decode_registry_value;
pub use types::*;
pub use versions::format_packed_version;

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

/// Characters inspected by the binary-content check
const BINARY_PROBE_CHARS: usize = 8 * 1024;

/// Share of control or undecodable characters that marks input as binary
const MAX_CONTROL_RATIO: f64 = 0.10;

static HEADER_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)(?:\bexec:\s*\S*virt-(?:v2v|customize|win-reg)|^libguestfs: |^guestfsd: |^virt-v2v(?:-in-place|-inspector)?: |^virt-customize: |\[\s*\d+\.\d\] Setting up the source|^guestfish: )",
    )
    .expect("valid header marker regex")
});

/// Parse a log with the default configuration. Never fails.
pub fn parse_log(content: &str) -> ParseResult {
    parse_log_with(content, &ParserConfig::default())
}

/// Parse a log with an explicit configuration. Never fails: any error or
/// panic inside the engine yields [`ParseResult::empty`].
pub fn parse_log_with(content: &str, config: &ParserConfig) -> ParseResult {
    guarded(|| try_parse_log(content, config))
}

/// Parse raw bytes with the default configuration. Never fails.
pub fn parse_log_bytes(bytes: &[u8]) -> ParseResult {
    parse_log_bytes_with(bytes, &ParserConfig::default())
}

/// Parse raw bytes; invalid UTF-8 is decoded lossily and then subject to
/// the binary-content check.
pub fn parse_log_bytes_with(bytes: &[u8], config: &ParserConfig) -> ParseResult {
    guarded(|| try_parse_log(&String::from_utf8_lossy(bytes), config))
}

/// Read and parse a log file. Only I/O errors are returned; parse failures
/// degrade to an empty result like every other entry point.
pub fn parse_log_file(path: impl AsRef<Path>, config: &ParserConfig) -> Result<ParseResult> {
    let bytes = std::fs::read(path.as_ref())?;
    Ok(parse_log_bytes_with(&bytes, config))
}

/// Fallible parse. Errors are returned instead of being converted to an
/// empty result; panics are not caught here.
pub fn try_parse_log(content: &str, config: &ParserConfig) -> Result<ParseResult> {
    config.validate().map_err(LogError::invalid_config)?;
    check_text(content)?;

    let raw: Vec<&str> = content.lines().collect();
    if raw.len() > config.max_input_lines {
        return Err(LogError::InputTooLarge {
            lines: raw.len(),
            limit: config.max_input_lines,
        });
    }

    let lines = preprocess::preprocess_lines(&raw);
    let sections = boundary::split_sections(&lines, config.tool_guess_window);
    log::debug!(
        "{} raw lines, {} after preprocessing, {} sections",
        raw.len(),
        lines.len(),
        sections.len()
    );

    let runs = if config.parallel_sections && sections.len() > 1 {
        parse_parallel(&sections, config)
    } else {
        sections
            .iter()
            .map(|section| section::parse_section(section, config))
            .collect()
    };

    Ok(ParseResult {
        total_lines: lines.len(),
        runs,
    })
}

/// Decide from the head of a blob whether this engine should handle it.
pub fn is_v2v_log(head: &str) -> bool {
    is_v2v_log_with(head, &ParserConfig::default())
}

/// Pre-check that inspects at most `config.precheck_bytes` bytes.
pub fn is_v2v_log_with(head: &str, config: &ParserConfig) -> bool {
    let mut end = head.len().min(config.precheck_bytes);
    while !head.is_char_boundary(end) {
        end -= 1;
    }
    HEADER_MARKERS.is_match(&head[..end])
}

/// Tool kind of the first invocation in the content, or a guess from the
/// leading lines when there is none.
pub fn detect_tool_kind(content: &str) -> ToolKind {
    let window = ParserConfig::default().tool_guess_window;
    let mut head = Vec::with_capacity(window);
    for raw in content.lines() {
        let mut logical = Vec::new();
        preprocess::preprocess_line(raw, &mut logical);
        for line in logical {
            if let Some((tool, _)) = parse_invocation(&line) {
                return tool;
            }
            if head.len() < window {
                head.push(line);
            }
        }
    }
    guess_tool_kind(&head, window)
}

/// Parse sections on the rayon pool; `collect` keeps boundary order. A
/// panic inside a section is re-raised here and caught by [`guarded`].
fn parse_parallel(sections: &[boundary::Section<'_>], config: &ParserConfig) -> Vec<ToolRun> {
    sections
        .par_iter()
        .map(|section| section::parse_section(section, config))
        .collect()
}

/// Reject content that is not text: NUL bytes, or too many control and
/// replacement characters near the start.
fn check_text(content: &str) -> Result<()> {
    let mut total = 0usize;
    let mut suspicious = 0usize;
    for c in content.chars().take(BINARY_PROBE_CHARS) {
        if c == '\0' {
            return Err(LogError::binary("NUL character in input"));
        }
        total += 1;
        if c == char::REPLACEMENT_CHARACTER || (c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            suspicious += 1;
        }
    }

    if total > 0 && suspicious as f64 / total as f64 > MAX_CONTROL_RATIO {
        return Err(LogError::binary(format!(
            "{suspicious} of the first {total} characters are control or undecodable"
        )));
    }
    Ok(())
}

fn guarded<F>(parse: F) -> ParseResult
where
    F: FnOnce() -> Result<ParseResult>,
{
    match catch_unwind(AssertUnwindSafe(parse)) {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            log::warn!("log not parsed, returning empty result: {err}");
            ParseResult::empty()
        }
        Err(panic) => {
            log::error!(
                "log parser panicked, returning empty result: {}",
                panic_message(panic.as_ref())
            );
            ParseResult::empty()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn binary_content_is_rejected() {
        assert!(matches!(
            check_text("abc\0def"),
            Err(LogError::BinaryContent(_))
        ));
        let noisy: String = std::iter::repeat("\u{1}\u{2}ab").take(100).collect();
        assert!(check_text(&noisy).is_err());
        assert!(check_text("plain\ttext\r\nlines\n").is_ok());
    }

    #[test]
    fn guard_converts_errors_and_panics() {
        assert_eq!(guarded(|| Err(LogError::binary("x"))), ParseResult::empty());
        assert_eq!(guarded(|| panic!("boom")), ParseResult::empty());
    }

    #[test]
    fn panic_on_the_pool_reaches_the_guard() {
        let result = guarded(|| {
            let counts: Vec<usize> = (0..8usize)
                .into_par_iter()
                .map(|i| if i == 5 { panic!("section {i} failed") } else { i })
                .collect();
            Ok(ParseResult {
                total_lines: counts.len(),
                runs: Vec::new(),
            })
        });
        assert_eq!(result, ParseResult::empty());
    }

    #[test]
    fn parallel_sections_keep_boundary_order() {
        let log: String = (0..12)
            .map(|i| format!("exec: virt-v2v [-os /var/tmp/{i}]\n[   {i}.0] Setting up the source\n"))
            .collect();
        let config = ParserConfig {
            parallel_sections: true,
            ..Default::default()
        };
        let result = try_parse_log(&log, &config).unwrap();
        let starts: Vec<usize> = result.runs.iter().map(|r| r.start_line).collect();
        assert_eq!(starts, (0..12).map(|i| i * 2 + 1).collect::<Vec<_>>());
        assert_eq!(result, try_parse_log(&log, &ParserConfig::default()).unwrap());
    }

    #[test]
    fn oversized_input_is_an_error() {
        let config = ParserConfig {
            max_input_lines: 2,
            ..Default::default()
        };
        let err = try_parse_log("a\nb\nc\n", &config).unwrap_err();
        assert!(matches!(err, LogError::InputTooLarge { lines: 3, limit: 2 }));
        assert!(parse_log_with("a\nb\nc\n", &config).is_empty());
    }

    #[test]
    fn precheck_looks_at_header_markers() {
        assert!(is_v2v_log("exec: /usr/bin/virt-v2v [-v -x]\n"));
        assert!(is_v2v_log("info: starting\nlibguestfs: launch: program=virt-v2v\n"));
        assert!(!is_v2v_log("apiVersion: forklift.konveyor.io/v1beta1\nkind: Plan\n"));

        let config = ParserConfig {
            precheck_bytes: 8,
            ..Default::default()
        };
        assert!(!is_v2v_log_with("padding padding\nlibguestfs: x", &config));
    }

    #[test]
    fn detects_first_invocation_tool() {
        assert_eq!(
            detect_tool_kind("noise\nexec: virt-customize [-a d.img]\nexec: virt-v2v [-v]"),
            ToolKind::VirtCustomize
        );
        assert_eq!(detect_tool_kind("guestfish: ready"), ToolKind::Guestfish);
        assert_eq!(detect_tool_kind(""), ToolKind::VirtV2v);
    }
}
