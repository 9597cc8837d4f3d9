//! Single-pass parser for one tool-run section.
//!
//! ```text
//!   line ──► categorize ──► stdout capture? ──► LogLine buffer
//!              │
//!              ├─► host command accumulator
//!              ├─► stages / disk progress / versions
//!              ├─► domain capture ──────────────► SourceVm
//!              ├─► storage connections
//!              ├─► trace dispatch ─┬─► CallCorrelator ─► ApiCall tree
//!              │                   ├─► HiveTracker ────► RegistryHiveAccess
//!              │                   └─► CopyPairer ─────► FileCopy
//!              ├─► guest lines ────► CallCorrelator (scopes, commands)
//!              ├─► guest inspection table
//!              └─► issues / finished marker
//! ```
//!
//! Every tracker keeps its own state; [`SectionParser::finalize`] is the
//! single place where pending state is flushed into the [`ToolRun`].

use crate::boundary::Section;
use crate::calls::{CallCorrelator, CorrelatedCalls};
use crate::category::categorize;
use crate::config::ParserConfig;
use crate::connections::ConnectionTracker;
use crate::diagnostics::{extract_issue, infer_exit_status, is_finished_marker};
use crate::domain::DomainCapture;
use crate::file_copy::CopyPairer;
use crate::guest::{parse_guest_line, split_shell_words, GuestLine};
use crate::guest_info::GuestInfoBuilder;
use crate::registry::{installed_apps, HiveTracker};
use crate::trace::{parse_trace, TraceLine};
use crate::types::{
    DiskProgress, DiskSummary, HostCommand, LineCategory, LogIssue, LogLine, PipelineStage,
    StorageConnection, ToolKind, ToolRun,
};
use crate::versions::VersionTable;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

const HOST_COMMAND: &str = "libguestfs: command: run: ";

/// Interstitial lines that end a stdout capture even though they are
/// otherwise uncategorised
const NOISY_INTERSTITIALS: &[&str] = &[
    "random: ",
    "EXT4-fs ",
    "XFS (",
    "SELinux: ",
    "audit: ",
    "systemd",
    "udevadm ",
];

static STAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\s*(\d+\.\d)\]\s+(.+?)\s*$").expect("valid stage regex"));
static COPYING_DISK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)copying disk (\d+)\s*(?:of|/)\s*(\d+)").expect("valid copying regex")
});
static COMPLETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:completed\s+(\d+(?:\.\d+)?)\s*%|\(\s*(\d+(?:\.\d+)?)/100%\))")
        .expect("valid completed regex")
});

/// Parse one section into a finished tool run.
pub(crate) fn parse_section(section: &Section<'_>, config: &ParserConfig) -> ToolRun {
    let mut parser = SectionParser::new(section.tool, &section.command_line, section.start + 1, config);
    for (offset, text) in section.lines.iter().enumerate() {
        parser.step(text, section.start + offset + 1);
    }
    parser.finalize()
}

/// Carried state of the forward scan over one section
pub(crate) struct SectionParser<'c> {
    config: &'c ParserConfig,
    tool: ToolKind,
    command_line: String,
    start_line: usize,
    end_line: usize,

    lines: Vec<LogLine>,
    stages: Vec<PipelineStage>,
    progress: Vec<DiskProgress>,
    versions: VersionTable,
    domain: DomainCapture,
    connections: ConnectionTracker,
    calls: CallCorrelator,
    hives: HiveTracker,
    copies: CopyPairer,
    guest_info: GuestInfoBuilder,
    host_commands: Vec<HostCommand>,
    pending_host: Option<HostCommand>,
    rvf_flags: Option<String>,
    /// Executable whose stdout is being captured
    capture: Option<String>,
    issues: Vec<LogIssue>,
    finished_marker: Option<usize>,
}

impl<'c> SectionParser<'c> {
    pub fn new(tool: ToolKind, command_line: &str, start_line: usize, config: &'c ParserConfig) -> Self {
        Self {
            config,
            tool,
            command_line: command_line.to_string(),
            start_line,
            end_line: start_line,
            lines: Vec::new(),
            stages: Vec::new(),
            progress: Vec::new(),
            versions: VersionTable::new(),
            domain: DomainCapture::new(),
            connections: ConnectionTracker::new(),
            calls: CallCorrelator::new(),
            hives: HiveTracker::new(),
            copies: CopyPairer::new(config.max_decoded_content),
            guest_info: GuestInfoBuilder::new(),
            host_commands: Vec::new(),
            pending_host: None,
            rvf_flags: None,
            capture: None,
            issues: Vec::new(),
            finished_marker: None,
        }
    }

    /// Feed one line. Detectors are independent; several may fire.
    pub fn step(&mut self, text: &str, number: usize) {
        self.end_line = number;
        let category = categorize(text);

        if self.capture_stdout(text, number, category) {
            return;
        }
        self.keep_line(text, number, category);

        self.host_command(text, number);
        if category == LineCategory::StageHeader {
            self.stage(text, number);
        }
        self.disk_progress(text, number);
        self.versions.step(text, number);
        self.domain.step(text, number);
        self.connections.step(text, number);

        if category == LineCategory::ApplianceTrace {
            self.dispatch_trace(text, number);
        } else {
            self.dispatch_guest(text, number);
            self.guest_info.step(text, number);
        }

        if let Some(issue) = extract_issue(text, number) {
            self.issues.push(issue);
        }
        if self.finished_marker.is_none() && is_finished_marker(text) {
            self.finished_marker = Some(number);
        }
        self.copies.note_line(text);
    }

    fn keep_line(&mut self, text: &str, number: usize, category: LineCategory) {
        if self.config.keep_line_buffer {
            self.lines.push(LogLine {
                number,
                text: text.to_string(),
                category,
            });
        }
    }

    /// Append the line to the captured command's stdout unless it carries a
    /// known prefix, which ends the capture.
    fn capture_stdout(&mut self, text: &str, number: usize, category: LineCategory) -> bool {
        let Some(executable) = self.capture.clone() else {
            return false;
        };
        let known = category != LineCategory::Other
            || NOISY_INTERSTITIALS.iter().any(|p| text.starts_with(p));
        if known {
            self.capture = None;
            return false;
        }

        if let Some(command) = self.calls.find_command_mut(&executable) {
            command.stdout.push(text.to_string());
        }
        self.guest_info.observe_block_device(text, number);
        self.keep_line(text, number, LineCategory::GuestCommand);
        true
    }

    fn host_command(&mut self, text: &str, number: usize) {
        let Some(rest) = text.strip_prefix(HOST_COMMAND) else {
            self.flush_host_command();
            return;
        };

        if let Some(continuation) = rest.strip_prefix("\\ ") {
            if let Some(pending) = self.pending_host.as_mut() {
                pending.args.extend(split_shell_words(continuation));
                return;
            }
        }

        self.flush_host_command();
        let mut words = split_shell_words(rest.trim_start_matches("\\ ")).into_iter();
        if let Some(executable) = words.next() {
            self.pending_host = Some(HostCommand {
                executable,
                args: words.collect(),
                line: number,
            });
        }
    }

    fn flush_host_command(&mut self) {
        if let Some(command) = self.pending_host.take() {
            self.host_commands.push(command);
        }
    }

    fn stage(&mut self, text: &str, number: usize) {
        let Some(caps) = STAGE.captures(text) else {
            return;
        };
        let Ok(mut elapsed) = caps[1].parse::<f64>() else {
            return;
        };
        if let Some(previous) = self.stages.last() {
            elapsed = elapsed.max(previous.elapsed_seconds);
        }
        self.stages.push(PipelineStage {
            name: caps[2].to_string(),
            elapsed_seconds: elapsed,
            line: number,
        });
    }

    fn disk_progress(&mut self, text: &str, number: usize) {
        if let Some(caps) = COPYING_DISK.captures(text) {
            let (Ok(disk_index), Ok(disk_total)) = (caps[1].parse(), caps[2].parse()) else {
                return;
            };
            self.progress.push(DiskProgress {
                disk_index,
                disk_total,
                percent: 0.0,
                line: number,
                last_update_line: number,
            });
            return;
        }

        let Some(percent) = COMPLETED.captures(text).and_then(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .next()
                .and_then(|m| m.as_str().parse::<f64>().ok())
        }) else {
            return;
        };
        if let Some(current) = self.progress.last_mut() {
            current.percent = current.percent.max(percent.min(100.0));
            current.last_update_line = number;
        }
    }

    fn dispatch_trace(&mut self, text: &str, number: usize) {
        match parse_trace(text) {
            Some(TraceLine::Call { handle, name, args }) => {
                self.calls.invoke(handle, name, args, number);
                if HiveTracker::is_hive_call(name) {
                    self.hives.on_call(name, args, number);
                }
                self.copies.on_call(handle, name, args, number);
            }
            Some(TraceLine::Result {
                handle,
                name,
                value,
            }) => {
                let Some(call) = self.calls.resolve(handle, name, value, number) else {
                    return;
                };
                let (handle, name, args) = (call.handle.clone(), call.name.clone(), call.args.clone());
                self.on_result(&handle, &name, &args, value, number);
            }
            Some(TraceLine::BareResult { value, .. }) => {
                let Some(call) = self.calls.resolve_bare(value, number) else {
                    return;
                };
                let (handle, name, args) = (call.handle.clone(), call.name.clone(), call.args.clone());
                self.on_result(&handle, &name, &args, value, number);
            }
            None => {}
        }
    }

    fn on_result(&mut self, handle: &str, name: &str, args: &str, value: &str, number: usize) {
        if HiveTracker::is_hive_call(name) {
            self.hives.on_result(name, args, value, number);
        }
        self.copies.on_result(handle, name, args, value);
    }

    fn dispatch_guest(&mut self, text: &str, number: usize) {
        match parse_guest_line(text, number, &mut self.rvf_flags) {
            Some(GuestLine::ScopeEnter { name }) => self.calls.enter_scope(&name),
            Some(GuestLine::ScopeExit { name, seconds }) => self.calls.exit_scope(&name, seconds),
            Some(GuestLine::Invocation(command)) => self.calls.add_command(command),
            Some(GuestLine::RvfFlags(flags)) => self.rvf_flags = Some(flags),
            Some(GuestLine::ReturnCode { executable, code }) => {
                if let Some(command) = self.calls.find_command_mut(&executable) {
                    command.return_code = Some(code);
                }
            }
            Some(GuestLine::StdoutStart { executable }) => self.capture = Some(executable),
            None => {}
        }
    }

    /// Flush every tracker and build the run. Called exactly once.
    pub fn finalize(mut self) -> ToolRun {
        self.flush_host_command();

        let CorrelatedCalls {
            api_calls,
            trace,
            top_level_commands,
        } = self.calls.finish();
        let connections = self.connections.finish();
        let hive_accesses = self.hives.finish();
        let installed_apps = installed_apps(&hive_accesses);
        let guest_info = self.guest_info.assemble();
        let (file_copies, iso_path) = self.copies.finish();
        let source_vm = self.domain.finish();
        let exit_status = infer_exit_status(&self.stages, &self.issues, self.finished_marker);

        let disk_summary = disk_summary(
            &self.progress,
            &connections,
            source_vm.as_ref().map_or(0, |vm| {
                vm.disks
                    .iter()
                    .filter(|d| d.device.as_deref().map_or(true, |dev| dev == "disk"))
                    .count()
            }),
        );

        log::debug!(
            "section {}..{} ({}): {} stages, {} calls, {} issues",
            self.start_line,
            self.end_line,
            self.tool.as_str(),
            self.stages.len(),
            api_calls.len(),
            self.issues.len()
        );

        ToolRun {
            tool: self.tool,
            command_line: self.command_line,
            exit_status,
            start_line: self.start_line,
            end_line: self.end_line,
            stages: self.stages,
            disk_progress: self.progress,
            connections,
            api_calls,
            top_level_commands,
            host_commands: self.host_commands,
            trace,
            guest_info,
            installed_apps,
            hive_accesses,
            file_copies,
            iso_path,
            versions: self.versions.finish(),
            disk_summary,
            source_vm,
            issues: self.issues,
            lines: self.lines,
        }
    }
}

fn disk_summary(
    progress: &[DiskProgress],
    connections: &[StorageConnection],
    source_disks: usize,
) -> DiskSummary {
    let copied: BTreeSet<u32> = progress.iter().map(|p| p.disk_index).collect();
    let completed: BTreeSet<u32> = progress
        .iter()
        .filter(|p| p.percent >= 100.0)
        .map(|p| p.disk_index)
        .collect();
    let sizes: Vec<u64> = connections.iter().filter_map(|c| c.backing_size).collect();

    DiskSummary {
        source_disks,
        disks_copied: copied.len(),
        disks_completed: completed.len(),
        declared_total: progress.iter().map(|p| p.disk_total).max(),
        backing_bytes: (!sizes.is_empty()).then(|| sizes.iter().sum()),
    }
}
