use serde::{Deserialize, Serialize};

/// Migration tool family member that produced a section of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    VirtV2v,
    VirtV2vInPlace,
    VirtV2vInspector,
    VirtCustomize,
    Guestfish,
    VirtWinReg,
}

impl ToolKind {
    /// Most general tool kind, used when nothing better is known
    pub const DEFAULT: ToolKind = ToolKind::VirtV2v;

    /// Canonical executable name
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::VirtV2v => "virt-v2v",
            ToolKind::VirtV2vInPlace => "virt-v2v-in-place",
            ToolKind::VirtV2vInspector => "virt-v2v-inspector",
            ToolKind::VirtCustomize => "virt-customize",
            ToolKind::Guestfish => "guestfish",
            ToolKind::VirtWinReg => "virt-win-reg",
        }
    }

    /// Classify an invocation token (bare name or path).
    ///
    /// Exact matches are tried before substring rules so that
    /// `virt-v2v-in-place` never collapses into `virt-v2v`. Monitor-only
    /// tokens return `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        let name = token
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.is_empty() || name.contains("monitor") {
            return None;
        }

        match name.as_str() {
            "virt-v2v" => return Some(ToolKind::VirtV2v),
            "virt-v2v-in-place" => return Some(ToolKind::VirtV2vInPlace),
            "virt-v2v-inspector" => return Some(ToolKind::VirtV2vInspector),
            "virt-customize" => return Some(ToolKind::VirtCustomize),
            "guestfish" => return Some(ToolKind::Guestfish),
            "virt-win-reg" => return Some(ToolKind::VirtWinReg),
            _ => {}
        }

        if name.contains("in-place") {
            Some(ToolKind::VirtV2vInPlace)
        } else if name.contains("inspector") {
            Some(ToolKind::VirtV2vInspector)
        } else if name.contains("customize") {
            Some(ToolKind::VirtCustomize)
        } else if name.contains("win-reg") {
            Some(ToolKind::VirtWinReg)
        } else if name.contains("guestfish") {
            Some(ToolKind::Guestfish)
        } else if name.contains("virt-v2v") {
            Some(ToolKind::VirtV2v)
        } else {
            None
        }
    }
}

/// Inferred outcome of a tool run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Error,
    InProgress,
    Unknown,
}

/// Coarse display category assigned to every line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineCategory {
    BootNoise,
    StageHeader,
    StorageTool,
    ApplianceTrace,
    ApplianceCommand,
    GuestCommand,
    Info,
    Progress,
    Markup,
    Warning,
    Error,
    Other,
}

/// One verbatim line with its category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Absolute line number (1-indexed, after preprocessing)
    pub number: usize,
    pub text: String,
    pub category: LineCategory,
}

/// A pipeline stage header such as `[   5.2] Opening the source`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub name: String,
    /// Seconds since tool start, non-decreasing within a run
    pub elapsed_seconds: f64,
    pub line: usize,
}

/// Copy progress of one disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskProgress {
    pub disk_index: u32,
    pub disk_total: u32,
    pub percent: f64,
    pub line: usize,
    pub last_update_line: usize,
}

/// A block-device export/import session (nbdkit or qemu-nbd)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConnection {
    /// Socket path when known, otherwise a generated id
    pub id: String,
    /// Tool that served the connection (`nbdkit`, `qemu-nbd`)
    pub server: String,
    pub socket_path: Option<String>,
    pub export_uri: Option<String>,
    pub plugin: Option<String>,
    /// Filter names in first-seen order, without duplicates
    pub filters: Vec<String>,
    pub backing_file: Option<String>,
    pub transport: Option<String>,
    pub remote_endpoint: Option<String>,
    pub vm_reference: Option<String>,
    pub backing_size: Option<u64>,
    pub start_line: usize,
    pub end_line: usize,
    pub excerpt: Vec<String>,
}

/// How a guest command was launched inside the appliance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandSource {
    Direct,
    Rvf { flags: Option<String> },
    Chroot { root: String },
}

/// A command executed inside the guest by the appliance daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCommand {
    pub executable: String,
    pub args: Vec<String>,
    pub source: CommandSource,
    pub stdout: Vec<String>,
    pub return_code: Option<i32>,
    pub line: usize,
}

/// An appliance API call with its (eventually matched) result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    pub name: String,
    /// Appliance handle tag (empty when the log does not carry one)
    pub handle: String,
    pub args: String,
    /// Raw result text, empty until matched
    pub result: String,
    pub guest_commands: Vec<GuestCommand>,
    pub line: usize,
    pub result_line: Option<usize>,
    pub duration_seconds: Option<f64>,
}

/// Display-only record of a trace invocation and its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub handle: String,
    pub name: String,
    pub args: String,
    pub result: Option<String>,
    pub line: usize,
    pub result_line: Option<usize>,
}

/// A command the library ran on the host (`libguestfs: command: run: ...`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCommand {
    pub executable: String,
    pub args: Vec<String>,
    pub line: usize,
}

/// Windows-specific inspection paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsPaths {
    pub system_root: Option<String>,
    pub software_hive: Option<String>,
    pub system_hive: Option<String>,
    pub current_control_set: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveMapping {
    pub letter: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FstabEntry {
    pub device: String,
    pub mountpoint: String,
}

/// One `blkid`-style block device identification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub device: String,
    pub uuid: Option<String>,
    pub fs_type: Option<String>,
    pub label: Option<String>,
    pub line: usize,
}

/// Guest inspection facts, assembled once per run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub root_device: Option<String>,
    pub os_type: Option<String>,
    pub distro: Option<String>,
    pub arch: Option<String>,
    pub os_version: Option<String>,
    pub product_name: Option<String>,
    pub hostname: Option<String>,
    pub package_format: Option<String>,
    pub package_management: Option<String>,
    pub windows: Option<WindowsPaths>,
    pub drive_mappings: Vec<DriveMapping>,
    pub fstab: Vec<FstabEntry>,
    pub block_devices: Vec<BlockDevice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub name: String,
    pub version: Option<String>,
    pub publisher: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiveMode {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryValue {
    pub name: String,
    pub value: String,
    pub line: usize,
}

/// Values read or written under one key path of a registry hive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryHiveAccess {
    pub hive_path: String,
    pub mode: HiveMode,
    /// Slash-joined key path below the hive root
    pub key_path: String,
    pub values: Vec<RegistryValue>,
    pub line: usize,
}

/// Where a copied file's bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyOrigin {
    DriverMedia,
    GuestEdit,
    Generated,
    HostUpload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum CopySource {
    /// A real path (guest or host)
    Path(String),
    /// A path relative to the driver ISO
    Iso(String),
    /// Content produced by the tool itself
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCopy {
    pub source: CopySource,
    pub destination: String,
    pub size: Option<u64>,
    pub origin: CopyOrigin,
    pub content: Option<String>,
    pub truncated: bool,
    pub line: usize,
}

/// A component version detected in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersion {
    pub component: String,
    pub version: String,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSummary {
    /// Disks declared by the source domain document
    pub source_disks: usize,
    /// Disks for which copying started
    pub disks_copied: usize,
    /// Disks that reached 100%
    pub disks_completed: usize,
    /// Largest `Y` seen in `copying disk X of Y`
    pub declared_total: Option<u32>,
    /// Sum of known backing sizes of storage connections
    pub backing_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDisk {
    pub device: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub bus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNic {
    pub kind: Option<String>,
    pub source: Option<String>,
    pub mac: Option<String>,
    pub model: Option<String>,
}

/// Source VM description taken from an embedded domain document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceVm {
    pub name: Option<String>,
    pub memory_kib: Option<u64>,
    pub vcpus: Option<u32>,
    pub firmware: Option<String>,
    pub disks: Vec<SourceDisk>,
    pub networks: Vec<SourceNic>,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Component a diagnostic line is attributed to, derived from its prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Tool,
    Appliance,
    Storage,
    Guest,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogIssue {
    pub severity: Severity,
    pub source: IssueSource,
    pub message: String,
    pub line: usize,
    /// Tool-sourced error that is not marked `(ignored)`
    pub fatal: bool,
}

/// One invocation of a migration tool found in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: ToolKind,
    pub command_line: String,
    pub exit_status: ExitStatus,
    /// First line of the run (1-indexed, inclusive)
    pub start_line: usize,
    /// Last line of the run (1-indexed, inclusive)
    pub end_line: usize,
    pub stages: Vec<PipelineStage>,
    pub disk_progress: Vec<DiskProgress>,
    pub connections: Vec<StorageConnection>,
    pub api_calls: Vec<ApiCall>,
    /// Guest commands seen while no appliance call was open
    pub top_level_commands: Vec<GuestCommand>,
    pub host_commands: Vec<HostCommand>,
    pub trace: Vec<TraceEntry>,
    pub guest_info: Option<GuestInfo>,
    pub installed_apps: Vec<InstalledApp>,
    pub hive_accesses: Vec<RegistryHiveAccess>,
    pub file_copies: Vec<FileCopy>,
    pub iso_path: Option<String>,
    pub versions: Vec<ComponentVersion>,
    pub disk_summary: DiskSummary,
    pub source_vm: Option<SourceVm>,
    pub issues: Vec<LogIssue>,
    pub lines: Vec<LogLine>,
}

impl ToolRun {
    /// Number of lines covered by this run
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Check if the run covers a specific line
    #[must_use]
    pub const fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }

    /// Look up a detected component version
    pub fn version(&self, component: &str) -> Option<&str> {
        self.versions
            .iter()
            .find(|v| v.component == component)
            .map(|v| v.version.as_str())
    }

    /// Compact counts for human-oriented output
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            tool: self.tool,
            exit_status: self.exit_status,
            start_line: self.start_line,
            end_line: self.end_line,
            stages: self.stages.len(),
            last_stage: self.stages.last().map(|s| s.name.clone()),
            api_calls: self.api_calls.len(),
            guest_commands: self
                .api_calls
                .iter()
                .map(|c| c.guest_commands.len())
                .sum::<usize>()
                + self.top_level_commands.len(),
            connections: self.connections.len(),
            hive_accesses: self.hive_accesses.len(),
            file_copies: self.file_copies.len(),
            errors: self
                .issues
                .iter()
                .filter(|i| i.severity == Severity::Error)
                .count(),
            warnings: self
                .issues
                .iter()
                .filter(|i| i.severity == Severity::Warning)
                .count(),
        }
    }
}

/// Compact per-run counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub tool: ToolKind,
    pub exit_status: ExitStatus,
    pub start_line: usize,
    pub end_line: usize,
    pub stages: usize,
    pub last_stage: Option<String>,
    pub api_calls: usize,
    pub guest_commands: usize,
    pub connections: usize,
    pub hive_accesses: usize,
    pub file_copies: usize,
    pub errors: usize,
    pub warnings: usize,
}

/// Output of the engine: total line count and the runs in boundary order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub total_lines: usize,
    pub runs: Vec<ToolRun>,
}

impl ParseResult {
    /// The well-typed "no data found" result
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn summary(&self) -> Vec<RunSummary> {
        self.runs.iter().map(ToolRun::summary).collect()
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tool_tokens() {
        assert_eq!(ToolKind::from_token("virt-v2v"), Some(ToolKind::VirtV2v));
        assert_eq!(
            ToolKind::from_token("/usr/bin/virt-v2v-in-place"),
            Some(ToolKind::VirtV2vInPlace)
        );
        assert_eq!(
            ToolKind::from_token("VIRT-V2V-INSPECTOR"),
            Some(ToolKind::VirtV2vInspector)
        );
        assert_eq!(ToolKind::from_token("virt-v2v-monitor"), None);
        assert_eq!(ToolKind::from_token("/bin/sh"), None);
    }

    #[test]
    fn exit_status_serializes_snake_case() {
        let json = serde_json::to_string(&ExitStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
