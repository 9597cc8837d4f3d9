use loglens_engine::{ExitStatus, ParseResult, Severity, ToolRun};

/// Issues listed per run before the rest are elided
const MAX_ISSUES: usize = 10;

pub fn render_summary(source: &str, result: &ParseResult) -> String {
    let mut md = String::new();
    md.push_str("# Log summary\n\n");
    md.push_str(&format!("- Source: `{source}`\n"));
    md.push_str(&format!("- Lines: `{}`\n", result.total_lines));
    md.push_str(&format!("- Runs: `{}`\n\n", result.runs.len()));

    if result.is_empty() {
        md.push_str("No tool runs recognised.\n");
        return md;
    }

    md.push_str("| # | tool | status | lines | stages | last stage | calls | commands | errors | warnings |\n");
    md.push_str("|---:|---|---|---|---:|---|---:|---:|---:|---:|\n");
    for (idx, summary) in result.summary().iter().enumerate() {
        md.push_str(&format!(
            "| `{}` | `{}` | `{}` | `{}-{}` | `{}` | {} | `{}` | `{}` | `{}` | `{}` |\n",
            idx + 1,
            summary.tool.as_str(),
            status_label(summary.exit_status),
            summary.start_line,
            summary.end_line,
            summary.stages,
            summary
                .last_stage
                .as_deref()
                .map_or("n/a".to_string(), |s| escape_cell(&truncate_one_line(s, 60))),
            summary.api_calls,
            summary.guest_commands,
            summary.errors,
            summary.warnings,
        ));
    }
    md.push('\n');

    for (idx, run) in result.runs.iter().enumerate() {
        render_run(&mut md, idx + 1, run);
    }
    md
}

fn render_run(md: &mut String, number: usize, run: &ToolRun) {
    md.push_str(&format!("## Run {number} ({})\n\n", run.tool.as_str()));
    if !run.command_line.is_empty() {
        md.push_str(&format!(
            "- Command: `{}`\n",
            truncate_one_line(&run.command_line, 160)
        ));
    }
    if !run.versions.is_empty() {
        let versions: Vec<String> = run
            .versions
            .iter()
            .map(|v| format!("{} {}", v.component, v.version))
            .collect();
        md.push_str(&format!("- Versions: `{}`\n", versions.join("`, `")));
    }
    if let Some(vm) = &run.source_vm {
        md.push_str(&format!(
            "- Source VM: `{}` ({} disks, {} NICs, firmware {})\n",
            vm.name.as_deref().unwrap_or("unnamed"),
            vm.disks.len(),
            vm.networks.len(),
            vm.firmware.as_deref().unwrap_or("unknown")
        ));
    }
    if let Some(guest) = &run.guest_info {
        let os = guest
            .product_name
            .clone()
            .or_else(|| guest.distro.clone())
            .unwrap_or_else(|| "unknown".to_string());
        md.push_str(&format!(
            "- Guest: `{}` version `{}` root `{}`\n",
            os,
            guest.os_version.as_deref().unwrap_or("n/a"),
            guest.root_device.as_deref().unwrap_or("n/a")
        ));
    }
    let disks = &run.disk_summary;
    if disks.disks_copied > 0 || disks.source_disks > 0 {
        md.push_str(&format!(
            "- Disks: `{}` source, `{}` copied, `{}` completed\n",
            disks.source_disks, disks.disks_copied, disks.disks_completed
        ));
    }
    if !run.installed_apps.is_empty() {
        md.push_str(&format!("- Installed apps: `{}`\n", run.installed_apps.len()));
    }
    md.push('\n');

    if run.issues.is_empty() {
        return;
    }
    md.push_str("| line | severity | message |\n");
    md.push_str("|---:|---|---|\n");
    for issue in run.issues.iter().take(MAX_ISSUES) {
        let severity = match issue.severity {
            Severity::Error if issue.fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        md.push_str(&format!(
            "| `{}` | `{}` | {} |\n",
            issue.line,
            severity,
            escape_cell(&truncate_one_line(&issue.message, 120))
        ));
    }
    if run.issues.len() > MAX_ISSUES {
        md.push_str(&format!(
            "\n_{} more issues omitted._\n",
            run.issues.len() - MAX_ISSUES
        ));
    }
    md.push('\n');
}

fn status_label(status: ExitStatus) -> &'static str {
    match status {
        ExitStatus::Success => "success",
        ExitStatus::Error => "error",
        ExitStatus::InProgress => "in progress",
        ExitStatus::Unknown => "unknown",
    }
}

fn truncate_one_line(text: &str, max_chars: usize) -> String {
    let mut s = text.replace(['\n', '\r', '\t'], " ");
    s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.chars().count() <= max_chars {
        return s;
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{truncated}…")
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use loglens_engine::parse_log;

    #[test]
    fn summary_renders_run_table_and_issues() {
        let result = parse_log(
            "exec: virt-v2v [-i disk in.img]\n[   0.0] Setting up the source\nvirt-v2v: error: no root | device found\n",
        );
        let md = render_summary("in.log", &result);

        assert!(md.contains("# Log summary"));
        assert!(md.contains("- Lines: `3`"));
        assert!(md.contains("| `1` | `virt-v2v` | `error` | `1-3` | `1` |"));
        assert!(md.contains("| `3` | `fatal` | virt-v2v: error: no root \\| device found |"));
    }

    #[test]
    fn empty_result_says_so() {
        let md = render_summary("-", &ParseResult::empty());
        assert!(md.contains("- Runs: `0`"));
        assert!(md.contains("No tool runs recognised."));
    }

    #[test]
    fn long_text_is_truncated_to_one_line() {
        assert_eq!(truncate_one_line("a\nb\tc", 10), "a b c");
        assert_eq!(truncate_one_line("abcdefgh", 4), "abc…");
    }
}
