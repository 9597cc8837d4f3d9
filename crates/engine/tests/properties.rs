use loglens_engine::{parse_log, parse_log_with, preprocess_lines, ParseResult, ParserConfig, ToolRun};
use pretty_assertions::assert_eq;

const FIXTURE: &str = include_str!("fixtures/windows_conversion.log");

/// Three invocations, with a glued boundary and interleaved trace writes.
const MULTI_RUN: &str = r#"2024-05-14T09:00:00Z exec: virt-v2v-inspector [-v -x -i disk /var/tmp/a.img]
[   0.0] Setting up the source
libguestfs: trace: v2v: launch
libguestfs: trace: v2v: launch = 0
[   3.0] Opening the source
[   2.0] Inspecting the source
exec: virt-customize [-a /var/tmp/a.img --firstboot /tmp/x.sh]exec: guestfish [-a disk.img]
libguestfs: trace: is_dir "/etc"libguestfs: trace: exists "/etc/fstab"
libguestfs: trace: is_dir = 1
libguestfs: trace: exists = 1
libguestfs: trace: is_dir "/boot"
libguestfs: trace: is_dir = 0
guestfish: error: something went wrong
"#;

fn all_line_numbers(run: &ToolRun) -> Vec<usize> {
    let mut lines = Vec::new();
    lines.extend(run.stages.iter().map(|s| s.line));
    lines.extend(run.disk_progress.iter().flat_map(|p| [p.line, p.last_update_line]));
    lines.extend(
        run.connections
            .iter()
            .flat_map(|c| [c.start_line, c.end_line]),
    );
    for call in &run.api_calls {
        lines.push(call.line);
        lines.extend(call.result_line);
        lines.extend(call.guest_commands.iter().map(|c| c.line));
    }
    lines.extend(run.top_level_commands.iter().map(|c| c.line));
    lines.extend(run.host_commands.iter().map(|c| c.line));
    lines.extend(run.trace.iter().flat_map(|t| std::iter::once(t.line).chain(t.result_line)));
    lines.extend(run.installed_apps.iter().map(|a| a.line));
    for access in &run.hive_accesses {
        lines.push(access.line);
        lines.extend(access.values.iter().map(|v| v.line));
    }
    lines.extend(run.file_copies.iter().map(|c| c.line));
    lines.extend(run.versions.iter().map(|v| v.line));
    lines.extend(run.source_vm.iter().map(|vm| vm.line));
    lines.extend(run.issues.iter().map(|i| i.line));
    lines.extend(run.lines.iter().map(|l| l.number));
    if let Some(info) = &run.guest_info {
        lines.extend(info.block_devices.iter().map(|b| b.line));
    }
    lines
}

#[test]
fn parsing_is_deterministic() {
    for log in [FIXTURE, MULTI_RUN] {
        assert_eq!(parse_log(log), parse_log(log));
    }
}

#[test]
fn sections_partition_the_input() {
    let result = parse_log(MULTI_RUN);
    assert_eq!(result.total_lines, 15);
    let spans: Vec<_> = result.runs.iter().map(|r| (r.start_line, r.end_line)).collect();
    assert_eq!(spans, vec![(1, 6), (7, 7), (8, 15)]);

    for pair in result.runs.windows(2) {
        assert!(pair[0].end_line < pair[1].start_line);
    }
}

#[test]
fn same_name_results_match_in_invocation_order() {
    let result = parse_log(MULTI_RUN);
    let fish = &result.runs[2];

    let calls: Vec<_> = fish
        .api_calls
        .iter()
        .map(|c| (c.name.as_str(), c.args.as_str(), c.result.as_str(), c.line))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("is_dir", "\"/etc\"", "1", 9),
            ("exists", "\"/etc/fstab\"", "1", 10),
            ("is_dir", "\"/boot\"", "0", 13),
        ]
    );
    assert_eq!(fish.trace.len(), 3);
    assert!(fish
        .trace
        .iter()
        .all(|entry| entry.result_line.map_or(false, |r| r > entry.line)));
}

#[test]
fn stage_times_never_decrease() {
    for log in [FIXTURE, MULTI_RUN] {
        for run in parse_log(log).runs {
            assert!(run
                .stages
                .windows(2)
                .all(|w| w[0].elapsed_seconds <= w[1].elapsed_seconds));
        }
    }
    let first = &parse_log(MULTI_RUN).runs[0];
    let elapsed: Vec<f64> = first.stages.iter().map(|s| s.elapsed_seconds).collect();
    assert_eq!(elapsed, vec![0.0, 3.0, 3.0]);
}

#[test]
fn every_line_reference_stays_inside_its_run() {
    for log in [FIXTURE, MULTI_RUN] {
        let result = parse_log(log);
        for run in &result.runs {
            assert!(run.start_line >= 1 && run.end_line <= result.total_lines);
            for line in all_line_numbers(run) {
                assert!(
                    (run.start_line..=run.end_line).contains(&line),
                    "line {line} outside {}..={}",
                    run.start_line,
                    run.end_line
                );
            }
        }
    }
}

#[test]
fn preprocessing_reaches_a_fixpoint() {
    for log in [FIXTURE, MULTI_RUN] {
        let raw: Vec<&str> = log.lines().collect();
        let once = preprocess_lines(&raw);
        let twice = preprocess_lines(&once);
        assert!(once.len() >= raw.len());
        assert_eq!(once, twice);
    }
}

#[test]
fn parallel_matches_sequential() {
    let sequential = ParserConfig::default();
    let parallel = ParserConfig {
        parallel_sections: true,
        ..Default::default()
    };
    for log in [FIXTURE, MULTI_RUN] {
        assert_eq!(parse_log_with(log, &parallel), parse_log_with(log, &sequential));
    }
}

#[test]
fn fatal_error_marks_only_its_own_run() {
    let result = parse_log(MULTI_RUN);
    let statuses: Vec<_> = result.runs.iter().map(|r| r.exit_status).collect();
    assert_eq!(
        statuses,
        vec![
            loglens_engine::ExitStatus::InProgress,
            loglens_engine::ExitStatus::Unknown,
            loglens_engine::ExitStatus::Error,
        ]
    );
}

#[test]
fn json_serialisation_is_stable() {
    let result = parse_log(FIXTURE);
    let json = result.to_json_pretty().expect("serialise");
    let back: ParseResult = serde_json::from_str(&json).expect("deserialise");
    assert_eq!(back, result);
}
