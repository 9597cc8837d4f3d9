use loglens_engine::{
    parse_log, parse_log_bytes, CopyOrigin, CopySource, ExitStatus, HiveMode, ParseResult,
    ToolKind,
};
use pretty_assertions::assert_eq;

#[test]
fn single_run_with_terminal_stage_and_finished_marker() {
    let log = "\
exec: virt-v2v [-v -x -i libvirtxml /var/tmp/guest.xml -o local -os /var/tmp]
[   0.0] Setting up the source
[   5.2] Finishing off
virt-v2v-monitor: monitoring: Finished
";
    let result = parse_log(log);

    assert_eq!(result.total_lines, 4);
    assert_eq!(result.runs.len(), 1);
    let run = &result.runs[0];
    assert_eq!(run.exit_status, ExitStatus::Success);
    let stages: Vec<_> = run
        .stages
        .iter()
        .map(|s| (s.name.as_str(), s.elapsed_seconds))
        .collect();
    assert_eq!(
        stages,
        vec![("Setting up the source", 0.0), ("Finishing off", 5.2)]
    );
    assert_eq!((run.start_line, run.end_line), (1, 4));
}

#[test]
fn glued_invocations_become_two_runs() {
    let log = "\
exec: virt-v2v [-v -x -i disk /var/tmp/in.img]exec: virt-customize [-a /var/tmp/out.img]
[   0.0] Setting up the source
";
    let result = parse_log(log);

    assert_eq!(result.total_lines, 3);
    assert_eq!(result.runs.len(), 2);
    assert_eq!(result.runs[0].tool, ToolKind::VirtV2v);
    assert_eq!(result.runs[0].start_line, 1);
    assert_eq!(result.runs[0].end_line, 1);
    assert_eq!(result.runs[1].tool, ToolKind::VirtCustomize);
    assert_eq!(result.runs[1].start_line, 2);
    assert_eq!(result.runs[1].command_line, "virt-customize -a /var/tmp/out.img");
    assert_eq!(result.runs[1].stages.len(), 1);
}

#[test]
fn registry_write_session() {
    let log = r#"exec: virt-v2v [-v -x]
libguestfs: trace: v2v: hivex_open "/Windows/System32/config/SOFTWARE" "write:true"
libguestfs: trace: v2v: hivex_open = 0
libguestfs: trace: v2v: hivex_root
libguestfs: trace: v2v: hivex_root = 1056
libguestfs: trace: v2v: hivex_node_get_child 1056 "Microsoft"
libguestfs: trace: v2v: hivex_node_get_child = 2104
libguestfs: trace: v2v: hivex_node_set_value 2104 "Foo" 4 "\x01\x00\x00\x00"
libguestfs: trace: v2v: hivex_node_set_value = 0
libguestfs: trace: v2v: hivex_close
libguestfs: trace: v2v: hivex_close = 0
"#;
    let result = parse_log(log);
    let run = &result.runs[0];

    assert_eq!(run.hive_accesses.len(), 1);
    let access = &run.hive_accesses[0];
    assert_eq!(access.hive_path, "/Windows/System32/config/SOFTWARE");
    assert_eq!(access.mode, HiveMode::Write);
    assert_eq!(access.key_path, "Microsoft");
    assert_eq!(access.values.len(), 1);
    assert_eq!(access.values[0].name, "Foo");
    assert_eq!(access.values[0].value, "1");
}

#[test]
fn driver_media_copy_carries_original_size() {
    let log = r#"exec: virt-v2v [-v -x]
libguestfs: trace: virtio_win: add_drive_opts "/usr/share/virtio-win/virtio-win.iso" "readonly:true"
libguestfs: trace: virtio_win: add_drive_opts = 0
libguestfs: trace: virtio_win: read_file "/viostor/2k19/amd64/viostor.sys"
libguestfs: trace: virtio_win: read_file = "MZ\x90\x00"<truncated, original size 92488 bytes>
libguestfs: trace: v2v: write "/Windows/Drivers/VirtIO/viostor.sys" "MZ\x90\x00"<truncated, original size 92488 bytes>
libguestfs: trace: v2v: write = 0
"#;
    let result = parse_log(log);
    let run = &result.runs[0];

    assert_eq!(run.file_copies.len(), 1);
    let copy = &run.file_copies[0];
    assert_eq!(copy.origin, CopyOrigin::DriverMedia);
    assert_eq!(copy.size, Some(92488));
    assert_eq!(
        copy.source,
        CopySource::Iso("/viostor/2k19/amd64/viostor.sys".to_string())
    );
    assert_eq!(copy.destination, "/Windows/Drivers/VirtIO/viostor.sys");
    assert!(copy.truncated);
    assert_eq!(copy.content, None);
    assert_eq!(
        run.iso_path.as_deref(),
        Some("/usr/share/virtio-win/virtio-win.iso")
    );
}

#[test]
fn no_boundary_falls_back_to_general_tool() {
    let quiet = parse_log("hello\nworld\n");
    assert_eq!(quiet.runs.len(), 1);
    assert_eq!(quiet.runs[0].tool, ToolKind::VirtV2v);
    assert_eq!(quiet.runs[0].exit_status, ExitStatus::Unknown);
    assert_eq!(quiet.runs[0].command_line, "");

    let staged = parse_log("[   0.0] Setting up the source\n[   1.5] Opening the source\n");
    assert_eq!(staged.runs[0].tool, ToolKind::VirtV2v);
    assert_eq!(staged.runs[0].exit_status, ExitStatus::InProgress);
    assert_eq!(staged.runs[0].start_line, 1);
}

#[test]
fn garbage_bytes_yield_empty_result() {
    let garbage: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    assert_eq!(parse_log_bytes(&garbage), ParseResult::empty());

    let invalid = [0xff_u8, 0xfe, 0xfd, 0xc3, 0x28, 0xa0, 0xa1, 0x80].repeat(64);
    let result = parse_log_bytes(&invalid);
    assert_eq!(result.total_lines, 0);
    assert!(result.runs.is_empty());

    assert_eq!(parse_log("\u{0}\u{1}\u{2}"), ParseResult::empty());
}

#[test]
fn empty_input_is_empty_result() {
    assert_eq!(parse_log(""), ParseResult::empty());
}

#[test]
fn fatal_tool_error_wins_over_terminal_stage() {
    let log = "\
exec: virt-v2v [-v -x]
[   0.0] Setting up the source
virt-v2v: error: inspection could not detect the source guest
[   1.0] Finishing off
";
    let result = parse_log(log);
    let run = &result.runs[0];
    assert_eq!(run.exit_status, ExitStatus::Error);
    assert_eq!(run.issues.len(), 1);
    assert!(run.issues[0].fatal);
}
