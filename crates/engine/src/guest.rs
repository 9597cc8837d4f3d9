//! Grammar for lines the appliance daemon prints about guest-side work.
//!
//! ```text
//! guestfsd: <= mount_ro (0x49) request length 68 bytes      scope enter
//! guestfsd: => mount_ro (0x49) took 0.04 secs               scope exit
//! command: mount '-o' 'ro' '/dev/sda2' '/sysroot/'          direct
//! commandrvf: stdout=y stderr=y flags=0x0                   metadata for the next rvf
//! commandrvf: udevadm --debug settle                        variant
//! chroot: /sysroot: running 'rpm' '-qa'                     chroot-qualified
//! command: blkid: returned 2                                return code
//! command: rpm: stdout:                                     opens stdout capture
//! ```

use crate::types::{CommandSource, GuestCommand};
use once_cell::sync::Lazy;
use regex::Regex;

static SCOPE_ENTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^guestfsd: <= (\w+) \(0x[0-9a-fA-F]+\) request length \d+ bytes")
        .expect("valid scope enter regex")
});
static SCOPE_EXIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^guestfsd: => (\w+) \(0x[0-9a-fA-F]+\) took (\d+(?:\.\d+)?) secs")
        .expect("valid scope exit regex")
});
static RETURN_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:command|commandrvf): (\S+?): returned (-?\d+)\s*$")
        .expect("valid return code regex")
});
static STDOUT_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:command|commandrvf): (\S+?): stdout:\s*$").expect("valid stdout regex")
});
static RVF_FLAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^commandrvf: (stdout=\S+ stderr=\S+ flags=0x[0-9a-fA-F]+)\s*$")
        .expect("valid rvf flags regex")
});
static DIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^command: (\S.*)$").expect("valid command regex"));
static RVF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^commandrvf: (\S.*)$").expect("valid commandrvf regex"));
static CHROOT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^chroot: (\S+?): running (\S.*)$").expect("valid chroot regex")
});

/// A classified guest-side line
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GuestLine {
    ScopeEnter { name: String },
    ScopeExit { name: String, seconds: f64 },
    Invocation(GuestCommand),
    RvfFlags(String),
    ReturnCode { executable: String, code: i32 },
    StdoutStart { executable: String },
}

/// Classify a guest-side line. `rvf_flags` holds metadata announced by a
/// preceding `commandrvf: stdout=...` line and is consumed by the next
/// variant invocation.
pub(crate) fn parse_guest_line(
    line: &str,
    number: usize,
    rvf_flags: &mut Option<String>,
) -> Option<GuestLine> {
    if let Some(caps) = SCOPE_ENTER.captures(line) {
        return Some(GuestLine::ScopeEnter {
            name: caps[1].to_string(),
        });
    }
    if let Some(caps) = SCOPE_EXIT.captures(line) {
        return Some(GuestLine::ScopeExit {
            name: caps[1].to_string(),
            seconds: caps[2].parse().unwrap_or(0.0),
        });
    }
    if let Some(caps) = RETURN_CODE.captures(line) {
        return Some(GuestLine::ReturnCode {
            executable: caps[1].to_string(),
            code: caps[2].parse().ok()?,
        });
    }
    if let Some(caps) = STDOUT_START.captures(line) {
        return Some(GuestLine::StdoutStart {
            executable: caps[1].to_string(),
        });
    }
    if let Some(caps) = RVF_FLAGS.captures(line) {
        return Some(GuestLine::RvfFlags(caps[1].to_string()));
    }
    if let Some(caps) = CHROOT.captures(line) {
        let source = CommandSource::Chroot {
            root: caps[1].to_string(),
        };
        return command_from_words(&caps[2], source, number).map(GuestLine::Invocation);
    }
    if let Some(caps) = RVF.captures(line) {
        let source = CommandSource::Rvf {
            flags: rvf_flags.take(),
        };
        return command_from_words(&caps[1], source, number).map(GuestLine::Invocation);
    }
    if let Some(caps) = DIRECT.captures(line) {
        return command_from_words(&caps[1], CommandSource::Direct, number)
            .map(GuestLine::Invocation);
    }
    None
}

fn command_from_words(text: &str, source: CommandSource, line: usize) -> Option<GuestCommand> {
    let mut words = split_shell_words(text).into_iter();
    let executable = words.next()?;
    Some(GuestCommand {
        executable,
        args: words.collect(),
        source,
        stdout: Vec::new(),
        return_code: None,
        line,
    })
}

/// Split a shell-ish command line. Single quotes are literal, double quotes
/// honour backslash escapes, bare words end at whitespace.
pub(crate) fn split_shell_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for inner in chars.by_ref() {
                    if inner == '\'' {
                        break;
                    }
                    current.push(inner);
                }
            }
            '"' => {
                in_word = true;
                while let Some(inner) = chars.next() {
                    match inner {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                        }
                        other => current.push(other),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Executable names match on the basename so `/usr/bin/rpm` finds `rpm`.
pub(crate) fn same_executable(a: &str, b: &str) -> bool {
    let base = |s: &str| s.rsplit('/').next().unwrap_or(s).to_string();
    a == b || base(a) == base(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> Option<GuestLine> {
        parse_guest_line(line, 7, &mut None)
    }

    #[test]
    fn splits_quoted_words() {
        assert_eq!(
            split_shell_words("mount '-o' 'ro' \"/dev/sda 1\" /sysroot/"),
            vec!["mount", "-o", "ro", "/dev/sda 1", "/sysroot/"]
        );
        assert_eq!(split_shell_words("x ''"), vec!["x", ""]);
    }

    #[test]
    fn parses_scope_markers() {
        assert_eq!(
            parse("guestfsd: <= mount_ro (0x49) request length 68 bytes"),
            Some(GuestLine::ScopeEnter {
                name: "mount_ro".to_string()
            })
        );
        assert_eq!(
            parse("guestfsd: => mount_ro (0x49) took 0.04 secs"),
            Some(GuestLine::ScopeExit {
                name: "mount_ro".to_string(),
                seconds: 0.04
            })
        );
    }

    #[test]
    fn rvf_invocation_consumes_flags() {
        let mut flags = None;
        assert_eq!(
            parse_guest_line("commandrvf: stdout=y stderr=y flags=0x0", 1, &mut flags),
            Some(GuestLine::RvfFlags("stdout=y stderr=y flags=0x0".to_string()))
        );
        flags = Some("stdout=y stderr=y flags=0x0".to_string());
        let Some(GuestLine::Invocation(cmd)) =
            parse_guest_line("commandrvf: udevadm --debug settle", 2, &mut flags)
        else {
            panic!("expected invocation");
        };
        assert_eq!(cmd.executable, "udevadm");
        assert_eq!(cmd.args, vec!["--debug", "settle"]);
        assert_eq!(
            cmd.source,
            CommandSource::Rvf {
                flags: Some("stdout=y stderr=y flags=0x0".to_string())
            }
        );
        assert_eq!(flags, None);
    }

    #[test]
    fn return_code_and_stdout_forms_win_over_direct() {
        assert_eq!(
            parse("command: blkid: returned 2"),
            Some(GuestLine::ReturnCode {
                executable: "blkid".to_string(),
                code: 2
            })
        );
        assert_eq!(
            parse("command: rpm: stdout:"),
            Some(GuestLine::StdoutStart {
                executable: "rpm".to_string()
            })
        );
        let Some(GuestLine::Invocation(cmd)) = parse("chroot: /sysroot: running 'rpm' '-qa'") else {
            panic!("expected chroot invocation");
        };
        assert_eq!(
            cmd.source,
            CommandSource::Chroot {
                root: "/sysroot".to_string()
            }
        );
        assert_eq!(cmd.args, vec!["-qa"]);
    }
}
