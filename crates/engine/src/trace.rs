//! Appliance trace line grammar and payload decoding.
//!
//! ```text
//! libguestfs: trace: v2v: mount_ro "/dev/sda2" "/"       invocation
//! libguestfs: trace: v2v: mount_ro = 0                   result
//! libguestfs: trace: v2v: = 0                            bare result
//! ```
//!
//! Payloads are C-escaped strings; long ones end with
//! `<truncated, original size N bytes>`.

use crate::preprocess::TRACE_MARKER;
use once_cell::sync::Lazy;
use regex::Regex;

static HANDLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_.-]+): ").expect("valid handle regex"));
static RESULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*) =(?: (.*))?$").expect("valid result regex"));
static CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)(?:\s+(.*))?$").expect("valid call regex"));
static TRUNCATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<truncated, original size (\d+) bytes>").expect("valid truncation regex")
});

/// One classified trace line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TraceLine<'a> {
    Call {
        handle: &'a str,
        name: &'a str,
        args: &'a str,
    },
    Result {
        handle: &'a str,
        name: &'a str,
        value: &'a str,
    },
    BareResult {
        handle: &'a str,
        value: &'a str,
    },
}

/// Classify a line carrying the trace marker at its start.
pub(crate) fn parse_trace(line: &str) -> Option<TraceLine<'_>> {
    let body = line.strip_prefix(TRACE_MARKER)?;
    let (handle, body) = match HANDLE_PREFIX.captures(body) {
        Some(caps) => {
            let whole = caps.get(0)?;
            (caps.get(1)?.as_str(), &body[whole.end()..])
        }
        None => ("", body),
    };

    if let Some(value) = body.strip_prefix('=') {
        return Some(TraceLine::BareResult {
            handle,
            value: value.trim(),
        });
    }

    if let Some(caps) = RESULT.captures(body) {
        return Some(TraceLine::Result {
            handle,
            name: caps.get(1)?.as_str(),
            value: caps.get(2).map_or("", |m| m.as_str()).trim(),
        });
    }

    let caps = CALL.captures(body)?;
    Some(TraceLine::Call {
        handle,
        name: caps.get(1)?.as_str(),
        args: caps.get(2).map_or("", |m| m.as_str()).trim(),
    })
}

/// A decoded trace argument or result payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Payload {
    pub bytes: Vec<u8>,
    /// Size reported by the truncation marker
    pub original_size: Option<u64>,
}

impl Payload {
    pub fn truncated(&self) -> bool {
        self.original_size.is_some()
    }

    /// Full payload size: the reported original size, else the captured length
    pub fn size(&self) -> u64 {
        self.original_size.unwrap_or(self.bytes.len() as u64)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Decode as text when the payload is complete, valid UTF-8 and NUL-free.
    pub fn decoded_text(&self, max_chars: usize) -> Option<String> {
        if self.truncated() || self.bytes.contains(&0) {
            return None;
        }
        let text = std::str::from_utf8(&self.bytes).ok()?;
        Some(text.chars().take(max_chars).collect())
    }
}

/// Split trace arguments into payloads: `"quoted \x01"` strings or bare words.
pub(crate) fn split_args(args: &str) -> Vec<Payload> {
    let chars: Vec<char> = args.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }

        let mut payload = Payload::default();
        if chars[i] == '"' {
            i = decode_quoted(&chars, i + 1, &mut payload.bytes);
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            payload.bytes = word.into_bytes();
        }

        // A truncation marker is glued directly after the payload.
        if chars.get(i) == Some(&'<') {
            let rest: String = chars[i..].iter().collect();
            if let Some(caps) = TRUNCATED.captures(&rest) {
                payload.original_size = caps.get(1).and_then(|m| m.as_str().parse().ok());
                i += caps.get(0).map_or(0, |m| m.as_str().chars().count());
            }
        }
        out.push(payload);
    }

    out
}

/// Decode a single payload (result values are one payload).
pub(crate) fn parse_payload(raw: &str) -> Payload {
    split_args(raw).into_iter().next().unwrap_or_default()
}

/// Text of the nth argument, if present.
pub(crate) fn arg_text(args: &[Payload], index: usize) -> Option<String> {
    args.get(index).map(Payload::text)
}

fn decode_quoted(chars: &[char], mut i: usize, out: &mut Vec<u8>) -> usize {
    let mut buf = [0u8; 4];
    while i < chars.len() {
        match chars[i] {
            '"' => return i + 1,
            '\\' if i + 1 < chars.len() => {
                i += 1;
                match chars[i] {
                    'n' => out.push(b'\n'),
                    't' => out.push(b'\t'),
                    'r' => out.push(b'\r'),
                    'a' => out.push(0x07),
                    'b' => out.push(0x08),
                    'f' => out.push(0x0c),
                    'v' => out.push(0x0b),
                    'x' => {
                        let hex: String = chars[i + 1..].iter().take(2).collect();
                        match u8::from_str_radix(&hex, 16) {
                            Ok(byte) if hex.len() == 2 => {
                                out.push(byte);
                                i += 2;
                            }
                            _ => out.push(b'x'),
                        }
                    }
                    c if c.is_digit(8) => {
                        let oct: String = chars[i..]
                            .iter()
                            .take(3)
                            .take_while(|c| c.is_digit(8))
                            .collect();
                        out.push(u8::from_str_radix(&oct, 8).unwrap_or(0));
                        i += oct.len() - 1;
                    }
                    c => out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
                }
                i += 1;
            }
            c => {
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                i += 1;
            }
        }
    }
    i
}
