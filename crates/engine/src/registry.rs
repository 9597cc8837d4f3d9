//! Registry hive session tracking.
//!
//! A session runs `hivex_open` → navigate → read/write values → `hivex_close`.
//! Navigation that restarts from the root handle flushes what was gathered
//! under the previous key path, so one session can emit several records.

use crate::trace::{arg_text, parse_payload, split_args};
use crate::types::{HiveMode, InstalledApp, RegistryHiveAccess, RegistryValue};
use std::collections::{BTreeMap, HashMap};

const REG_SZ: u32 = 1;
const REG_EXPAND_SZ: u32 = 2;
const REG_DWORD: u32 = 4;
const REG_DWORD_BIG_ENDIAN: u32 = 5;
const REG_MULTI_SZ: u32 = 7;
const REG_QWORD: u32 = 11;

#[derive(Debug)]
struct HiveSession {
    hive_path: String,
    mode: HiveMode,
    root: Option<String>,
    path: Vec<String>,
    /// Line the current key path started on
    anchor: usize,
    values: Vec<RegistryValue>,
    /// Value handle → value name, from `get_value` / `value_key`
    pending_names: HashMap<String, String>,
    /// Value handle → declared registry type
    value_types: HashMap<String, u32>,
}

impl HiveSession {
    fn new(hive_path: String, mode: HiveMode, line: usize) -> Self {
        Self {
            hive_path,
            mode,
            root: None,
            path: Vec::new(),
            anchor: line,
            values: Vec::new(),
            pending_names: HashMap::new(),
            value_types: HashMap::new(),
        }
    }

    fn record(&mut self, name: String, value: String, line: usize) {
        self.values.push(RegistryValue { name, value, line });
    }
}

#[derive(Debug, Default)]
pub(crate) struct HiveTracker {
    session: Option<HiveSession>,
    records: Vec<RegistryHiveAccess>,
}

impl HiveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_hive_call(name: &str) -> bool {
        name.starts_with("hivex_")
    }

    /// Handle a `hivex_*` invocation.
    pub fn on_call(&mut self, name: &str, args: &str, line: usize) {
        let args = split_args(args);
        match name {
            "hivex_open" => {
                self.flush_session();
                let Some(path) = arg_text(&args, 0) else {
                    return;
                };
                let write = args.iter().skip(1).any(|a| {
                    let flag = a.text().to_ascii_lowercase();
                    flag == "write:true" || flag == "write=1" || flag == "write:1"
                });
                let mode = if write { HiveMode::Write } else { HiveMode::Read };
                self.session = Some(HiveSession::new(path, mode, line));
            }
            "hivex_node_get_child" | "hivex_node_add_child" => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let (Some(parent), Some(child)) = (arg_text(&args, 0), arg_text(&args, 1)) else {
                    return;
                };
                let restarted = session.root.as_deref() == Some(parent.as_str())
                    && !session.path.is_empty();
                if restarted {
                    Self::flush_into(&mut self.records, session);
                    session.path.clear();
                    session.anchor = line;
                }
                if session.path.is_empty() && session.values.is_empty() {
                    session.anchor = line;
                }
                session.path.push(child);
                if name == "hivex_node_add_child" {
                    session.mode = HiveMode::Write;
                }
            }
            "hivex_node_set_value" => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.mode = HiveMode::Write;
                let Some(key) = arg_text(&args, 1) else {
                    return;
                };
                let kind = arg_text(&args, 2).and_then(|t| t.trim().parse::<u32>().ok());
                let bytes = args.get(3).map(|p| p.bytes.as_slice()).unwrap_or_default();
                let value = decode_registry_value(kind, bytes);
                session.record(key, value, line);
            }
            "hivex_commit" => {
                if let Some(session) = self.session.as_mut() {
                    session.mode = HiveMode::Write;
                    Self::flush_into(&mut self.records, session);
                }
            }
            "hivex_close" => self.flush_session(),
            _ => {}
        }
    }

    /// Handle the matched result of a `hivex_*` call.
    pub fn on_result(&mut self, name: &str, args: &str, value: &str, line: usize) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let args = split_args(args);
        let handle = arg_text(&args, 0).unwrap_or_default();
        let value = value.trim();
        let failed = value.starts_with("-1") || value.contains("(error)");

        match name {
            "hivex_root" if !failed => session.root = Some(value.to_string()),
            "hivex_node_get_child" => {
                // A missing child returns node 0; drop the segment it added.
                if (value == "0" || failed) && session.path.last() == arg_text(&args, 1).as_ref() {
                    session.path.pop();
                }
            }
            "hivex_node_get_value" if !failed && value != "0" => {
                if let Some(key) = arg_text(&args, 1) {
                    session.pending_names.insert(value.to_string(), key);
                }
            }
            "hivex_value_key" if !failed => {
                let key = parse_payload(value).text();
                session.pending_names.entry(handle).or_insert(key);
            }
            "hivex_value_type" if !failed => {
                if let Ok(kind) = value.parse::<u32>() {
                    session.value_types.insert(handle, kind);
                }
            }
            "hivex_value_string" | "hivex_value_utf8" if !failed => {
                if let Some(key) = session.pending_names.get(&handle).cloned() {
                    let text = parse_payload(value).text();
                    session.record(key, text, line);
                }
            }
            "hivex_value_value" if !failed => {
                if let Some(key) = session.pending_names.get(&handle).cloned() {
                    let kind = session.value_types.get(&handle).copied();
                    let decoded = decode_registry_value(kind, &parse_payload(value).bytes);
                    session.record(key, decoded, line);
                }
            }
            _ => {}
        }
    }

    /// Flush any open session and return every access record.
    pub fn finish(mut self) -> Vec<RegistryHiveAccess> {
        self.flush_session();
        self.records
    }

    fn flush_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            Self::flush_into(&mut self.records, &mut session);
        }
    }

    fn flush_into(records: &mut Vec<RegistryHiveAccess>, session: &mut HiveSession) {
        let values = std::mem::take(&mut session.values);
        if session.path.is_empty() && values.is_empty() {
            return;
        }
        let key_path = session.path.join("/");

        if let Some(last) = records.last_mut() {
            if last.hive_path == session.hive_path
                && last.key_path == key_path
                && last.mode == session.mode
                && last.line == session.anchor
            {
                last.values.extend(values);
                return;
            }
        }

        records.push(RegistryHiveAccess {
            hive_path: session.hive_path.clone(),
            mode: session.mode,
            key_path,
            values,
            line: session.anchor,
        });
    }
}

/// Decode a registry value payload according to its declared type.
pub fn decode_registry_value(kind: Option<u32>, bytes: &[u8]) -> String {
    match kind {
        Some(REG_DWORD) if bytes.len() >= 4 => {
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_string()
        }
        Some(REG_DWORD_BIG_ENDIAN) if bytes.len() >= 4 => {
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_string()
        }
        Some(REG_QWORD) if bytes.len() >= 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            u64::from_le_bytes(buf).to_string()
        }
        Some(REG_SZ) | Some(REG_EXPAND_SZ) => {
            utf16_strings(bytes).into_iter().next().unwrap_or_default()
        }
        Some(REG_MULTI_SZ) => utf16_strings(bytes).join("; "),
        _ => hex_dump(bytes),
    }
}

/// NUL-separated UTF-16LE strings, empty entries dropped.
fn utf16_strings(bytes: &[u8]) -> Vec<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    units
        .split(|&unit| unit == 0)
        .filter(|s| !s.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Applications registered under `.../Uninstall/<id>` keys.
pub(crate) fn installed_apps(accesses: &[RegistryHiveAccess]) -> Vec<InstalledApp> {
    let mut by_key: BTreeMap<&str, InstalledApp> = BTreeMap::new();
    let mut order: Vec<&str> = Vec::new();

    for access in accesses {
        let mut segments = access.key_path.rsplitn(2, '/');
        let (Some(_id), Some(parent)) = (segments.next(), segments.next()) else {
            continue;
        };
        if !parent.to_ascii_lowercase().ends_with("uninstall") {
            continue;
        }

        for value in &access.values {
            let app = by_key.entry(access.key_path.as_str()).or_insert_with(|| {
                order.push(access.key_path.as_str());
                InstalledApp {
                    name: String::new(),
                    version: None,
                    publisher: None,
                    line: value.line,
                }
            });
            match value.name.as_str() {
                "DisplayName" if app.name.is_empty() => {
                    app.name = value.value.clone();
                    app.line = value.line;
                }
                "DisplayVersion" => {
                    app.version.get_or_insert_with(|| value.value.clone());
                }
                "Publisher" => {
                    app.publisher.get_or_insert_with(|| value.value.clone());
                }
                _ => {}
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(key))
        .filter(|app| !app.name.is_empty())
        .collect()
}
