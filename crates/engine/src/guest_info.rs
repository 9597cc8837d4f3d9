//! Guest inspection facts.
//!
//! Two encodings feed one raw table (first write wins):
//!
//! ```text
//! i_root = /dev/sda2                       flat
//! fs: /dev/sda2 (xfs) role: root           structured block header
//!     distro: rhel                         structured block entry
//! ```
//!
//! Block-device identification lines (`/dev/sda1: UUID="..." TYPE="xfs"`)
//! are collected alongside. Assembly into [`GuestInfo`] happens once.

use crate::types::{BlockDevice, DriveMapping, FstabEntry, GuestInfo, WindowsPaths};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Raw keys needed before a guest record is assembled
const MIN_RAW_KEYS: usize = 2;

/// Version strings that are really CPE specification versions
const CPE_SPEC_VERSIONS: &[&str] = &["2.2", "2.3"];

static FLAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^i_(\w+) = (.*)$").expect("valid flat inspection regex"));
static ROOT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^fs: (\S+) \(([^)]*)\) role: root\b").expect("valid root block regex")
});
static BLOCK_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+([A-Za-z][\w ]*?):\s*(.*?)\s*$").expect("valid block entry regex")
});
static BLKID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/dev/[^\s:]+):\s+(.*)$").expect("valid blkid regex"));
static BLKID_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\b([A-Z_]+)="([^"]*)""#).expect("valid blkid pair regex"));
static DRIVE_MAPPING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z])\s*=>\s*([^\s,]+)").expect("valid drive mapping regex")
});
static FSTAB_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^,()]+),\s*([^)]+)\)").expect("valid fstab regex"));

#[derive(Debug, Default)]
pub(crate) struct GuestInfoBuilder {
    raw: BTreeMap<String, String>,
    block_devices: Vec<BlockDevice>,
    in_root_block: bool,
}

impl GuestInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, line: &str, number: usize) {
        if let Some(caps) = FLAT.captures(line) {
            self.in_root_block = false;
            self.insert(&caps[1], &caps[2]);
            return;
        }

        if let Some(caps) = ROOT_BLOCK.captures(line) {
            self.in_root_block = true;
            self.insert("root", &caps[1]);
            return;
        }

        if self.in_root_block {
            if let Some(caps) = BLOCK_ENTRY.captures(line) {
                self.insert_structured(&caps[1], &caps[2]);
                return;
            }
            self.in_root_block = false;
        }

        self.observe_block_device(line, number);
    }

    /// Record a `blkid`-style identification line (also fed from captured stdout).
    pub fn observe_block_device(&mut self, line: &str, number: usize) {
        let Some(caps) = BLKID.captures(line.trim()) else {
            return;
        };
        let device = caps[1].to_string();
        if self.block_devices.iter().any(|b| b.device == device) {
            return;
        }

        let mut entry = BlockDevice {
            device,
            line: number,
            ..Default::default()
        };
        let mut seen = false;
        for pair in BLKID_PAIR.captures_iter(&caps[2]) {
            seen = true;
            let value = Some(pair[2].to_string());
            match &pair[1] {
                "UUID" => entry.uuid = value,
                "TYPE" => entry.fs_type = value,
                "LABEL" => entry.label = value,
                _ => {}
            }
        }
        if seen {
            self.block_devices.push(entry);
        }
    }

    fn insert(&mut self, key: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        self.raw
            .entry(key.to_ascii_lowercase())
            .or_insert_with(|| value.to_string());
    }

    fn insert_structured(&mut self, key: &str, value: &str) {
        let key = key.trim().to_ascii_lowercase().replace(' ', "_");
        match key.as_str() {
            "version" => {
                let mut parts = value.splitn(2, '.');
                if let (Some(major), Some(minor)) = (parts.next(), parts.next()) {
                    if major.chars().all(|c| c.is_ascii_digit()) {
                        self.insert("major_version", major);
                        self.insert("minor_version", minor);
                    }
                }
                self.insert("version", value);
            }
            "product_name" | "type" | "distro" | "arch" | "hostname" | "package_format"
            | "package_management" | "cpe" | "drive_mappings" | "fstab" | "mountpoints" => {
                self.insert(&key, value)
            }
            other if other.starts_with("windows_") => self.insert(other, value),
            _ => {}
        }
    }

    /// Assemble the record, or `None` when too little was seen.
    pub fn assemble(self) -> Option<GuestInfo> {
        let Self {
            raw, block_devices, ..
        } = self;
        if raw.len() < MIN_RAW_KEYS && block_devices.is_empty() {
            return None;
        }

        let get = |key: &str| raw.get(key).cloned();
        let os_version = os_version(&raw);

        let windows = [
            "windows_systemroot",
            "windows_software_hive",
            "windows_system_hive",
            "windows_current_control_set",
        ]
        .iter()
        .any(|k| raw.contains_key(*k))
        .then(|| WindowsPaths {
            system_root: get("windows_systemroot"),
            software_hive: get("windows_software_hive"),
            system_hive: get("windows_system_hive"),
            current_control_set: get("windows_current_control_set"),
        });

        let drive_mappings = raw
            .get("drive_mappings")
            .map(|text| {
                DRIVE_MAPPING
                    .captures_iter(text)
                    .map(|caps| DriveMapping {
                        letter: caps[1].to_ascii_uppercase(),
                        device: caps[2].to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let fstab = raw
            .get("fstab")
            .or_else(|| raw.get("mountpoints"))
            .map(|text| {
                FSTAB_PAIR
                    .captures_iter(text)
                    .map(|caps| FstabEntry {
                        device: caps[1].trim().to_string(),
                        mountpoint: caps[2].trim().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(GuestInfo {
            root_device: get("root"),
            os_type: get("type"),
            distro: get("distro"),
            arch: get("arch"),
            os_version,
            product_name: get("product_name"),
            hostname: get("hostname"),
            package_format: get("package_format"),
            package_management: get("package_management"),
            windows,
            drive_mappings,
            fstab,
            block_devices,
        })
    }
}

/// `major.minor` when both are known, else the literal version; a version
/// that is really the CPE specification version defers to the CPE string.
fn os_version(raw: &BTreeMap<String, String>) -> Option<String> {
    let literal = match (raw.get("major_version"), raw.get("minor_version")) {
        (Some(major), Some(minor)) => Some(format!("{major}.{minor}")),
        (Some(major), None) => Some(major.clone()),
        _ => raw.get("version").cloned(),
    };

    let suspicious = literal
        .as_deref()
        .map_or(true, |v| CPE_SPEC_VERSIONS.contains(&v));
    if !suspicious {
        return literal;
    }

    raw.values()
        .find_map(|value| version_from_cpe(value))
        .or(literal)
}

/// Version field of a CPE name (`cpe:/o:redhat:enterprise_linux:9.2`,
/// `cpe:2.3:o:redhat:enterprise_linux:9.2:*:...`).
pub(crate) fn version_from_cpe(text: &str) -> Option<String> {
    let start = text.find("cpe:")?;
    let fields: Vec<&str> = text[start..]
        .split_whitespace()
        .next()?
        .trim_matches(|c| c == '"' || c == '\'')
        .split(':')
        .collect();
    let index = if fields.get(1) == Some(&"2.3") { 5 } else { 4 };
    fields
        .get(index)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != "*" && *v != "-")
        .map(str::to_string)
}
