//! Component version detection.
//!
//! An ordered rule table is tried against every line. The first match for a
//! component wins; later lines never overwrite it.

use crate::types::ComponentVersion;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

type Formatter = fn(&Captures) -> Option<String>;

struct VersionRule {
    component: &'static str,
    pattern: Regex,
    format: Option<Formatter>,
}

impl VersionRule {
    fn new(component: &'static str, pattern: &str, format: Option<Formatter>) -> Self {
        Self {
            component,
            pattern: Regex::new(pattern).expect("valid version regex"),
            format,
        }
    }

    fn extract(&self, line: &str) -> Option<String> {
        let caps = self.pattern.captures(line)?;
        match self.format {
            Some(format) => format(&caps),
            None => caps.get(1).map(|m| m.as_str().to_string()),
        }
    }
}

static RULES: Lazy<Vec<VersionRule>> = Lazy::new(|| {
    vec![
        VersionRule::new("virt-v2v", r"\bvirt-v2v:?\s+(?:version\s+)?(\d+\.\d+\.\d+)", None),
        VersionRule::new(
            "virt-customize",
            r"\bvirt-customize:?\s+(?:version\s+)?(\d+\.\d+\.\d+)",
            None,
        ),
        VersionRule::new("libguestfs", r"\blibguestfs:?\s+(?:version:?\s+)?(\d+\.\d+\.\d+)", None),
        VersionRule::new(
            "libguestfs",
            r"guestfs_version = major: (\d+), minor: (\d+), release: (\d+)",
            Some(join_triplet),
        ),
        VersionRule::new("qemu", r"(?i)\bqemu(?:-kvm| emulator)? version (\d+\.\d+\.\d+)", None),
        VersionRule::new(
            "qemu",
            r"qemu version \(reported by libvirt\) = (\d+)",
            Some(packed),
        ),
        VersionRule::new("libvirt", r"\blibvirt version = (\d+)", Some(packed)),
        VersionRule::new("nbdkit", r"\bnbdkit\s+(\d+\.\d+\.\d+)", None),
        VersionRule::new("kernel", r"\bLinux version (\S+)", None),
        VersionRule::new("supermin", r"\bsupermin:?\s+(?:version:?\s+)?(\d+\.\d+\.\d+)", None),
        VersionRule::new("virtio-win", r"\bvirtio-win-(\d+\.\d+\.\d+)", None),
        VersionRule::new("vddk", r"VMware VixDiskLib \((\d+\.\d+\.\d+)\)", None),
    ]
});

fn join_triplet(caps: &Captures) -> Option<String> {
    Some(format!("{}.{}.{}", caps.get(1)?.as_str(), caps.get(2)?.as_str(), caps.get(3)?.as_str()))
}

fn packed(caps: &Captures) -> Option<String> {
    caps.get(1)?.as_str().parse().ok().map(format_packed_version)
}

/// Format a libvirt-style packed version number (`8002000` ⇒ `8.2.0`).
pub fn format_packed_version(packed: u64) -> String {
    format!(
        "{}.{}.{}",
        packed / 1_000_000,
        (packed / 1_000) % 1_000,
        packed % 1_000
    )
}

/// First-match-wins version table for one section
#[derive(Debug, Default)]
pub(crate) struct VersionTable {
    found: Vec<ComponentVersion>,
}

impl VersionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, line: &str, number: usize) {
        for rule in RULES.iter() {
            if self.found.iter().any(|v| v.component == rule.component) {
                continue;
            }
            if let Some(version) = rule.extract(line) {
                self.found.push(ComponentVersion {
                    component: rule.component.to_string(),
                    version,
                    line: number,
                });
            }
        }
    }

    pub fn finish(self) -> Vec<ComponentVersion> {
        self.found
    }
}
