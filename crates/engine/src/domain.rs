//! Embedded domain document capture.
//!
//! Lines from `<domain ...>` through `</domain>` are buffered and a handful
//! of targeted patterns pull out the source VM description. This is not an
//! XML parser; unknown structure is ignored.

use crate::types::{SourceDisk, SourceNic, SourceVm};
use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound on buffered document lines
const MAX_DOCUMENT_LINES: usize = 4096;

static OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<domain[\s>]").expect("valid domain open regex"));
static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<name>([^<]+)</name>").expect("valid name regex"));
static MEMORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<memory(?:\s+unit=['"](\w+)['"])?\s*>\s*(\d+)\s*</memory>"#)
        .expect("valid memory regex")
});
static VCPU: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<vcpu\b[^>]*>\s*(\d+)\s*</vcpu>").expect("valid vcpu regex"));
static FIRMWARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<os\b[^>]*\bfirmware=['"](\w+)['"]"#).expect("valid firmware regex")
});
static DISK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<disk\b(.*?)</disk>").expect("valid disk regex"));
static INTERFACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<interface\b(.*?)</interface>").expect("valid interface regex")
});
static DEVICE_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bdevice=['"](\w+)['"]"#).expect("valid device regex"));
static TYPE_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\btype=['"](\w+)['"]"#).expect("valid type regex"));
static DISK_SOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<source\s+(?:file|dev|name|volume)=['"]([^'"]+)['"]"#)
        .expect("valid disk source regex")
});
static TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<target\s+dev=['"]([^'"]+)['"](?:\s+bus=['"](\w+)['"])?"#)
        .expect("valid target regex")
});
static NIC_SOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<source\s+(?:network|bridge|dev|portgroup)=['"]([^'"]+)['"]"#)
        .expect("valid nic source regex")
});
static MAC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<mac\s+address=['"]([^'"]+)['"]"#).expect("valid mac regex")
});
static MODEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<model\s+type=['"]([^'"]+)['"]"#).expect("valid model regex")
});

#[derive(Debug, Default)]
pub(crate) struct DomainCapture {
    buffer: Vec<String>,
    start: Option<usize>,
    vm: Option<SourceVm>,
}

impl DomainCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer document lines; only the first document in a section is kept.
    pub fn step(&mut self, line: &str, number: usize) {
        if self.vm.is_some() {
            return;
        }

        if self.start.is_none() {
            let Some(m) = OPEN.find(line) else {
                return;
            };
            self.start = Some(number);
            self.buffer.push(line[m.start()..].to_string());
        } else if self.buffer.len() < MAX_DOCUMENT_LINES {
            self.buffer.push(line.to_string());
        }

        if line.contains("</domain>") {
            self.complete();
        }
    }

    /// The source VM, extracting from a partial document if it never closed.
    pub fn finish(mut self) -> Option<SourceVm> {
        if self.vm.is_none() && self.start.is_some() {
            self.complete();
        }
        self.vm
    }

    fn complete(&mut self) {
        let document = std::mem::take(&mut self.buffer).join("\n");
        self.vm = Some(extract_source_vm(&document, self.start.unwrap_or_default()));
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn open_tag(body: &str) -> &str {
    body.split('>').next().unwrap_or_default()
}

/// Pull the source VM description out of a domain document.
pub(crate) fn extract_source_vm(document: &str, line: usize) -> SourceVm {
    let memory_kib = MEMORY.captures(document).and_then(|caps| {
        let amount: u64 = caps.get(2)?.as_str().parse().ok()?;
        let unit = caps.get(1).map_or("KiB", |m| m.as_str());
        to_kib(amount, unit)
    });

    let firmware = capture(&FIRMWARE, document).or_else(|| {
        let uefi = document.contains("<loader") || document.contains("OVMF");
        Some(if uefi { "uefi" } else { "bios" }.to_string())
    });

    let disks = DISK
        .captures_iter(document)
        .filter_map(|caps| caps.get(1))
        .map(|body| {
            let body = body.as_str();
            let target = TARGET.captures(body);
            SourceDisk {
                device: capture(&DEVICE_ATTR, open_tag(body)),
                source: capture(&DISK_SOURCE, body),
                target: target
                    .as_ref()
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string()),
                bus: target
                    .as_ref()
                    .and_then(|c| c.get(2))
                    .map(|m| m.as_str().to_string()),
            }
        })
        .collect();

    let networks = INTERFACE
        .captures_iter(document)
        .filter_map(|caps| caps.get(1))
        .map(|body| {
            let body = body.as_str();
            SourceNic {
                kind: capture(&TYPE_ATTR, open_tag(body)),
                source: capture(&NIC_SOURCE, body),
                mac: capture(&MAC, body),
                model: capture(&MODEL, body),
            }
        })
        .collect();

    SourceVm {
        name: capture(&NAME, document),
        memory_kib,
        vcpus: capture(&VCPU, document).and_then(|v| v.parse().ok()),
        firmware,
        disks,
        networks,
        line,
    }
}

fn to_kib(amount: u64, unit: &str) -> Option<u64> {
    match unit.to_ascii_lowercase().as_str() {
        "b" | "bytes" => Some(amount / 1024),
        "k" | "kib" | "kb" => Some(amount),
        "m" | "mib" | "mb" => amount.checked_mul(1024),
        "g" | "gib" | "gb" => amount.checked_mul(1024 * 1024),
        "t" | "tib" | "tb" => amount.checked_mul(1024 * 1024 * 1024),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOMAIN: &[&str] = &[
        "virt-v2v: source: <domain type='vmware'>",
        "  <name>win2019</name>",
        "  <memory unit='MiB'>4096</memory>",
        "  <vcpu>2</vcpu>",
        "  <os firmware='efi'><type>hvm</type></os>",
        "  <devices>",
        "    <disk type='file' device='disk'>",
        "      <source file='[datastore1] win2019/win2019.vmdk'/>",
        "      <target dev='sda' bus='scsi'/>",
        "    </disk>",
        "    <interface type='bridge'>",
        "      <mac address='00:50:56:aa:bb:cc'/>",
        "      <source bridge='VM Network'/>",
        "      <model type='vmxnet3'/>",
        "    </interface>",
        "  </devices>",
        "</domain>",
        "  <name>ignored</name>",
    ];

    #[test]
    fn extracts_source_vm() {
        let mut capture = DomainCapture::new();
        for (idx, line) in DOMAIN.iter().enumerate() {
            capture.step(line, idx + 100);
        }
        let vm = capture.finish().unwrap();

        assert_eq!(vm.name.as_deref(), Some("win2019"));
        assert_eq!(vm.memory_kib, Some(4 * 1024 * 1024));
        assert_eq!(vm.vcpus, Some(2));
        assert_eq!(vm.firmware.as_deref(), Some("efi"));
        assert_eq!(vm.line, 100);
        assert_eq!(
            vm.disks,
            vec![SourceDisk {
                device: Some("disk".to_string()),
                source: Some("[datastore1] win2019/win2019.vmdk".to_string()),
                target: Some("sda".to_string()),
                bus: Some("scsi".to_string()),
            }]
        );
        assert_eq!(vm.networks[0].kind.as_deref(), Some("bridge"));
        assert_eq!(vm.networks[0].source.as_deref(), Some("VM Network"));
        assert_eq!(vm.networks[0].model.as_deref(), Some("vmxnet3"));
    }

    #[test]
    fn firmware_defaults_to_bios() {
        let vm = extract_source_vm("<domain><name>a</name><memory>1024</memory></domain>", 1);
        assert_eq!(vm.firmware.as_deref(), Some("bios"));
        assert_eq!(vm.memory_kib, Some(1024));
    }
}
