//! Pairs appliance reads with later writes to reconstruct file copies.
//!
//! Four kinds are recognised: driver media (read on a handle that opened the
//! driver ISO, then written into the guest), guest edits (read and write of
//! the same guest path), generated content (a write nothing was read for)
//! and host uploads.

use crate::trace::{arg_text, parse_payload, split_args, Payload};
use crate::types::{CopyOrigin, CopySource, FileCopy};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static ISO_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(/\S*virtio-win\S*\.iso)\b").expect("valid iso path regex"));

const READ_CALLS: &[&str] = &["read_file", "cat", "read_lines"];
const WRITE_CALLS: &[&str] = &["write", "write_append"];
const DRIVE_CALLS: &[&str] = &["add_drive", "add_drive_opts", "add_drive_ro", "add_cdrom"];
const STAGING_DIRS: &[&str] = &["/tmp/", "/var/tmp/"];

#[derive(Debug, Clone)]
struct PendingRead {
    path: String,
    size: Option<u64>,
    content: Option<String>,
    truncated: bool,
}

impl PendingRead {
    fn new(path: String) -> Self {
        Self {
            path,
            size: None,
            content: None,
            truncated: false,
        }
    }

    fn fill(&mut self, payload: &Payload, max_chars: usize) {
        self.size = Some(payload.size());
        self.truncated = payload.truncated();
        self.content = payload.decoded_text(max_chars);
    }
}

#[derive(Debug, Default)]
pub(crate) struct CopyPairer {
    max_content: usize,
    media_handles: HashSet<String>,
    iso_path: Option<String>,
    pending_media: Option<PendingRead>,
    pending_edits: HashMap<String, PendingRead>,
    copies: Vec<FileCopy>,
}

impl CopyPairer {
    pub fn new(max_content: usize) -> Self {
        Self {
            max_content,
            ..Default::default()
        }
    }

    /// Remember a driver ISO path mentioned anywhere in the section.
    pub fn note_line(&mut self, line: &str) {
        if self.iso_path.is_none() {
            if let Some(caps) = ISO_PATH.captures(line) {
                self.iso_path = Some(caps[1].to_string());
            }
        }
    }

    pub fn on_call(&mut self, handle: &str, name: &str, args: &str, line: usize) {
        if DRIVE_CALLS.contains(&name) {
            let args = split_args(args);
            if let Some(path) = arg_text(&args, 0).filter(|p| p.to_ascii_lowercase().ends_with(".iso")) {
                self.media_handles.insert(handle.to_string());
                self.iso_path.get_or_insert(path);
            }
            return;
        }

        if READ_CALLS.contains(&name) {
            let Some(path) = arg_text(&split_args(args), 0) else {
                return;
            };
            if self.media_handles.contains(handle) {
                self.pending_media = Some(PendingRead::new(path));
            } else {
                self.pending_edits.insert(path.clone(), PendingRead::new(path));
            }
            return;
        }

        if WRITE_CALLS.contains(&name) {
            let args = split_args(args);
            if let Some(destination) = arg_text(&args, 0) {
                let payload = args.get(1).cloned().unwrap_or_default();
                self.on_write(destination, &payload, line);
            }
            return;
        }

        if name == "upload" {
            let args = split_args(args);
            let (Some(host), Some(destination)) = (arg_text(&args, 0), arg_text(&args, 1)) else {
                return;
            };
            if STAGING_DIRS.iter().any(|dir| destination.starts_with(dir)) {
                return;
            }
            self.copies.push(FileCopy {
                source: CopySource::Path(host),
                destination,
                size: None,
                origin: CopyOrigin::HostUpload,
                content: None,
                truncated: false,
                line,
            });
        }
    }

    /// Attach a read result to the read it answers.
    pub fn on_result(&mut self, handle: &str, name: &str, args: &str, value: &str) {
        if !READ_CALLS.contains(&name) {
            return;
        }
        let Some(path) = arg_text(&split_args(args), 0) else {
            return;
        };
        let payload = parse_payload(value);
        let max = self.max_content;

        if self.media_handles.contains(handle) {
            if let Some(pending) = self.pending_media.as_mut().filter(|p| p.path == path) {
                pending.fill(&payload, max);
            }
        } else if let Some(pending) = self.pending_edits.get_mut(&path) {
            pending.fill(&payload, max);
        }
    }

    fn on_write(&mut self, destination: String, payload: &Payload, line: usize) {
        let copy = if let Some(read) = self.pending_media.take() {
            FileCopy {
                source: CopySource::Iso(read.path),
                destination,
                size: read.size,
                origin: CopyOrigin::DriverMedia,
                content: read.content,
                truncated: read.truncated,
                line,
            }
        } else if let Some(read) = self.pending_edits.remove(&destination) {
            FileCopy {
                source: CopySource::Path(read.path),
                destination,
                size: read.size,
                origin: CopyOrigin::GuestEdit,
                content: read.content,
                truncated: read.truncated,
                line,
            }
        } else {
            FileCopy {
                source: CopySource::Generated,
                destination,
                size: Some(payload.size()),
                origin: CopyOrigin::Generated,
                content: payload.decoded_text(self.max_content),
                truncated: payload.truncated(),
                line,
            }
        };
        self.copies.push(copy);
    }

    /// Copies in emission order plus the driver ISO path, if one was seen.
    pub fn finish(self) -> (Vec<FileCopy>, Option<String>) {
        (self.copies, self.iso_path)
    }
}
