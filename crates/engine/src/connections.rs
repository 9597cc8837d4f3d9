//! Storage connection blocks (`running nbdkit` / `running qemu-nbd`).
//!
//! A block opens on the `running <tool>` line and continues while lines
//! still look like storage-tool output. Attributes are pulled out by
//! independent per-line patterns; records are keyed by socket path so a
//! socket seen twice updates one connection.

use crate::category::is_storage_line;
use crate::types::StorageConnection;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Raw excerpt lines kept per connection
const EXCERPT_LIMIT: usize = 64;

static OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\brunning (nbdkit|qemu-nbd)\b").expect("valid open regex"));
static SOCKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:--unix|(?:^|\s)'?-k)'?[\s=]+'?([^'\s]+)"#).expect("valid socket regex")
});
static URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(nbd(?:\+unix|s)?://\S+)").expect("valid uri regex"));
static PLUGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:nbdkit-(\w+)-plugin|registered plugin \S+ \(name (\w+)\)|'(\w+)' '\w+=)")
        .expect("valid plugin regex")
});
static FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:--filter'?[\s=]+'?(\w+)|nbdkit-(\w+)-filter)").expect("valid filter regex")
});
static BACKING_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:'file=([^']+)'|\bfile=([^'\s]+))").expect("valid file regex")
});
static TRANSPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\btransports=|transport mode:\s*)'?([\w:]+)").expect("valid transport regex")
});
static ENDPOINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:server|url)=([^'\s]+)").expect("valid endpoint regex")
});
static VM_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bvm=(moref=[^'\s]+)").expect("valid vm regex"));
static SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:get_)?size\s*[:=]\s*(\d+)\b").expect("valid size regex")
});

#[derive(Debug, Default)]
pub(crate) struct ConnectionTracker {
    current: Option<StorageConnection>,
    finished: Vec<StorageConnection>,
    by_id: HashMap<String, usize>,
    generated: usize,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; opens, continues or closes the current block.
    pub fn step(&mut self, line: &str, number: usize) {
        if let Some(caps) = OPEN.captures(line) {
            self.close();
            self.current = Some(StorageConnection {
                server: caps[1].to_ascii_lowercase(),
                start_line: number,
                end_line: number,
                ..Default::default()
            });
        } else if self.current.is_some() && !is_storage_line(line) {
            self.close();
            return;
        }

        if let Some(conn) = self.current.as_mut() {
            conn.end_line = number;
            if conn.excerpt.len() < EXCERPT_LIMIT {
                conn.excerpt.push(line.to_string());
            }
            extract_attributes(conn, line);
        }
    }

    fn close(&mut self) {
        let Some(mut conn) = self.current.take() else {
            return;
        };
        conn.id = match &conn.socket_path {
            Some(socket) => socket.clone(),
            None => {
                self.generated += 1;
                format!("{}-{}", conn.server, self.generated)
            }
        };

        match self.by_id.get(&conn.id) {
            Some(&idx) => merge(&mut self.finished[idx], conn),
            None => {
                self.by_id.insert(conn.id.clone(), self.finished.len());
                self.finished.push(conn);
            }
        }
    }

    pub fn finish(mut self) -> Vec<StorageConnection> {
        self.close();
        self.finished
    }
}

fn extract_attributes(conn: &mut StorageConnection, line: &str) {
    let first = |re: &Regex| {
        re.captures(line).and_then(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str().to_string())
        })
    };

    if conn.socket_path.is_none() {
        conn.socket_path = first(&SOCKET);
    }
    if conn.export_uri.is_none() {
        conn.export_uri = first(&URI);
    }
    if conn.plugin.is_none() {
        conn.plugin = first(&PLUGIN);
    }
    for caps in FILTER.captures_iter(line) {
        if let Some(name) = caps.iter().skip(1).flatten().next() {
            if !conn.filters.iter().any(|f| f == name.as_str()) {
                conn.filters.push(name.as_str().to_string());
            }
        }
    }
    if conn.backing_file.is_none() {
        conn.backing_file = first(&BACKING_FILE);
    }
    if conn.transport.is_none() {
        conn.transport = first(&TRANSPORT);
    }
    if conn.remote_endpoint.is_none() {
        conn.remote_endpoint = first(&ENDPOINT);
    }
    if conn.vm_reference.is_none() {
        conn.vm_reference = first(&VM_REFERENCE);
    }
    if let Some(size) = first(&SIZE).and_then(|s| s.parse().ok()) {
        conn.backing_size = Some(size);
    }
}

fn merge(into: &mut StorageConnection, from: StorageConnection) {
    into.start_line = into.start_line.min(from.start_line);
    into.end_line = into.end_line.max(from.end_line);
    into.export_uri = into.export_uri.take().or(from.export_uri);
    into.plugin = into.plugin.take().or(from.plugin);
    into.backing_file = into.backing_file.take().or(from.backing_file);
    into.transport = into.transport.take().or(from.transport);
    into.remote_endpoint = into.remote_endpoint.take().or(from.remote_endpoint);
    into.vm_reference = into.vm_reference.take().or(from.vm_reference);
    into.backing_size = from.backing_size.or(into.backing_size);
    for filter in from.filters {
        if !into.filters.contains(&filter) {
            into.filters.push(filter);
        }
    }
    let room = EXCERPT_LIMIT.saturating_sub(into.excerpt.len());
    into.excerpt.extend(from.excerpt.into_iter().take(room));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(lines: &[&str]) -> Vec<StorageConnection> {
        let mut tracker = ConnectionTracker::new();
        for (idx, line) in lines.iter().enumerate() {
            tracker.step(line, idx + 1);
        }
        tracker.finish()
    }

    #[test]
    fn extracts_vddk_block() {
        let conns = feed(&[
            "running nbdkit:",
            " LANG=C 'nbdkit' '--exit-with-parent' '--foreground' '--unix' '/tmp/v2v.sock' '--filter' 'cacheextents' '--filter' 'retry' 'vddk' 'server=vcenter.example.com' 'vm=moref=vm-1234' 'file=[datastore1] vm1/vm1.vmdk' 'transports=nbdssl:nbd'",
            "nbdkit: vddk[1]: debug: get_size: 21474836480",
            "nbdkit: debug: registered filter cacheextents (name cacheextents)",
            "virt-v2v: info: next line",
        ]);

        assert_eq!(conns.len(), 1);
        let conn = &conns[0];
        assert_eq!(conn.id, "/tmp/v2v.sock");
        assert_eq!(conn.server, "nbdkit");
        assert_eq!(conn.plugin.as_deref(), Some("vddk"));
        assert_eq!(conn.filters, vec!["cacheextents", "retry"]);
        assert_eq!(conn.remote_endpoint.as_deref(), Some("vcenter.example.com"));
        assert_eq!(conn.vm_reference.as_deref(), Some("moref=vm-1234"));
        assert_eq!(conn.transport.as_deref(), Some("nbdssl:nbd"));
        assert_eq!(conn.backing_size, Some(21474836480));
        assert_eq!((conn.start_line, conn.end_line), (1, 4));
    }

    #[test]
    fn same_socket_updates_one_record() {
        let conns = feed(&[
            "running nbdkit:",
            " 'nbdkit' '--unix' '/tmp/a.sock' 'file' 'file=/var/tmp/disk.img'",
            "other",
            "running nbdkit:",
            " 'nbdkit' '--unix' '/tmp/a.sock' '--filter' 'cow'",
            "running qemu-nbd:",
            " 'qemu-nbd' '-t' '-k' '/tmp/b.sock' '/var/tmp/disk2.qcow2'",
        ]);
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[0].backing_file.as_deref(), Some("/var/tmp/disk.img"));
        assert_eq!(conns[0].filters, vec!["cow"]);
        assert_eq!(conns[0].end_line, 5);
        assert_eq!(conns[1].server, "qemu-nbd");
        assert_eq!(conns[1].id, "/tmp/b.sock");
    }

    #[test]
    fn indented_inspection_output_closes_the_block() {
        let conns = feed(&[
            "running nbdkit:",
            " 'nbdkit' '--unix' '/tmp/c.sock' 'file' 'file=/var/tmp/disk.img'",
            "    fs: /dev/sda1 (xfs) size=1073741824",
            "    distro: rhel",
        ]);
        assert_eq!(conns.len(), 1);
        assert_eq!((conns[0].start_line, conns[0].end_line), (1, 2));
        assert_eq!(conns[0].backing_size, None);
        assert_eq!(conns[0].excerpt.len(), 2);
    }
}
