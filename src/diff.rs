use serde::Serialize;

use crate::types::{Snapshot, SnapshotEntry};

/// A modified endpoint: same (port, protocol) key, different state or pid.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ModifiedPort {
    pub previous: SnapshotEntry,
    pub current: SnapshotEntry,
}

/// Changes between two snapshots. Each key appears in at most one of the
/// three sets; order within a set carries no meaning.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ChangeSet {
    pub new_ports: Vec<SnapshotEntry>,
    pub closed_ports: Vec<SnapshotEntry>,
    pub changed_ports: Vec<ModifiedPort>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new_ports.is_empty() && self.closed_ports.is_empty() && self.changed_ports.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new_ports.len() + self.closed_ports.len() + self.changed_ports.len()
    }

    /// Iterate every change as a borrowed tagged variant for classification.
    pub fn changes(&self) -> impl Iterator<Item = Change<'_>> {
        self.new_ports
            .iter()
            .map(Change::New)
            .chain(self.closed_ports.iter().map(Change::Closed))
            .chain(self.changed_ports.iter().map(|m| Change::Modified {
                previous: &m.previous,
                current: &m.current,
            }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Closed,
    Modified,
}

/// Borrowed view of one change, consumed by the risk classifier.
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    New(&'a SnapshotEntry),
    Closed(&'a SnapshotEntry),
    Modified {
        previous: &'a SnapshotEntry,
        current: &'a SnapshotEntry,
    },
}

impl<'a> Change<'a> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::New(_) => ChangeKind::New,
            Change::Closed(_) => ChangeKind::Closed,
            Change::Modified { .. } => ChangeKind::Modified,
        }
    }

    /// The entry rules are evaluated against: the current side for
    /// `Modified`, the observed entry otherwise.
    pub fn entry(&self) -> &'a SnapshotEntry {
        match self {
            Change::New(e) | Change::Closed(e) => e,
            Change::Modified { current, .. } => current,
        }
    }

    pub fn port(&self) -> u16 {
        self.entry().port
    }
}

/// Diff two snapshots into new/closed/modified sets.
///
/// Keys present only in `current` are new, keys present only in `previous`
/// are closed, and keys present in both with a differing connection state or
/// owning pid emit exactly one `Modified` entry.
pub fn detect_changes(previous: &Snapshot, current: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (key, entry) in &current.entries {
        match previous.entries.get(key) {
            None => changes.new_ports.push(entry.clone()),
            Some(prev) => {
                if prev.state != entry.state || prev.pid != entry.pid {
                    changes.changed_ports.push(ModifiedPort {
                        previous: prev.clone(),
                        current: entry.clone(),
                    });
                }
            }
        }
    }

    for (key, entry) in &previous.entries {
        if !current.entries.contains_key(key) {
            changes.closed_ports.push(entry.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_rfc3339, Protocol};

    fn entry(port: u16, state: &str, pid: u32) -> SnapshotEntry {
        SnapshotEntry {
            port,
            protocol: Protocol::Tcp,
            state: state.to_string(),
            pid: Some(pid),
            process_name: "proc".to_string(),
            user: "root".to_string(),
            cmdline: String::new(),
            exe_path: String::new(),
            start_time: String::new(),
            local_address: format!("0.0.0.0:{port}"),
            remote_address: None,
            timestamp: now_rfc3339(),
        }
    }

    #[test]
    fn same_key_different_protocol_is_distinct() {
        let mut udp = entry(53, "NONE", 9);
        udp.protocol = Protocol::Udp;
        let prev = Snapshot::from_entries(vec![entry(53, "LISTEN", 9)]);
        let curr = Snapshot::from_entries(vec![entry(53, "LISTEN", 9), udp]);
        let changes = detect_changes(&prev, &curr);
        assert_eq!(changes.new_ports.len(), 1);
        assert_eq!(changes.new_ports[0].protocol, Protocol::Udp);
        assert!(changes.closed_ports.is_empty());
        assert!(changes.changed_ports.is_empty());
    }

    #[test]
    fn pid_change_is_modified_not_new_plus_closed() {
        let prev = Snapshot::from_entries(vec![entry(443, "LISTEN", 5)]);
        let curr = Snapshot::from_entries(vec![entry(443, "LISTEN", 6)]);
        let changes = detect_changes(&prev, &curr);
        assert!(changes.new_ports.is_empty());
        assert!(changes.closed_ports.is_empty());
        assert_eq!(changes.changed_ports.len(), 1);
        assert_eq!(changes.changed_ports[0].previous.pid, Some(5));
        assert_eq!(changes.changed_ports[0].current.pid, Some(6));
    }

    #[test]
    fn change_iterator_visits_every_set() {
        let prev = Snapshot::from_entries(vec![entry(1, "LISTEN", 1), entry(2, "LISTEN", 2)]);
        let curr = Snapshot::from_entries(vec![entry(2, "ESTABLISHED", 2), entry(3, "LISTEN", 3)]);
        let changes = detect_changes(&prev, &curr);
        let kinds: Vec<ChangeKind> = changes.changes().map(|c| c.kind()).collect();
        assert_eq!(kinds.len(), 3);
        assert!(kinds.contains(&ChangeKind::New));
        assert!(kinds.contains(&ChangeKind::Closed));
        assert!(kinds.contains(&ChangeKind::Modified));
    }
}
