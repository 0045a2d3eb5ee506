use port_sentry_rs::diff::detect_changes;
use port_sentry_rs::types::{now_rfc3339, Protocol, Snapshot, SnapshotEntry};

fn entry(port: u16, protocol: Protocol, state: &str, pid: u32, name: &str) -> SnapshotEntry {
    SnapshotEntry {
        port,
        protocol,
        state: state.to_string(),
        pid: Some(pid),
        process_name: name.to_string(),
        user: "root".to_string(),
        cmdline: format!("/usr/bin/{name}"),
        exe_path: format!("/usr/bin/{name}"),
        start_time: String::new(),
        local_address: format!("0.0.0.0:{port}"),
        remote_address: None,
        timestamp: now_rfc3339(),
    }
}

#[test]
fn identical_snapshots_yield_no_changes() {
    let a = Snapshot::from_entries(vec![
        entry(22, Protocol::Tcp, "LISTEN", 100, "sshd"),
        entry(53, Protocol::Udp, "NONE", 200, "systemd-resolved"),
    ]);
    let b = a.clone();
    let changes = detect_changes(&a, &b);
    assert!(changes.is_empty());
    assert_eq!(changes.len(), 0);
}

#[test]
fn port_only_in_current_is_new_exactly_once() {
    let previous = Snapshot::from_entries(vec![]);
    let current = Snapshot::from_entries(vec![entry(22, Protocol::Tcp, "LISTEN", 100, "sshd")]);
    let changes = detect_changes(&previous, &current);
    assert_eq!(changes.new_ports.len(), 1);
    assert_eq!(changes.new_ports[0].port, 22);
    assert!(changes.closed_ports.is_empty());
    assert!(changes.changed_ports.is_empty());
}

#[test]
fn port_only_in_previous_is_closed_exactly_once() {
    let previous =
        Snapshot::from_entries(vec![entry(8080, Protocol::Tcp, "LISTEN", 1, "python")]);
    let current = Snapshot::from_entries(vec![]);
    let changes = detect_changes(&previous, &current);
    assert!(changes.new_ports.is_empty());
    assert_eq!(changes.closed_ports.len(), 1);
    assert_eq!(changes.closed_ports[0].port, 8080);
    assert!(changes.changed_ports.is_empty());
}

#[test]
fn pid_change_yields_one_modified_never_new_plus_closed() {
    let previous = Snapshot::from_entries(vec![entry(443, Protocol::Tcp, "LISTEN", 5, "nginx")]);
    let current = Snapshot::from_entries(vec![entry(443, Protocol::Tcp, "LISTEN", 6, "nginx")]);
    let changes = detect_changes(&previous, &current);
    assert!(changes.new_ports.is_empty());
    assert!(changes.closed_ports.is_empty());
    assert_eq!(changes.changed_ports.len(), 1);
    let modified = &changes.changed_ports[0];
    assert_eq!(modified.previous.pid, Some(5));
    assert_eq!(modified.current.pid, Some(6));
}

#[test]
fn state_change_is_modified() {
    let previous = Snapshot::from_entries(vec![entry(80, Protocol::Tcp, "LISTEN", 7, "nginx")]);
    let current =
        Snapshot::from_entries(vec![entry(80, Protocol::Tcp, "CLOSE_WAIT", 7, "nginx")]);
    let changes = detect_changes(&previous, &current);
    assert_eq!(changes.changed_ports.len(), 1);
    assert_eq!(changes.changed_ports[0].current.state, "CLOSE_WAIT");
}

#[test]
fn unchanged_key_appears_in_no_set() {
    let previous = Snapshot::from_entries(vec![
        entry(22, Protocol::Tcp, "LISTEN", 100, "sshd"),
        entry(80, Protocol::Tcp, "LISTEN", 7, "nginx"),
    ]);
    let current = Snapshot::from_entries(vec![
        entry(22, Protocol::Tcp, "LISTEN", 100, "sshd"),
        entry(8443, Protocol::Tcp, "LISTEN", 9, "caddy"),
    ]);
    let changes = detect_changes(&previous, &current);
    assert_eq!(changes.new_ports.len(), 1);
    assert_eq!(changes.new_ports[0].port, 8443);
    assert_eq!(changes.closed_ports.len(), 1);
    assert_eq!(changes.closed_ports[0].port, 80);
    assert!(changes.changed_ports.is_empty());
    // port 22 is in neither set
    assert!(changes.changes().all(|c| c.port() != 22));
}
