use port_sentry_rs::classify::RiskRules;
use port_sentry_rs::config::Config;
use port_sentry_rs::diff::Change;
use port_sentry_rs::types::{now_rfc3339, AlertLevel, Protocol, SnapshotEntry};

fn entry(port: u16, state: &str, pid: u32, name: &str) -> SnapshotEntry {
    SnapshotEntry {
        port,
        protocol: Protocol::Tcp,
        state: state.to_string(),
        pid: Some(pid),
        process_name: name.to_string(),
        user: "root".to_string(),
        cmdline: String::new(),
        exe_path: String::new(),
        start_time: String::new(),
        local_address: format!("0.0.0.0:{port}"),
        remote_address: None,
        timestamp: now_rfc3339(),
    }
}

fn default_rules() -> RiskRules {
    Config::default().risk_rules().expect("default rules")
}

#[test]
fn new_on_high_risk_port_is_error() {
    let rules = default_rules();
    let e = entry(22, "LISTEN", 100, "sshd");
    let verdict = rules.classify(&Change::New(&e));
    assert_eq!(verdict.level, AlertLevel::Error);
    assert_eq!(verdict.title, "Port opened");
    assert!(verdict.message.contains("high-risk port 22"));
}

#[test]
fn closed_on_same_high_risk_port_is_warning_not_error() {
    let rules = default_rules();
    let e = entry(22, "LISTEN", 100, "sshd");
    let verdict = rules.classify(&Change::Closed(&e));
    assert_eq!(verdict.level, AlertLevel::Warning);
    assert_eq!(verdict.title, "Port closed");
}

#[test]
fn closed_ordinary_port_is_info() {
    let rules = default_rules();
    let e = entry(8080, "LISTEN", 1, "python");
    let verdict = rules.classify(&Change::Closed(&e));
    assert_eq!(verdict.level, AlertLevel::Info);
    assert!(verdict.message.contains("python"));
}

#[test]
fn new_suspicious_tool_is_error() {
    let rules = default_rules();
    let e = entry(45000, "LISTEN", 666, "socat");
    let verdict = rules.classify(&Change::New(&e));
    assert_eq!(verdict.level, AlertLevel::Error);
    assert!(verdict.message.contains("suspicious process 'socat'"));
}

#[test]
fn transitional_state_is_warning() {
    let rules = default_rules();
    let e = entry(50123, "SYN_SENT", 42, "curl");
    let verdict = rules.classify(&Change::New(&e));
    assert_eq!(verdict.level, AlertLevel::Warning);
}

#[test]
fn new_on_medium_risk_port_is_warning() {
    let rules = default_rules();
    let e = entry(6379, "LISTEN", 10, "redis-server");
    let verdict = rules.classify(&Change::New(&e));
    assert_eq!(verdict.level, AlertLevel::Warning);
}

#[test]
fn unmatched_change_falls_back_to_info() {
    let rules = default_rules();
    let e = entry(3000, "LISTEN", 10, "node");
    let verdict = rules.classify(&Change::New(&e));
    assert_eq!(verdict.level, AlertLevel::Info);
    // INFO messages carry no rationale suffix.
    assert!(!verdict.message.contains('['));
}

#[test]
fn classify_is_deterministic() {
    let rules = default_rules();
    let e = entry(22, "LISTEN", 100, "sshd");
    let first = rules.classify(&Change::New(&e));
    let second = rules.classify(&Change::New(&e));
    assert_eq!(first, second);
}

#[test]
fn modified_message_notes_previous_and_current_state() {
    let rules = default_rules();
    let previous = entry(443, "LISTEN", 5, "nginx");
    let current = entry(443, "ESTABLISHED", 6, "nginx");
    let verdict = rules.classify(&Change::Modified {
        previous: &previous,
        current: &current,
    });
    assert_eq!(verdict.title, "Port changed");
    assert!(verdict.message.contains("LISTEN -> ESTABLISHED"));
    assert!(verdict.message.contains("5 -> 6"));
}

#[test]
fn modified_is_classified_on_current_state() {
    let rules = default_rules();
    let previous = entry(9000, "CLOSE_WAIT", 5, "java");
    let current = entry(9000, "ESTABLISHED", 5, "java");
    // Previous state was suspicious, current is not: INFO.
    let verdict = rules.classify(&Change::Modified {
        previous: &previous,
        current: &current,
    });
    assert_eq!(verdict.level, AlertLevel::Info);
}
