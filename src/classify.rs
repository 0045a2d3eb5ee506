//! Deterministic risk classification of snapshot changes.
//!
//! Rules live in an ordered table evaluated first-match-wins, so a new rule
//! is a new table row rather than another branch in a conditional tree.

use std::collections::HashSet;

use crate::diff::{Change, ChangeKind};
use crate::types::AlertLevel;

/// Configured inputs to classification.
#[derive(Debug, Clone)]
pub struct RiskRules {
    pub high_risk_ports: HashSet<u16>,
    pub medium_risk_ports: HashSet<u16>,
    /// Lowercased substrings matched against process names.
    pub suspicious_tools: Vec<String>,
    /// Transitional TCP states (half-open/half-closed).
    pub suspicious_states: HashSet<String>,
}

impl RiskRules {
    pub fn new(
        high_risk_ports: HashSet<u16>,
        medium_risk_ports: HashSet<u16>,
        suspicious_tools: Vec<String>,
        suspicious_states: HashSet<String>,
    ) -> Self {
        RiskRules {
            high_risk_ports,
            medium_risk_ports,
            suspicious_tools: suspicious_tools
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            suspicious_states,
        }
    }

    /// Classify one change. Pure: identical (kind, port, process, state)
    /// inputs always yield the identical verdict.
    pub fn classify(&self, change: &Change<'_>) -> Verdict {
        let facts = Facts::from_change(change);
        let matched = RULE_TABLE
            .iter()
            .find_map(|rule| (rule.matches)(self, &facts).map(|why| (rule.level, why)));

        let (level, rationale) = match matched {
            Some((level, why)) => (level, Some(why)),
            None => (AlertLevel::Info, None),
        };

        let mut message = base_message(change);
        if level == AlertLevel::Error {
            if let Some(why) = rationale {
                message.push_str(&format!(" [{why}]"));
            }
        }

        Verdict {
            level,
            title: title_for(facts.kind),
            message,
        }
    }
}

/// Outcome of classifying a single change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
}

/// The classification inputs extracted from a change. `Modified` changes are
/// evaluated on their current side.
struct Facts<'a> {
    kind: ChangeKind,
    port: u16,
    process_name: &'a str,
    state: &'a str,
}

impl<'a> Facts<'a> {
    fn from_change(change: &Change<'a>) -> Self {
        let entry = change.entry();
        Facts {
            kind: change.kind(),
            port: entry.port,
            process_name: &entry.process_name,
            state: &entry.state,
        }
    }
}

/// One row of the classification table. A matcher returns the rationale
/// string when it applies.
struct Rule {
    level: AlertLevel,
    matches: fn(&RiskRules, &Facts<'_>) -> Option<String>,
}

/// Evaluated top to bottom, first match wins.
const RULE_TABLE: &[Rule] = &[
    Rule {
        level: AlertLevel::Error,
        matches: new_on_high_risk_port,
    },
    Rule {
        level: AlertLevel::Error,
        matches: new_from_suspicious_tool,
    },
    Rule {
        level: AlertLevel::Warning,
        matches: transitional_state,
    },
    Rule {
        level: AlertLevel::Warning,
        matches: new_on_medium_risk_port,
    },
    Rule {
        level: AlertLevel::Warning,
        matches: closed_high_risk_port,
    },
];

fn new_on_high_risk_port(rules: &RiskRules, facts: &Facts<'_>) -> Option<String> {
    (facts.kind == ChangeKind::New && rules.high_risk_ports.contains(&facts.port))
        .then(|| format!("high-risk port {}", facts.port))
}

fn new_from_suspicious_tool(rules: &RiskRules, facts: &Facts<'_>) -> Option<String> {
    if facts.kind != ChangeKind::New {
        return None;
    }
    let name = facts.process_name.to_lowercase();
    rules
        .suspicious_tools
        .iter()
        .find(|tool| name.contains(tool.as_str()))
        .map(|tool| format!("suspicious process '{tool}'"))
}

fn transitional_state(rules: &RiskRules, facts: &Facts<'_>) -> Option<String> {
    rules
        .suspicious_states
        .contains(facts.state)
        .then(|| format!("transitional state {}", facts.state))
}

fn new_on_medium_risk_port(rules: &RiskRules, facts: &Facts<'_>) -> Option<String> {
    (facts.kind == ChangeKind::New && rules.medium_risk_ports.contains(&facts.port))
        .then(|| format!("medium-risk port {}", facts.port))
}

fn closed_high_risk_port(rules: &RiskRules, facts: &Facts<'_>) -> Option<String> {
    (facts.kind == ChangeKind::Closed && rules.high_risk_ports.contains(&facts.port))
        .then(|| format!("high-risk port {} closed", facts.port))
}

fn title_for(kind: ChangeKind) -> String {
    match kind {
        ChangeKind::New => "Port opened",
        ChangeKind::Closed => "Port closed",
        ChangeKind::Modified => "Port changed",
    }
    .to_string()
}

fn base_message(change: &Change<'_>) -> String {
    match change {
        Change::New(e) => format!(
            "Port {} ({}) opened by {} ({})",
            e.port, e.protocol, e.process_name, e.state
        ),
        Change::Closed(e) => format!(
            "Port {} ({}) closed - was {}",
            e.port, e.protocol, e.process_name
        ),
        Change::Modified { previous, current } => format!(
            "Port {} ({}) changed: state {} -> {}, pid {} -> {}",
            current.port,
            current.protocol,
            previous.state,
            current.state,
            fmt_pid(previous.pid),
            fmt_pid(current.pid),
        ),
    }
}

fn fmt_pid(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}
