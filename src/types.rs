use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::{format_description::well_known, OffsetDateTime};

/// Transport protocol of an observed endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Unknown,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Identity of an endpoint within a snapshot. If two processes share a key
/// the later one shadows the former (documented limitation).
pub type EndpointKey = (u16, Protocol);

/// One observed local endpoint with process attribution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub port: u16,
    pub protocol: Protocol,
    /// Connection state as reported by the OS (LISTEN, ESTABLISHED, ...).
    /// UDP sockets carry no state and report `NONE`.
    pub state: String,
    pub pid: Option<u32>,
    pub process_name: String,
    pub user: String,
    pub cmdline: String,
    pub exe_path: String,
    pub start_time: String,
    pub local_address: String,
    pub remote_address: Option<String>,
    pub timestamp: String,
}

impl SnapshotEntry {
    pub fn key(&self) -> EndpointKey {
        (self.port, self.protocol)
    }
}

/// Point-in-time set of observed endpoints, keyed by (port, protocol).
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub entries: HashMap<EndpointKey, SnapshotEntry>,
    pub taken_at: String,
}

impl Snapshot {
    pub fn empty() -> Self {
        Snapshot {
            entries: HashMap::new(),
            taken_at: now_rfc3339(),
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = SnapshotEntry>) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            map.insert(entry.key(), entry);
        }
        Snapshot {
            entries: map,
            taken_at: now_rfc3339(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by (port, protocol) for stable API output.
    pub fn sorted_entries(&self) -> Vec<SnapshotEntry> {
        let mut entries: Vec<SnapshotEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| (e.port, e.protocol as u8));
        entries
    }
}

/// Severity assigned to a detected change.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Error => "ERROR",
        }
    }

    /// Parse a stored level string; unrecognized values fall back to INFO.
    pub fn parse(s: &str) -> AlertLevel {
        match s {
            "ERROR" => AlertLevel::Error,
            "WARNING" => AlertLevel::Warning,
            _ => AlertLevel::Info,
        }
    }
}

/// A persisted alert. Immutable except `resolved`, which transitions
/// false -> true exactly once and stays true.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: i64,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub port: Option<u16>,
    /// Unix seconds.
    pub created_at: i64,
    pub resolved: bool,
}

/// Cumulative scan counters, written only by the scheduler.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ScanStats {
    pub total_scans: u64,
    pub last_scan_at: Option<String>,
    pub last_duration_ms: u64,
    pub avg_duration_ms: f64,
}

impl ScanStats {
    pub fn record(&mut self, duration_ms: u64) {
        self.total_scans += 1;
        self.last_scan_at = Some(now_rfc3339());
        self.last_duration_ms = duration_ms;
        // Running mean over all completed scans.
        self.avg_duration_ms +=
            (duration_ms as f64 - self.avg_duration_ms) / self.total_scans as f64;
    }
}

/// Breakdown of the current snapshot by protocol, state, and process.
#[derive(Serialize, Debug, Clone, Default)]
pub struct PortDistribution {
    pub total: usize,
    pub tcp: usize,
    pub udp: usize,
    pub listening: usize,
    pub by_state: HashMap<String, usize>,
    pub by_process: HashMap<String, usize>,
}

impl PortDistribution {
    pub fn from_entries(entries: &[SnapshotEntry]) -> Self {
        let mut dist = PortDistribution {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match entry.protocol {
                Protocol::Tcp => dist.tcp += 1,
                Protocol::Udp => dist.udp += 1,
                Protocol::Unknown => {}
            }
            if entry.state == "LISTEN" {
                dist.listening += 1;
            }
            *dist.by_state.entry(entry.state.clone()).or_default() += 1;
            *dist
                .by_process
                .entry(entry.process_name.clone())
                .or_default() += 1;
        }
        dist
    }
}

/// RFC3339 UTC timestamp for API payloads and snapshot entries.
pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Format unix seconds as RFC3339, empty string if out of range.
pub fn format_unix(ts: i64) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&well_known::Rfc3339).ok())
        .unwrap_or_default()
}
