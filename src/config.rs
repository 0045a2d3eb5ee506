use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::classify::RiskRules;

/// Monitor configuration. Every field has a default so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Sleep between scans when the last cycle saw no changes.
    pub idle_interval_secs: u64,
    /// Sleep between scans while changes are being observed.
    pub busy_interval_secs: u64,
    /// Sleep after a failed scan cycle before trying again.
    pub cooldown_secs: u64,

    /// Bounded retry for transient database failures.
    pub max_retries: u32,
    pub retry_delay_ms: u64,

    /// Capacity of the in-memory recent-alerts buffer.
    pub recent_alerts_capacity: usize,

    /// Port specs: single ports (`"22"`) or inclusive ranges (`"8000-8010"`).
    pub high_risk_ports: Vec<String>,
    pub medium_risk_ports: Vec<String>,
    /// Changes on these ports never produce alerts.
    pub ignore_ports: Vec<String>,

    /// Case-insensitive substrings matched against process names.
    pub suspicious_tools: Vec<String>,
    /// Half-open/half-closed TCP states worth a WARNING.
    pub suspicious_states: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            idle_interval_secs: 30,
            busy_interval_secs: 2,
            cooldown_secs: 10,
            max_retries: 3,
            retry_delay_ms: 2000,
            recent_alerts_capacity: 100,
            high_risk_ports: to_strings(&[
                "21", "22", "23", "135", "139", "445", "1433", "3306", "3389", "5432",
            ]),
            medium_risk_ports: to_strings(&[
                "25", "53", "110", "143", "5900", "6379", "11211", "27017",
            ]),
            ignore_ports: Vec::new(),
            suspicious_tools: to_strings(&[
                "ncat", "netcat", "socat", "telnetd", "nmap", "miner", "backdoor",
                "meterpreter",
            ]),
            suspicious_states: to_strings(&[
                "SYN_SENT",
                "SYN_RECEIVED",
                "FIN_WAIT_1",
                "FIN_WAIT_2",
                "CLOSE_WAIT",
                "CLOSING",
                "LAST_ACK",
            ]),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file: {}", path.as_ref().display()))?;
        Ok(config)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn busy_interval(&self) -> Duration {
        Duration::from_secs(self.busy_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Resolve the configured port sets and tool list into classifier rules.
    pub fn risk_rules(&self) -> Result<RiskRules> {
        Ok(RiskRules::new(
            parse_port_set(&self.high_risk_ports).context("high_risk_ports")?,
            parse_port_set(&self.medium_risk_ports).context("medium_risk_ports")?,
            self.suspicious_tools.clone(),
            self.suspicious_states.iter().cloned().collect(),
        ))
    }

    pub fn ignored_ports(&self) -> Result<HashSet<u16>> {
        parse_port_set(&self.ignore_ports).context("ignore_ports")
    }
}

/// Expand port specs into a set. Each spec is a single port number or an
/// inclusive `start-end` range.
pub fn parse_port_set(specs: &[String]) -> Result<HashSet<u16>> {
    let mut out = HashSet::new();
    for spec in specs {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        if let Some((a, b)) = spec.split_once('-') {
            let start = parse_port(a.trim())
                .with_context(|| format!("invalid start in range: {spec}"))?;
            let end =
                parse_port(b.trim()).with_context(|| format!("invalid end in range: {spec}"))?;
            if start > end {
                bail!("invalid range {spec} (start > end)");
            }
            out.extend(start..=end);
            continue;
        }
        out.insert(parse_port(spec).with_context(|| format!("invalid port value: {spec}"))?);
    }
    Ok(out)
}

fn parse_port(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
