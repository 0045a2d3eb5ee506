//! Snapshot collection from the OS: socket enumeration via `netstat2`,
//! process attribution via `sysinfo`.

use std::collections::HashMap;
use std::net::IpAddr;

use anyhow::Result;
use netstat2::{
    get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState,
};
use sysinfo::{Pid, Process, ProcessesToUpdate, System, Users};
use tracing::warn;

use crate::types::{format_unix, now_rfc3339, Protocol, Snapshot, SnapshotEntry};

/// Seam between the scheduler and the OS. Production uses
/// [`NetstatCollector`]; tests substitute scripted snapshots.
pub trait SnapshotSource: Send + Sync {
    fn collect(&self) -> Result<Snapshot>;
}

/// Enumerates IPv4/IPv6 TCP and UDP sockets and resolves the owning process
/// for each. Endpoints whose process cannot be resolved (no pid reported, or
/// the process vanished between enumeration and lookup) are dropped rather
/// than emitted with placeholder values, so diffs never churn on "unknown"
/// entries.
#[derive(Debug, Default)]
pub struct NetstatCollector;

impl NetstatCollector {
    pub fn new() -> Self {
        NetstatCollector
    }
}

impl SnapshotSource for NetstatCollector {
    fn collect(&self) -> Result<Snapshot> {
        let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let proto_flags = ProtocolFlags::TCP | ProtocolFlags::UDP;

        let sockets = match get_sockets_info(af_flags, proto_flags) {
            Ok(sockets) => sockets,
            Err(e) => {
                // Total enumeration failure: the scan cycle continues with an
                // empty snapshot instead of aborting.
                warn!(error = %e, "socket enumeration failed, returning empty snapshot");
                return Ok(Snapshot::empty());
            }
        };

        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        let users = Users::new_with_refreshed_list();

        let taken_at = now_rfc3339();
        let mut entries = HashMap::new();

        for socket in sockets {
            let Some(pid) = socket.associated_pids.first().copied() else {
                continue;
            };
            let Some(process) = sys.process(Pid::from_u32(pid)) else {
                continue;
            };
            let meta = ProcessMeta::resolve(process, &users);
            if meta.name.is_empty() {
                continue;
            }

            let entry = match socket.protocol_socket_info {
                ProtocolSocketInfo::Tcp(tcp) => SnapshotEntry {
                    port: tcp.local_port,
                    protocol: Protocol::Tcp,
                    state: tcp_state_str(&tcp.state).to_string(),
                    pid: Some(pid),
                    process_name: meta.name,
                    user: meta.user,
                    cmdline: meta.cmdline,
                    exe_path: meta.exe_path,
                    start_time: meta.start_time,
                    local_address: format_addr(&tcp.local_addr, tcp.local_port),
                    remote_address: remote_addr(&tcp.remote_addr, tcp.remote_port),
                    timestamp: taken_at.clone(),
                },
                ProtocolSocketInfo::Udp(udp) => SnapshotEntry {
                    port: udp.local_port,
                    protocol: Protocol::Udp,
                    state: "NONE".to_string(),
                    pid: Some(pid),
                    process_name: meta.name,
                    user: meta.user,
                    cmdline: meta.cmdline,
                    exe_path: meta.exe_path,
                    start_time: meta.start_time,
                    local_address: format_addr(&udp.local_addr, udp.local_port),
                    remote_address: None,
                    timestamp: taken_at.clone(),
                },
            };
            entries.insert(entry.key(), entry);
        }

        Ok(Snapshot { entries, taken_at })
    }
}

struct ProcessMeta {
    name: String,
    user: String,
    cmdline: String,
    exe_path: String,
    start_time: String,
}

impl ProcessMeta {
    fn resolve(process: &Process, users: &Users) -> Self {
        let user = process
            .user_id()
            .and_then(|uid| users.get_user_by_id(uid))
            .map(|u| u.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let cmdline = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        ProcessMeta {
            name: process.name().to_string_lossy().to_string(),
            user,
            cmdline,
            exe_path: process
                .exe()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            start_time: format_unix(process.start_time() as i64),
        }
    }
}

fn tcp_state_str(state: &TcpState) -> &'static str {
    match state {
        TcpState::Closed => "CLOSED",
        TcpState::Listen => "LISTEN",
        TcpState::SynSent => "SYN_SENT",
        TcpState::SynReceived => "SYN_RECEIVED",
        TcpState::Established => "ESTABLISHED",
        TcpState::FinWait1 => "FIN_WAIT_1",
        TcpState::FinWait2 => "FIN_WAIT_2",
        TcpState::CloseWait => "CLOSE_WAIT",
        TcpState::Closing => "CLOSING",
        TcpState::LastAck => "LAST_ACK",
        TcpState::TimeWait => "TIME_WAIT",
        TcpState::DeleteTcb => "DELETE_TCB",
        TcpState::Unknown => "UNKNOWN",
    }
}

fn format_addr(addr: &IpAddr, port: u16) -> String {
    format!("{addr}:{port}")
}

/// Listening sockets report an unspecified remote; only connected sockets
/// get a remote address.
fn remote_addr(addr: &IpAddr, port: u16) -> Option<String> {
    if port == 0 || addr.is_unspecified() {
        None
    } else {
        Some(format_addr(addr, port))
    }
}
