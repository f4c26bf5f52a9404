//! Live VPN server status shown on the dashboard. Recomputed per call.

use serde::Serialize;

use crate::bundle::{AddressLookup, ServerParams, UNKNOWN_ADDRESS};
use crate::config::InstallLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub ip: String,
    pub port: u16,
    pub status: ServiceStatus,
}

/// Whether the systemd `unit` is active.
pub fn service_active(unit: &str) -> bool {
    std::process::Command::new("systemctl")
        .args(["is-active", "--quiet", unit])
        .status()
        .is_ok_and(|s| s.success())
}

/// Gather address, port and service status. Blocks on the address lookup.
pub fn server_info(layout: &InstallLayout, unit: &str, lookup: &dyn AddressLookup) -> ServerInfo {
    let ip = lookup
        .public_address()
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());
    let port = ServerParams::read(&layout.server_conf).port;
    let status = if service_active(unit) {
        ServiceStatus::Running
    } else {
        ServiceStatus::Stopped
    };
    ServerInfo { ip, port, status }
}
