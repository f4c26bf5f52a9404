//! Client list derived from the PKI issued directory.
//!
//! There is no stored registry: every call rescans disk, so certificates
//! issued or revoked out of band show up immediately.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, warn};

use crate::clients::validate_name;
use crate::config::InstallLayout;

/// One issued client certificate and the state of its bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientEntry {
    pub name: String,
    pub config_exists: bool,
    /// Bundle size in bytes, 0 when there is no bundle.
    pub config_size: u64,
    /// Certificate creation time, `%Y-%m-%d %H:%M:%S` local time.
    pub created: String,
}

/// List clients sorted by name, excluding the server's own certificate.
///
/// Certificates whose name the panel could not manage (anything outside
/// `[A-Za-z0-9_-]`) are skipped. A missing issued directory yields an empty list.
pub fn list_clients(layout: &InstallLayout, server_cert_name: &str) -> Vec<ClientEntry> {
    let issued = layout.pki.issued_dir();
    let entries = match std::fs::read_dir(&issued) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %issued.display(), error = %e, "issued directory unreadable");
            return Vec::new();
        }
    };

    let mut clients: Vec<ClientEntry> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("crt") {
                return None;
            }
            let name = path.file_stem()?.to_str()?.to_string();
            if name == server_cert_name {
                return None;
            }
            if validate_name(&name).ok() != Some(name.as_str()) {
                warn!(path = %path.display(), "skipping certificate with unmanageable name");
                return None;
            }
            let bundle = layout.bundle_path(&name);
            let config_size = std::fs::metadata(&bundle).map_or(0, |m| m.len());
            Some(ClientEntry {
                config_exists: bundle.is_file(),
                config_size,
                created: created_at(&path),
                name,
            })
        })
        .collect();

    clients.sort_by(|a, b| a.name.cmp(&b.name));
    clients
}

fn created_at(path: &Path) -> String {
    let time = std::fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
