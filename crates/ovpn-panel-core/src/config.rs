//! Configuration resolution for ovpn-panel.
//!
//! Resolution order:
//! 1. Built-in defaults (a stock `/etc/openvpn` install)
//! 2. Optional JSON config file
//! 3. Environment variables
//!
//! CLI flags are applied on top by the server binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ca::{Confirmation, PkiLayout};
use crate::error::{Error, Result};

/// Complete panel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// OpenVPN installation root.
    pub openvpn_dir: PathBuf,
    /// Easy-RSA working directory. Defaults to `<openvpn_dir>/easy-rsa`.
    pub easyrsa_dir: Option<PathBuf>,
    /// Where generated `.ovpn` bundles are written.
    pub clients_dir: PathBuf,
    /// Credential store file. Defaults to `<openvpn_dir>/openvpn-ui-users.json`.
    pub users_file: Option<PathBuf>,
    /// Name of the server's own certificate in `pki/issued`.
    pub server_cert_name: String,
    /// systemd unit probed for the running/stopped status.
    pub service_unit: String,
    /// Endpoint returning the public address as plain text.
    pub public_ip_url: String,
    pub public_ip_timeout_secs: u64,
    /// Sliding idle timeout for admin sessions.
    pub session_timeout_secs: u64,
    /// How destructive Easy-RSA prompts are confirmed.
    pub ca_confirmation: Confirmation,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            openvpn_dir: PathBuf::from("/etc/openvpn"),
            easyrsa_dir: None,
            clients_dir: PathBuf::from("/var/cascade-vpn/openvpn-clients"),
            users_file: None,
            server_cert_name: "server".to_string(),
            service_unit: "openvpn@server".to_string(),
            public_ip_url: "https://ifconfig.me/ip".to_string(),
            public_ip_timeout_secs: 5,
            session_timeout_secs: 3600,
            ca_confirmation: Confirmation::default(),
        }
    }
}

impl PanelConfig {
    /// Load configuration: defaults, then `path` (if given), then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => load_config_file(p)?,
            None => Self::default(),
        };
        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Resolve every on-disk location the panel touches.
    pub fn layout(&self) -> InstallLayout {
        let easyrsa_dir = self
            .easyrsa_dir
            .clone()
            .unwrap_or_else(|| self.openvpn_dir.join("easy-rsa"));
        let users_file = self
            .users_file
            .clone()
            .unwrap_or_else(|| self.openvpn_dir.join("openvpn-ui-users.json"));
        InstallLayout {
            server_conf: self.openvpn_dir.join("server.conf"),
            tls_auth_key: self.openvpn_dir.join("ta.key"),
            pki: PkiLayout::new(easyrsa_dir.join("pki")),
            easyrsa_dir,
            clients_dir: self.clients_dir.clone(),
            users_file,
        }
    }

    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub const fn public_ip_timeout(&self) -> Duration {
        Duration::from_secs(self.public_ip_timeout_secs)
    }
}

/// Fixed file-system layout of a VPN installation.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    /// OpenVPN server configuration (`port`/`proto` directives).
    pub server_conf: PathBuf,
    /// Shared TLS-auth secret embedded in every bundle.
    pub tls_auth_key: PathBuf,
    pub easyrsa_dir: PathBuf,
    pub pki: PkiLayout,
    pub clients_dir: PathBuf,
    pub users_file: PathBuf,
}

impl InstallLayout {
    /// Path of the bundle for `name`.
    pub fn bundle_path(&self, name: &str) -> PathBuf {
        self.clients_dir.join(format!("{name}.ovpn"))
    }
}

fn load_config_file(path: &Path) -> Result<PanelConfig> {
    let shown = path.display();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {shown}: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file {shown}: {e}")))
}

fn apply_env_overrides(config: &mut PanelConfig) {
    if let Ok(val) = std::env::var("OVPN_PANEL_SESSION_TIMEOUT")
        && let Ok(n) = val.parse()
    {
        config.session_timeout_secs = n;
    }
    if let Ok(val) = std::env::var("OVPN_PANEL_PUBLIC_IP_URL") {
        config.public_ip_url = val;
    }
    if let Ok(val) = std::env::var("OVPN_PANEL_SERVICE_UNIT") {
        config.service_unit = val;
    }
}
