//! ovpn-panel
//!
//! HTTPS admin panel for issuing, distributing and revoking OpenVPN clients.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use ovpn_panel_core::PanelConfig;
use ovpn_panel_core::bundle::{AddressLookup, FixedAddress, HttpAddressLookup};
use ovpn_panel_core::ca::EasyRsa;
use ovpn_panel_core::credentials::{BOOTSTRAP_ADMIN, CredentialStore};
use ovpn_panel_core::tracing_init::{DEFAULT_FILTER, init_tracing};

use ovpn_panel_server::serve::serve;
use ovpn_panel_server::tls::TlsMode;
use ovpn_panel_server::{AppState, build_router};

#[derive(Parser, Debug)]
#[command(name = "ovpn-panel")]
#[command(version, about = "OpenVPN admin panel")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8443", env = "OVPN_PANEL_ADDR")]
    addr: SocketAddr,

    /// JSON configuration file.
    #[arg(long, env = "OVPN_PANEL_CONFIG")]
    config: Option<PathBuf>,

    /// OpenVPN installation root (overrides the config file).
    #[arg(long)]
    openvpn_dir: Option<PathBuf>,

    /// Directory for generated client bundles.
    #[arg(long)]
    clients_dir: Option<PathBuf>,

    /// Credential store file.
    #[arg(long)]
    users_file: Option<PathBuf>,

    /// Public address written into bundles, skipping the external lookup.
    #[arg(long, env = "OVPN_PANEL_PUBLIC_ADDRESS")]
    public_address: Option<String>,

    /// Path to TLS certificate file (PEM).
    #[arg(long, requires = "tls_key", conflicts_with = "no_tls")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM).
    #[arg(long, requires = "tls_cert", conflicts_with = "no_tls")]
    tls_key: Option<PathBuf>,

    /// Where the self-signed certificate is kept. Defaults to `~/.ovpn-panel/certs`.
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Serve plaintext HTTP. Development only.
    #[arg(long)]
    no_tls: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn panel_config(&self) -> anyhow::Result<PanelConfig> {
        let mut config = PanelConfig::load(self.config.as_deref())?;
        if let Some(dir) = &self.openvpn_dir {
            config.openvpn_dir.clone_from(dir);
        }
        if let Some(dir) = &self.clients_dir {
            config.clients_dir.clone_from(dir);
        }
        if let Some(file) = &self.users_file {
            config.users_file = Some(file.clone());
        }
        Ok(config)
    }

    fn tls_mode(&self) -> anyhow::Result<TlsMode> {
        if self.no_tls {
            return Ok(TlsMode::Disabled);
        }
        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            return Ok(TlsMode::Custom {
                cert_path: cert.clone(),
                key_path: key.clone(),
            });
        }
        let cert_dir = match &self.cert_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?
                .join(".ovpn-panel")
                .join("certs"),
        };
        let mut names = vec!["localhost".to_string()];
        if let Some(addr) = &self.public_address {
            names.push(addr.clone());
        }
        Ok(TlsMode::SelfSigned { cert_dir, names })
    }
}

/// Print the generated admin password once, outside the log stream.
#[allow(clippy::print_stdout)]
fn print_bootstrap_banner(store: &CredentialStore, password: &str) {
    println!();
    println!("==============================================================");
    println!(" Created default admin account");
    println!("   username: {BOOTSTRAP_ADMIN}");
    println!("   password: {password}");
    println!(" Stored (hashed) in {}", store.path().display());
    println!(" Change it from the Settings page after signing in.");
    println!("==============================================================");
    println!();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(DEFAULT_FILTER, args.log_json);

    // reqwest and the listener share the process-wide ring provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = args.panel_config()?;
    let layout = config.layout();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        openvpn_dir = %config.openvpn_dir.display(),
        clients_dir = %layout.clients_dir.display(),
        "Starting ovpn-panel"
    );

    let credentials = CredentialStore::new(layout.users_file.clone());
    if let Some(password) = credentials.bootstrap()? {
        print_bootstrap_banner(&credentials, &password);
    }

    let lookup: Arc<dyn AddressLookup> = match &args.public_address {
        Some(addr) => Arc::new(FixedAddress(addr.clone())),
        None => Arc::new(HttpAddressLookup::new(
            config.public_ip_url.clone(),
            config.public_ip_timeout(),
        )),
    };
    let ca = Arc::new(EasyRsa::new(layout.easyrsa_dir.clone(), config.ca_confirmation));

    let tls = args.tls_mode()?.to_server_config()?;
    let mut state = AppState::new(&config, ca, lookup);
    state.secure_cookie = tls.is_some();

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    if tls.is_some() {
        info!(addr = %args.addr, "Panel listening with TLS");
    } else {
        info!(addr = %args.addr, "Panel listening (plaintext)");
    }

    serve(listener, build_router(state), tls, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await?;
    Ok(())
}
