//! Client bundle (`.ovpn`) generation.
//!
//! A bundle is a single self-contained client profile: connection
//! parameters read from the server configuration plus the CA certificate,
//! client certificate, client key and TLS-auth secret inlined between tag
//! pairs.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::InstallLayout;
use crate::error::{Error, Result};
use crate::fs_util::write_private;

/// Address written into bundles when the public address cannot be found.
pub const UNKNOWN_ADDRESS: &str = "Unknown";

pub const DEFAULT_PORT: u16 = 1194;
pub const DEFAULT_PROTO: &str = "udp";

/// Discovers the server's public address.
pub trait AddressLookup: Send + Sync {
    /// `None` when the address could not be determined.
    fn public_address(&self) -> Option<String>;
}

/// Always answers with the configured address.
#[derive(Debug, Clone)]
pub struct FixedAddress(pub String);

impl AddressLookup for FixedAddress {
    fn public_address(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Asks an external "what is my IP" endpoint that answers in plain text.
///
/// Blocking; call from a blocking context.
#[derive(Debug, Clone)]
pub struct HttpAddressLookup {
    url: String,
    timeout: Duration,
}

impl HttpAddressLookup {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    fn fetch(&self) -> std::result::Result<String, reqwest::Error> {
        // reqwest is built with `rustls-no-provider`; Err means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        client.get(&self.url).send()?.error_for_status()?.text()
    }
}

impl AddressLookup for HttpAddressLookup {
    fn public_address(&self) -> Option<String> {
        match self.fetch() {
            Ok(body) => {
                let candidate = body.trim();
                if candidate.parse::<IpAddr>().is_ok() {
                    Some(candidate.to_string())
                } else {
                    warn!(url = %self.url, "public address lookup returned a non-address");
                    None
                }
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "public address lookup failed");
                None
            }
        }
    }
}

/// Connection parameters taken from the server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerParams {
    pub port: u16,
    pub proto: String,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            proto: DEFAULT_PROTO.to_string(),
        }
    }
}

impl ServerParams {
    /// Read `port` and `proto` from `server.conf`, falling back to
    /// `1194`/`udp` for anything missing or unreadable.
    pub fn read(server_conf: &Path) -> Self {
        match std::fs::read_to_string(server_conf) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                debug!(
                    path = %server_conf.display(),
                    error = %e,
                    "server config unreadable, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse directives; the first occurrence of each wins.
    pub fn parse(content: &str) -> Self {
        let mut port = None;
        let mut proto = None;
        for line in content.lines() {
            let mut words = line.split_whitespace();
            match (words.next(), words.next()) {
                (Some("port"), Some(value)) if port.is_none() => match value.parse() {
                    Ok(p) => port = Some(p),
                    Err(_) => warn!(value, "ignoring invalid port directive"),
                },
                (Some("proto"), Some(value)) if proto.is_none() => {
                    proto = Some(value.to_string());
                }
                _ => {}
            }
        }
        Self {
            port: port.unwrap_or(DEFAULT_PORT),
            proto: proto.unwrap_or_else(|| DEFAULT_PROTO.to_string()),
        }
    }
}

/// PEM material embedded in a bundle.
#[derive(Debug, Clone)]
pub struct BundleMaterial {
    pub ca_cert: String,
    pub client_cert: String,
    pub client_key: String,
    pub tls_auth_key: String,
}

/// Render the client profile.
pub fn render_bundle(address: &str, params: &ServerParams, material: &BundleMaterial) -> String {
    let mut doc = format!(
        r#"client
dev tun
proto {proto}
remote {address} {port}

resolv-retry infinite
nobind

remote-cert-tls server
tls-auth [inline] 1

cipher AES-256-GCM
ncp-ciphers "AES-256-GCM:AES-128-GCM:CHACHA20-POLY1305"

setenv opt block-outside-dns
dhcp-option DNS 1.1.1.1
dhcp-option DNS 8.8.8.8

compress lz4-v2

user nobody
group nogroup

persist-key
persist-tun

verb 3
mute 20
"#,
        proto = params.proto,
        port = params.port,
    );
    for (tag, body) in [
        ("ca", &material.ca_cert),
        ("cert", &material.client_cert),
        ("key", &material.client_key),
        ("tls-auth", &material.tls_auth_key),
    ] {
        let newline = if body.ends_with('\n') { "" } else { "\n" };
        let _ = write!(doc, "\n<{tag}>\n{body}{newline}</{tag}>\n");
    }
    doc
}

/// Builds and persists bundles from the PKI artifacts on disk.
#[derive(Clone)]
pub struct BundleGenerator {
    layout: InstallLayout,
    lookup: Arc<dyn AddressLookup>,
}

impl BundleGenerator {
    pub fn new(layout: InstallLayout, lookup: Arc<dyn AddressLookup>) -> Self {
        Self { layout, lookup }
    }

    /// The four files every bundle for `name` needs.
    pub fn artifacts(&self, name: &str) -> [PathBuf; 4] {
        [
            self.layout.pki.ca_cert(),
            self.layout.pki.issued_cert(name),
            self.layout.pki.private_key(name),
            self.layout.tls_auth_key.clone(),
        ]
    }

    /// Generate the bundle for `name` and write it to the bundle directory,
    /// replacing any previous one. Returns the bundle path.
    ///
    /// Nothing is written unless all four artifacts are present.
    pub fn generate(&self, name: &str, address_override: Option<&str>) -> Result<PathBuf> {
        let artifacts = self.artifacts(name);
        let missing: Vec<PathBuf> = artifacts.iter().filter(|p| !p.is_file()).cloned().collect();
        if !missing.is_empty() {
            warn!(client = %name, ?missing, "bundle artifacts missing");
            return Err(Error::MissingArtifacts(missing));
        }
        let [ca, cert, key, ta] = artifacts;
        let material = BundleMaterial {
            ca_cert: std::fs::read_to_string(ca)?,
            client_cert: std::fs::read_to_string(cert)?,
            client_key: std::fs::read_to_string(key)?,
            tls_auth_key: std::fs::read_to_string(ta)?,
        };

        let address = match address_override {
            Some(addr) => addr.to_string(),
            None => self
                .lookup
                .public_address()
                .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()),
        };
        let params = ServerParams::read(&self.layout.server_conf);

        let doc = render_bundle(&address, &params, &material);
        let path = self.layout.bundle_path(name);
        write_private(&path, doc.as_bytes())?;

        info!(
            client = %name,
            path = %path.display(),
            remote = %format!("{address} {}/{}", params.port, params.proto),
            "bundle written"
        );
        Ok(path)
    }
}

impl std::fmt::Debug for BundleGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleGenerator")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
