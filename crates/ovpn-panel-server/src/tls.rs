//! TLS configuration for the panel.
//!
//! By default the panel serves HTTPS with a self-signed certificate that is
//! generated on first start and reused afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;

use ovpn_panel_core::fs_util::write_private;

const CERT_FILE: &str = "panel-cert.pem";
const KEY_FILE: &str = "panel-key.pem";

/// How the listener is secured.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// No TLS (plaintext). Development only.
    Disabled,
    /// Self-signed certificate kept in `cert_dir`, created if absent.
    SelfSigned {
        cert_dir: PathBuf,
        /// Subject alternative names for a freshly generated certificate.
        names: Vec<String>,
    },
    /// Operator-supplied PEM certificate chain and key.
    Custom { cert_path: PathBuf, key_path: PathBuf },
}

impl TlsMode {
    /// Build a rustls `ServerConfig` offering HTTP/2 and HTTP/1.1.
    ///
    /// Returns `None` if TLS is disabled.
    pub fn to_server_config(&self) -> Result<Option<Arc<ServerConfig>>, TlsError> {
        let (cert_path, key_path) = match self {
            Self::Disabled => return Ok(None),
            Self::SelfSigned { cert_dir, names } => {
                let cert_path = cert_dir.join(CERT_FILE);
                let key_path = cert_dir.join(KEY_FILE);
                if cert_path.is_file() && key_path.is_file() {
                    info!(cert = %cert_path.display(), "reusing self-signed certificate");
                } else {
                    let (cert_pem, key_pem) = generate_self_signed(names)?;
                    write_private(&cert_path, cert_pem.as_bytes())
                        .map_err(|e| TlsError::io(&cert_path, e))?;
                    write_private(&key_path, key_pem.as_bytes())
                        .map_err(|e| TlsError::io(&key_path, e))?;
                    info!(cert = %cert_path.display(), "generated self-signed certificate");
                }
                (cert_path, key_path)
            }
            Self::Custom {
                cert_path,
                key_path,
            } => {
                info!(cert = %cert_path.display(), key = %key_path.display(), "custom TLS enabled");
                (cert_path.clone(), key_path.clone())
            }
        };

        let certs = load_cert_chain(&cert_path)?;
        let key = load_private_key(&key_path)?;
        let mut config =
            ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()?
                .with_no_client_auth()
                .with_single_cert(certs, key)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(Some(Arc::new(config)))
    }
}

/// Generate a self-signed certificate; returns `(cert_pem, key_pem)`.
pub fn generate_self_signed(names: &[String]) -> Result<(String, String), TlsError> {
    let mut params = CertificateParams::new(names.to_vec())
        .map_err(|e| TlsError::CertGeneration(e.to_string()))?;
    params
        .distinguished_name
        .push(DnType::CommonName, "OpenVPN Panel");
    let key = KeyPair::generate().map_err(|e| TlsError::CertGeneration(e.to_string()))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| TlsError::CertGeneration(e.to_string()))?;
    Ok((cert.pem(), key.serialize_pem()))
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader =
        std::io::BufReader::new(std::fs::File::open(path).map_err(|e| TlsError::io(path, e))?);
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::io(path, e))?;
    if chain.is_empty() {
        return Err(TlsError::EmptyCertChain(path.to_path_buf()));
    }
    Ok(chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader =
        std::io::BufReader::new(std::fs::File::open(path).map_err(|e| TlsError::io(path, e))?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::io(path, e))?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// TLS configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Certificate generation error: {0}")]
    CertGeneration(String),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    EmptyCertChain(PathBuf),

    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

impl TlsError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
