//! Certificate authority adapter.
//!
//! The panel never touches key material itself: client key pairs are
//! created, signed and revoked by an external CA behind the
//! [`CertificateAuthority`] trait. The shipped implementation shells out to
//! Easy-RSA ([`EasyRsa`]); tests substitute an in-process fake.

mod easyrsa;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use easyrsa::EasyRsa;

/// Synchronous CA operations. Each call blocks until the CA has finished.
pub trait CertificateAuthority: Send + Sync {
    /// Generate an unencrypted signing request (and private key) for `name`.
    fn create_request(&self, name: &str) -> Result<(), CaError>;

    /// Sign the pending request for `name` as a client certificate.
    fn sign_request(&self, name: &str) -> Result<(), CaError>;

    /// Mark the certificate for `name` revoked.
    fn revoke(&self, name: &str) -> Result<(), CaError>;

    /// Rebuild the certificate revocation list.
    fn regenerate_revocation_list(&self) -> Result<(), CaError>;

    /// Revoke `name` and rebuild the CRL.
    ///
    /// The CRL step runs whatever the outcome of the revoke step. A CRL
    /// failure after a successful revoke is reported as
    /// [`CaError::CrlRegeneration`] so exactly that half can be retried.
    fn revoke_and_publish(&self, name: &str) -> Result<(), CaError> {
        let revoked = self.revoke(name);
        let crl = self.regenerate_revocation_list();
        match (revoked, crl) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(CaError::CommandFailed { diagnostics, .. })) => {
                Err(CaError::CrlRegeneration {
                    name: name.to_string(),
                    diagnostics,
                })
            }
            (Ok(()), Err(e)) => Err(CaError::CrlRegeneration {
                name: name.to_string(),
                diagnostics: e.to_string(),
            }),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

/// The individual CA invocations, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaStep {
    GenerateRequest,
    SignRequest,
    Revoke,
    GenerateCrl,
}

impl fmt::Display for CaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerateRequest => write!(f, "generate request"),
            Self::SignRequest => write!(f, "sign certificate"),
            Self::Revoke => write!(f, "revoke"),
            Self::GenerateCrl => write!(f, "generate CRL"),
        }
    }
}

/// How interactive confirmation prompts of the CA tool are answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    /// Pass the tool's non-interactive flag (`--batch`).
    #[default]
    Batch,
    /// Feed a literal `yes` line on stdin.
    Stdin,
}

/// CA adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("Failed to {step}: could not run CA tool: {source}")]
    Spawn {
        step: CaStep,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to {step}: {diagnostics}")]
    CommandFailed { step: CaStep, diagnostics: String },

    #[error("Certificate {name} revoked but CRL regeneration failed: {diagnostics}")]
    CrlRegeneration { name: String, diagnostics: String },
}

/// Directory layout of an Easy-RSA PKI root.
#[derive(Debug, Clone)]
pub struct PkiLayout {
    root: PathBuf,
}

impl PkiLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn issued_dir(&self) -> PathBuf {
        self.root.join("issued")
    }

    pub fn private_dir(&self) -> PathBuf {
        self.root.join("private")
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.root.join("ca.crt")
    }

    pub fn issued_cert(&self, name: &str) -> PathBuf {
        self.issued_dir().join(format!("{name}.crt"))
    }

    pub fn private_key(&self, name: &str) -> PathBuf {
        self.private_dir().join(format!("{name}.key"))
    }

    /// A client exists iff its issued certificate is on disk.
    pub fn is_issued(&self, name: &str) -> bool {
        self.issued_cert(name).is_file()
    }
}
