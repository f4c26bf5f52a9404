use std::sync::Arc;

use ovpn_panel_core::PanelConfig;
use ovpn_panel_core::bundle::{AddressLookup, BundleGenerator};
use ovpn_panel_core::ca::CertificateAuthority;
use ovpn_panel_core::clients::ClientManager;
use ovpn_panel_core::credentials::CredentialStore;
use ovpn_panel_core::session::{MemorySessionStore, SessionGuard, SessionStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialStore,
    pub sessions: SessionGuard,
    pub clients: ClientManager,
    pub lookup: Arc<dyn AddressLookup>,
    pub service_unit: String,
    /// Add `Secure` to the session cookie. Off only for plaintext serving.
    pub secure_cookie: bool,
}

impl AppState {
    /// Wire the core components for `config` with in-memory sessions.
    pub fn new(
        config: &PanelConfig,
        ca: Arc<dyn CertificateAuthority>,
        lookup: Arc<dyn AddressLookup>,
    ) -> Self {
        let layout = config.layout();
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let bundles = BundleGenerator::new(layout.clone(), Arc::clone(&lookup));
        Self {
            credentials: CredentialStore::new(layout.users_file.clone()),
            sessions: SessionGuard::new(store, config.session_timeout()),
            clients: ClientManager::new(ca, layout, bundles, config.server_cert_name.clone()),
            lookup,
            service_unit: config.service_unit.clone(),
            secure_cookie: true,
        }
    }
}
