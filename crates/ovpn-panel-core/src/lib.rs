//! ovpn-panel core library
//!
//! Everything the admin panel does short of speaking HTTP:
//! - Credential store and admin sessions
//! - Easy-RSA certificate authority adapter
//! - Client bundle generation, listing and distribution (download / QR)
//! - Configuration and installation layout
//! - Common error types

pub mod bundle;
pub mod ca;
pub mod clients;
pub mod config;
pub mod credentials;
pub mod distribution;
pub mod error;
pub mod fs_util;
pub mod registry;
pub mod server_info;
pub mod session;
pub mod tracing_init;

pub use config::{InstallLayout, PanelConfig};
pub use error::{Error, Result};
