//! HTTPS surface of the OpenVPN admin panel: router, session middleware,
//! HTML pages and TLS termination.

pub mod auth;
pub mod error;
mod pages;
pub mod routes;
pub mod serve;
pub mod state;
pub mod tls;

pub use routes::build_router;
pub use state::AppState;
