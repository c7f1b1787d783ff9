//! HTTP service for a face-authorized payment terminal.
//!
//! Wraps one [`facepay::TerminalSession`] and a
//! [`facepay_identity::IdentityDirectory`] behind actix-web routes for the
//! till display, the camera, and enrollment kiosks.

pub mod checks;
pub mod config;
pub mod cors;
pub mod custody;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use checks::HttpPresenceChecks;
pub use config::{ConfigError, TerminalConfig};
pub use custody::HttpCredentialProvider;
pub use error::TerminalError;
pub use state::AppState;
