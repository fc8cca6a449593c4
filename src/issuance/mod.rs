//! Token issuance.
//!
//! HTTP Basic credentials in, signed token out:
//! - optional client version gate
//! - directory authentication
//! - claim construction and signing

pub mod config;
pub mod handler;
pub mod version;

pub use config::IssuanceConfig;
pub use handler::{issue_token_handler, TokenIssuer};
pub use version::VersionGate;
