//! LDAP directory authentication.
//!
//! Resolves a login name to exactly one directory entry and proves the
//! caller's password against that entry (bind, search, re-bind).

pub mod authenticator;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;

pub use authenticator::{Authenticator, DirectoryAuthenticator};
pub use config::{bind_strategy_from, DirectoryTls, LdapConfig};
pub use identity::Identity;
