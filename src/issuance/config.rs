//! Token issuance configuration.

use std::time::Duration;

use super::version::VersionGate;
use crate::token::DEFAULT_TTL;

/// Default Basic authentication realm.
pub const DEFAULT_REALM: &str = "ldap bridge";

#[derive(Debug, Clone)]
pub struct IssuanceConfig {
    /// Directory server recorded in each token's `ldapServer` assertion.
    pub ldap_server: String,

    /// Token lifetime.
    pub ttl: Duration,

    /// Attribute whose first value becomes the token username. The entry
    /// DN is used when unset or absent.
    pub username_attribute: Option<String>,

    /// Enforced minimum client versions, if any.
    pub version_gate: Option<VersionGate>,

    /// Realm advertised in the `WWW-Authenticate` challenge.
    pub realm: String,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            ldap_server: String::new(),
            ttl: DEFAULT_TTL,
            username_attribute: None,
            version_gate: None,
            realm: DEFAULT_REALM.to_string(),
        }
    }
}

impl IssuanceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl.is_zero() {
            return Err("token TTL must be greater than zero".to_string());
        }
        if self.realm.contains('"') {
            return Err("authentication realm must not contain quotes".to_string());
        }
        Ok(())
    }

    /// `WWW-Authenticate` header value.
    pub fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }
}
