//! Directory connection configuration.

use std::fmt;
use std::time::Duration;

/// How the bridge establishes the identity used for the user search.
#[derive(Clone, PartialEq, Eq)]
pub enum BindStrategy {
    /// Bind as a dedicated search account, search, then re-bind as the
    /// resolved entry with the caller's password.
    ServiceAccount { dn: String, password: String },
    /// Bind directly with the caller-supplied login and password and skip
    /// the final re-bind. The login attribute value must itself be bindable
    /// (a DN or a UPN), so this mode is opt-in.
    Direct,
}

impl fmt::Debug for BindStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindStrategy::ServiceAccount { dn, .. } => f
                .debug_struct("ServiceAccount")
                .field("dn", dn)
                .field("password", &"<redacted>")
                .finish(),
            BindStrategy::Direct => write!(f, "Direct"),
        }
    }
}

/// TLS settings for `ldaps://` connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryTls {
    /// Accept any server certificate.
    pub skip_verify: bool,
}

/// Directory server configuration.
#[derive(Debug, Clone)]
pub struct LdapConfig {
    /// Host or IP of the directory server.
    pub host: String,
    /// Directory server port.
    pub port: u16,
    /// Root of the subtree searched for users.
    pub base_dn: String,
    /// Attribute matched against the login name.
    pub user_login_attribute: String,
    pub bind_strategy: BindStrategy,
    /// TLS settings; `None` together with `use_insecure = false` is a
    /// connection error at dial time.
    pub tls: Option<DirectoryTls>,
    /// Plain-text LDAP. Passwords travel in clear text.
    pub use_insecure: bool,
    /// Server-side search size limit. Two is enough to detect ambiguity.
    pub search_size_limit: i32,
    /// Server-side search time limit in seconds.
    pub search_time_limit_secs: i32,
    /// Deadline for the whole dial/bind/search/re-bind sequence.
    pub operation_timeout: Duration,
}

/// Default deadline for one authentication round-trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 389,
            base_dn: String::new(),
            user_login_attribute: "uid".to_string(),
            bind_strategy: BindStrategy::Direct,
            tls: Some(DirectoryTls::default()),
            use_insecure: false,
            search_size_limit: 2,
            search_time_limit_secs: 10,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl LdapConfig {
    /// `host:port` of the directory server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("LDAP host is required".to_string());
        }
        if self.base_dn.trim().is_empty() {
            return Err("LDAP base DN is required".to_string());
        }
        if self.user_login_attribute.trim().is_empty() {
            return Err("LDAP user login attribute must not be empty".to_string());
        }
        if let BindStrategy::ServiceAccount { dn, password } = &self.bind_strategy {
            if dn.is_empty() || password.is_empty() {
                return Err("Search user DN and password must both be set".to_string());
            }
        }
        if self.search_size_limit < 2 {
            return Err(format!(
                "Search size limit must be at least 2 to detect ambiguous logins, got {}",
                self.search_size_limit
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err("LDAP operation timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Pick the bind strategy from the optional search credential.
///
/// Without a search credential the direct-bind mode is only accepted when
/// explicitly allowed.
pub fn bind_strategy_from(
    search_user_dn: Option<String>,
    search_user_password: Option<String>,
    allow_direct_bind: bool,
) -> Result<BindStrategy, String> {
    match (search_user_dn, search_user_password) {
        (Some(dn), Some(password)) if !dn.is_empty() && !password.is_empty() => {
            Ok(BindStrategy::ServiceAccount { dn, password })
        }
        (Some(dn), _) if !dn.is_empty() => {
            Err("Search user DN is set but search user password is missing".to_string())
        }
        _ if allow_direct_bind => Ok(BindStrategy::Direct),
        _ => Err(
            "No search user configured; set a search user DN and password or enable direct bind"
                .to_string(),
        ),
    }
}
