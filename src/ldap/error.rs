//! Directory authentication errors.

use thiserror::Error;

/// Failures of the bind-search-rebind sequence.
///
/// Every variant is terminal for the request. The messages are for server
/// logs; callers must not echo them to the client.
#[derive(Debug, Error)]
pub enum LdapError {
    #[error("error opening LDAP connection: {0}")]
    Connection(String),

    #[error("LDAP operation did not complete within {0:?}")]
    Timeout(std::time::Duration),

    #[error("error binding to LDAP server: {0}")]
    Bind(String),

    #[error("error searching for user {username}: {reason}")]
    Search { username: String, reason: String },

    #[error("no result for the search filter '{filter}'")]
    NoUserFound { filter: String },

    #[error("multiple entries found for the search filter '{filter}'")]
    MultipleUsersFound { filter: String },

    #[error("invalid credentials for user {username}: {reason}")]
    InvalidCredentials { username: String, reason: String },
}

impl LdapError {
    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            LdapError::Connection(_) => "connection",
            LdapError::Timeout(_) => "timeout",
            LdapError::Bind(_) => "bind",
            LdapError::Search { .. } => "search",
            LdapError::NoUserFound { .. } => "no_user_found",
            LdapError::MultipleUsersFound { .. } => "multiple_users_found",
            LdapError::InvalidCredentials { .. } => "invalid_credentials",
        }
    }
}
