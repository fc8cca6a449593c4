//! Directory connections.
//!
//! The authenticator only talks to [`DirectoryDialer`] and
//! [`DirectoryConnection`]; the `ldap3` implementation lives here so tests
//! can swap in a scripted directory.

use anyhow::{bail, Result};
use async_trait::async_trait;
use ldap3::{DerefAliases, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions};
use std::time::Duration;
use tracing::{debug, warn};

use super::config::{DirectoryTls, LdapConfig};
use super::error::LdapError;
use super::identity::Identity;

/// LDAP result code `sizeLimitExceeded`.
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Parameters of the user lookup.
#[derive(Debug, Clone)]
pub struct UserSearch {
    pub base_dn: String,
    pub filter: String,
    pub attributes: Vec<String>,
    pub size_limit: i32,
    pub time_limit_secs: i32,
}

/// An open, not yet released directory session.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind. Errors mean the directory rejected the credential or the
    /// request could not be completed.
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()>;

    /// Subtree search; returns the entries the server sent back, at most
    /// `size_limit` of them.
    async fn search(&mut self, request: &UserSearch) -> Result<Vec<Identity>>;

    /// Release the session. Never fails; problems are logged.
    async fn close(&mut self);
}

/// Opens directory connections.
#[async_trait]
pub trait DirectoryDialer: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn DirectoryConnection>, LdapError>;
}

/// Dialer backed by `ldap3`.
pub struct Ldap3Dialer {
    address: String,
    tls: Option<DirectoryTls>,
    use_insecure: bool,
    connect_timeout: Duration,
}

impl Ldap3Dialer {
    pub fn new(config: &LdapConfig) -> Self {
        Self {
            address: config.address(),
            tls: config.tls.clone(),
            use_insecure: config.use_insecure,
            connect_timeout: config.operation_timeout,
        }
    }

    /// Connection URL and settings for the configured transport.
    fn target(&self) -> Result<(String, LdapConnSettings), LdapError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.connect_timeout);

        match (&self.tls, self.use_insecure) {
            (Some(tls), false) => Ok((
                format!("ldaps://{}", self.address),
                settings.set_no_tls_verify(tls.skip_verify),
            )),
            // Passwords are sent in clear text, hence the explicit flag.
            (_, true) => Ok((format!("ldap://{}", self.address), settings)),
            (None, false) => Err(LdapError::Connection(
                "the LDAP TLS configuration was not set".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DirectoryDialer for Ldap3Dialer {
    async fn dial(&self) -> Result<Box<dyn DirectoryConnection>, LdapError> {
        let (url, settings) = self.target()?;

        debug!(url = %url, "Connecting to LDAP server");

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| LdapError::Connection(format!("{}: {}", url, e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(Box::new(Ldap3Connection { ldap }))
    }
}

struct Ldap3Connection {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.ldap.simple_bind(dn, password).await?.success()?;
        Ok(())
    }

    async fn search(&mut self, request: &UserSearch) -> Result<Vec<Identity>> {
        let options = SearchOptions::new()
            .deref(DerefAliases::Never)
            .sizelimit(request.size_limit)
            .timelimit(request.time_limit_secs);

        let ldap3::SearchResult(entries, result) = self
            .ldap
            .with_search_options(options)
            .search(
                &request.base_dn,
                Scope::Subtree,
                &request.filter,
                request.attributes.clone(),
            )
            .await?;

        // sizeLimitExceeded still carries the entries read so far, which is
        // exactly what ambiguity detection needs.
        if result.rc != 0 && result.rc != RC_SIZE_LIMIT_EXCEEDED {
            bail!("search failed with code {}: {}", result.rc, result.text);
        }

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| Identity {
                dn: entry.dn,
                attributes: entry.attrs,
            })
            .collect())
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!(error = %e, "Error during LDAP unbind");
        }
    }
}
