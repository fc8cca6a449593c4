//! Bind-search-rebind authentication against the directory.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use super::config::{BindStrategy, LdapConfig};
use super::connection::{DirectoryConnection, DirectoryDialer, Ldap3Dialer, UserSearch};
use super::error::LdapError;
use super::identity::Identity;
use crate::metrics::DirectoryMetrics;

/// Attributes requested for the user entry. `memberOf` is operational on
/// some servers and is not covered by `*`.
const SEARCH_ATTRIBUTES: [&str; 2] = ["*", "memberOf"];

/// Upper bound for the unbind sent when releasing a connection.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Authenticates a user against a directory.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the single directory entry matching `username` if `password`
    /// is valid for it.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, LdapError>;
}

/// Directory authenticator. Opens one connection per call and always
/// releases it before returning.
pub struct DirectoryAuthenticator {
    config: LdapConfig,
    dialer: Arc<dyn DirectoryDialer>,
    metrics: Arc<DirectoryMetrics>,
}

impl DirectoryAuthenticator {
    /// Authenticator talking to the configured server through `ldap3`.
    pub fn new(config: LdapConfig, metrics: Arc<DirectoryMetrics>) -> Self {
        let dialer = Arc::new(Ldap3Dialer::new(&config));
        Self::with_dialer(config, dialer, metrics)
    }

    pub fn with_dialer(
        config: LdapConfig,
        dialer: Arc<dyn DirectoryDialer>,
        metrics: Arc<DirectoryMetrics>,
    ) -> Self {
        Self {
            config,
            dialer,
            metrics,
        }
    }

    /// Search request for a login name. The value is escaped before it is
    /// placed into the filter.
    pub fn user_search(&self, username: &str) -> UserSearch {
        UserSearch {
            base_dn: self.config.base_dn.clone(),
            filter: format!(
                "({}={})",
                self.config.user_login_attribute,
                ldap3::ldap_escape(username)
            ),
            attributes: SEARCH_ATTRIBUTES.iter().map(|a| a.to_string()).collect(),
            size_limit: self.config.search_size_limit,
            time_limit_secs: self.config.search_time_limit_secs,
        }
    }

    /// Dial, authenticate, release. The deadline bounds the directory
    /// exchange; the connection is closed afterwards on every path,
    /// including an expired deadline.
    async fn run(&self, username: &str, password: &str) -> Result<Identity, LdapError> {
        let deadline = Instant::now() + self.config.operation_timeout;

        let mut conn = match timeout_at(deadline, self.dialer.dial()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                self.metrics.connection_errors.inc();
                return Err(e);
            }
            Err(_) => return Err(self.timed_out()),
        };

        let exchange = self.authenticate_on(conn.as_mut(), username, password);
        let result = match timeout_at(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out()),
        };

        if timeout(CLOSE_TIMEOUT, conn.close()).await.is_err() {
            debug!("LDAP connection did not close in time, dropping it");
        }
        result
    }

    fn timed_out(&self) -> LdapError {
        self.metrics.timeouts.inc();
        LdapError::Timeout(self.config.operation_timeout)
    }

    async fn authenticate_on(
        &self,
        conn: &mut dyn DirectoryConnection,
        username: &str,
        password: &str,
    ) -> Result<Identity, LdapError> {
        // Establish the identity used for the search.
        let bind_result = match &self.config.bind_strategy {
            BindStrategy::ServiceAccount {
                dn,
                password: service_password,
            } => conn.bind(dn, service_password).await,
            BindStrategy::Direct => conn.bind(username, password).await,
        };
        if let Err(e) = bind_result {
            self.metrics.binding_errors.inc();
            return Err(LdapError::Bind(e.to_string()));
        }

        let request = self.user_search(username);
        debug!(filter = %request.filter, base_dn = %request.base_dn, "Searching for user");

        let mut entries = conn.search(&request).await.map_err(|e| {
            self.metrics.search_failures.inc();
            LdapError::Search {
                username: username.to_string(),
                reason: e.to_string(),
            }
        })?;

        let entry = match entries.len() {
            0 => {
                self.metrics.no_user_found.inc();
                return Err(LdapError::NoUserFound {
                    filter: request.filter,
                });
            }
            1 => entries.remove(0),
            _ => {
                self.metrics.multiple_users_found.inc();
                warn!(
                    filter = %request.filter,
                    dns = ?entries.iter().map(|e| e.dn.as_str()).collect::<Vec<_>>(),
                    "Ambiguous login attribute"
                );
                return Err(LdapError::MultipleUsersFound {
                    filter: request.filter,
                });
            }
        };

        // The search account proved nothing about the caller; prove the
        // password against the resolved DN rather than the login string.
        if matches!(self.config.bind_strategy, BindStrategy::ServiceAccount { .. }) {
            if let Err(e) = conn.bind(&entry.dn, password).await {
                self.metrics.invalid_credentials.inc();
                return Err(LdapError::InvalidCredentials {
                    username: username.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(entry)
    }
}

#[async_trait]
impl Authenticator for DirectoryAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, LdapError> {
        // An empty password is an unauthenticated bind, which most servers
        // accept for any DN.
        if password.is_empty() {
            self.metrics.invalid_credentials.inc();
            return Err(LdapError::InvalidCredentials {
                username: username.to_string(),
                reason: "empty password".to_string(),
            });
        }

        self.run(username, password).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const SEARCH_DN: &str = "cn=search,dc=example,dc=com";
    const SEARCH_PASSWORD: &str = "search-secret";

    /// In-memory directory: DN -> password, plus the entries the next
    /// search returns.
    #[derive(Default)]
    struct ScriptedDirectory {
        passwords: HashMap<String, String>,
        search_results: Vec<Identity>,
        search_error: bool,
        dial_error: bool,
        stall_dial: bool,
        stall: bool,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    struct ScriptedConnection {
        passwords: HashMap<String, String>,
        search_results: Vec<Identity>,
        search_error: bool,
        stall: bool,
        closed: Arc<AtomicUsize>,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DirectoryConnection for ScriptedConnection {
        async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
            self.log.lock().unwrap().push(dn.to_string());
            match self.passwords.get(dn) {
                Some(expected) if expected == password => Ok(()),
                _ => Err(anyhow!("invalid credentials (49)")),
            }
        }

        async fn search(&mut self, request: &UserSearch) -> Result<Vec<Identity>> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.search_error {
                return Err(anyhow!("insufficient access rights"));
            }
            assert_eq!(request.size_limit, 2);
            Ok(self.search_results.clone())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedDialer {
        directory: ScriptedDirectory,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DirectoryDialer for ScriptedDialer {
        async fn dial(&self) -> Result<Box<dyn DirectoryConnection>, LdapError> {
            if self.directory.stall_dial {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.directory.dial_error {
                return Err(LdapError::Connection("connection refused".to_string()));
            }
            self.directory.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedConnection {
                passwords: self.directory.passwords.clone(),
                search_results: self.directory.search_results.clone(),
                search_error: self.directory.search_error,
                stall: self.directory.stall,
                closed: Arc::clone(&self.directory.closed),
                log: Arc::clone(&self.log),
            }))
        }
    }

    fn jdoe() -> Identity {
        Identity::new("uid=jdoe,ou=people,dc=example,dc=com")
            .with_attribute("mail", ["jdoe@example.com"])
    }

    fn directory() -> ScriptedDirectory {
        let mut passwords = HashMap::new();
        passwords.insert(SEARCH_DN.to_string(), SEARCH_PASSWORD.to_string());
        passwords.insert(jdoe().dn, "correct-horse".to_string());
        ScriptedDirectory {
            passwords,
            search_results: vec![jdoe()],
            ..Default::default()
        }
    }

    fn config(strategy: BindStrategy) -> LdapConfig {
        LdapConfig {
            host: "ldap.example.com".to_string(),
            base_dn: "dc=example,dc=com".to_string(),
            bind_strategy: strategy,
            operation_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn service_account() -> BindStrategy {
        BindStrategy::ServiceAccount {
            dn: SEARCH_DN.to_string(),
            password: SEARCH_PASSWORD.to_string(),
        }
    }

    struct Harness {
        authenticator: DirectoryAuthenticator,
        dialer: Arc<ScriptedDialer>,
        metrics: Arc<DirectoryMetrics>,
    }

    impl Harness {
        fn closed(&self) -> usize {
            self.dialer.directory.closed.load(Ordering::SeqCst)
        }

        fn opened(&self) -> usize {
            self.dialer.directory.opened.load(Ordering::SeqCst)
        }

        fn binds(&self) -> Vec<String> {
            self.dialer.log.lock().unwrap().clone()
        }
    }

    fn harness(strategy: BindStrategy, directory: ScriptedDirectory) -> Harness {
        let metrics = Arc::new(DirectoryMetrics::default());
        let dialer = Arc::new(ScriptedDialer {
            directory,
            log: Arc::new(Mutex::new(Vec::new())),
        });
        let authenticator = DirectoryAuthenticator::with_dialer(
            config(strategy),
            Arc::clone(&dialer) as Arc<dyn DirectoryDialer>,
            Arc::clone(&metrics),
        );
        Harness {
            authenticator,
            dialer,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_search_then_rebind_success() {
        let h = harness(service_account(), directory());

        let identity = h
            .authenticator
            .authenticate("jdoe", "correct-horse")
            .await
            .unwrap();

        assert_eq!(identity, jdoe());
        assert_eq!(h.binds(), vec![SEARCH_DN.to_string(), jdoe().dn]);
        assert_eq!(h.opened(), 1);
        assert_eq!(h.closed(), 1);
    }

    #[tokio::test]
    async fn test_wrong_password_on_rebind() {
        let h = harness(service_account(), directory());

        let err = h
            .authenticator
            .authenticate("jdoe", "wrong")
            .await
            .unwrap_err();

        assert!(matches!(err, LdapError::InvalidCredentials { .. }));
        assert_eq!(h.metrics.invalid_credentials.get(), 1);
        assert_eq!(h.closed(), 1);
    }

    #[tokio::test]
    async fn test_no_user_found() {
        let mut dir = directory();
        dir.search_results.clear();
        let h = harness(service_account(), dir);

        let err = h
            .authenticator
            .authenticate("ghost", "whatever")
            .await
            .unwrap_err();

        match err {
            LdapError::NoUserFound { filter } => assert_eq!(filter, "(uid=ghost)"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.metrics.no_user_found.get(), 1);
        assert_eq!(h.closed(), 1);
    }

    #[tokio::test]
    async fn test_multiple_users_found() {
        let mut dir = directory();
        dir.search_results
            .push(Identity::new("uid=jdoe,ou=contractors,dc=example,dc=com"));
        let h = harness(service_account(), dir);

        let err = h
            .authenticator
            .authenticate("jdoe", "correct-horse")
            .await
            .unwrap_err();

        assert!(matches!(err, LdapError::MultipleUsersFound { .. }));
        assert_eq!(h.metrics.multiple_users_found.get(), 1);
        // Never re-binds as either candidate.
        assert_eq!(h.binds(), vec![SEARCH_DN.to_string()]);
        assert_eq!(h.closed(), 1);
    }

    #[tokio::test]
    async fn test_service_bind_rejected() {
        let mut dir = directory();
        dir.passwords.insert(SEARCH_DN.to_string(), "rotated".to_string());
        let h = harness(service_account(), dir);

        let err = h
            .authenticator
            .authenticate("jdoe", "correct-horse")
            .await
            .unwrap_err();

        assert!(matches!(err, LdapError::Bind(_)));
        assert_eq!(h.metrics.binding_errors.get(), 1);
        assert_eq!(h.closed(), 1);
    }

    #[tokio::test]
    async fn test_search_failure() {
        let mut dir = directory();
        dir.search_error = true;
        let h = harness(service_account(), dir);

        let err = h
            .authenticator
            .authenticate("jdoe", "correct-horse")
            .await
            .unwrap_err();

        assert!(matches!(err, LdapError::Search { .. }));
        assert_eq!(h.metrics.search_failures.get(), 1);
        assert_eq!(h.closed(), 1);
    }

    #[tokio::test]
    async fn test_direct_bind_skips_rebind() {
        let mut dir = directory();
        dir.passwords
            .insert("jdoe@example.com".to_string(), "correct-horse".to_string());
        let h = harness(BindStrategy::Direct, dir);

        let identity = h
            .authenticator
            .authenticate("jdoe@example.com", "correct-horse")
            .await
            .unwrap();

        assert_eq!(identity.dn, jdoe().dn);
        assert_eq!(h.binds(), vec!["jdoe@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_direct_bind_rejected() {
        let h = harness(BindStrategy::Direct, directory());

        let err = h
            .authenticator
            .authenticate("jdoe", "correct-horse")
            .await
            .unwrap_err();

        assert!(matches!(err, LdapError::Bind(_)));
        assert_eq!(h.closed(), 1);
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let mut dir = directory();
        dir.dial_error = true;
        let h = harness(service_account(), dir);

        let err = h
            .authenticator
            .authenticate("jdoe", "correct-horse")
            .await
            .unwrap_err();

        assert!(matches!(err, LdapError::Connection(_)));
        assert_eq!(h.metrics.connection_errors.get(), 1);
        assert_eq!(h.opened(), 0);
    }

    #[tokio::test]
    async fn test_empty_password_never_reaches_directory() {
        let h = harness(service_account(), directory());

        let err = h.authenticator.authenticate("jdoe", "").await.unwrap_err();

        assert!(matches!(err, LdapError::InvalidCredentials { .. }));
        assert_eq!(h.opened(), 0);
    }

    #[tokio::test]
    async fn test_slow_directory_times_out() {
        let mut dir = directory();
        dir.stall = true;
        let h = harness(service_account(), dir);

        let err = h
            .authenticator
            .authenticate("jdoe", "correct-horse")
            .await
            .unwrap_err();

        assert!(matches!(err, LdapError::Timeout(_)));
        assert_eq!(h.opened(), 1);
        assert_eq!(h.closed(), 1);
        assert_eq!(h.metrics.timeouts.get(), 1);
        assert_eq!(h.metrics.connection_errors.get(), 0);
    }

    #[tokio::test]
    async fn test_slow_dial_times_out_without_connection() {
        let mut dir = directory();
        dir.stall_dial = true;
        let h = harness(service_account(), dir);

        let err = h
            .authenticator
            .authenticate("jdoe", "correct-horse")
            .await
            .unwrap_err();

        assert!(matches!(err, LdapError::Timeout(_)));
        assert_eq!(h.opened(), 0);
        assert_eq!(h.metrics.timeouts.get(), 1);
    }

    #[test]
    fn test_search_filter_is_escaped() {
        let h = harness(service_account(), directory());
        let request = h.authenticator.user_search("*)(uid=*");
        assert_eq!(request.filter, "(uid=\\2a\\29\\28uid=\\2a)");
        assert_eq!(request.base_dn, "dc=example,dc=com");
        assert_eq!(request.size_limit, 2);
    }
}
