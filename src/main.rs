//! Zentinel LDAP Bridge
//!
//! Exchanges LDAP credentials for short-lived signed tokens and answers
//! token review webhooks for the tokens it issued.

mod issuance;
mod ldap;
mod metrics;
mod token;
mod webhook;

use anyhow::{anyhow, Context, Result};
use axum::{
    routing::{any, get},
    Router,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};

use issuance::version::{DEFAULT_MIN_KUBECTL_VERSION, DEFAULT_MIN_PLUGIN_VERSION};
use issuance::{issue_token_handler, IssuanceConfig, TokenIssuer, VersionGate};
use ldap::{bind_strategy_from, DirectoryAuthenticator, DirectoryTls, LdapConfig};
use metrics::{metrics_handler, Metrics};
use token::{ensure_keypair, generate_keypair, TokenSigner, TokenVerifier};
use webhook::{token_review_handler, TokenWebhook};

const KEYPAIR_DIR_MODE: u32 = 0o700;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "zentinel-ldap-bridge")]
#[command(about = "Issues signed tokens for LDAP users and verifies them for the cluster API server")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// LDAP server host
    #[arg(long, env = "LDAP_HOST")]
    ldap_host: Option<String>,

    /// LDAP server port
    #[arg(long, default_value_t = 389, env = "LDAP_PORT")]
    ldap_port: u16,

    /// Base DN of the subtree searched for users
    #[arg(long, env = "LDAP_BASE_DN")]
    ldap_base_dn: Option<String>,

    /// Attribute matched against the login name
    #[arg(long, default_value = "uid", env = "LDAP_USER_ATTRIBUTE")]
    ldap_user_attribute: String,

    /// DN of the account used to search for users
    #[arg(long, env = "LDAP_SEARCH_USER_DN")]
    ldap_search_user_dn: Option<String>,

    /// Password of the search account
    #[arg(long, env = "LDAP_SEARCH_USER_PASSWORD", hide_env_values = true)]
    ldap_search_user_password: Option<String>,

    /// Bind with the caller's own login when no search account is set
    #[arg(long, env = "LDAP_DIRECT_BIND")]
    ldap_direct_bind: bool,

    /// Accept any LDAP server certificate
    #[arg(long, env = "LDAP_SKIP_TLS_VERIFICATION")]
    ldap_skip_tls_verification: bool,

    /// Talk to the LDAP server without TLS
    #[arg(long, env = "LDAP_USE_INSECURE")]
    use_insecure: bool,

    /// Deadline for one LDAP authentication (e.g. 5s)
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration, env = "LDAP_TIMEOUT")]
    ldap_timeout: Duration,

    /// Attribute whose value becomes the token username (defaults to the DN)
    #[arg(long, env = "USERNAME_ATTRIBUTE")]
    username_attribute: Option<String>,

    /// Token lifetime (e.g. 24h, 90m)
    #[arg(long, default_value = "24h", value_parser = humantime::parse_duration, env = "TOKEN_TTL")]
    token_ttl: Duration,

    /// Directory holding the signing keypair
    #[arg(long, default_value = "./keys", env = "KEYPAIR_DIR", global = true)]
    keypair_dir: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:4000", env = "LISTEN_ADDR")]
    listen: SocketAddr,

    /// Reject token requests from clients older than the minimum versions
    #[arg(long, env = "ENFORCE_CLIENT_VERSIONS")]
    enforce_client_versions: bool,

    /// Minimum ldapctl plugin version
    #[arg(long, default_value = DEFAULT_MIN_PLUGIN_VERSION, env = "MIN_PLUGIN_VERSION")]
    min_plugin_version: String,

    /// Minimum kubectl version
    #[arg(long, default_value = DEFAULT_MIN_KUBECTL_VERSION, env = "MIN_KUBECTL_VERSION")]
    min_kubectl_version: String,

    /// Enable verbose logging
    #[arg(short, long, env = "LDAP_BRIDGE_VERBOSE", global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Command {
    /// Serve the issuance and webhook endpoints (default)
    #[default]
    Serve,
    /// Write a fresh signing keypair, replacing any existing one
    GenKeypair,
}

impl Args {
    fn ldap_config(&self) -> Result<LdapConfig> {
        let bind_strategy = bind_strategy_from(
            self.ldap_search_user_dn.clone(),
            self.ldap_search_user_password.clone(),
            self.ldap_direct_bind,
        )
        .map_err(|e| anyhow!("Invalid LDAP configuration: {}", e))?;

        let config = LdapConfig {
            host: self.ldap_host.clone().unwrap_or_default(),
            port: self.ldap_port,
            base_dn: self.ldap_base_dn.clone().unwrap_or_default(),
            user_login_attribute: self.ldap_user_attribute.clone(),
            bind_strategy,
            tls: (!self.use_insecure).then(|| DirectoryTls {
                skip_verify: self.ldap_skip_tls_verification,
            }),
            use_insecure: self.use_insecure,
            operation_timeout: self.ldap_timeout,
            ..Default::default()
        };
        config
            .validate()
            .map_err(|e| anyhow!("Invalid LDAP configuration: {}", e))?;
        Ok(config)
    }

    fn issuance_config(&self) -> Result<IssuanceConfig> {
        let version_gate = if self.enforce_client_versions {
            Some(
                VersionGate::new(&self.min_plugin_version, &self.min_kubectl_version)
                    .map_err(|e| anyhow!("Invalid minimum client version: {}", e))?,
            )
        } else {
            None
        };

        let config = IssuanceConfig {
            ldap_server: self.ldap_host.clone().unwrap_or_default(),
            ttl: self.token_ttl,
            username_attribute: self
                .username_attribute
                .clone()
                .filter(|attr| !attr.trim().is_empty()),
            version_gate,
            ..Default::default()
        };
        config
            .validate()
            .map_err(|e| anyhow!("Invalid issuance configuration: {}", e))?;
        Ok(config)
    }
}

/// All HTTP routes of the bridge.
fn build_router(issuer: Arc<TokenIssuer>, webhook: Arc<TokenWebhook>, metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/ldapAuth", get(issue_token_handler).post(issue_token_handler))
        .with_state(issuer)
        .merge(
            Router::new()
                .route("/authenticate", any(token_review_handler))
                .with_state(webhook),
        )
        .merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        )
}

/// Create the keypair directory (owner-only) if it does not exist yet.
fn prepare_keypair_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).with_context(|| format!("Failed to create keypair directory {:?}", dir))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(KEYPAIR_DIR_MODE))
            .with_context(|| format!("Failed to restrict keypair directory {:?}", dir))?;
    }
    Ok(())
}

fn gen_keypair(dir: &Path) -> Result<()> {
    prepare_keypair_dir(dir)?;
    generate_keypair(dir)
}

async fn serve(args: &Args) -> Result<()> {
    let ldap_config = args.ldap_config()?;
    let issuance_config = args.issuance_config()?;

    if ldap_config.use_insecure {
        warn!("LDAP TLS is disabled; passwords are sent to the directory in clear text");
    }
    if ldap_config.tls.as_ref().is_some_and(|tls| tls.skip_verify) {
        warn!("LDAP server certificate verification is disabled");
    }

    info!(
        ldap = %ldap_config.address(),
        base_dn = %ldap_config.base_dn,
        bind = ?ldap_config.bind_strategy,
        token_ttl = %humantime::format_duration(issuance_config.ttl),
        enforce_client_versions = issuance_config.version_gate.is_some(),
        "Configuration loaded"
    );

    prepare_keypair_dir(&args.keypair_dir)?;
    let keys = ensure_keypair(&args.keypair_dir).context("Failed to load signing keypair")?;

    let metrics = Arc::new(Metrics::new());
    let authenticator = Arc::new(DirectoryAuthenticator::new(
        ldap_config,
        metrics.directory.clone(),
    ));
    let issuer = Arc::new(TokenIssuer::new(
        authenticator,
        Arc::new(TokenSigner::new(keys.encoding_key)),
        issuance_config,
        metrics.issuance.clone(),
    ));
    let webhook = Arc::new(TokenWebhook::new(
        Arc::new(TokenVerifier::new(keys.decoding_key)),
        metrics.webhook.clone(),
    ));

    let app = build_router(issuer, webhook, metrics);

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    match args.command.unwrap_or_default() {
        Command::Serve => {
            info!("Starting Zentinel LDAP Bridge");
            serve(&args).await
        }
        Command::GenKeypair => gen_keypair(&args.keypair_dir),
    }
}
