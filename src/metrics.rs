//! Prometheus metrics.
//!
//! One [`Metrics`] value owns the registry and every counter group. It is
//! built once in `main` and handed to each component as an `Arc`, so
//! components never touch process-wide state and tests can inspect the
//! counters of their own instance.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus_client::{encoding::text::encode, metrics::counter::Counter, registry::Registry};
use std::sync::Arc;

/// Metric name prefix.
const PREFIX: &str = "ldap_bridge";

/// Counters for the token issuance endpoint.
#[derive(Debug, Default)]
pub struct IssuanceMetrics {
    pub new_token_requests: Counter,
    pub noauth_token_requests: Counter,
    pub failed_ldap_auth: Counter,
    pub error_signing_tokens: Counter,
    pub successful_tokens: Counter,
    pub client_version_rejected: Counter,
}

/// Counters for the token review webhook.
#[derive(Debug, Default)]
pub struct WebhookMetrics {
    pub verify_token_requests: Counter,
    pub invalid_method_requests: Counter,
    pub invalid_json_body: Counter,
    pub invalid_token_requests: Counter,
    pub successful_verifications: Counter,
}

/// Counters for directory authentication.
#[derive(Debug, Default)]
pub struct DirectoryMetrics {
    pub connection_errors: Counter,
    pub timeouts: Counter,
    pub binding_errors: Counter,
    pub search_failures: Counter,
    pub no_user_found: Counter,
    pub multiple_users_found: Counter,
    pub invalid_credentials: Counter,
}

/// Registry plus all counter groups.
pub struct Metrics {
    registry: Registry,
    pub issuance: Arc<IssuanceMetrics>,
    pub webhook: Arc<WebhookMetrics>,
    pub directory: Arc<DirectoryMetrics>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(PREFIX);
        let issuance = Arc::new(IssuanceMetrics::default());
        let webhook = Arc::new(WebhookMetrics::default());
        let directory = Arc::new(DirectoryMetrics::default());

        registry.register(
            "new_token_requests",
            "Total number of requests to get new token",
            issuance.new_token_requests.clone(),
        );
        registry.register(
            "noauth_token_requests",
            "Total number of requests to get new token without username or password",
            issuance.noauth_token_requests.clone(),
        );
        registry.register(
            "failed_ldap_auth",
            "Total number of requests to get new token where LDAP auth failed",
            issuance.failed_ldap_auth.clone(),
        );
        registry.register(
            "error_signing_tokens",
            "Total number of requests where signing new token failed",
            issuance.error_signing_tokens.clone(),
        );
        registry.register(
            "successful_tokens_generated",
            "Total number of requests where tokens were successfully issued",
            issuance.successful_tokens.clone(),
        );
        registry.register(
            "client_version_rejected",
            "Total number of token requests rejected by the client version gate",
            issuance.client_version_rejected.clone(),
        );

        registry.register(
            "verify_token_requests",
            "Total number of requests to verify token",
            webhook.verify_token_requests.clone(),
        );
        registry.register(
            "invalid_http_method_requests",
            "Total number of requests to verify token which were not HTTP POST",
            webhook.invalid_method_requests.clone(),
        );
        registry.register(
            "invalid_token_request_format",
            "Total number of requests to verify token with invalid request format",
            webhook.invalid_json_body.clone(),
        );
        registry.register(
            "invalid_token",
            "Total number of requests to verify token with invalid token",
            webhook.invalid_token_requests.clone(),
        );
        registry.register(
            "successful_verify_token_requests",
            "Total number of requests where verify token request succeeded",
            webhook.successful_verifications.clone(),
        );

        registry.register(
            "ldap_connection_error",
            "Total number of LDAP connection errors",
            directory.connection_errors.clone(),
        );
        registry.register(
            "ldap_timeout",
            "Total number of LDAP authentications that exceeded the deadline",
            directory.timeouts.clone(),
        );
        registry.register(
            "ldap_binding_error",
            "Total number of LDAP binding errors",
            directory.binding_errors.clone(),
        );
        registry.register(
            "user_search_failed",
            "Total number of LDAP user search failures",
            directory.search_failures.clone(),
        );
        registry.register(
            "no_user_found",
            "Total number of times user was not found in LDAP",
            directory.no_user_found.clone(),
        );
        registry.register(
            "multiple_user_found",
            "Total number of times multiple users were found in LDAP",
            directory.multiple_users_found.clone(),
        );
        registry.register(
            "invalid_credentials_error",
            "Total number of times invalid user credentials were used",
            directory.invalid_credentials.clone(),
        );

        Self {
            registry,
            issuance,
            webhook,
            directory,
        }
    }

    /// Render all metrics in OpenMetrics text format.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
