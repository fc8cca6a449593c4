//! Token issuance endpoint.
//!
//! Reads HTTP Basic credentials, authenticates them against the directory,
//! and answers with a signed token. Failures never say which step failed.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::config::IssuanceConfig;
use super::version::{KUBECTL_VERSION_HEADER, PLUGIN_VERSION_HEADER};
use crate::ldap::Authenticator;
use crate::metrics::IssuanceMetrics;
use crate::token::{token_for_identity, Signer};

/// JSON body returned when the caller asks for `application/json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    /// Unix epoch milliseconds.
    pub expiration_timestamp: i64,
}

/// Issues signed tokens after authenticating the caller with the directory.
pub struct TokenIssuer {
    authenticator: Arc<dyn Authenticator>,
    signer: Arc<dyn Signer>,
    config: IssuanceConfig,
    metrics: Arc<IssuanceMetrics>,
}

impl TokenIssuer {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        signer: Arc<dyn Signer>,
        config: IssuanceConfig,
        metrics: Arc<IssuanceMetrics>,
    ) -> Self {
        Self {
            authenticator,
            signer,
            config,
            metrics,
        }
    }

    pub async fn issue(&self, headers: &HeaderMap) -> Response {
        self.metrics.new_token_requests.inc();

        let Some((username, password)) = basic_credentials(headers) else {
            self.metrics.noauth_token_requests.inc();
            debug!("Token request without Basic credentials");
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, self.config.challenge())],
            )
                .into_response();
        };

        if let Some(gate) = &self.config.version_gate {
            let plugin = header_str(headers, PLUGIN_VERSION_HEADER);
            let kubectl = header_str(headers, KUBECTL_VERSION_HEADER);
            if let Err(e) = gate.check(plugin, kubectl) {
                self.metrics.client_version_rejected.inc();
                warn!(user = %username, error = %e, "Rejected token request from unsupported client");
                return (
                    StatusCode::BAD_REQUEST,
                    [(header::CONTENT_TYPE, "text/plain")],
                    format!("\nError: {}", e),
                )
                    .into_response();
            }
        }

        let identity = match self.authenticator.authenticate(&username, &password).await {
            Ok(identity) => identity,
            Err(e) => {
                self.metrics.failed_ldap_auth.inc();
                warn!(user = %username, kind = e.kind(), error = %e, "LDAP authentication failed");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        };

        let token = token_for_identity(
            &identity,
            &self.config.ldap_server,
            self.config.username_attribute.as_deref(),
            self.config.ttl,
        );

        let signed = match self.signer.sign(&token) {
            Ok(signed) => signed,
            Err(e) => {
                self.metrics.error_signing_tokens.inc();
                error!(user = %token.username, error = %e, "Failed to sign token");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        self.metrics.successful_tokens.inc();
        info!(
            user = %token.username,
            groups = token.groups.len(),
            expiration = token.expiration,
            "Issued token"
        );

        if wants_json(headers) {
            Json(IssuedToken {
                token: signed,
                expiration_timestamp: token.expiration,
            })
            .into_response()
        } else {
            ([(header::CONTENT_TYPE, "text/plain")], signed).into_response()
        }
    }
}

/// Axum handler for `/ldapAuth`.
pub async fn issue_token_handler(
    State(issuer): State<Arc<TokenIssuer>>,
    headers: HeaderMap,
) -> Response {
    issuer.issue(&headers).await
}

/// Username and password from an `Authorization: Basic` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = header_str(headers, header::AUTHORIZATION.as_str())?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn wants_json(headers: &HeaderMap) -> bool {
    header_str(headers, header::ACCEPT.as_str())
        .map(|accept| {
            accept.split(',').any(|media| {
                media
                    .split(';')
                    .next()
                    .is_some_and(|m| m.trim().eq_ignore_ascii_case("application/json"))
            })
        })
        .unwrap_or(false)
}
