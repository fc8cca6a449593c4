//! Token review webhook.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{TokenReview, TokenReviewStatus, UserInfo};
use crate::metrics::WebhookMetrics;
use crate::token::{AuthToken, TokenError, Verifier};

/// Answers token reviews for tokens issued by this bridge.
pub struct TokenWebhook {
    verifier: Arc<dyn Verifier>,
    metrics: Arc<WebhookMetrics>,
}

impl TokenWebhook {
    pub fn new(verifier: Arc<dyn Verifier>, metrics: Arc<WebhookMetrics>) -> Self {
        Self { verifier, metrics }
    }

    /// Verify the signature, then reject tokens past their expiration.
    pub fn check(&self, token: &str) -> Result<AuthToken, TokenError> {
        let token = self.verifier.verify(token)?;
        if token.is_expired() {
            return Err(TokenError::Expired {
                expiration: token.expiration,
            });
        }
        Ok(token)
    }

    pub fn review(&self, method: &Method, body: &[u8]) -> Response {
        self.metrics.verify_token_requests.inc();

        if *method != Method::POST {
            self.metrics.invalid_method_requests.inc();
            debug!(method = %method, "Token review with invalid method");
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }

        let mut review: TokenReview = match serde_json::from_slice(body) {
            Ok(review) => review,
            Err(e) => {
                self.metrics.invalid_json_body.inc();
                warn!(error = %e, "Malformed token review request");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let token = match self.check(&review.spec.token) {
            Ok(token) => token,
            Err(e) => {
                self.metrics.invalid_token_requests.inc();
                warn!(error = %e, "Token is invalid");
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::CONTENT_TYPE, "text/plain")],
                    e.to_string(),
                )
                    .into_response();
            }
        };

        self.metrics.successful_verifications.inc();
        info!(user = %token.username, "Token verified");

        review.status = Some(TokenReviewStatus {
            authenticated: true,
            user: UserInfo {
                username: token.username,
                groups: token.groups,
            },
        });
        Json(review).into_response()
    }
}

/// Axum handler for `/authenticate`. Mounted for every method so that
/// non-POST requests get a counted 405.
pub async fn token_review_handler(
    State(webhook): State<Arc<TokenWebhook>>,
    method: Method,
    body: Bytes,
) -> Response {
    webhook.review(&method, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::keypair::load_keypair;
    use crate::token::{generate_keypair, Signer, TokenSigner, TokenVerifier};
    use axum::{body::Body, http::Request, routing::any, Router};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::tempdir;
    use tower::ServiceExt;

    struct Harness {
        signer: TokenSigner,
        metrics: Arc<WebhookMetrics>,
        router: Router,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        generate_keypair(dir.path()).unwrap();
        let keys = load_keypair(dir.path()).unwrap();

        let metrics = Arc::new(WebhookMetrics::default());
        let webhook = Arc::new(TokenWebhook::new(
            Arc::new(TokenVerifier::new(keys.decoding_key)),
            metrics.clone(),
        ));
        let router = Router::new()
            .route("/authenticate", any(token_review_handler))
            .with_state(webhook);

        Harness {
            signer: TokenSigner::new(keys.encoding_key),
            metrics,
            router,
        }
    }

    fn token(expiration: i64) -> AuthToken {
        AuthToken {
            username: "jdoe".to_string(),
            groups: vec!["devs".to_string(), "ops".to_string()],
            assertions: BTreeMap::from([("userDN".to_string(), "uid=jdoe".to_string())]),
            expiration,
        }
    }

    fn valid_token() -> AuthToken {
        token(crate::token::claims::now_millis() + 60_000)
    }

    async fn post(router: Router, body: String) -> (StatusCode, String, String) {
        let request = Request::builder()
            .method("POST")
            .uri("/authenticate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    fn review_body(token: &str) -> String {
        json!({
            "apiVersion": "authentication.k8s.io/v1",
            "kind": "TokenReview",
            "spec": {"token": token}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_non_post_is_405() {
        let h = harness();
        let request = Request::builder()
            .method("GET")
            .uri("/authenticate")
            .body(Body::empty())
            .unwrap();

        let response = h.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(h.metrics.verify_token_requests.get(), 1);
        assert_eq!(h.metrics.invalid_method_requests.get(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_500() {
        let h = harness();

        let (status, _, _) = post(h.router, "{not json".to_string()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(h.metrics.invalid_json_body.get(), 1);
    }

    #[tokio::test]
    async fn test_review_without_token_is_401() {
        let h = harness();

        for body in [r#"{"kind":"TokenReview"}"#, r#"{"spec":{}}"#, r#"{"spec":{"token":""}}"#] {
            let (status, content_type, _) = post(h.router.clone(), body.to_string()).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "body: {}", body);
            assert_eq!(content_type, "text/plain");
        }
        assert_eq!(h.metrics.invalid_json_body.get(), 0);
        assert_eq!(h.metrics.invalid_token_requests.get(), 3);
    }

    #[tokio::test]
    async fn test_garbage_token_is_401() {
        let h = harness();

        let (status, content_type, body) = post(h.router, review_body("garbage")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(content_type, "text/plain");
        assert!(body.starts_with("error decoding token"));
        assert_eq!(h.metrics.invalid_token_requests.get(), 1);
    }

    #[tokio::test]
    async fn test_tampered_token_is_401() {
        let h = harness();
        let signed = h.signer.sign(&valid_token()).unwrap();
        let payload_start = signed.find('.').unwrap() + 1;
        let mut bytes = signed.into_bytes();
        let idx = payload_start + 3;
        bytes[idx] = if bytes[idx] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        let (status, _, body) = post(h.router, review_body(&tampered)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "token signature is invalid");
    }

    #[tokio::test]
    async fn test_expired_token_is_401() {
        let h = harness();
        let signed = h.signer.sign(&token(1_000)).unwrap();

        let (status, _, body) = post(h.router, review_body(&signed)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("expired"));
        assert_eq!(h.metrics.successful_verifications.get(), 0);
    }

    #[tokio::test]
    async fn test_valid_token_is_authenticated() {
        let h = harness();
        let signed = h.signer.sign(&valid_token()).unwrap();

        let (status, content_type, body) = post(h.router, review_body(&signed)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "application/json");
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["kind"], "TokenReview");
        assert_eq!(json["spec"]["token"], signed.as_str());
        assert_eq!(json["status"]["authenticated"], true);
        assert_eq!(json["status"]["user"]["username"], "jdoe");
        assert_eq!(json["status"]["user"]["groups"], json!(["devs", "ops"]));
        assert_eq!(h.metrics.successful_verifications.get(), 1);
    }
}
