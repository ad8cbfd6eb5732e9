//! HTTP surface.
//!
//! JSON bodies use camelCase; every error is `{ "error": ..., "code": ... }`.

pub mod error;
pub mod handlers;
pub mod responses;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::config::ServerConfig;
use crate::service::ReviewService;

pub fn router(service: Arc<ReviewService>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/challenge", post(handlers::request_challenge))
        .route("/challenge/confirm", post(handlers::confirm_challenge))
        .route("/groups/:id/commitments", get(handlers::group_commitments))
        .route("/submissions", post(handlers::submit))
        .route("/params/proving-key", get(handlers::proving_key))
        .route("/params/verifying-key", get(handlers::verifying_key))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs,
        )))
        .layer(RequestBodyLimitLayer::new(server.max_body_size))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeIssuer;
    use crate::group::GroupInfo;
    use crate::pool::VerificationPool;
    use crate::prover::{split_depth_prefix, Prover};
    use crate::storage::{Storage, Target};
    use crate::verifier::Verifier;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::OnceLock;
    use tower::ServiceExt;

    const DEPTH: usize = 2;

    fn verifying_key_bytes() -> &'static Vec<u8> {
        static VK: OnceLock<Vec<u8>> = OnceLock::new();
        VK.get_or_init(|| {
            let (_, vk) = Prover::setup(DEPTH).unwrap();
            Verifier::new(vk, DEPTH).unwrap().to_bytes().unwrap()
        })
    }

    fn app() -> Router {
        let storage = Arc::new(Storage::temporary().unwrap());
        storage
            .seed(
                &[GroupInfo {
                    id: "acme".into(),
                    name: "Acme".into(),
                    domain: "acme.com".into(),
                }],
                &[Target {
                    id: "fund-1".into(),
                    name: "Fund One".into(),
                }],
            )
            .unwrap();
        let service = ReviewService::new(
            storage,
            ChallengeIssuer::new(vec![9u8; 32], Duration::from_secs(600)).unwrap(),
            Verifier::from_bytes(verifying_key_bytes()).unwrap(),
            VerificationPool::new(1, Duration::from_secs(10)),
        );
        router(Arc::new(service), &ServerConfig::default())
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn error_code(body: &[u8]) -> String {
        let value: Value = serde_json::from_slice(body).unwrap();
        value["code"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["treeDepth"], DEPTH);
        assert_eq!(value["groups"], 1);
    }

    #[tokio::test]
    async fn test_challenge_errors() {
        let (status, body) =
            send(app(), "POST", "/challenge", Some(json!({ "email": "not-an-email" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "invalid_email");

        let (status, body) =
            send(app(), "POST", "/challenge", Some(json!({ "email": "a@nowhere.org" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "no_eligible_group");

        let (status, body) = send(app(), "POST", "/challenge", Some(json!({ "mail": 1 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "malformed_request");
    }

    #[tokio::test]
    async fn test_challenge_response_shape() {
        let (status, body) =
            send(app(), "POST", "/challenge", Some(json!({ "email": "alice@acme.com" }))).await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value["token"].as_str().unwrap().contains('.'));
        assert!(value["expiresAt"].as_u64().is_some());
        assert_eq!(value["eligibleGroups"][0]["id"], "acme");
        assert!(value.get("code").is_none());
    }

    #[tokio::test]
    async fn test_confirm_requires_group_and_commitment_together() {
        let body = json!({
            "token": "1.00",
            "email": "alice@acme.com",
            "code": "123456",
            "groupId": "acme",
        });
        let (status, body) = send(app(), "POST", "/challenge/confirm", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "malformed_request");
    }

    #[tokio::test]
    async fn test_confirm_rejects_bad_token() {
        let body = json!({ "token": "garbage", "email": "alice@acme.com", "code": "123456" });
        let (status, body) = send(app(), "POST", "/challenge/confirm", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "invalid_token");
    }

    #[tokio::test]
    async fn test_commitments() {
        let (status, body) = send(app(), "GET", "/groups/acme/commitments", None).await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["groupId"], "acme");
        assert_eq!(value["commitments"].as_array().unwrap().len(), 0);

        let (status, body) = send(app(), "GET", "/groups/ghost/commitments", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "unknown_group");
    }

    #[tokio::test]
    async fn test_malformed_proof() {
        let body = json!({
            "targetId": "fund-1",
            "groupId": "acme",
            "content": "a long enough review",
            "proof": { "root": "x", "nullifier": "1", "message": "1", "scope": "1", "proof": "zz" },
        });
        let (status, body) = send(app(), "POST", "/submissions", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "malformed_proof");
    }

    #[tokio::test]
    async fn test_params() {
        let (status, body) = send(app(), "GET", "/params/verifying-key", None).await;
        assert_eq!(status, StatusCode::OK);
        let (depth, _) = split_depth_prefix(&body).unwrap();
        assert_eq!(depth, DEPTH);

        let (status, body) = send(app(), "GET", "/params/proving-key", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "params_unavailable");
    }
}
