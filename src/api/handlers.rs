use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use super::error::ApiError;
use super::responses::*;
use crate::prover::MembershipProof;
use crate::service::ReviewService;

pub type AppState = Arc<ReviewService>;

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn health(State(service): State<AppState>) -> ApiResult<HealthResponse> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        tree_depth: service.tree_depth(),
        groups: service.group_count()?,
    }))
}

pub async fn request_challenge(
    State(service): State<AppState>,
    payload: Result<Json<ChallengeRequest>, JsonRejection>,
) -> ApiResult<ChallengeResponse> {
    let Json(request) = payload?;
    let issued = service.request_challenge(&request.email)?;
    Ok(Json(issued.into()))
}

pub async fn confirm_challenge(
    State(service): State<AppState>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> ApiResult<ConfirmResponse> {
    let Json(request) = payload?;

    match (request.group_id.as_deref(), request.commitment.as_deref()) {
        (Some(group_id), Some(commitment)) => {
            let registration = service.register(
                &request.token,
                &request.email,
                &request.code,
                group_id,
                commitment,
            )?;
            Ok(Json(registration.into()))
        }
        (None, None) => {
            let verified_email = service.confirm(&request.token, &request.email, &request.code)?;
            Ok(Json(ConfirmResponse {
                verified_email,
                group_id: None,
                index: None,
                already_registered: None,
            }))
        }
        _ => Err(ApiError::bad_request(
            "malformed_request",
            "groupId and commitment must be given together",
        )),
    }
}

pub async fn group_commitments(
    State(service): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<CommitmentsResponse> {
    let snapshot = service.group_snapshot(&group_id)?;
    Ok(Json(snapshot.into()))
}

pub async fn submit(
    State(service): State<AppState>,
    payload: Result<Json<SubmissionRequest>, JsonRejection>,
) -> ApiResult<SubmissionResponse> {
    let Json(request) = payload?;

    let proof = MembershipProof::try_from(request.proof).map_err(|e| {
        debug!(error = %e, "Malformed proof payload");
        ApiError::bad_request("malformed_proof", e.to_string())
    })?;

    let id = service
        .submit(&request.target_id, &request.group_id, proof, &request.content)
        .await?;

    Ok(Json(SubmissionResponse {
        submission_id: id.to_string(),
    }))
}

fn octet_stream(bytes: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}

pub async fn proving_key(State(service): State<AppState>) -> Result<Response, ApiError> {
    service
        .proving_key_bytes()
        .map(octet_stream)
        .ok_or_else(|| ApiError::not_found("params_unavailable", "proving key is not served"))
}

pub async fn verifying_key(State(service): State<AppState>) -> Result<Response, ApiError> {
    let bytes = service.verifying_key_bytes()?;
    Ok(octet_stream(Bytes::from(bytes)))
}
