//! Thin HTTP adapter over [`VerificationService`].

use crate::errors::VerificationError;
use crate::service::VerificationService;
use crate::storage::StoreStats;
use axum::{
    extract::{ConnectInfo, Json, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<VerificationService>,
}

#[derive(Deserialize)]
pub struct SendCodeRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            VerificationError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "Too many requests, please try again later")
            }
            VerificationError::Blocked { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many failed attempts, please try again later",
            ),
            VerificationError::InvalidOrExpired => {
                (StatusCode::BAD_REQUEST, "Invalid or expired code")
            }
            VerificationError::Redis(_) | VerificationError::StorageError(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable")
            }
            VerificationError::DeliveryFailed(_) => (StatusCode::BAD_GATEWAY, "Failed to send email"),
            VerificationError::ConfigError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error")
            }
        };

        let body = Json(serde_json::json!({ "error": error_message }));

        match self {
            VerificationError::Blocked { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

/// Peer address, or `"unknown"` without connect info. The first
/// `X-Forwarded-For` hop replaces it only when `trust_forwarded_for` is set.
fn origin_of(
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    trust_forwarded_for: bool,
) -> String {
    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    trust_forwarded_for
        .then(forwarded)
        .flatten()
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn send_code(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<SendCodeRequest>,
) -> Result<Json<MessageResponse>, VerificationError> {
    let origin = origin_of(&headers, peer, state.service.config.trust_forwarded_for);
    state.service.request_code(&origin, &payload.email).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Code sent successfully".to_string(),
    }))
}

pub async fn verify_code(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<VerifyCodeRequest>,
) -> Result<Json<MessageResponse>, VerificationError> {
    let origin = origin_of(&headers, peer, state.service.config.trust_forwarded_for);
    state
        .service
        .submit_code(&origin, &payload.email, &payload.code)
        .await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Code verified successfully".to_string(),
    }))
}

pub async fn monitor(State(state): State<AppState>) -> Json<StoreStats> {
    Json(state.service.stats().await)
}

pub fn router(service: Arc<VerificationService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/send-code", post(send_code))
        .route("/verify-code", post(verify_code))
        .route("/monitor", get(monitor))
        .with_state(state)
}
