// HTTP trigger surface: push webhook, manual dispatch, health.
//
// Push events must be signed; the secret is named in configuration and read
// from the environment per request, so rotating it needs no restart.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::controller::TriggerHandle;
use common::errors::{ApiError, TriggerError};
use common::models::TriggerReason;
use common::store::SnapshotStore;
use common::webhook::validate_push_signature;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub const PUSH_SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Clone)]
pub struct AppState {
    pub handle: TriggerHandle,
    pub store: Arc<dyn SnapshotStore>,
    pub push_secret_env: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/runs", post(dispatch_manual))
        .route("/hooks/push", post(push_hook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn trigger_error_response(err: TriggerError) -> Response {
    let status = match &err {
        TriggerError::InvalidSignature => StatusCode::UNAUTHORIZED,
        TriggerError::RunInFlight(_) => StatusCode::CONFLICT,
        TriggerError::Disabled(_) => StatusCode::FORBIDDEN,
        TriggerError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        TriggerError::MissingSecret(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiError::from(err))).into_response()
}

async fn healthz(State(state): State<AppState>) -> Response {
    match state.store.head().await {
        Ok(head) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "head_version": head.map(|h| h.version),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::from(e)),
        )
            .into_response(),
    }
}

async fn dispatch_manual(State(state): State<AppState>) -> Response {
    match state.handle.dispatch(TriggerReason::Manual) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "trigger": "manual"})),
        )
            .into_response(),
        Err(e) => trigger_error_response(e),
    }
}

async fn push_hook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret_env) = &state.push_secret_env else {
        return trigger_error_response(TriggerError::Disabled("push".to_string()));
    };
    let secret = match std::env::var(secret_env) {
        Ok(secret) => secret,
        Err(_) => {
            warn!(var = %secret_env, "Push secret environment variable not set");
            return trigger_error_response(TriggerError::MissingSecret(secret_env.clone()));
        }
    };

    let Some(signature) = headers
        .get(PUSH_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return trigger_error_response(TriggerError::InvalidPayload(format!(
            "missing {} header",
            PUSH_SIGNATURE_HEADER
        )));
    };

    if let Err(e) = validate_push_signature(&body, signature, &secret) {
        warn!("Push webhook rejected: invalid signature");
        return trigger_error_response(e);
    }

    match state.handle.dispatch(TriggerReason::Push) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "trigger": "push"})),
        )
            .into_response(),
        Err(e) => trigger_error_response(e),
    }
}
