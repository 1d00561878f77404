use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use proctor_core::{Identity, RelayError};
use serde_json::json;

use crate::server::AppState;
use crate::store::StoreError;

/// `RelayError` mapped onto the HTTP boundary.
///
/// The offline body is the exact message the browser-side code matches on.
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayError::ServerOffline => StatusCode::BAD_REQUEST,
            RelayError::Busy => StatusCode::CONFLICT,
            RelayError::ReplyTimeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::MalformedReply(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "message": self.0.to_string() }))).into_response()
    }
}

/// `POST /tests/run/{identity}` — forward the body to the identity's agent
/// and answer with the decoded reply.
pub async fn run_tests(
    Path(identity): Path<Identity>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let result = state.relay.run_test(&identity, body).await.map_err(|err| {
        tracing::warn!(identity = %identity, kind = err.error_kind(), "test run failed");
        err
    })?;
    Ok(Json(result))
}

/// `GET /tests/download/{task_id}/{filename}` — serve a test executable to
/// a grading agent.
pub async fn download_test(
    Path((task_id, filename)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    match state.store.read(&task_id, &filename).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(err @ StoreError::InvalidName) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "message": err.to_string() }))).into_response()
        }
        Err(err @ StoreError::NotFound) => {
            (StatusCode::NOT_FOUND, Json(json!({ "message": err.to_string() }))).into_response()
        }
        Err(err) => {
            tracing::error!(task_id = %task_id, filename = %filename, error = %err, "test download failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "internal error" })),
            )
                .into_response()
        }
    }
}

/// `GET /health` — liveness probe with current connection counts.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "servers": state.relay.server_count(),
        "clients": state.relay.client_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: RelayError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn relay_errors_map_to_statuses() {
        assert_eq!(status_of(RelayError::ServerOffline), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(RelayError::Busy), StatusCode::CONFLICT);
        assert_eq!(status_of(RelayError::ReplyTimeout), StatusCode::GATEWAY_TIMEOUT);

        let bad = serde_json::from_str::<serde_json::Value>("oops").unwrap_err();
        assert_eq!(status_of(RelayError::MalformedReply(bad)), StatusCode::BAD_GATEWAY);
    }
}
