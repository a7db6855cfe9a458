use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::logstream;
use crate::store::AppState;
use crate::store::deployments;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/deployments/{id}/logs", get(get_logs))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
}

/// Dual-mode: an `Accept: text/event-stream` request gets an SSE stream of
/// incremental log events; any other request gets the latest `limit` rows
/// as a single JSON array.
async fn get_logs(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
    Query(params): Query<LogsQuery>,
    headers: axum::http::HeaderMap,
) -> Result<Response, ApiError> {
    deployments::get_deployment(&state.pool, id).await?;

    let wants_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));

    if wants_sse {
        let stream = logstream::stream_logs(state, id);
        return Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let limit = params.limit.unwrap_or(200).clamp(1, 1000);
    let logs = deployments::list_logs(&state.pool, id, limit).await?;
    Ok(Json(logs).into_response())
}
