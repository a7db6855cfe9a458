use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::json;

use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(health))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();
    let valkey_ok = crate::store::valkey::ping(&state.valkey).await.is_ok();

    let status = if db_ok && valkey_ok { "ok" } else { "degraded" };
    let code = if db_ok && valkey_ok {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        axum::Json(json!({
            "status": status,
            "services": {
                "database": db_ok,
                "redis": valkey_ok,
            },
        })),
    )
}
