#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use deployknot::config::Config;
use deployknot::store::AppState;

/// Build a test `AppState` from the given pool, against a real Valkey
/// (flushed to avoid cross-test pollution — no in-memory substitute exists
/// for list/blocking-pop semantics).
pub async fn test_state(pool: PgPool) -> AppState {
    let valkey_url =
        std::env::var("VALKEY_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    let valkey = deployknot::store::valkey::connect(&valkey_url)
        .await
        .expect("valkey connection failed");
    {
        use fred::interfaces::ClientLike;
        let _: fred::types::Value = valkey
            .custom(
                fred::types::CustomCommand::new_static("FLUSHDB", None, false),
                Vec::<fred::types::Value>::new(),
            )
            .await
            .expect("FLUSHDB failed");
    }

    let config = Config {
        server_port: 0,
        server_read_timeout: std::time::Duration::from_secs(15),
        server_write_timeout: std::time::Duration::from_secs(15),
        server_idle_timeout: std::time::Duration::from_secs(60),
        database_url: "postgres://localhost/test".into(),
        redis_host: "localhost".into(),
        redis_port: 6379,
        redis_password: None,
        redis_db: 0,
        log_level: "info".into(),
        jwt_secret: "test-secret".into(),
    };

    AppState {
        pool,
        valkey,
        config: Arc::new(config),
    }
}

/// Build the API router with the given state.
pub fn test_router(state: AppState) -> Router {
    deployknot::api::router().with_state(state)
}

/// Create a user row and a matching API token row directly (bearer-token
/// issuance is external-collaborator territory — tests seed it themselves).
pub async fn create_authed_user(pool: &PgPool, username: &str) -> (Uuid, String) {
    let user_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, 'unused')",
    )
    .bind(user_id)
    .bind(username)
    .bind(format!("{username}@example.test"))
    .execute(pool)
    .await
    .expect("insert user failed");

    let (raw_token, hash) = deployknot::auth::token::generate_api_token();
    sqlx::query("INSERT INTO api_tokens (id, user_id, token_hash) VALUES ($1, $2, $3)")
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(hash)
        .execute(pool)
        .await
        .expect("insert api_token failed");

    (user_id, raw_token)
}

/// Send a GET request with Bearer auth.
pub async fn get_json(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(path);
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::empty()).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a POST request with Bearer auth and a multipart body built from
/// `fields` (text parts only — no file upload helper needed by the current
/// test suite).
pub async fn post_multipart(
    app: &Router,
    token: &str,
    path: &str,
    fields: &[(&str, &str)],
) -> (StatusCode, Value) {
    let boundary = "deployknot-test-boundary";
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={boundary}"),
        );
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::from(body)).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a POST request with Bearer auth and a JSON body.
pub async fn post_json(app: &Router, token: &str, path: &str, json: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json");
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder
        .body(Body::from(serde_json::to_vec(&json).unwrap()))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a POST request with Bearer auth and no body.
pub async fn post_empty(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("POST").uri(path);
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::empty()).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
