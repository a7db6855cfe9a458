mod helpers;

use axum::http::StatusCode;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
async fn create_list_get_and_cancel_deployment(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);
    let (_, token) = helpers::create_authed_user(&pool, "alice").await;

    let (status, body) = helpers::post_multipart(
        &app,
        &token,
        "/api/v1/deployments",
        &[
            ("target_ip", "10.0.0.5"),
            ("ssh_username", "root"),
            ("ssh_password", "pw"),
            ("github_repo_url", "https://github.com/x/y.git"),
            ("github_pat", "pat-123"),
            ("github_branch", "main"),
            ("port", "3000"),
            ("project_name", "p"),
            ("deployment_name", "d"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["container_name"], "deployknot-p-d");
    assert!(body.get("ssh_password").is_none(), "secret leaked into response");
    assert!(body.get("github_pat").is_none(), "secret leaked into response");

    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = helpers::get_json(&app, &token, &format!("/api/v1/deployments/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);

    let (status, body) = helpers::get_json(&app, &token, "/api/v1/deployments").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["deployments"][0]["id"], id);

    let (status, _) = helpers::post_empty(&app, &token, &format!("/api/v1/deployments/{id}/cancel")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let cancelled = deployknot::store::deployments::is_cancel_requested(
        &pool,
        uuid::Uuid::parse_str(&id).unwrap(),
    )
    .await
    .unwrap();
    assert!(cancelled);
}

#[sqlx::test(migrations = "./migrations")]
async fn create_accepts_json_body(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);
    let (_, token) = helpers::create_authed_user(&pool, "dana").await;

    let (status, body) = helpers::post_json(
        &app,
        &token,
        "/api/v1/deployments",
        serde_json::json!({
            "target_ip": "10.0.0.6",
            "ssh_username": "root",
            "ssh_password": "pw",
            "github_repo_url": "https://github.com/x/y.git",
            "github_pat": "pat-123",
            "github_branch": "main",
            "port": 3001,
            "project_name": "p",
            "deployment_name": "d2",
            "environment_vars": "FOO=bar\nBAZ=qux",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    assert_eq!(body["container_name"], "deployknot-p-d2");
    assert!(body.get("ssh_password").is_none(), "secret leaked into response");
}

#[sqlx::test(migrations = "./migrations")]
async fn create_rejects_invalid_port(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);
    let (_, token) = helpers::create_authed_user(&pool, "bob").await;

    let (status, _) = helpers::post_multipart(
        &app,
        &token,
        "/api/v1/deployments",
        &[
            ("target_ip", "10.0.0.5"),
            ("ssh_username", "root"),
            ("ssh_password", "pw"),
            ("github_repo_url", "https://github.com/x/y.git"),
            ("github_pat", "pat-123"),
            ("github_branch", "main"),
            ("port", "0"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_bearer_token_is_unauthorized(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);

    let (status, _) = helpers::get_json(&app, "", "/api/v1/deployments").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_deployment_is_not_found(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);
    let (_, token) = helpers::create_authed_user(&pool, "carol").await;

    let (status, _) = helpers::get_json(
        &app,
        &token,
        &format!("/api/v1/deployments/{}", uuid::Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
