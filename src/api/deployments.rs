use std::collections::BTreeMap;

use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::coordinator::{self, CreateDeploymentRequest};
use crate::error::ApiError;
use crate::store::AppState;
use crate::store::deployments;
use crate::store::models::DeploymentView;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/deployments", post(create).get(list))
        .route("/api/v1/deployments/{id}", get(get_one))
        .route("/api/v1/deployments/{id}/steps", get(get_steps))
        .route("/api/v1/deployments/{id}/cancel", post(cancel))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListDeploymentsResponse {
    pub deployments: Vec<DeploymentView>,
    pub limit: i64,
    pub offset: i64,
    pub count: i64,
}

/// Fields extracted from the multipart form; `env_file`'s bytes are
/// normalized and written to a local temp file, whose path rides the job
/// envelope to the worker.
#[derive(Debug, Default)]
struct ParsedForm {
    target_ip: Option<String>,
    ssh_username: Option<String>,
    ssh_password: Option<String>,
    github_repo_url: Option<String>,
    github_pat: Option<String>,
    github_branch: Option<String>,
    port: Option<i64>,
    container_name: Option<String>,
    project_name: Option<String>,
    deployment_name: Option<String>,
    environment_vars: Option<String>,
    local_env_file_path: Option<String>,
}

async fn parse_multipart(mut multipart: Multipart) -> Result<ParsedForm, ApiError> {
    let mut form = ParsedForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart form: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "env_file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read env_file: {e}")))?;
                let contents = crate::coordinator::sanitize::normalize_env_file(
                    &String::from_utf8_lossy(&bytes),
                );
                let path = write_temp_env_file(&contents).await?;
                form.local_env_file_path = Some(path);
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("invalid field {name}: {e}")))?;
                match name.as_str() {
                    "target_ip" => form.target_ip = Some(text),
                    "ssh_username" => form.ssh_username = Some(text),
                    "ssh_password" => form.ssh_password = Some(text),
                    "github_repo_url" => form.github_repo_url = Some(text),
                    "github_pat" => form.github_pat = Some(text),
                    "github_branch" => form.github_branch = Some(text),
                    "port" => {
                        form.port = Some(
                            text.parse()
                                .map_err(|_| ApiError::BadRequest("port must be an integer".into()))?,
                        );
                    }
                    "container_name" => form.container_name = Some(text),
                    "project_name" => form.project_name = Some(text),
                    "deployment_name" => form.deployment_name = Some(text),
                    "environment_vars" => form.environment_vars = Some(text),
                    _ => {}
                }
            }
        }
    }

    Ok(form)
}

/// Alternative JSON body accepted alongside the multipart form, for callers
/// with no file to upload — `environment_vars` plays the same role as the
/// form field of the same name (`KEY=VALUE` lines).
#[derive(Debug, Deserialize)]
struct CreateDeploymentJsonRequest {
    target_ip: Option<String>,
    ssh_username: Option<String>,
    ssh_password: Option<String>,
    github_repo_url: Option<String>,
    github_pat: Option<String>,
    github_branch: Option<String>,
    port: Option<i64>,
    container_name: Option<String>,
    project_name: Option<String>,
    deployment_name: Option<String>,
    environment_vars: Option<String>,
}

impl From<CreateDeploymentJsonRequest> for ParsedForm {
    fn from(json: CreateDeploymentJsonRequest) -> Self {
        ParsedForm {
            target_ip: json.target_ip,
            ssh_username: json.ssh_username,
            ssh_password: json.ssh_password,
            github_repo_url: json.github_repo_url,
            github_pat: json.github_pat,
            github_branch: json.github_branch,
            port: json.port,
            container_name: json.container_name,
            project_name: json.project_name,
            deployment_name: json.deployment_name,
            environment_vars: json.environment_vars,
            local_env_file_path: None,
        }
    }
}

async fn write_temp_env_file(contents: &str) -> Result<String, ApiError> {
    let path = std::env::temp_dir().join(format!("deployknot-upload-{}.env", Uuid::new_v4()));
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(path.to_string_lossy().into_owned())
}

fn parse_env_vars(raw: &str) -> BTreeMap<String, String> {
    crate::coordinator::sanitize::normalize_env_file(raw)
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Accepts either `multipart/form-data` (the primary path, the only one that
/// can carry an `env_file` upload) or a plain `application/json` body with
/// the same fields minus the file, kept for callers with no file to send.
async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    let form = if is_json {
        let Json(body) = Json::<CreateDeploymentJsonRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
        ParsedForm::from(body)
    } else {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart form: {e}")))?;
        parse_multipart(multipart).await?
    };

    let additional_vars = form
        .environment_vars
        .as_deref()
        .map(parse_env_vars)
        .unwrap_or_default();

    let req = CreateDeploymentRequest {
        target_ip: form.target_ip.unwrap_or_default(),
        ssh_username: form.ssh_username.unwrap_or_default(),
        ssh_password: form.ssh_password.unwrap_or_default(),
        github_repo_url: form.github_repo_url.unwrap_or_default(),
        github_pat: form.github_pat.unwrap_or_default(),
        github_branch: form.github_branch.unwrap_or_default(),
        port: form.port.unwrap_or(0),
        container_name: form.container_name,
        project_name: form.project_name,
        deployment_name: form.deployment_name,
        additional_vars,
        local_env_file_path: form.local_env_file_path,
        user_id: Some(auth.user_id),
    };

    let view = coordinator::create_deployment(&state, req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    let rows = deployments::list_by_user(&state.pool, Some(auth.user_id), limit, offset).await?;
    let count = deployments::count_by_user(&state.pool, Some(auth.user_id)).await?;

    Ok(Json(ListDeploymentsResponse {
        deployments: rows.iter().map(DeploymentView::from).collect(),
        limit,
        offset,
        count,
    }))
}

async fn get_one(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = deployments::get_deployment(&state.pool, id).await?;
    Ok(Json(DeploymentView::from(&deployment)))
}

async fn get_steps(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    deployments::get_deployment(&state.pool, id).await?;
    let steps = deployments::list_steps(&state.pool, id).await?;
    Ok(Json(steps))
}

async fn cancel(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    coordinator::cancel_deployment(&state, id).await?;
    Ok(StatusCode::ACCEPTED)
}
