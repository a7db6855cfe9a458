//! Deployment Coordinator: accepts a validated creation request, allocates
//! an id, writes the initial deployment + pending step rows, enqueues the
//! job, and returns a handle.

pub mod sanitize;

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::ApiError;
use crate::queue;
use crate::store::AppState;
use crate::store::deployments::{self, NewDeployment};
use crate::store::models::{DeploymentView, Job, StepName};
use crate::validation;

#[derive(Debug, Clone)]
pub struct CreateDeploymentRequest {
    pub target_ip: String,
    pub ssh_username: String,
    pub ssh_password: String,
    pub github_repo_url: String,
    pub github_pat: String,
    pub github_branch: String,
    pub port: i64,
    pub container_name: Option<String>,
    pub project_name: Option<String>,
    pub deployment_name: Option<String>,
    pub additional_vars: BTreeMap<String, String>,
    pub local_env_file_path: Option<String>,
    pub user_id: Option<Uuid>,
}

fn validate(req: &CreateDeploymentRequest) -> Result<u16, ApiError> {
    validation::check_target_ip(&req.target_ip)?;
    validation::check_non_empty("ssh_username", &req.ssh_username)?;
    validation::check_non_empty("ssh_password", &req.ssh_password)?;
    validation::check_url(&req.github_repo_url)?;
    validation::check_non_empty("github_pat", &req.github_pat)?;
    validation::check_branch_name(&req.github_branch)?;
    validation::check_port(req.port)
}

#[tracing::instrument(skip(state, req), err)]
pub async fn create_deployment(
    state: &AppState,
    req: CreateDeploymentRequest,
) -> Result<DeploymentView, ApiError> {
    let port = validate(&req)?;

    let id = Uuid::new_v4();
    let container_name = sanitize::container_name(
        req.container_name.as_deref(),
        req.project_name.as_deref(),
        req.deployment_name.as_deref(),
        id,
    );

    let additional_vars = serde_json::to_value(&req.additional_vars)
        .map_err(|e| ApiError::Internal(e.into()))?;

    let row = NewDeployment {
        id,
        target_ip: req.target_ip.clone(),
        ssh_username: req.ssh_username.clone(),
        ssh_password: req.ssh_password.clone(),
        github_repo_url: req.github_repo_url.clone(),
        github_pat: req.github_pat.clone(),
        github_branch: req.github_branch.clone(),
        additional_vars,
        port: i32::from(port),
        container_name: container_name.clone(),
        project_name: req.project_name.clone(),
        deployment_name: req.deployment_name.clone(),
        user_id: req.user_id,
        local_env_file_path: req.local_env_file_path.clone(),
    };

    let deployment = deployments::create_deployment(&state.pool, &row).await?;

    for (order, step) in StepName::EXECUTED.iter().enumerate() {
        #[allow(clippy::cast_possible_wrap)]
        let step_order = (order + 1) as i32;
        deployments::create_step(&state.pool, id, *step, step_order).await?;
    }

    let job = Job {
        job_id: Uuid::new_v4(),
        deployment_id: id,
        target_ip: req.target_ip,
        ssh_username: req.ssh_username,
        ssh_password: req.ssh_password,
        github_repo_url: req.github_repo_url,
        github_pat: req.github_pat,
        github_branch: req.github_branch,
        port: i32::from(port),
        container_name,
        additional_vars: req.additional_vars,
        local_env_file_path: req.local_env_file_path,
    };

    // If the enqueue fails, the deployment remains `pending` and is picked
    // up by the worker's orphan-scan reconciler.
    queue::enqueue(&state.valkey, &job).await?;

    Ok(DeploymentView::from(&deployment))
}

pub async fn cancel_deployment(state: &AppState, id: Uuid) -> Result<(), ApiError> {
    let cancelled = deployments::request_cancel(&state.pool, id).await?;
    if !cancelled {
        return Err(ApiError::Conflict(
            "deployment is already in a terminal state".into(),
        ));
    }
    Ok(())
}
