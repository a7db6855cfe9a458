//! Deployment Store: runtime-checked `sqlx` queries over `deployments`,
//! `deployment_steps`, and `deployment_logs`. Uses `sqlx::query`/`query_as`
//! with `.bind()`/row `.get()` rather than the compile-time macro family,
//! since this build has no offline query cache to check against.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::ApiError;
use crate::store::models::{Deployment, DeploymentLog, DeploymentStep, LogLevel, Status, StepName};

pub struct NewDeployment {
    pub id: Uuid,
    pub target_ip: String,
    pub ssh_username: String,
    pub ssh_password: String,
    pub github_repo_url: String,
    pub github_pat: String,
    pub github_branch: String,
    pub additional_vars: serde_json::Value,
    pub port: i32,
    pub container_name: String,
    pub project_name: Option<String>,
    pub deployment_name: Option<String>,
    pub user_id: Option<Uuid>,
    pub local_env_file_path: Option<String>,
}

#[tracing::instrument(skip(pool, row), fields(deployment_id = %row.id), err)]
pub async fn create_deployment(pool: &PgPool, row: &NewDeployment) -> Result<Deployment, ApiError> {
    let rec = sqlx::query(
        r"
        INSERT INTO deployments
            (id, status, target_ip, ssh_username, ssh_password_encrypted,
             github_repo_url, github_pat_encrypted, github_branch, additional_vars,
             port, container_name, project_name, deployment_name, user_id, local_env_file_path)
        VALUES ($1, 'pending', $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING created_at, updated_at
        ",
    )
    .bind(row.id)
    .bind(&row.target_ip)
    .bind(&row.ssh_username)
    .bind(&row.ssh_password)
    .bind(&row.github_repo_url)
    .bind(&row.github_pat)
    .bind(&row.github_branch)
    .bind(&row.additional_vars)
    .bind(row.port)
    .bind(&row.container_name)
    .bind(&row.project_name)
    .bind(&row.deployment_name)
    .bind(row.user_id)
    .bind(&row.local_env_file_path)
    .fetch_one(pool)
    .await?;

    let created_at: DateTime<Utc> = rec.get("created_at");
    let updated_at: DateTime<Utc> = rec.get("updated_at");

    Ok(Deployment {
        id: row.id,
        created_at,
        updated_at,
        status: Status::Pending,
        target_ip: row.target_ip.clone(),
        ssh_username: row.ssh_username.clone(),
        ssh_password: row.ssh_password.clone(),
        github_repo_url: row.github_repo_url.clone(),
        github_pat: row.github_pat.clone(),
        github_branch: row.github_branch.clone(),
        additional_vars: row.additional_vars.clone(),
        port: row.port,
        container_name: row.container_name.clone(),
        started_at: None,
        completed_at: None,
        error_message: None,
        project_name: row.project_name.clone(),
        deployment_name: row.deployment_name.clone(),
        user_id: row.user_id,
        cancel_requested: false,
        local_env_file_path: row.local_env_file_path.clone(),
    })
}

pub async fn create_step(
    pool: &PgPool,
    deployment_id: Uuid,
    step_name: StepName,
    step_order: i32,
) -> Result<Uuid, ApiError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO deployment_steps (id, deployment_id, step_name, status, step_order)
        VALUES ($1, $2, $3, 'pending', $4)
        ",
    )
    .bind(id)
    .bind(deployment_id)
    .bind(step_name.as_str())
    .bind(step_order)
    .execute(pool)
    .await?;
    Ok(id)
}

fn row_to_deployment(row: &sqlx::postgres::PgRow) -> Result<Deployment, ApiError> {
    let status_str: String = row.get("status");
    let status = status_str
        .parse()
        .map_err(|e: anyhow::Error| ApiError::Internal(e))?;
    Ok(Deployment {
        id: row.get("id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        status,
        target_ip: row.get("target_ip"),
        ssh_username: row.get("ssh_username"),
        ssh_password: row.get("ssh_password_encrypted"),
        github_repo_url: row.get("github_repo_url"),
        github_pat: row.get("github_pat_encrypted"),
        github_branch: row.get("github_branch"),
        additional_vars: row.get("additional_vars"),
        port: row.get("port"),
        container_name: row.get("container_name"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
        project_name: row.get("project_name"),
        deployment_name: row.get("deployment_name"),
        user_id: row.get("user_id"),
        cancel_requested: row.get("cancel_requested"),
        local_env_file_path: row.get("local_env_file_path"),
    })
}

pub async fn get_deployment(pool: &PgPool, id: Uuid) -> Result<Deployment, ApiError> {
    let row = sqlx::query("SELECT * FROM deployments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("deployment not found".into()))?;
    row_to_deployment(&row)
}

pub async fn list_by_user(
    pool: &PgPool,
    user_id: Option<Uuid>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Deployment>, ApiError> {
    let rows = sqlx::query(
        r"
        SELECT * FROM deployments
        WHERE ($1::uuid IS NULL OR user_id = $1)
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        ",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_deployment).collect()
}

pub async fn count_by_user(pool: &PgPool, user_id: Option<Uuid>) -> Result<i64, ApiError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM deployments WHERE ($1::uuid IS NULL OR user_id = $1)",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: Status,
    error_message: Option<&str>,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE deployments SET status = $2, error_message = $3, updated_at = now() WHERE id = $1",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_started(pool: &PgPool, id: Uuid) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE deployments SET status = 'running', started_at = now(), updated_at = now() WHERE id = $1 AND started_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_completed(
    pool: &PgPool,
    id: Uuid,
    status: Status,
    error_message: Option<&str>,
) -> Result<(), ApiError> {
    sqlx::query(
        r"
        UPDATE deployments
        SET status = $2, error_message = $3, completed_at = now(), updated_at = now()
        WHERE id = $1
        ",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn request_cancel(pool: &PgPool, id: Uuid) -> Result<bool, ApiError> {
    let updated = sqlx::query(
        r"
        UPDATE deployments SET cancel_requested = true, updated_at = now()
        WHERE id = $1 AND status IN ('pending', 'running')
        ",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(updated.rows_affected() > 0)
}

pub async fn is_cancel_requested(pool: &PgPool, id: Uuid) -> Result<bool, ApiError> {
    let requested: bool =
        sqlx::query_scalar("SELECT cancel_requested FROM deployments WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
    Ok(requested)
}

fn row_to_step(row: &sqlx::postgres::PgRow) -> Result<DeploymentStep, ApiError> {
    let step_name: String = row.get("step_name");
    let status: String = row.get("status");
    Ok(DeploymentStep {
        id: row.get("id"),
        deployment_id: row.get("deployment_id"),
        step_name: step_name
            .parse()
            .map_err(|e: anyhow::Error| ApiError::Internal(e))?,
        status: status
            .parse()
            .map_err(|e: anyhow::Error| ApiError::Internal(e))?,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        duration_ms: row.get("duration_ms"),
        error_message: row.get("error_message"),
        step_order: row.get("step_order"),
    })
}

pub async fn list_steps(pool: &PgPool, deployment_id: Uuid) -> Result<Vec<DeploymentStep>, ApiError> {
    let rows = sqlx::query(
        "SELECT * FROM deployment_steps WHERE deployment_id = $1 ORDER BY step_order ASC",
    )
    .bind(deployment_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_step).collect()
}

pub async fn mark_step_running(pool: &PgPool, step_id: Uuid) -> Result<(), ApiError> {
    sqlx::query("UPDATE deployment_steps SET status = 'running', started_at = now() WHERE id = $1")
        .bind(step_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_step_completed(pool: &PgPool, step_id: Uuid, duration_ms: i64) -> Result<(), ApiError> {
    sqlx::query(
        r"
        UPDATE deployment_steps
        SET status = 'completed', completed_at = now(), duration_ms = $2
        WHERE id = $1
        ",
    )
    .bind(step_id)
    .bind(duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_step_failed(
    pool: &PgPool,
    step_id: Uuid,
    duration_ms: Option<i64>,
    error_message: &str,
) -> Result<(), ApiError> {
    sqlx::query(
        r"
        UPDATE deployment_steps
        SET status = 'failed', completed_at = now(), duration_ms = $2, error_message = $3
        WHERE id = $1
        ",
    )
    .bind(step_id)
    .bind(duration_ms)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Marks every step with `step_order > after_order` as failed with an
/// abandonment reason. Used when a step fails or the connection never opens.
pub async fn abandon_steps_after(
    pool: &PgPool,
    deployment_id: Uuid,
    after_order: i32,
) -> Result<(), ApiError> {
    let reason = format!("Step abandoned due to failure in step {after_order}");
    sqlx::query(
        r"
        UPDATE deployment_steps
        SET status = 'failed', error_message = $3, completed_at = now()
        WHERE deployment_id = $1 AND step_order > $2 AND status IN ('pending', 'running')
        ",
    )
    .bind(deployment_id)
    .bind(after_order)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// Marks every executed step (order >= 1) as failed with a cancellation
/// reason, for the suspension-point cancellation path.
pub async fn mark_remaining_cancelled(pool: &PgPool, deployment_id: Uuid) -> Result<(), ApiError> {
    sqlx::query(
        r"
        UPDATE deployment_steps
        SET status = 'failed', error_message = 'cancelled', completed_at = now()
        WHERE deployment_id = $1 AND status IN ('pending', 'running')
        ",
    )
    .bind(deployment_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn append_log(
    pool: &PgPool,
    deployment_id: Uuid,
    level: LogLevel,
    message: &str,
    task_name: Option<&str>,
    step_order: Option<i32>,
) -> Result<Uuid, ApiError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO deployment_logs (id, deployment_id, log_level, message, task_name, step_order)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(id)
    .bind(deployment_id)
    .bind(level.as_str())
    .bind(message)
    .bind(task_name)
    .bind(step_order)
    .execute(pool)
    .await?;
    Ok(id)
}

fn row_to_log(row: &sqlx::postgres::PgRow) -> Result<DeploymentLog, ApiError> {
    let level: String = row.get("log_level");
    Ok(DeploymentLog {
        id: row.get("id"),
        deployment_id: row.get("deployment_id"),
        created_at: row.get("created_at"),
        level: level
            .parse()
            .map_err(|e: anyhow::Error| ApiError::Internal(e))?,
        message: row.get("message"),
        task_name: row.get("task_name"),
        step_order: row.get("step_order"),
    })
}

pub async fn list_logs(
    pool: &PgPool,
    deployment_id: Uuid,
    limit: i64,
) -> Result<Vec<DeploymentLog>, ApiError> {
    let rows = sqlx::query(
        r"
        SELECT * FROM deployment_logs
        WHERE deployment_id = $1
        ORDER BY created_at ASC, id ASC
        LIMIT $2
        ",
    )
    .bind(deployment_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_log).collect()
}

/// Logs with `(created_at, id) > (after_created_at, after_id)`, used by the
/// log stream's poll cursor. `after` is `None` on first attach.
pub async fn list_logs_after(
    pool: &PgPool,
    deployment_id: Uuid,
    after: Option<(DateTime<Utc>, Uuid)>,
    limit: i64,
) -> Result<Vec<DeploymentLog>, ApiError> {
    let rows = match after {
        Some((created_at, id)) => {
            sqlx::query(
                r"
                SELECT * FROM deployment_logs
                WHERE deployment_id = $1 AND (created_at, id) > ($2, $3)
                ORDER BY created_at ASC, id ASC
                LIMIT $4
                ",
            )
            .bind(deployment_id)
            .bind(created_at)
            .bind(id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r"
                SELECT * FROM deployment_logs
                WHERE deployment_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
                ",
            )
            .bind(deployment_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    let mut logs: Vec<DeploymentLog> = rows.iter().map(row_to_log).collect::<Result<_, _>>()?;
    if after.is_none() {
        logs.reverse();
    }
    Ok(logs)
}
