//! Worker process: blocks on the job queue, hands each job to the Step
//! Runner, and separately reconciles stale claims and orphaned deployments.

pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use crate::queue;
use crate::queue::JobStatus;
use crate::remote::RemoteExecutor;
use crate::store::AppState;
use crate::store::deployments;
use crate::store::models::{Deployment, Job, Status};

const DEQUEUE_TIMEOUT_SECS: f64 = 30.0;
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const ORPHAN_PENDING_AFTER: Duration = Duration::from_secs(120);

/// Blocking dequeue loop. Each popped job is processed to completion before
/// the next `dequeue` call — one deployment in flight per worker instance.
pub async fn run(
    state: AppState,
    executor: Arc<dyn RemoteExecutor>,
    mut shutdown: tokio::sync::watch::Receiver<()>,
) {
    tracing::info!("worker started");

    loop {
        if shutdown.has_changed().unwrap_or(false) {
            tracing::info!("worker shutting down");
            break;
        }

        match queue::dequeue(&state.valkey, DEQUEUE_TIMEOUT_SECS).await {
            Ok(Some(job)) => {
                let job_id = job.job_id;
                let result = runner::run_deployment(&state, executor.as_ref(), &job).await;
                let (status, error) = match result {
                    Ok(()) => (JobStatus::Completed, None),
                    Err(e) => (JobStatus::Failed, Some(e.to_string())),
                };
                if let Err(e) = queue::update_status(&state.valkey, job_id, status, error).await {
                    tracing::warn!(error = %e, "failed to update job diagnostic record");
                }
                cleanup_local_env_file(&job.local_env_file_path).await;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "dequeue failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn cleanup_local_env_file(path: &Option<String>) {
    if let Some(path) = path {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, path, "failed to remove local env file");
            }
        }
    }
}

/// Background loop: requeues jobs whose claim went stale (worker crash
/// between dequeue and completion) and re-enqueues deployments left
/// `pending` because their enqueue failed after the row was written.
pub async fn reconcile(state: AppState, mut shutdown: tokio::sync::watch::Receiver<()>) {
    tracing::info!("reconciler started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("reconciler shutting down");
                break;
            }
            () = tokio::time::sleep(RECONCILE_INTERVAL) => {
                if let Err(e) = reconcile_once(&state).await {
                    tracing::error!(error = %e, "reconcile pass failed");
                }
            }
        }
    }
}

async fn reconcile_once(state: &AppState) -> anyhow::Result<()> {
    reconcile_orphaned_pending(state).await?;
    reconcile_stale_claims(state).await?;
    Ok(())
}

fn job_from_deployment(deployment: &Deployment) -> Job {
    let additional_vars: std::collections::BTreeMap<String, String> =
        serde_json::from_value(deployment.additional_vars.clone()).unwrap_or_default();
    Job {
        job_id: uuid::Uuid::new_v4(),
        deployment_id: deployment.id,
        target_ip: deployment.target_ip.clone(),
        ssh_username: deployment.ssh_username.clone(),
        ssh_password: deployment.ssh_password.clone(),
        github_repo_url: deployment.github_repo_url.clone(),
        github_pat: deployment.github_pat.clone(),
        github_branch: deployment.github_branch.clone(),
        port: deployment.port,
        container_name: deployment.container_name.clone(),
        additional_vars,
        local_env_file_path: deployment.local_env_file_path.clone(),
    }
}

/// Deployments left `pending` long enough that the original enqueue almost
/// certainly failed are re-enqueued from their stored (secret-bearing) row.
async fn reconcile_orphaned_pending(state: &AppState) -> anyhow::Result<()> {
    let cutoff = chrono::Utc::now() - chrono::Duration::from_std(ORPHAN_PENDING_AFTER)?;
    let rows = sqlx::query_as::<_, (uuid::Uuid,)>(
        "SELECT id FROM deployments WHERE status = 'pending' AND started_at IS NULL AND created_at < $1",
    )
    .bind(cutoff)
    .fetch_all(&state.pool)
    .await?;

    for (deployment_id,) in rows {
        let deployment = deployments::get_deployment(&state.pool, deployment_id).await?;
        let job = job_from_deployment(&deployment);
        tracing::warn!(%deployment_id, "re-enqueuing orphaned pending deployment");
        queue::enqueue(&state.valkey, &job).await?;
    }

    Ok(())
}

/// Jobs whose `claimed_at` heartbeat has gone stale (worker crashed between
/// dequeue and completion) are re-pushed so a live worker picks them up.
async fn reconcile_stale_claims(state: &AppState) -> anyhow::Result<()> {
    use fred::interfaces::KeysInterface;
    use fred::types::scan::Scanner;
    use futures_util::TryStreamExt;

    let mut cursor = state.valkey.next().scan("deployknot:job:*", Some(100), None);
    while let Some(mut page) = cursor.try_next().await? {
        let Some(keys) = page.take_results() else {
            page.next();
            continue;
        };

        for key in keys {
            let Some(key_str) = key.as_str() else { continue };
            let Some(raw): Option<String> = state.valkey.get(key_str).await? else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<queue::JobRecord>(&raw) else {
                continue;
            };

            if !queue::is_claim_stale(&record) {
                continue;
            }

            let deployment = deployments::get_deployment(&state.pool, record.deployment_id).await?;
            if deployment.status != Status::Running {
                continue;
            }

            tracing::warn!(job_id = %record.job_id, deployment_id = %record.deployment_id, "requeuing stale claim");
            let job = job_from_deployment(&deployment);
            queue::requeue(&state.valkey, &job).await?;
        }

        page.next();
    }

    Ok(())
}
