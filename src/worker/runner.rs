//! Step Runner: drives one deployment through the fixed four-step pipeline,
//! updating per-step status and emitting logs as it goes.

use std::time::Instant;

use uuid::Uuid;

use crate::coordinator::sanitize::normalize_env_file;
use crate::error::ApiError;
use crate::remote::{CommandOutput, RemoteConnection, RemoteError, RemoteExecutor};
use crate::store::AppState;
use crate::store::deployments;
use crate::store::models::{Job, LogLevel, Status};

const WORKING_DIR: &str = "/tmp/deployknot-app";
const UPLOADED_ENV_PATH: &str = "/tmp/deployknot-uploaded.env";

struct StepContext<'a> {
    state: &'a AppState,
    job: &'a Job,
    step_id: Uuid,
    step_order: i32,
}

impl StepContext<'_> {
    async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        if let Err(e) = deployments::append_log(
            &self.state.pool,
            self.job.deployment_id,
            level,
            &message,
            Some(self.job.container_name.as_str()),
            Some(self.step_order),
        )
        .await
        {
            tracing::warn!(error = %e, "failed to append log row");
        }
    }
}

/// Runs the full pipeline for one dequeued job. Returns `Ok(())` whether the
/// deployment ultimately succeeded or failed — only infrastructure errors
/// (store/queue) that prevent recording the outcome propagate as `Err`.
#[tracing::instrument(skip(state, executor, job), fields(deployment_id = %job.deployment_id), err)]
pub async fn run_deployment(
    state: &AppState,
    executor: &dyn RemoteExecutor,
    job: &Job,
) -> Result<(), ApiError> {
    let steps = deployments::list_steps(&state.pool, job.deployment_id).await?;
    deployments::mark_started(&state.pool, job.deployment_id).await?;

    let connection = match executor
        .connect(&job.target_ip, &job.ssh_username, &job.ssh_password)
        .await
    {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "ssh connect failed");
            deployments::abandon_steps_after(&state.pool, job.deployment_id, 0).await?;
            deployments::mark_completed(
                &state.pool,
                job.deployment_id,
                Status::Failed,
                Some(&format!("failed to connect to {}: {e}", job.target_ip)),
            )
            .await?;
            return Ok(());
        }
    };

    let result = run_steps(state, job, connection.as_ref(), &steps).await;
    connection.close().await;

    match result {
        Ok(()) => {
            deployments::mark_completed(&state.pool, job.deployment_id, Status::Completed, None)
                .await?;
        }
        Err(failure) => {
            deployments::mark_completed(
                &state.pool,
                job.deployment_id,
                Status::Failed,
                Some(&failure),
            )
            .await?;
        }
    }

    Ok(())
}

/// Runs steps 1..4 in order. Returns `Err(reason)` on the first failure,
/// after abandoning every later step.
async fn run_steps(
    state: &AppState,
    job: &Job,
    connection: &dyn RemoteConnection,
    steps: &[crate::store::models::DeploymentStep],
) -> Result<(), String> {
    for step in steps {
        if deployments::is_cancel_requested(&state.pool, job.deployment_id)
            .await
            .unwrap_or(false)
        {
            deployments::mark_remaining_cancelled(&state.pool, job.deployment_id)
                .await
                .ok();
            deployments::update_status(
                &state.pool,
                job.deployment_id,
                Status::Aborted,
                Some("cancelled"),
            )
            .await
            .ok();
            return Err("cancelled".to_string());
        }

        let ctx = StepContext {
            state,
            job,
            step_id: step.id,
            step_order: step.step_order,
        };

        deployments::mark_step_running(&state.pool, step.id)
            .await
            .map_err(|e| e.to_string())?;
        ctx.log(LogLevel::Info, format!("starting {}", step.step_name))
            .await;

        let start = Instant::now();
        let outcome = match step.step_name {
            crate::store::models::StepName::GitClone => step_git_clone(&ctx, connection).await,
            crate::store::models::StepName::DockerBuild => {
                step_docker_build(&ctx, connection).await
            }
            crate::store::models::StepName::DockerRun => step_docker_run(&ctx, connection).await,
            crate::store::models::StepName::HealthCheck => {
                step_health_check(&ctx, connection).await
            }
            crate::store::models::StepName::ValidateCredentials => Ok(()),
        };
        #[allow(clippy::cast_possible_wrap)]
        let duration_ms = start.elapsed().as_millis() as i64;

        match outcome {
            Ok(()) => {
                deployments::mark_step_completed(&state.pool, step.id, duration_ms)
                    .await
                    .map_err(|e| e.to_string())?;
                ctx.log(LogLevel::Info, format!("{} completed", step.step_name))
                    .await;
            }
            Err(reason) => {
                deployments::mark_step_failed(&state.pool, step.id, Some(duration_ms), &reason)
                    .await
                    .map_err(|e| e.to_string())?;
                ctx.log(LogLevel::Error, format!("{} failed: {reason}", step.step_name))
                    .await;
                deployments::abandon_steps_after(&state.pool, job.deployment_id, step.step_order)
                    .await
                    .map_err(|e| e.to_string())?;
                return Err(reason);
            }
        }
    }

    Ok(())
}

fn require_success(result: Result<CommandOutput, RemoteError>) -> Result<CommandOutput, String> {
    match result {
        Ok(out) if out.success() => Ok(out),
        Ok(out) => Err(out.output),
        Err(e) => Err(e.to_string()),
    }
}

/// `https://host/owner/repo(.git)?` -> `owner/repo`.
fn normalize_repo_path(url: &str) -> String {
    let without_scheme = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let without_host = without_scheme
        .split_once('/')
        .map_or(without_scheme, |(_, rest)| rest);
    let trimmed = without_host.trim_start_matches('/');
    trimmed.trim_end_matches(".git").to_string()
}

async fn step_git_clone(ctx: &StepContext<'_>, conn: &dyn RemoteConnection) -> Result<(), String> {
    // Best-effort cleanup; failure here never fails the step.
    let _ = conn.run(&format!("rm -rf {WORKING_DIR}")).await;

    let repo_path = normalize_repo_path(&ctx.job.github_repo_url);
    let mut command = format!(
        "git clone https://{}@github.com/{repo_path}.git {WORKING_DIR}",
        ctx.job.github_pat
    );
    if ctx.job.github_branch != "main" {
        command.push_str(&format!(" && cd {WORKING_DIR} && git checkout {}", ctx.job.github_branch));
    }

    require_success(conn.run(&command).await)?;
    Ok(())
}

async fn step_docker_build(ctx: &StepContext<'_>, conn: &dyn RemoteConnection) -> Result<(), String> {
    let name = &ctx.job.container_name;
    let cleanup = format!(
        "docker rm -f {name} || true; docker rmi {name}:latest || true; docker system prune -f"
    );
    let _ = conn.run(&cleanup).await;
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let build = format!("cd {WORKING_DIR} && docker build -t {name}:latest .");
    require_success(conn.run(&build).await)?;
    Ok(())
}

async fn step_docker_run(ctx: &StepContext<'_>, conn: &dyn RemoteConnection) -> Result<(), String> {
    let name = &ctx.job.container_name;
    let cleanup = format!(
        "docker stop {name} || true && docker rm {name} || true && docker ps -a --filter name={name} --format '{{{{.Names}}}}' | xargs -r docker rm -f || true"
    );
    let _ = conn.run(&cleanup).await;
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    require_success(conn.run("docker --version").await)?;

    let env_file_flag = materialize_env(ctx, conn).await?;

    let run_cmd = match &env_file_flag {
        Some(flag) => format!(
            "docker run -d --name {name} -p {port}:{port} {flag} {name}:latest",
            port = ctx.job.port
        ),
        None => format!(
            "docker run -d --name {name} -p {port}:{port} {name}:latest",
            port = ctx.job.port
        ),
    };
    require_success(conn.run(&run_cmd).await)?;
    Ok(())
}

/// Produces the `--env-file ...` flag to splice into `docker run`, if any.
async fn materialize_env(
    ctx: &StepContext<'_>,
    conn: &dyn RemoteConnection,
) -> Result<Option<String>, String> {
    if let Some(local_path) = &ctx.job.local_env_file_path {
        let contents = tokio::fs::read(local_path)
            .await
            .map_err(|e| format!("failed to read uploaded env file: {e}"))?;
        conn.upload(UPLOADED_ENV_PATH, &contents)
            .await
            .map_err(|e| e.to_string())?;

        require_success(conn.run(&format!("test -f {UPLOADED_ENV_PATH}")).await)?;
        let contents_str = String::from_utf8_lossy(&contents);
        ctx.log(LogLevel::Debug, format!("uploaded env file contents:\n{contents_str}"))
            .await;

        require_success(
            conn.run(&format!("docker image inspect {}:latest", ctx.job.container_name))
                .await,
        )?;

        require_success(
            conn.run(&format!("cp {UPLOADED_ENV_PATH} {WORKING_DIR}/deployknot.env"))
                .await,
        )?;

        return Ok(Some(format!("--env-file {WORKING_DIR}/deployknot.env")));
    }

    if !ctx.job.additional_vars.is_empty() {
        let raw = ctx
            .job
            .additional_vars
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");
        let normalized = normalize_env_file(&raw);
        if normalized.is_empty() {
            return Ok(None);
        }
        let remote_path = format!("/tmp/deployknot-env-{}.env", ctx.job.deployment_id);
        let heredoc = format!(
            "cat > {remote_path} << 'DEPLOYKNOT_EOF'\n{normalized}\nDEPLOYKNOT_EOF"
        );
        require_success(conn.run(&heredoc).await)?;
        return Ok(Some(format!("--env-file {remote_path}")));
    }

    Ok(None)
}

async fn step_health_check(ctx: &StepContext<'_>, conn: &dyn RemoteConnection) -> Result<(), String> {
    let name = &ctx.job.container_name;
    let cmd = format!("docker ps --filter name={name} --format 'table {{{{.Names}}}}\\t{{{{.Status}}}}'");
    let output = require_success(conn.run(&cmd).await)?;

    let healthy = output.output.lines().skip(1).any(|line| {
        let mut parts = line.split_whitespace();
        let found_name = parts.next();
        let status_start = parts.next();
        found_name == Some(name.as_str()) && status_start == Some("Up")
    });

    if !healthy {
        return Err(format!("container {name} is not reporting Up status"));
    }

    Ok(())
}
