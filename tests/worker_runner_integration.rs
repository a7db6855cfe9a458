mod helpers;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deployknot::remote::{CommandOutput, RemoteConnection, RemoteError, RemoteExecutor};
use deployknot::store::deployments;
use deployknot::store::models::{Job, Status, StepName};
use sqlx::PgPool;
use uuid::Uuid;

/// A scripted `RemoteConnection`/`RemoteExecutor` pair: commands are matched
/// by substring so tests can target one pipeline step without modeling the
/// full shell session.
struct ScriptedConnection {
    build_fails: bool,
    health_up: bool,
    commands: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RemoteConnection for ScriptedConnection {
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.commands.lock().unwrap().push(command.to_string());

        if command.contains("docker build") {
            if self.build_fails {
                return Ok(CommandOutput {
                    output: "ERR: missing base image".into(),
                    exit_code: 2,
                });
            }
            return Ok(CommandOutput { output: String::new(), exit_code: 0 });
        }

        if command.starts_with("docker ps --filter") {
            let output = if self.health_up {
                let name = command
                    .strip_prefix("docker ps --filter name=")
                    .and_then(|rest| rest.split_whitespace().next())
                    .unwrap_or("deployknot-test");
                format!("NAMES   STATUS\n{name}   Up 2 seconds")
            } else {
                "NAMES   STATUS".to_string()
            };
            return Ok(CommandOutput { output, exit_code: 0 });
        }

        Ok(CommandOutput { output: String::new(), exit_code: 0 })
    }

    async fn upload(&self, _remote_path: &str, _contents: &[u8]) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn close(&self) {}
}

struct ScriptedExecutor {
    connect_fails: bool,
    build_fails: bool,
    health_up: bool,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    fn new(build_fails: bool, health_up: bool) -> Self {
        Self {
            connect_fails: false,
            build_fails,
            health_up,
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn connect_failing() -> Self {
        Self {
            connect_fails: true,
            build_fails: false,
            health_up: false,
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn connect(
        &self,
        host: &str,
        _user: &str,
        _password: &str,
    ) -> Result<Box<dyn RemoteConnection>, RemoteError> {
        if self.connect_fails {
            return Err(RemoteError::Connect {
                host: host.to_string(),
                source: anyhow::anyhow!("connection timed out"),
            });
        }
        Ok(Box::new(ScriptedConnection {
            build_fails: self.build_fails,
            health_up: self.health_up,
            commands: self.commands.clone(),
        }))
    }
}

async fn seed_deployment(pool: &PgPool, branch: &str, container_name: &str) -> Job {
    let id = Uuid::new_v4();
    let row = deployments::NewDeployment {
        id,
        target_ip: "10.0.0.5".into(),
        ssh_username: "root".into(),
        ssh_password: "pw".into(),
        github_repo_url: "https://github.com/x/y.git".into(),
        github_pat: "pat-123".into(),
        github_branch: branch.into(),
        additional_vars: serde_json::json!({}),
        port: 3000,
        container_name: container_name.into(),
        project_name: Some("p".into()),
        deployment_name: Some("d".into()),
        user_id: None,
        local_env_file_path: None,
    };
    deployments::create_deployment(pool, &row).await.expect("create deployment");

    for (order, step) in StepName::EXECUTED.iter().enumerate() {
        deployments::create_step(pool, id, *step, (order + 1) as i32)
            .await
            .expect("create step");
    }

    Job {
        job_id: Uuid::new_v4(),
        deployment_id: id,
        target_ip: row.target_ip,
        ssh_username: row.ssh_username,
        ssh_password: row.ssh_password,
        github_repo_url: row.github_repo_url,
        github_pat: row.github_pat,
        github_branch: row.github_branch,
        port: row.port,
        container_name: row.container_name,
        additional_vars: BTreeMap::new(),
        local_env_file_path: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn happy_path_no_env_file(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let job = seed_deployment(&pool, "main", "deployknot-p-d").await;
    let executor = ScriptedExecutor::new(false, true);

    deployknot::worker::runner::run_deployment(&state, &executor, &job)
        .await
        .expect("run_deployment infra error");

    let deployment = deployments::get_deployment(&pool, job.deployment_id).await.unwrap();
    assert_eq!(deployment.status, Status::Completed);
    assert!(deployment.completed_at.is_some());

    let steps = deployments::list_steps(&pool, job.deployment_id).await.unwrap();
    assert_eq!(steps.len(), 4);
    assert!(steps.iter().all(|s| s.status == Status::Completed));

    let logs = deployments::list_logs(&pool, job.deployment_id, 100).await.unwrap();
    assert!(logs.len() >= 4, "expected at least one log per step");
}

#[sqlx::test(migrations = "./migrations")]
async fn branch_other_than_main_appends_checkout(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let job = seed_deployment(&pool, "feature/x", "deployknot-p-d").await;
    let executor = ScriptedExecutor::new(false, true);

    deployknot::worker::runner::run_deployment(&state, &executor, &job).await.unwrap();

    let commands = executor.commands.lock().unwrap();
    let clone_cmd = commands
        .iter()
        .find(|c| c.contains("git clone"))
        .expect("no clone command recorded");
    assert!(clone_cmd.contains("git clone"));
    assert!(clone_cmd.contains("&& cd /tmp/deployknot-app && git checkout feature/x"));
}

#[sqlx::test(migrations = "./migrations")]
async fn remote_build_failure_abandons_later_steps(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let job = seed_deployment(&pool, "main", "deployknot-p-d").await;
    let executor = ScriptedExecutor::new(true, true);

    deployknot::worker::runner::run_deployment(&state, &executor, &job).await.unwrap();

    let deployment = deployments::get_deployment(&pool, job.deployment_id).await.unwrap();
    assert_eq!(deployment.status, Status::Failed);

    let steps = deployments::list_steps(&pool, job.deployment_id).await.unwrap();
    let build_step = steps.iter().find(|s| s.step_name == StepName::DockerBuild).unwrap();
    assert_eq!(build_step.status, Status::Failed);
    assert!(build_step.error_message.as_deref().unwrap().contains("ERR: missing base image"));

    for step in steps.iter().filter(|s| s.step_order > build_step.step_order) {
        assert_eq!(step.status, Status::Failed);
        assert_eq!(
            step.error_message.as_deref(),
            Some("Step abandoned due to failure in step 2")
        );
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn ssh_connect_failure_marks_all_steps_failed(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let job = seed_deployment(&pool, "main", "deployknot-p-d").await;
    let executor = ScriptedExecutor::connect_failing();

    deployknot::worker::runner::run_deployment(&state, &executor, &job).await.unwrap();

    let deployment = deployments::get_deployment(&pool, job.deployment_id).await.unwrap();
    assert_eq!(deployment.status, Status::Failed);
    assert!(deployment.error_message.as_deref().unwrap().contains("10.0.0.5"));

    let steps = deployments::list_steps(&pool, job.deployment_id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == Status::Failed));
    assert!(steps.iter().all(|s| s.started_at.is_none()));
}

#[sqlx::test(migrations = "./migrations")]
async fn health_check_requires_up_status(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let job = seed_deployment(&pool, "main", "deployknot-test").await;
    let executor = ScriptedExecutor::new(false, false);

    deployknot::worker::runner::run_deployment(&state, &executor, &job).await.unwrap();

    let deployment = deployments::get_deployment(&pool, job.deployment_id).await.unwrap();
    assert_eq!(deployment.status, Status::Failed);

    let steps = deployments::list_steps(&pool, job.deployment_id).await.unwrap();
    let health_step = steps.iter().find(|s| s.step_name == StepName::HealthCheck).unwrap();
    assert_eq!(health_step.status, Status::Failed);
    assert!(health_step.error_message.as_deref().unwrap().contains("not reporting Up status"));
}
