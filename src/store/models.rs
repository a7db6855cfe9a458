use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a deployment or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Aborted,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Aborted
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "aborted" => Ok(Self::Aborted),
            other => anyhow::bail!("unknown status: {other}"),
        }
    }
}

/// Closed set of pipeline step names, in fixed creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    ValidateCredentials,
    GitClone,
    DockerBuild,
    DockerRun,
    HealthCheck,
}

impl StepName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidateCredentials => "validate_credentials",
            Self::GitClone => "git_clone",
            Self::DockerBuild => "docker_build",
            Self::DockerRun => "docker_run",
            Self::HealthCheck => "health_check",
        }
    }

    /// The four steps the worker actually executes, in order.
    pub const EXECUTED: [Self; 4] = [
        Self::GitClone,
        Self::DockerBuild,
        Self::DockerRun,
        Self::HealthCheck,
    ];
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validate_credentials" => Ok(Self::ValidateCredentials),
            "git_clone" => Ok(Self::GitClone),
            "docker_build" => Ok(Self::DockerBuild),
            "docker_run" => Ok(Self::DockerRun),
            "health_check" => Ok(Self::HealthCheck),
            other => anyhow::bail!("unknown step name: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => anyhow::bail!("unknown log level: {other}"),
        }
    }
}

/// A deployment row with secrets intact — never returned from an API.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: Status,
    pub target_ip: String,
    pub ssh_username: String,
    pub ssh_password: String,
    pub github_repo_url: String,
    pub github_pat: String,
    pub github_branch: String,
    pub additional_vars: serde_json::Value,
    pub port: i32,
    pub container_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub project_name: Option<String>,
    pub deployment_name: Option<String>,
    pub user_id: Option<Uuid>,
    pub cancel_requested: bool,
    pub local_env_file_path: Option<String>,
}

/// Deployment view with secrets stripped, safe to serialize in an API response.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: Status,
    pub target_ip: String,
    pub ssh_username: String,
    pub github_repo_url: String,
    pub github_branch: String,
    pub additional_vars: serde_json::Value,
    pub port: i32,
    pub container_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub project_name: Option<String>,
    pub deployment_name: Option<String>,
}

impl From<&Deployment> for DeploymentView {
    fn from(d: &Deployment) -> Self {
        Self {
            id: d.id,
            created_at: d.created_at,
            updated_at: d.updated_at,
            status: d.status,
            target_ip: d.target_ip.clone(),
            ssh_username: d.ssh_username.clone(),
            github_repo_url: d.github_repo_url.clone(),
            github_branch: d.github_branch.clone(),
            additional_vars: d.additional_vars.clone(),
            port: d.port,
            container_name: d.container_name.clone(),
            started_at: d.started_at,
            completed_at: d.completed_at,
            error_message: d.error_message.clone(),
            project_name: d.project_name.clone(),
            deployment_name: d.deployment_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStep {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub step_name: StepName,
    pub status: Status,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub step_order: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentLog {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub task_name: Option<String>,
    pub step_order: Option<i32>,
}

/// The envelope pushed onto the job queue; everything a worker needs to run
/// a deployment without consulting the store first (the store is still the
/// authority for status/logs, but the worker should not block dequeue on a
/// round-trip just to learn what to do).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub deployment_id: Uuid,
    pub target_ip: String,
    pub ssh_username: String,
    pub ssh_password: String,
    pub github_repo_url: String,
    pub github_pat: String,
    pub github_branch: String,
    pub port: i32,
    pub container_name: String,
    pub additional_vars: std::collections::BTreeMap<String, String>,
    pub local_env_file_path: Option<String>,
}
