//! Remote Executor: a thin wrapper around an SSH client. One connection per
//! deployment; each `run` opens and closes its own channel so no state
//! leaks between commands.

pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tokio::io::AsyncWriteExt;

pub use error::RemoteError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Combined stdout+stderr output and the process exit code of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A live connection to a target host, used for the duration of one
/// deployment and closed on exit of the step runner.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Runs one shell command in a fresh session; captures stdout+stderr
    /// combined; closes the session before returning.
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Uploads `contents` via SFTP to `remote_path`, creating or
    /// truncating the remote file.
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), RemoteError>;

    async fn close(&self);
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn RemoteConnection>, RemoteError>;
}

/// Tolerant (trust-on-first-look) host-key handler: accept any server key.
/// Host-key fingerprint verification is intentionally out of scope for this
/// release.
struct TolerantHandler;

#[async_trait]
impl client::Handler for TolerantHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct RusshExecutor;

#[async_trait]
impl RemoteExecutor for RusshExecutor {
    async fn connect(
        &self,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn RemoteConnection>, RemoteError> {
        let config = Arc::new(client::Config::default());
        let addr = format!("{host}:22");

        let mut session = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(config, addr.clone(), TolerantHandler),
        )
        .await
        .map_err(|_| RemoteError::Timeout(CONNECT_TIMEOUT.as_secs()))?
        .map_err(|e| RemoteError::Connect {
            host: host.to_string(),
            source: e.into(),
        })?;

        let authenticated = session
            .authenticate_password(user, password)
            .await
            .map_err(|e| RemoteError::Connect {
                host: host.to_string(),
                source: e.into(),
            })?;

        if !authenticated {
            return Err(RemoteError::Connect {
                host: host.to_string(),
                source: anyhow::anyhow!("authentication rejected"),
            });
        }

        Ok(Box::new(RusshConnection {
            session: Arc::new(session),
        }))
    }
}

struct RusshConnection {
    session: Arc<Handle<TolerantHandler>>,
}

#[async_trait]
impl RemoteConnection for RusshConnection {
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Command {
                exit_code: -1,
                output: e.to_string(),
            })?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| RemoteError::Command {
                exit_code: -1,
                output: e.to_string(),
            })?;

        let mut output = Vec::new();
        let mut exit_code = 0i32;

        loop {
            let Some(msg) = channel.wait().await else {
                break;
            };
            match msg {
                ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                    output.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    #[allow(clippy::cast_possible_wrap)]
                    {
                        exit_code = exit_status as i32;
                    }
                }
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(CommandOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_code,
        })
    }

    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;

        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;

        let mut file = sftp
            .create(remote_path)
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;

        file.write_all(contents)
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| RemoteError::Transfer(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) {
        let _ = self
            .session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
    }
}
