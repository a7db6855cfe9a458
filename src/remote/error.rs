use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("command failed (exit {exit_code}): {output}")]
    Command { exit_code: i32, output: String },

    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("operation timed out after {0}s")]
    Timeout(u64),
}

impl From<RemoteError> for ApiError {
    fn from(err: RemoteError) -> Self {
        Self::Internal(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_display_mentions_host() {
        let err = RemoteError::Connect {
            host: "10.0.0.5".into(),
            source: anyhow::anyhow!("timeout"),
        };
        assert!(err.to_string().contains("10.0.0.5"));
    }

    #[test]
    fn command_error_carries_exit_code_and_output() {
        let err = RemoteError::Command {
            exit_code: 2,
            output: "ERR: missing base image".into(),
        };
        assert!(err.to_string().contains("ERR: missing base image"));
        assert!(err.to_string().contains('2'));
    }
}
