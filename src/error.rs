use std::io;
use std::path::PathBuf;

/// Custom error type for simple_git_deploy operations
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Request must come from an approved IP")]
    ForbiddenSource,

    #[error("Web hook data does not look valid: {0}")]
    MalformedPayload(String),

    #[error("Unsupported ref '{0}', expected refs/heads/<branch>")]
    UnsupportedRef(String),

    #[error("Invalid repo path in config: {}", .0.display())]
    InvalidConfiguredPath(PathBuf),

    #[error("Could not determine the repo path")]
    RepoNotFound,

    #[error("Pushed refs do not match current branch ('{pushed}' pushed, '{current}' checked out)")]
    BranchMismatch { current: String, pushed: String },

    #[error("Deployment timed out after {0} seconds")]
    DeployTimeout(u64),

    #[error("Command failed: {command}\n{message}")]
    SubprocessFailure { command: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl DeployError {
    /// A branch mismatch is an expected outcome (a push to some other branch),
    /// every other variant is a real failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, DeployError::BranchMismatch { .. })
    }
}

/// Errors raised while dispatching a deployment notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to start mail transport: {0}")]
    Spawn(#[from] io::Error),

    #[error("Mail transport failed: {0}")]
    Transport(String),
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_branch_mismatch_is_benign() {
        let mismatch = DeployError::BranchMismatch {
            current: "develop".into(),
            pushed: "main".into(),
        };
        assert!(mismatch.is_benign());
        assert!(!DeployError::ForbiddenSource.is_benign());
        assert!(!DeployError::RepoNotFound.is_benign());
        assert!(!DeployError::DeployTimeout(5).is_benign());
    }

    #[test]
    fn messages_start_with_operator_facing_text() {
        assert_eq!(
            DeployError::ForbiddenSource.to_string(),
            "Request must come from an approved IP"
        );
        let mismatch = DeployError::BranchMismatch {
            current: "develop".into(),
            pushed: "main".into(),
        };
        assert!(
            mismatch
                .to_string()
                .starts_with("Pushed refs do not match current branch")
        );
    }
}
