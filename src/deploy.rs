use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::DeployConfig;
use crate::error::{DeployError, Result};
use crate::git::SourceControl;
use crate::locator;
use crate::notify::{self, EmailPayload};
use crate::webhook::{self, DeployRequest};

/// Maximum size for pull output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Outcome of a deployment, as reported back to the caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeployResult {
    pub success: bool,
    pub message: String,
    pub command: String,
    pub output: String,
    pub user: String,
}

impl DeployResult {
    /// Successful pull, truncating very large output.
    pub fn pulled(branch: &str, command: String, mut output: String, user: String) -> Self {
        if output.len() > MAX_OUTPUT_SIZE {
            let mut end = MAX_OUTPUT_SIZE;
            while !output.is_char_boundary(end) {
                end -= 1;
            }
            output.truncate(end);
            output.push_str("\n... (output truncated)");
        }

        Self {
            success: true,
            message: format!("Deployed branch '{}'", branch),
            command,
            output,
            user,
        }
    }

    pub fn failed(error: &DeployError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            command: String::new(),
            output: String::new(),
            user: String::new(),
        }
    }
}

/// A completed deployment together with the request that triggered it.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub request: DeployRequest,
    pub result: DeployResult,
}

/// The pushed branch is only deployed if it is exactly the checked out one.
/// An unreadable current branch (empty) never matches.
pub fn reconcile(current: &str, pushed: &str) -> bool {
    !current.is_empty() && current == pushed
}

/// Runs the webhook-to-pull pipeline for a single request.
pub struct DeployExecutor {
    config: Arc<DeployConfig>,
    scm: Arc<dyn SourceControl>,
    search_origin: PathBuf,
}

impl DeployExecutor {
    pub fn new(config: Arc<DeployConfig>, scm: Arc<dyn SourceControl>, search_origin: PathBuf) -> Self {
        Self {
            config,
            scm,
            search_origin,
        }
    }

    /// Validate, locate, reconcile and pull. The first failing stage ends the run.
    pub async fn run(&self, raw_body: &[u8], source_ip: &str) -> Result<Deployment> {
        let request = webhook::validate(raw_body, source_ip, &self.config)?;
        self.deploy(request).await.inspect_err(log_failure)
    }

    async fn deploy(&self, request: DeployRequest) -> Result<Deployment> {
        // Never cached: the working copy may move between requests.
        let repo = locator::locate(
            self.config.repo_path(),
            &self.search_origin,
            &self.config.project_marker,
        )?;

        let current = self.scm.current_branch(&repo).await;
        if !reconcile(&current, &request.pushed_branch) {
            return Err(DeployError::BranchMismatch {
                current,
                pushed: request.pushed_branch.clone(),
            });
        }

        let pulled = self
            .scm
            .pull(&repo, self.config.remote(), &request.pushed_branch)
            .await?;
        let user = self.scm.whoami().await;

        info!(
            target: "gitdeploy::deploy",
            "Deployed '{}' into {} as '{}'",
            request.pushed_branch,
            repo.root().display(),
            user
        );
        let result = DeployResult::pulled(&request.pushed_branch, pulled.command, pulled.output, user);

        Ok(Deployment { request, result })
    }

    /// Email announcing the deployment, if anybody should get one.
    pub fn notification(&self, deployment: &Deployment) -> Option<EmailPayload> {
        notify::format(
            &deployment.request.commits,
            &deployment.request.repository_name,
            &self.config,
            &deployment.result,
        )
    }
}

fn log_failure(e: &DeployError) {
    if e.is_benign() {
        warn!(target: "gitdeploy::deploy", "{}", e);
    } else {
        error!(target: "gitdeploy::deploy", "{}", e);
    }
}
