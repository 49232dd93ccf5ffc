//! Git subprocess plumbing.
//!
//! Arguments are always handed to the child as a list; nothing is ever
//! interpreted by a shell. The command strings produced here are for the
//! response and the logs only.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::locator::RepoLocation;

/// Result of a completed pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutput {
    /// The exact command that was executed, shell-escaped.
    pub command: String,
    /// Combined stdout and stderr of the pull.
    pub output: String,
}

/// Operations the deployment needs from the version-control tool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Currently checked out branch, or an empty string if it cannot be read.
    async fn current_branch(&self, repo: &RepoLocation) -> String;

    /// Pulls `branch` from `remote` into the working copy.
    async fn pull(&self, repo: &RepoLocation, remote: &str, branch: &str) -> Result<PullOutput>;

    /// Account the service runs under.
    async fn whoami(&self) -> String;
}

/// [`SourceControl`] backed by the git executable.
#[derive(Debug, Clone)]
pub struct GitClient {
    git_path: String,
    pull_log: PathBuf,
    pull_timeout: Duration,
}

impl GitClient {
    /// `pull_log` is resolved against the working copy root on every pull.
    pub fn new(git_path: impl Into<String>, pull_log: impl Into<PathBuf>, pull_timeout: Duration) -> Self {
        Self {
            git_path: git_path.into(),
            pull_log: pull_log.into(),
            pull_timeout,
        }
    }

    fn repo_args(repo: &RepoLocation) -> Vec<OsString> {
        let mut git_dir = OsString::from("--git-dir=");
        git_dir.push(repo.git_dir());
        let mut work_tree = OsString::from("--work-tree=");
        work_tree.push(repo.root());
        vec![git_dir, work_tree]
    }

    fn command(&self, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn write_pull_log(&self, repo: &RepoLocation, output: &str) {
        let path = repo.root().join(&self.pull_log);
        let written = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&path, output));
        match written {
            Ok(()) => debug!(target: "gitdeploy::deploy", "Pull output written to {}", path.display()),
            Err(e) => warn!(
                target: "gitdeploy::deploy",
                "Could not write pull log {}: {}",
                path.display(),
                e
            ),
        }
    }
}

#[async_trait]
impl SourceControl for GitClient {
    async fn current_branch(&self, repo: &RepoLocation) -> String {
        let mut args = Self::repo_args(repo);
        args.extend(["rev-parse", "--abbrev-ref", "HEAD"].map(OsString::from));

        match self.command(&args).output().await {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
            Ok(out) => {
                debug!(
                    "git rev-parse failed in {}: {}",
                    repo.root().display(),
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                String::new()
            }
            Err(e) => {
                debug!("git rev-parse failed to start: {}", e);
                String::new()
            }
        }
    }

    async fn pull(&self, repo: &RepoLocation, remote: &str, branch: &str) -> Result<PullOutput> {
        let mut args = Self::repo_args(repo);
        args.extend([OsString::from("pull"), OsString::from(remote), OsString::from(branch)]);
        let command = render_command(&self.git_path, &args);

        info!(target: "gitdeploy::deploy", "Running: {}", command);
        let out: Output = match tokio::time::timeout(self.pull_timeout, self.command(&args).output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(DeployError::SubprocessFailure {
                    command,
                    message: format!("failed to start: {}", e),
                });
            }
            Err(_) => {
                // Dropping the future kills git itself. Helpers it spawned
                // (ssh, remote-https, hooks) are not in our reach and may
                // outlive it.
                let marker = format!("{}\npull timed out after {:?}\n", command, self.pull_timeout);
                self.write_pull_log(repo, &marker);
                return Err(DeployError::DeployTimeout(self.pull_timeout.as_secs()));
            }
        };

        let stdout = String::from_utf8_lossy(&out.stdout);
        let stderr = String::from_utf8_lossy(&out.stderr);
        let output = format!("{}{}", stdout, stderr);
        self.write_pull_log(repo, &output);

        if !out.status.success() {
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(DeployError::SubprocessFailure {
                command,
                message: format!("{} ({})", message, out.status),
            });
        }

        Ok(PullOutput { command, output })
    }

    async fn whoami(&self) -> String {
        let user = match Command::new("whoami").stdin(Stdio::null()).output().await {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
            _ => String::new(),
        };
        if !user.is_empty() {
            return user;
        }
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default()
    }
}

/// Quotes a single argument for display in a POSIX shell.
pub fn shell_escape(value: &OsStr) -> String {
    let value = value.to_string_lossy();
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

/// Renders a program and its arguments, each escaped on its own.
pub fn render_command(program: &str, args: &[OsString]) -> String {
    std::iter::once(shell_escape(Path::new(program).as_os_str()))
        .chain(args.iter().map(|a| shell_escape(a)))
        .collect::<Vec<_>>()
        .join(" ")
}
