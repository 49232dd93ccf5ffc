pub mod api;
pub mod deploy;
pub mod error;
pub mod git;
pub mod locator;
pub mod logging;
pub mod notify;
#[cfg(test)]
mod testing;
pub mod webhook;

use error::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use deploy::DeployExecutor;
use notify::Notifier;

pub const DEFAULT_HOOK_PATH: &str = "/gitdeploy";
pub const DEFAULT_GIT_PATH: &str = "git";
pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_PROJECT_MARKER: &str = ".env";
pub const DEFAULT_PULL_LOG: &str = "storage/logs/gitdeploy.log";
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_LOG_MAX_FILES: usize = 5;
pub const DEFAULT_SENDMAIL_PATH: &str = "/usr/sbin/sendmail";

/// A named mailbox, used for both recipients and senders.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MailAddress {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
    #[default]
    Log,
    Sendmail,
    None,
}

/// How often the persistent log file rolls over.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Process-wide configuration. Loaded once at startup and never mutated.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeployConfig {
    pub hook_path: String,
    pub git_path: String,
    pub remote: String,
    pub allowed_sources: Vec<String>,
    pub repo_path: Option<PathBuf>,
    pub project_marker: String,
    pub pull_log: PathBuf,
    pub pull_timeout_secs: u64,
    pub log_dir: PathBuf,
    pub log_max_files: usize,
    pub log_rotation: LogRotation,
    pub email_recipients: Vec<MailAddress>,
    pub email_sender: Option<MailAddress>,
    pub mail_from: Option<MailAddress>,
    pub mail_transport: MailTransport,
    pub sendmail_path: PathBuf,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            hook_path: DEFAULT_HOOK_PATH.to_string(),
            git_path: DEFAULT_GIT_PATH.to_string(),
            remote: DEFAULT_REMOTE.to_string(),
            allowed_sources: Vec::new(),
            repo_path: None,
            project_marker: DEFAULT_PROJECT_MARKER.to_string(),
            pull_log: PathBuf::from(DEFAULT_PULL_LOG),
            pull_timeout_secs: DEFAULT_PULL_TIMEOUT_SECS,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_max_files: DEFAULT_LOG_MAX_FILES,
            log_rotation: LogRotation::default(),
            email_recipients: Vec::new(),
            email_sender: None,
            mail_from: None,
            mail_transport: MailTransport::default(),
            sendmail_path: PathBuf::from(DEFAULT_SENDMAIL_PATH),
        }
    }
}

impl DeployConfig {
    /// Returns the git executable, treating an empty value as unset.
    pub fn git_path(&self) -> &str {
        if self.git_path.trim().is_empty() {
            DEFAULT_GIT_PATH
        } else {
            &self.git_path
        }
    }

    /// Returns the remote to pull from, treating an empty value as unset.
    pub fn remote(&self) -> &str {
        if self.remote.trim().is_empty() {
            DEFAULT_REMOTE
        } else {
            &self.remote
        }
    }

    /// Returns the configured repository override, ignoring empty paths.
    pub fn repo_path(&self) -> Option<&Path> {
        self.repo_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Returns true if the source IP passes the allow-list.
    /// An empty allow-list lets everyone through.
    pub fn is_source_allowed(&self, source_ip: &str) -> bool {
        self.allowed_sources.is_empty() || self.allowed_sources.iter().any(|s| s == source_ip)
    }

    /// Returns true if a deployment should produce an email notification.
    pub fn wants_notification(&self) -> bool {
        !self.email_recipients.is_empty()
    }

    /// Resolves the sender: the package override if it carries an address,
    /// otherwise the host application's default sender.
    pub fn resolve_sender(&self) -> Option<&MailAddress> {
        self.email_sender
            .as_ref()
            .filter(|s| !s.address.is_empty())
            .or(self.mail_from.as_ref().filter(|s| !s.address.is_empty()))
    }
}

/// Load and parse the configuration file
pub fn load_config(path: &Path) -> Result<DeployConfig> {
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        DeployError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&config_str)
}

pub fn parse_config(config_str: &str) -> Result<DeployConfig> {
    let config: DeployConfig = toml::from_str(config_str)?;

    if !config.hook_path.starts_with('/') {
        return Err(DeployError::ConfigError(format!(
            "hook_path must start with '/', got '{}'",
            config.hook_path
        )));
    }

    Ok(config)
}

pub struct AppState {
    pub config: Arc<DeployConfig>,
    pub executor: DeployExecutor,
    pub notifier: Arc<dyn Notifier>,
    pub start_time: Instant,
}

pub type SharedState = Arc<AppState>;
