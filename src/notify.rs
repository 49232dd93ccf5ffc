//! Deployment notifications: commit humanization, email assembly and transports.

use async_trait::async_trait;
use chrono::DateTime;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::deploy::DeployResult;
use crate::error::NotifyError;
use crate::webhook::CommitRecord;
use crate::{DeployConfig, MailAddress, MailTransport};

const SHORT_ID_LEN: usize = 9;
const HUMAN_DATE_FORMAT: &str = "%d/%m/%Y, %-I:%M%P";

/// A commit prepared for reading by a person.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HumanCommit {
    pub id: String,
    pub short_id: String,
    pub subject: String,
    pub description: String,
    pub date: String,
}

impl HumanCommit {
    pub fn from_record(commit: &CommitRecord) -> Self {
        let (subject, description) = match commit.message.split_once('\n') {
            Some((subject, rest)) => (subject.trim_end_matches('\r'), rest),
            None => (commit.message.as_str(), ""),
        };

        Self {
            id: commit.id.clone(),
            short_id: commit.id.chars().take(SHORT_ID_LEN).collect(),
            subject: subject.to_string(),
            description: description.to_string(),
            date: humanize_date(&commit.timestamp),
        }
    }
}

/// Renders an ISO-8601 timestamp as `02/01/2024, 3:04am`, keeping its own offset.
/// Unparseable timestamps are passed through unchanged.
pub fn humanize_date(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.format(HUMAN_DATE_FORMAT).to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Everything a mail transport needs to announce a deployment.
#[derive(Debug, Clone, Serialize)]
pub struct EmailPayload {
    pub from: MailAddress,
    pub to: Vec<MailAddress>,
    pub subject: String,
    pub repository_name: String,
    pub commits: Vec<HumanCommit>,
    pub server: DeployResult,
}

/// Assembles the notification for a finished deployment.
///
/// Returns `None` when there is nobody to notify, or no sender could be resolved.
pub fn format(
    commits: &[CommitRecord],
    repo_name: &str,
    config: &DeployConfig,
    server: &DeployResult,
) -> Option<EmailPayload> {
    if !config.wants_notification() {
        return None;
    }
    let Some(from) = config.resolve_sender() else {
        warn!(target: "gitdeploy::notify", "No sender configured, skipping notification");
        return None;
    };

    Some(EmailPayload {
        from: from.clone(),
        to: config.email_recipients.clone(),
        subject: format!("Repo: {} updated", repo_name),
        repository_name: repo_name.to_string(),
        commits: commits.iter().map(HumanCommit::from_record).collect(),
        server: server.clone(),
    })
}

fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn mailbox(address: &MailAddress) -> String {
    let addr = header_safe(&address.address);
    if address.name.is_empty() {
        format!("<{}>", addr)
    } else {
        format!("\"{}\" <{}>", header_safe(&address.name).replace('"', "'"), addr)
    }
}

impl EmailPayload {
    pub fn render_text(&self) -> String {
        let mut body = format!("Repository {} was updated.\n\n", self.repository_name);
        body.push_str(&format!("Command: {}\n", self.server.command));
        body.push_str(&format!("User: {}\n\n", self.server.user));

        body.push_str("Commits:\n");
        for commit in &self.commits {
            body.push_str(&format!("{}  {}  {}\n", commit.short_id, commit.date, commit.subject));
            for line in commit.description.lines().filter(|l| !l.trim().is_empty()) {
                body.push_str(&format!("    {}\n", line));
            }
        }

        body.push_str("\nOutput:\n");
        body.push_str(&self.server.output);
        body
    }

    /// Full message including headers, as accepted by `sendmail -t`.
    pub fn to_message(&self) -> String {
        let to = self.to.iter().map(mailbox).collect::<Vec<_>>().join(", ");
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
            mailbox(&self.from),
            to,
            header_safe(&self.subject),
            self.render_text()
        )
    }
}

/// Capability to deliver a notification.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payload: &EmailPayload) -> Result<(), NotifyError>;
}

/// Drops every notification.
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _payload: &EmailPayload) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, payload: &EmailPayload) -> Result<(), NotifyError> {
        info!(
            target: "gitdeploy::notify",
            recipients = payload.to.len(),
            "{}\n{}",
            payload.subject,
            payload.render_text()
        );
        Ok(())
    }
}

/// Hands notifications to a local sendmail-compatible MTA.
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    sendmail_path: PathBuf,
}

impl SendmailNotifier {
    pub fn new(sendmail_path: impl Into<PathBuf>) -> Self {
        Self {
            sendmail_path: sendmail_path.into(),
        }
    }
}

#[async_trait]
impl Notifier for SendmailNotifier {
    async fn send(&self, payload: &EmailPayload) -> Result<(), NotifyError> {
        let mut child = Command::new(&self.sendmail_path)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // A transport that exits early closes the pipe under us.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.to_message().as_bytes())
                .await
                .map_err(|e| {
                    NotifyError::Transport(format!(
                        "failed writing message to {}: {}",
                        self.sendmail_path.display(),
                        e
                    ))
                })?;
        }

        let out = child.wait_with_output().await.map_err(|e| {
            NotifyError::Transport(format!("waiting for {}: {}", self.sendmail_path.display(), e))
        })?;
        if !out.status.success() {
            return Err(NotifyError::Transport(format!(
                "{} exited with {}: {}",
                self.sendmail_path.display(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(())
    }
}

pub fn build_notifier(config: &DeployConfig) -> Arc<dyn Notifier> {
    match config.mail_transport {
        MailTransport::Log => Arc::new(LogNotifier),
        MailTransport::Sendmail => Arc::new(SendmailNotifier::new(&config.sendmail_path)),
        MailTransport::None => Arc::new(NullNotifier),
    }
}

/// Sends in the background. Failures are logged under `gitdeploy::notify`
/// and never reach the caller.
pub fn dispatch(notifier: Arc<dyn Notifier>, payload: EmailPayload) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.send(&payload).await {
            Ok(()) => info!(
                target: "gitdeploy::notify",
                "Sent '{}' to {} recipient(s)",
                payload.subject,
                payload.to.len()
            ),
            Err(e) => warn!(target: "gitdeploy::notify", "Failed to send '{}': {}", payload.subject, e),
        }
    })
}
