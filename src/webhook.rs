//! Webhook related structures and push payload validation

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::DeployConfig;
use crate::error::{DeployError, Result};

/// A single commit as sent in the provider's push payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    /// Author, committer, url and whatever else the provider sends along.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A validated push notification. Built once per inbound call by [`validate`].
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub source_ip: String,
    pub body: Map<String, Value>,
    pub pushed_branch: String,
    pub commits: Vec<CommitRecord>,
    pub repository_name: String,
}

/// Validates an inbound push: allow-list first, then payload shape.
///
/// Every rejection is logged before it is returned. The log sink is
/// non-blocking, so a failing sink never affects the caller.
pub fn validate(raw_body: &[u8], source_ip: &str, config: &DeployConfig) -> Result<DeployRequest> {
    let result = validate_inner(raw_body, source_ip, config);
    if let Err(e) = &result {
        match e {
            DeployError::UnsupportedRef(_) => warn!(target: "gitdeploy::deploy", source_ip, "{}", e),
            _ => error!(target: "gitdeploy::deploy", source_ip, "{}", e),
        }
    }
    result
}

fn validate_inner(raw_body: &[u8], source_ip: &str, config: &DeployConfig) -> Result<DeployRequest> {
    if !config.is_source_allowed(source_ip) {
        return Err(DeployError::ForbiddenSource);
    }

    let body = match serde_json::from_slice::<Value>(raw_body) {
        Ok(Value::Object(map)) if !map.is_empty() => map,
        Ok(_) => {
            return Err(DeployError::MalformedPayload(
                "expected a non-empty JSON object".to_string(),
            ));
        }
        Err(e) => return Err(DeployError::MalformedPayload(e.to_string())),
    };

    let branch_ref = body
        .get("ref")
        .and_then(Value::as_str)
        .ok_or_else(|| DeployError::MalformedPayload("missing ref field".to_string()))?;
    let pushed_branch = parse_pushed_branch(branch_ref)?;

    let repository_name = body
        .get("repository")
        .and_then(|r| r.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let commits = body.get("commits").map(parse_commits).unwrap_or_default();

    Ok(DeployRequest {
        source_ip: source_ip.to_string(),
        body,
        pushed_branch,
        commits,
        repository_name,
    })
}

/// Commits only feed the notification, so bad entries are dropped with a
/// warning instead of failing the deployment.
fn parse_commits(commits: &Value) -> Vec<CommitRecord> {
    let entries = match commits {
        Value::Array(entries) => entries,
        Value::Null => return Vec::new(),
        other => {
            warn!(target: "gitdeploy::notify", "Ignoring commits field, expected a list: {}", other);
            return Vec::new();
        }
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| match CommitRecord::deserialize(entry) {
            Ok(commit) => Some(commit),
            Err(e) => {
                warn!(target: "gitdeploy::notify", "Ignoring commit #{}: {}", idx, e);
                None
            }
        })
        .collect()
}

/// Extracts the branch from a `refs/heads/<branch>` ref.
///
/// Only the third path segment is taken, so branch names containing `/`
/// cannot be represented. Those, and refs outside `refs/heads/` (tags,
/// notes), are reported as [`DeployError::UnsupportedRef`].
pub fn parse_pushed_branch(branch_ref: &str) -> Result<String> {
    let segments: Vec<&str> = branch_ref.split('/').collect();
    if segments.len() < 3 {
        return Err(DeployError::MalformedPayload(format!(
            "ref '{}' has fewer than three segments",
            branch_ref
        )));
    }

    let branch = segments[2].trim();
    if segments[0] != "refs" || segments[1] != "heads" || segments.len() > 3 || branch.is_empty() {
        return Err(DeployError::UnsupportedRef(branch_ref.to_string()));
    }

    Ok(branch.to_string())
}
