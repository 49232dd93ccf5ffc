//! Webhook handler for push events

use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::SharedState;
use crate::notify;

/// Handles the push webhook.
///
/// Every rejected or failed deployment answers 500 with
/// `{"success": false, "message": ...}`, including pushes to a branch that is
/// not checked out; callers tell them apart by message. A deployment answers
/// 200 with `true`, whatever happens to the notification afterwards.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let source_ip = remote.ip().to_string();
    let span = info_span!("deploy", deploy_id = %Uuid::now_v7(), source_ip = %source_ip);

    async move {
        match state.executor.run(&body, &source_ip).await {
            Ok(deployment) => {
                if let Some(payload) = state.executor.notification(&deployment) {
                    info!(target: "gitdeploy::notify", "Notifying {} recipient(s)", payload.to.len());
                    notify::dispatch(state.notifier.clone(), payload);
                }
                Json(true).into_response()
            }
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": e.to_string(),
                })),
            )
                .into_response(),
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::deploy::DeployExecutor;
    use crate::error::NotifyError;
    use crate::git::{MockSourceControl, PullOutput};
    use crate::notify::{MockNotifier, Notifier};
    use crate::{AppState, DeployConfig, MailAddress};
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Instant;
    use tower::ServiceExt;

    const SCENARIO_BODY: &str = r#"{"ref":"refs/heads/main","repository":{"name":"demo"},"commits":[{"id":"abcdef1234567890","message":"Fix bug\n\nLonger body","timestamp":"2024-01-02T03:04:05+00:00"}]}"#;

    fn fake_repo(root: &Path) {
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/config"), "").unwrap();
    }

    fn scm_on(branch: &'static str) -> MockSourceControl {
        let mut scm = MockSourceControl::new();
        scm.expect_current_branch()
            .returning(move |_| branch.to_string());
        scm.expect_pull().returning(|_, remote, branch| {
            Ok(PullOutput {
                command: format!("'git' 'pull' '{}' '{}'", remote, branch),
                output: "Already up to date.\n".to_string(),
            })
        });
        scm.expect_whoami().returning(|| "deployer".to_string());
        scm
    }

    fn router(config: DeployConfig, scm: MockSourceControl, notifier: Arc<dyn Notifier>, ip: [u8; 4]) -> axum::Router {
        let config = Arc::new(config);
        let state = Arc::new(AppState {
            executor: DeployExecutor::new(config.clone(), Arc::new(scm), PathBuf::from("/")),
            config,
            notifier,
            start_time: Instant::now(),
        });
        create_router(state).layer(MockConnectInfo(SocketAddr::from((ip, 40000))))
    }

    async fn post(router: axum::Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn repo_config(root: &Path) -> DeployConfig {
        DeployConfig {
            repo_path: Some(root.to_path_buf()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn successful_deploy_returns_true() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path());

        let app = router(repo_config(tmp.path()), scm_on("main"), Arc::new(MockNotifier::new()), [127, 0, 0, 1]);
        let (status, json) = post(app, "/gitdeploy", SCENARIO_BODY).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::Value::Bool(true));
    }

    #[tokio::test]
    async fn branch_mismatch_is_500_with_message() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path());

        let app = router(repo_config(tmp.path()), scm_on("develop"), Arc::new(MockNotifier::new()), [127, 0, 0, 1]);
        let (status, json) = post(app, "/gitdeploy", SCENARIO_BODY).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert!(
            json["message"]
                .as_str()
                .unwrap()
                .starts_with("Pushed refs do not match current branch")
        );
    }

    #[tokio::test]
    async fn empty_body_is_malformed() {
        let app = router(DeployConfig::default(), MockSourceControl::new(), Arc::new(MockNotifier::new()), [127, 0, 0, 1]);
        let (status, json) = post(app, "/gitdeploy", "{}").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert!(
            json["message"]
                .as_str()
                .unwrap()
                .starts_with("Web hook data does not look valid")
        );
    }

    #[tokio::test]
    async fn forbidden_source_is_rejected() {
        let config = DeployConfig {
            allowed_sources: vec!["10.0.0.1".to_string()],
            ..Default::default()
        };
        let app = router(config, MockSourceControl::new(), Arc::new(MockNotifier::new()), [10, 0, 0, 9]);
        let (status, json) = post(app, "/gitdeploy", SCENARIO_BODY).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Request must come from an approved IP");
    }

    #[tokio::test]
    async fn notification_failure_does_not_change_response() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path());
        let mut config = repo_config(tmp.path());
        config.hook_path = "/hooks/deploy".to_string();
        config.email_recipients = vec![MailAddress {
            name: "Ops".into(),
            address: "ops@example.com".into(),
        }];
        config.mail_from = Some(MailAddress {
            name: "App".into(),
            address: "app@example.com".into(),
        });

        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .returning(|_| Err(NotifyError::Transport("smtp down".into())));

        let app = router(config, scm_on("main"), Arc::new(notifier), [127, 0, 0, 1]);
        let (status, json) = post(app, "/hooks/deploy", SCENARIO_BODY).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::Value::Bool(true));
    }

    #[tokio::test]
    async fn root_reports_health() {
        let app = router(DeployConfig::default(), MockSourceControl::new(), Arc::new(MockNotifier::new()), [127, 0, 0, 1]);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?format=json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["name"], "simple_git_deploy");
    }
}
