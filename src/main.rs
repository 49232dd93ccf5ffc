use simple_git_deploy::api::create_router;
use simple_git_deploy::deploy::DeployExecutor;
use simple_git_deploy::git::GitClient;
use simple_git_deploy::locator::default_search_origin;
use simple_git_deploy::logging::{FileLogger, setup_logging};
use simple_git_deploy::notify::build_notifier;
use simple_git_deploy::{AppState, load_config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "gitdeploy.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path = PathBuf::from(
        std::env::var("GITDEPLOY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );

    let config = match load_config(&config_path) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = FileLogger::new(config.log_dir.clone())
        .with_max_files(config.log_max_files)
        .with_rotation(config.log_rotation.into());
    let _log_guard = match setup_logging(&file_logger) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    let git = GitClient::new(
        config.git_path(),
        config.pull_log.clone(),
        Duration::from_secs(config.pull_timeout_secs),
    );
    let search_origin = default_search_origin();

    let state = Arc::new(AppState {
        executor: DeployExecutor::new(config.clone(), Arc::new(git), search_origin.clone()),
        notifier: build_notifier(&config),
        config: config.clone(),
        start_time: Instant::now(),
    });
    let app = create_router(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    info!("Deploy hook mounted at {}", config.hook_path);
    match config.repo_path() {
        Some(path) => info!("Deploying into configured repo {}", path.display()),
        None => info!("Discovering repo from {}", search_origin.display()),
    }

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
