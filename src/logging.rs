use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{DeployError, Result};
use crate::{DEFAULT_LOG_MAX_FILES, LogRotation};

const LOG_FILE_PREFIX: &str = "gitdeploy";
const LOG_FILE_SUFFIX: &str = "log";

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Persistent log sink for rejected and failed deployments.
pub struct FileLogger {
    log_directory: PathBuf,
    max_files: usize,
    rotation: Rotation,
    level: LevelFilter,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            max_files: DEFAULT_LOG_MAX_FILES,
            rotation: Rotation::DAILY,
            level: LevelFilter::WARN,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Creates the log directory and a non-blocking rolling writer into it.
    /// Writes are handed to a background worker, so a slow or failing disk
    /// never stalls request handling. Keep the guard alive to flush on exit.
    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(self.rotation.clone())
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix(LOG_FILE_SUFFIX)
            .max_log_files(self.max_files)
            .build(&self.log_directory)
            .map_err(|e| {
                DeployError::ConfigError(format!(
                    "Failed to create log file in '{}': {}",
                    self.log_directory.display(),
                    e
                ))
            })?;

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Console output filtered by `RUST_LOG` (default `info`), plus the
/// persistent file sink at its own level.
pub fn setup_logging(file_logger: &FileLogger) -> Result<WorkerGuard> {
    let (file_writer, guard) = file_logger.setup_file_logging()?;

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_logger.level),
        )
        .try_init()
        .map_err(|e| DeployError::ConfigError(format!("Failed to initialise logging: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_log_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("storage/logs");

        let logger = FileLogger::new(dir.clone())
            .with_max_files(2)
            .with_rotation(LogRotation::Never.into());
        let (_writer, _guard) = logger.setup_file_logging().unwrap();

        assert!(dir.is_dir());
        assert_eq!(logger.max_files, 2);
        assert_eq!(logger.rotation, Rotation::NEVER);
    }

    #[test]
    fn configured_rotation_maps_to_appender_rotation() {
        assert_eq!(Rotation::from(LogRotation::Minutely), Rotation::MINUTELY);
        assert_eq!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY);
        assert_eq!(Rotation::from(LogRotation::default()), Rotation::DAILY);
    }
}
