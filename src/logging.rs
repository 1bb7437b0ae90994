use directories::ProjectDirs;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

const LOG_FILE_NAME: &str = "seekchat.log";

/// Directory holding the log file, under the per-user local data directory.
pub fn log_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "seekchat", "seekchat").map(|dirs| dirs.data_local_dir().join("logs"))
}

/// Installs a file-backed subscriber. `RUST_LOG` wins over `level` when set.
///
/// Returns the log file path, or `None` when no data directory is available.
pub fn init_logging(level: &str) -> anyhow::Result<Option<PathBuf>> {
    let Some(dir) = log_dir() else {
        return Ok(None);
    };

    std::fs::create_dir_all(&dir)?;
    let log_file = dir.join(LOG_FILE_NAME);
    let file = File::create(&log_file)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let file_layer = fmt::layer()
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .with_thread_names(true);

    Registry::default().with(filter).with(file_layer).try_init()?;

    Ok(Some(log_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_app_scoped() {
        if let Some(dir) = log_dir() {
            assert!(dir.ends_with("logs"));
            assert!(dir.to_string_lossy().to_lowercase().contains("seekchat"));
        }
    }
}
