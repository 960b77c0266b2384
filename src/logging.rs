//! Structured logging: console plus daily-rolling log files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Maximum number of log files retained in the log directory.
pub const MAX_LOG_FILES: usize = 10;

pub const DEFAULT_FILTER: &str = "info,printshop_kanban=debug";

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Defaults to [`get_log_dir`].
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
    /// Write the file log as JSON lines instead of plain text.
    pub json: bool,
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_prefix: "kanban".to_string(),
            json: false,
            console: true,
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_FILTER`]. Calling this again once a
/// subscriber is installed keeps the existing one. Keep the returned guard
/// alive until exit; dropping it flushes the file writer.
pub fn init_logging(options: &LogOptions) -> anyhow::Result<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_dir = options.log_dir.clone().unwrap_or_else(get_log_dir);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    prune_old_logs(&log_dir, &options.file_prefix);

    let file_appender = tracing_appender::rolling::daily(&log_dir, &options.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let text_file_layer = (!options.json).then(|| {
        fmt::layer()
            .with_writer(non_blocking.clone())
            .with_ansi(false)
            .with_target(true)
    });
    let json_file_layer = options.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(non_blocking.clone())
            .with_target(true)
    });
    let console_layer = options.console.then(|| fmt::layer().with_target(true));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(text_file_layer)
        .with(json_file_layer)
        .try_init();
    if installed.is_err() {
        debug!("Global subscriber already installed; keeping it");
    }
    Ok(guard)
}

/// Default log directory under the user's local data dir.
///
/// `KANBAN_LOG_DIR` takes precedence when set.
pub fn get_log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KANBAN_LOG_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("printshop-kanban").join("logs")
}

/// Delete all but the newest [`MAX_LOG_FILES`] files named `{prefix}.*`.
pub fn prune_old_logs(log_dir: &Path, prefix: &str) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let marker = format!("{prefix}.");

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry.path().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(&marker))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first; ties broken by name so the dated suffix decides.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_keeps_newest_files_for_prefix() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=14 {
            fs::write(dir.path().join(format!("kanban.2024-05-{day:02}")), "x").unwrap();
        }
        fs::write(dir.path().join("other.2024-05-01"), "x").unwrap();

        prune_old_logs(dir.path(), "kanban");

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.iter().filter(|n| n.starts_with("kanban.")).count(), MAX_LOG_FILES);
        assert!(names.contains(&"other.2024-05-01".to_string()));
    }

    #[test]
    fn prune_ignores_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        prune_old_logs(&dir.path().join("absent"), "kanban");
    }

    #[test]
    fn init_creates_log_dir_and_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            log_dir: Some(dir.path().join("logs")),
            console: false,
            ..LogOptions::default()
        };
        let _first = init_logging(&options).unwrap();
        let _second = init_logging(&options).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }
}
