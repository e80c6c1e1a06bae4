use std::path::{Path, PathBuf};

use chrono::Local;
use glob::glob;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::errors::LoggerError;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
/// # Logger Local Options
///
/// Where log output goes and how verbose each sink is. `RUST_LOG`, when set,
/// overrides `tty_level` for the console.
pub struct LoggerLocalOptions {
    /// Filter directive for the console, e.g. `info` or `lib_sentinel=debug`.
    pub tty_level: String,
    /// Filter directive for the log file. `None` disables file output.
    pub file_level: Option<String>,
    /// Directory for log files. Defaults to `./logs`.
    pub log_dir: Option<PathBuf>,
    /// Write the file as JSON lines instead of plain text.
    pub json: bool,
}

impl Default for LoggerLocalOptions {
    fn default() -> Self {
        Self {
            tty_level: "info".to_string(),
            file_level: None,
            log_dir: None,
            json: true,
        }
    }
}

/// Keeps the non-blocking file writer alive. Dropping it flushes buffered
/// lines, so hold it for the life of the process.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggerGuard {
    _file: Option<WorkerGuard>,
    log_file: Option<PathBuf>,
}

impl LoggerGuard {
    /// Path of the file being written, if file output is enabled.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Deletes every `<app_name>-*.log` in `log_dir` except the newest.
///
/// File names carry a sortable timestamp, so newest means greatest name.
/// Returns how many files were removed.
pub fn rotate_logs(app_name: &str, log_dir: &Path) -> usize {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = match glob(&pattern) {
        Ok(paths) => paths.flatten().collect(),
        Err(e) => {
            eprintln!("Invalid log rotation pattern {}: {}", pattern, e);
            return 0;
        }
    };

    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old_file in log_files.iter().skip(1) {
        match std::fs::remove_file(old_file) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    removed
}

fn filter(directive: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(directive).map_err(|e| LoggerError::Filter(format!("{}: {}", directive, e)))
}

/// Installs the global `tracing` subscriber: a coloured console layer plus an
/// optional file layer written off-thread.
///
/// The file is `<log_dir>/<app_name>-<YYYYmmdd_HHMMSS>.log`; older files for
/// the same app are rotated away first.
pub fn init_logging(app_name: &str, options: &LoggerLocalOptions) -> Result<LoggerGuard, LoggerError> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(env) => env,
        Err(_) => filter(&options.tty_level)?,
    };
    let console_layer = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_filter(console_filter);

    let (file_layer, guard, log_file) = match &options.file_level {
        Some(level) => {
            let log_dir = options.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs"));
            std::fs::create_dir_all(&log_dir)?;
            rotate_logs(app_name, &log_dir);

            let file_name = format!("{}-{}.log", app_name, Local::now().format("%Y%m%d_%H%M%S"));
            let (writer, guard) = tracing_appender::non_blocking(rolling::never(&log_dir, &file_name));
            let base = fmt::layer().with_ansi(false).with_writer(writer);
            let layer = if options.json {
                base.json().with_filter(filter(level)?).boxed()
            } else {
                base.with_filter(filter(level)?).boxed()
            };
            (Some(layer), Some(guard), Some(log_dir.join(file_name)))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInstalled(e.to_string()))?;

    tracing::info!(app = app_name, file = ?log_file, "logging initialized");
    Ok(LoggerGuard {
        _file: guard,
        log_file,
    })
}
