//! Process logger: a size-rotating log file plus an optional console mirror.
//!
//! Both sinks use [`format::LineFormat`]. The console sink can be switched on
//! and off at runtime through [`Logger::set_console_enabled`]. The returned
//! [`Logger`] is a handle; callers run their work inside
//! [`Logger::in_scope`] instead of installing a global subscriber.

pub mod format;
pub mod rotating;

use crate::backup::logging::format::LineFormat;
use crate::backup::logging::rotating::RotatingFileAppender;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::{check_log_file_writable, validate_log_file};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Dispatch, Metadata};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use validator::Validate;

static DEFAULT_LOG_FILE: &str = "backup.log";
/// 100 MiB
static DEFAULT_MAX_BYTES: u64 = 104_857_600;
static DEFAULT_BACKUP_COUNT: usize = 5;

fn default_log_file() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_FILE)
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

fn default_backup_count() -> usize {
    DEFAULT_BACKUP_COUNT
}

fn default_console() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct LoggingConfig {
    /// Active log file; rotated copies get `.1`, `.2`, ... appended.
    #[validate(custom(function = validate_log_file))]
    #[serde(default = "default_log_file")]
    #[builder(default = default_log_file(), into)]
    file: PathBuf,
    /// Rotate once the active file would grow past this size. `0` disables rotation.
    #[serde(default = "default_max_bytes")]
    #[builder(default = DEFAULT_MAX_BYTES)]
    max_bytes: u64,
    /// Number of rotated files to keep.
    #[serde(default = "default_backup_count")]
    #[builder(default = DEFAULT_BACKUP_COUNT)]
    backup_count: usize,
    #[serde(default)]
    #[builder(default)]
    level: LogLevel,
    /// Mirror records to stderr.
    #[serde(default = "default_console")]
    #[builder(default = true)]
    console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Logger {
    dispatch: Dispatch,
    console: Arc<AtomicBool>,
    file: RotatingFileAppender,
}

impl Logger {
    /// Runs `f` with this logger as the thread's default subscriber.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// Attaches or detaches the console sink. Calling it twice with the same
    /// value never duplicates console output.
    pub fn set_console_enabled(&self, enabled: bool) {
        self.console.store(enabled, Ordering::SeqCst);
        self.in_scope(|| {
            if enabled {
                info!("Console logging enabled")
            } else {
                info!("Console logging disabled")
            }
        });
    }

    pub fn console_enabled(&self) -> bool {
        self.console.load(Ordering::SeqCst)
    }

    pub fn file_path(&self) -> Result<PathBuf> {
        Ok(self.file.path()?)
    }
}

/// Builds the logger with stderr as console sink.
pub fn initialize_logging(config: &LoggingConfig) -> Result<Logger> {
    initialize_logging_with_console(config, BoxMakeWriter::new(std::io::stderr))
}

/// Builds the logger with a caller supplied console sink.
///
/// Fails with [`Error::Filesystem`] when the log file cannot be written. The
/// file itself is only created by the first record.
pub fn initialize_logging_with_console(
    config: &LoggingConfig,
    console: BoxMakeWriter,
) -> Result<Logger> {
    check_log_file_writable(config.file()).map_err(|source| Error::Filesystem {
        path: config.file().clone(),
        source,
    })?;

    let file = RotatingFileAppender::new(config.file(), *config.max_bytes(), *config.backup_count());
    let console_enabled = Arc::new(AtomicBool::new(*config.console()));
    let flag = console_enabled.clone();
    let console = console.with_filter(move |_: &Metadata<'_>| flag.load(Ordering::SeqCst));

    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::from(*config.level()))
        .with(fmt::layer().event_format(LineFormat).with_writer(file.clone()))
        .with(fmt::layer().event_format(LineFormat).with_writer(console));

    Ok(Logger {
        dispatch: Dispatch::new(subscriber),
        console: console_enabled,
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::logging::format::TIME_FORMAT;
    use crate::backup::test_support::{read_log, CapturedWriter};
    use chrono::NaiveDateTime;
    use tempfile::TempDir;
    use tracing::debug;

    fn config(dir: &TempDir, level: LogLevel, console: bool) -> LoggingConfig {
        LoggingConfig::builder()
            .file(dir.path().join("backup.log"))
            .level(level)
            .console(console)
            .build()
    }

    #[test]
    fn test_record_format() {
        let temp_dir = TempDir::new().unwrap();
        let logger = initialize_logging(&config(&temp_dir, LogLevel::Debug, false)).unwrap();

        logger.in_scope(|| info!("hello {}", "world"));

        let lines = read_log(&logger);
        assert_eq!(lines.len(), 1);
        let (timestamp, rest) = lines[0].split_at(23);
        assert!(NaiveDateTime::parse_from_str(timestamp, TIME_FORMAT).is_ok());
        assert_eq!(rest, " - INFO - hello world");
    }

    #[test]
    fn test_warning_records_spell_out_level() {
        let temp_dir = TempDir::new().unwrap();
        let logger = initialize_logging(&config(&temp_dir, LogLevel::Debug, false)).unwrap();

        logger.in_scope(|| tracing::warn!("disk almost full"));

        let lines = read_log(&logger);
        assert!(lines[0].ends_with(" - WARNING - disk almost full"));
    }

    #[test]
    fn test_level_filter_drops_lower_levels() {
        let temp_dir = TempDir::new().unwrap();
        let logger = initialize_logging(&config(&temp_dir, LogLevel::Info, false)).unwrap();

        logger.in_scope(|| {
            debug!("not written");
            info!("written");
        });

        let lines = read_log(&logger);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" - INFO - written"));
    }

    #[test]
    fn test_log_file_created_lazily() {
        let temp_dir = TempDir::new().unwrap();
        let logger = initialize_logging(&config(&temp_dir, LogLevel::Debug, false)).unwrap();

        let path = logger.file_path().unwrap();
        assert!(!path.exists());
        logger.in_scope(|| info!("first"));
        assert!(path.exists());
    }

    #[test]
    fn test_unwritable_log_path_is_filesystem_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = LoggingConfig::builder()
            .file(temp_dir.path().join("missing").join("backup.log"))
            .build();

        match initialize_logging(&config) {
            Err(Error::Filesystem { path, .. }) => assert_eq!(&path, config.file()),
            other => panic!("Expected Filesystem error, got {other:?}"),
        }
    }

    #[test]
    fn test_console_toggle_never_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let captured = CapturedWriter::default();
        let logger = initialize_logging_with_console(
            &config(&temp_dir, LogLevel::Debug, true),
            captured.make_writer(),
        )
        .unwrap();

        logger.set_console_enabled(false);
        logger.set_console_enabled(true);
        logger.set_console_enabled(true);
        logger.in_scope(|| info!("after toggle"));

        let console = captured.contents();
        assert_eq!(console.matches("after toggle").count(), 1);
        assert!(!console.contains("Console logging disabled"));
        assert_eq!(console.matches("Console logging enabled").count(), 2);

        let file = read_log(&logger);
        assert_eq!(file.iter().filter(|l| l.contains("after toggle")).count(), 1);
        assert!(file.iter().any(|l| l.ends_with(" - INFO - Console logging disabled")));
    }

    #[test]
    fn test_console_disabled_by_config() {
        let temp_dir = TempDir::new().unwrap();
        let captured = CapturedWriter::default();
        let logger = initialize_logging_with_console(
            &config(&temp_dir, LogLevel::Debug, false),
            captured.make_writer(),
        )
        .unwrap();

        logger.in_scope(|| info!("file only"));

        assert!(!logger.console_enabled());
        assert!(captured.contents().is_empty());
        assert_eq!(read_log(&logger).len(), 1);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: LoggingConfig = serde_yml::from_str("{}").unwrap();
        assert_eq!(config, LoggingConfig::default());
        assert_eq!(config.file(), &PathBuf::from("backup.log"));
        assert_eq!(*config.max_bytes(), 104_857_600);
        assert_eq!(*config.backup_count(), 5);
        assert_eq!(*config.level(), LogLevel::Debug);
        assert!(*config.console());
    }

    #[test]
    fn test_log_level_accepts_warning_alias() {
        let level: LogLevel = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(LevelFilter::from(level), LevelFilter::WARN);
        assert!(serde_json::from_str::<LogLevel>("\"loud\"").is_err());
    }
}
