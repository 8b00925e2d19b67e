//! # k-sync
//!
//! Runs an external sync tool (rclone by default) over a fixed list of
//! source/destination pairs and keeps a size-rotated log of everything it did.
//!
//! ## Features
//!
//! - **Ordered Pairs**: Each pair is synced in turn; a failing pair never stops the run
//! - **Home Pair**: Extra exclusion flags for the pair whose source is the home directory
//! - **Streamed Output**: stdout and stderr of the tool drained concurrently into the log
//! - **Rotating Log**: Size-bounded log file with numbered backups, optional console mirror
//! - **Timeouts**: Optional per-sync time limit that kills a hung tool
//!
//! ## Quick Start
//!
//! ```no_run
//! use k_sync::backup::backup_config::BackupConfig;
//! use k_sync::backup::logging::initialize_logging;
//!
//! let config = BackupConfig::from_yaml_file("config.yml")?;
//! let logger = initialize_logging(config.logging())?;
//!
//! let summary = config.run(&logger, &config.sync_runner(&logger));
//! summary.into_result()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
