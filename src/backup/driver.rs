use crate::backup::backup_config::BackupPair;
use crate::backup::logging::Logger;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use crate::backup::sync_runner::{SyncOutcome, SyncRunner};
use getset::Getters;
use itertools::Itertools;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct PairRecord {
    pair: BackupPair,
    /// Destination as written to log records, masked when redaction is on.
    loggable_destination: String,
    outcome: SyncOutcome,
}

/// Outcome of every attempted pair, in configuration order.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct RunSummary {
    records: Vec<PairRecord>,
    elapsed: Duration,
}

impl RunSummary {
    pub fn failed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !r.outcome.is_success())
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed.as_secs_f64() / 60.0
    }

    /// All per-pair errors folded into one, `Ok` when every pair succeeded.
    pub fn into_result(self) -> Result<()> {
        convert_error_vec(
            self.records
                .into_iter()
                .filter_map(|r| {
                    r.outcome.to_error().map(|e| {
                        e.with_msg(format!(
                            "Sync {} to {} failed",
                            r.pair.source().display(),
                            r.loggable_destination
                        ))
                    })
                })
                .collect_vec(),
        )
    }
}

/// Flags for one pair: `base`, plus `home_extra` when the pair is the home pair.
/// `base` itself is never modified, so later pairs are unaffected.
pub fn compute_args(
    pair: &BackupPair,
    base: &[String],
    home_extra: &[String],
    home_marker: Option<&Path>,
) -> Vec<String> {
    if pair.is_home(home_marker) {
        base.iter().chain(home_extra).cloned().collect()
    } else {
        base.to_vec()
    }
}

/// Syncs every pair in order, one at a time. A failing pair never stops the
/// run.
pub fn run_backup<R: SyncRunner>(
    logger: &Logger,
    runner: &R,
    pairs: &[BackupPair],
    base_args: &[String],
    home_args: &[String],
    home_marker: Option<&Path>,
) -> RunSummary {
    logger.in_scope(|| {
        let start = Instant::now();
        let records = pairs
            .iter()
            .map(|pair| {
                let loggable_destination = runner.loggable_destination(pair).into_owned();
                info!(
                    "Syncing {} to {}",
                    pair.source().display(),
                    loggable_destination
                );
                let args = compute_args(pair, base_args, home_args, home_marker);
                PairRecord {
                    pair: pair.clone(),
                    loggable_destination,
                    outcome: runner.sync(pair, &args),
                }
            })
            .collect_vec();

        let summary = RunSummary {
            records,
            elapsed: start.elapsed(),
        };
        info!(
            "Backup process completed in {:.2} minutes",
            summary.elapsed_minutes()
        );
        if !summary.is_success() {
            warn!(
                "{} of {} pairs failed",
                summary.failed_count(),
                summary.records.len()
            );
        }
        summary
    })
}
