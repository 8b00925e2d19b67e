use crate::backup::driver::{run_backup, RunSummary};
use crate::backup::function_path;
use crate::backup::logging::{Logger, LoggingConfig};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithFnName, WithMsg};
use crate::backup::sync_runner::{ProcessSyncRunner, SyncRunner};
use crate::backup::validate::{validate_not_blank, validate_path_not_blank};
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

static DEFAULT_TOOL: &str = "rclone";

fn default_tool() -> PathBuf {
    PathBuf::from(DEFAULT_TOOL)
}

/// One `source -> destination` mapping handed to the sync tool.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupPair {
    #[validate(custom(function = validate_path_not_blank))]
    #[builder(into)]
    source: PathBuf,
    /// Local path or a remote understood by the sync tool, e.g. `gdrive:/Backups/`.
    #[validate(custom(function = validate_not_blank))]
    #[builder(into)]
    destination: String,
}

impl BackupPair {
    /// Compared by path components, so `/home/me/` and `/home/me` match.
    pub fn is_home(&self, home_marker: Option<&Path>) -> bool {
        home_marker.is_some_and(|home| self.source.as_path() == home)
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    /// Sync executable, looked up in `PATH` when relative.
    #[validate(custom(function = validate_path_not_blank))]
    #[serde(default = "default_tool")]
    #[builder(default = default_tool(), into)]
    tool: PathBuf,
    /// Arguments placed between the tool and its `sync` subcommand.
    #[serde(default)]
    #[builder(default, into)]
    tool_args: Vec<String>,
    /// Pair whose source equals this path also gets `home_args`.
    #[builder(into)]
    home_dir: Option<PathBuf>,
    /// Kill a sync that runs longer than this.
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    /// Mask `user:password@` of URIs in log records.
    #[serde(default)]
    #[builder(default)]
    redact_credentials: bool,
    #[validate(nested)]
    #[builder(into)]
    pairs: Vec<BackupPair>,
    /// Flags passed to every sync.
    #[serde(default)]
    #[builder(default, into)]
    args: Vec<String>,
    /// Flags appended only for the home pair.
    #[serde(default)]
    #[builder(default, into)]
    home_args: Vec<String>,
    #[validate(nested)]
    #[serde(default)]
    #[builder(default)]
    logging: LoggingConfig,
}

impl BackupConfig {
    #[named]
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .and_then(|f| {
                serde_yml::from_reader::<_, BackupConfig>(f)
                    .map_err(Error::from)
                    .with_msg(format!("Parse YAML config failed: {:?}", path))
            })
            .and_then(|bc| {
                bc.validate()
                    .map_err(Error::from)
                    .map(|_| bc)
                    .with_msg(format!("Config validation failed: {:?}", path))
            })
            .with_fn_name(function_path!())
    }

    pub fn sync_runner(&self, logger: &Logger) -> ProcessSyncRunner {
        ProcessSyncRunner::builder()
            .tool(self.tool.clone())
            .tool_args(self.tool_args.clone())
            .maybe_timeout(self.timeout)
            .redact_credentials(self.redact_credentials)
            .logger(logger.clone())
            .build()
    }

    pub fn run<R: SyncRunner>(&self, logger: &Logger, runner: &R) -> RunSummary {
        run_backup(
            logger,
            runner,
            &self.pairs,
            &self.args,
            &self.home_args,
            self.home_dir.as_deref(),
        )
    }
}
