use clap::Parser;
use k_sync::backup::backup_config::BackupConfig;
use k_sync::backup::logging::initialize_logging;
use k_sync::backup::result_error::WithMsg;
use std::path::PathBuf;
use std::process::exit;
use tracing::error;

static EXIT_SUCCESS: i32 = 0;
static EXIT_SYNC_FAILED: i32 = 1;
static EXIT_SETUP_FAILED: i32 = 2;

/// Sync configured directories with rclone (or a compatible tool)
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
}

fn main() {
    exit(run(&Args::parse()));
}

/// Loads the config, syncs every pair and returns the process exit code.
fn run(args: &Args) -> i32 {
    // stderr only, until the configured logger exists
    let bootstrap = tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .finish(),
    );
    let res = BackupConfig::from_yaml_file(&args.config)
        .and_then(|bc| initialize_logging(bc.logging()).map(|logger| (bc, logger)));
    let (config, logger) = match res {
        Ok(v) => v,
        Err(e) => {
            error!("{e}");
            return EXIT_SETUP_FAILED;
        }
    };
    drop(bootstrap);

    logger.set_console_enabled(*config.logging().console());
    let summary = config.run(&logger, &config.sync_runner(&logger));

    match summary.into_result() {
        Ok(_) => EXIT_SUCCESS,
        Err(e) => {
            logger.in_scope(|| error!("{}", e.with_msg("Backup finished with failures")));
            EXIT_SYNC_FAILED
        }
    }
}
