//! Runs the external sync tool for one pair.
//!
//! The child's stdout and stderr are drained by one reader thread each. Lines
//! travel over a bounded channel to the calling thread, which logs them at
//! debug level, so neither pipe can fill up and stall the child.

use crate::backup::backup_config::BackupPair;
use crate::backup::logging::Logger;
use crate::backup::redacted::redact_uri_credentials;
use crate::backup::result_error::error::{exit_code_text, Error};
use bon::Builder;
use derive_more::Display;
use getset::Getters;
use itertools::Itertools;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub static SYNC_SUBCOMMAND: &str = "sync";
/// Lines of each stream kept for the failure report
pub static OUTPUT_TAIL_LINES: usize = 20;
static LINE_CHANNEL_BOUND: usize = 256;
static WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long output is still read after a kill. Descendants of the tool may
/// keep the pipes open past that.
static KILL_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum OutputStream {
    #[display("stdout")]
    Stdout,
    #[display("stderr")]
    Stderr,
}

/// Last [`OUTPUT_TAIL_LINES`] lines of each stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct CapturedOutput {
    stdout: VecDeque<String>,
    stderr: VecDeque<String>,
}

impl CapturedOutput {
    pub fn push(&mut self, stream: OutputStream, line: String) {
        let buf = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        if buf.len() == OUTPUT_TAIL_LINES {
            buf.pop_front();
        }
        buf.push_back(line);
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.iter().join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.iter().join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    /// Non-zero exit. `code` is `None` when the child died from a signal.
    Failure {
        code: Option<i32>,
        output: CapturedOutput,
    },
    LaunchError {
        tool: PathBuf,
        cause: String,
    },
    /// Killed after running past the configured timeout.
    Timeout {
        after: Duration,
        output: CapturedOutput,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success)
    }

    pub fn to_error(&self) -> Option<Error> {
        match self {
            SyncOutcome::Success => None,
            SyncOutcome::Failure { code, .. } => Some(Error::NonZeroExit { code: *code }),
            SyncOutcome::LaunchError { tool, cause } => Some(Error::Launch {
                tool: tool.clone(),
                message: cause.clone(),
            }),
            SyncOutcome::Timeout { after, .. } => Some(Error::Timeout { after: *after }),
        }
    }
}

pub trait SyncRunner {
    /// Syncs one pair with the given flags. Never panics on tool failure;
    /// every problem is reported through the outcome.
    fn sync(&self, pair: &BackupPair, args: &[String]) -> SyncOutcome;

    /// Destination as it may appear in log records.
    fn loggable_destination<'a>(&self, pair: &'a BackupPair) -> Cow<'a, str> {
        Cow::Borrowed(pair.destination())
    }
}

/// Spawns `<tool> [tool_args...] sync <source> <destination> [args...]`.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct ProcessSyncRunner {
    #[builder(into)]
    tool: PathBuf,
    #[builder(default, into)]
    tool_args: Vec<String>,
    timeout: Option<Duration>,
    #[builder(default)]
    redact_credentials: bool,
    logger: Logger,
}

impl SyncRunner for ProcessSyncRunner {
    fn sync(&self, pair: &BackupPair, args: &[String]) -> SyncOutcome {
        self.run_sync(pair.source(), pair.destination(), args)
    }

    fn loggable_destination<'a>(&self, pair: &'a BackupPair) -> Cow<'a, str> {
        self.loggable(pair.destination())
    }
}

impl ProcessSyncRunner {
    pub fn run_sync(&self, source: &Path, destination: &str, args: &[String]) -> SyncOutcome {
        self.logger.in_scope(|| {
            let outcome = self.execute(source, destination, args);
            self.report(source, destination, &outcome);
            outcome
        })
    }

    fn loggable<'a>(&self, arg: &'a str) -> Cow<'a, str> {
        if self.redact_credentials {
            redact_uri_credentials(arg)
        } else {
            Cow::Borrowed(arg)
        }
    }

    fn command_args(&self, source: &Path, destination: &str, args: &[String]) -> Vec<OsString> {
        self.tool_args
            .iter()
            .map(OsString::from)
            .chain([
                OsString::from(SYNC_SUBCOMMAND),
                OsString::from(source),
                OsString::from(destination),
            ])
            .chain(args.iter().map(OsString::from))
            .collect()
    }

    pub fn command_line(&self, source: &Path, destination: &str, args: &[String]) -> String {
        let argv = self.command_args(source, destination, args);
        std::iter::once(self.tool.as_os_str())
            .chain(argv.iter().map(OsString::as_os_str))
            .map(|arg| self.loggable(&arg.to_string_lossy()).into_owned())
            .join(" ")
    }

    fn execute(&self, source: &Path, destination: &str, args: &[String]) -> SyncOutcome {
        info!(
            "Running command: {}",
            self.command_line(source, destination, args)
        );

        let mut child = match Command::new(&self.tool)
            .args(self.command_args(source, destination, args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return SyncOutcome::LaunchError {
                    tool: self.tool.clone(),
                    cause: e.to_string(),
                }
            }
        };
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);

        let (tx, rx) = sync_channel(LINE_CHANNEL_BOUND);
        let readers = [
            child
                .stdout
                .take()
                .map(|out| spawn_reader(OutputStream::Stdout, out, tx.clone())),
            child
                .stderr
                .take()
                .map(|err| spawn_reader(OutputStream::Stderr, err, tx.clone())),
        ];
        drop(tx);

        let mut output = CapturedOutput::default();
        let mut timed_out = false;
        let mut drain_until = deadline;
        let mut pipes_closed = false;
        loop {
            let received = match drain_until {
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                Some(until) => rx.recv_timeout(until.saturating_duration_since(Instant::now())),
            };
            let event = match received {
                Ok(event) => event,
                Err(RecvTimeoutError::Disconnected) => {
                    pipes_closed = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) if timed_out => {
                    warn!(
                        "Output of {:?} still open {:?} after kill, not waiting for it",
                        self.tool, KILL_GRACE
                    );
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.kill(&mut child, "timed out");
                    timed_out = true;
                    drain_until = Some(Instant::now() + KILL_GRACE);
                    continue;
                }
            };
            match event {
                StreamEvent::Line(stream, line) => {
                    debug!("{line}");
                    output.push(stream, line);
                }
                StreamEvent::ReadError(stream, e) => {
                    warn!("Failed reading {stream} of {:?}: {e}", self.tool)
                }
            }
        }

        // readers still blocked on a pipe held by a descendant are left
        // behind; they stop once the pipe closes or the channel is gone
        if pipes_closed {
            for reader in readers.into_iter().flatten() {
                if reader.join().is_err() {
                    warn!("Output reader of {:?} panicked", self.tool);
                }
            }
        }

        if !timed_out {
            match wait_until(&mut child, deadline) {
                Ok(Some(status)) => return classify(status, output),
                Ok(None) => self.kill(&mut child, "timed out"),
                Err(e) => {
                    error!("Failed waiting for {:?}: {e}", self.tool);
                    self.abandon(&mut child, "wait failed");
                    return SyncOutcome::Failure { code: None, output };
                }
            }
        }

        if let Err(e) = child.wait() {
            warn!("Failed reaping killed {:?}: {e}", self.tool);
        }
        SyncOutcome::Timeout {
            after: started.elapsed(),
            output,
        }
    }

    fn kill(&self, child: &mut Child, reason: &str) {
        warn!("Killing {:?} (pid {}): {reason}", self.tool, child.id());
        if let Err(e) = child.kill() {
            warn!("Failed to kill {:?}: {e}", self.tool);
        }
    }

    /// Kills and reaps a child whose outcome can no longer be observed.
    fn abandon(&self, child: &mut Child, reason: &str) {
        self.kill(child, reason);
        if let Err(e) = child.wait() {
            warn!("Failed reaping {:?}: {e}", self.tool);
        }
    }

    fn report(&self, source: &Path, destination: &str, outcome: &SyncOutcome) {
        let source = source.display();
        let destination = self.loggable(destination);
        match outcome {
            SyncOutcome::Success => info!("Sync completed for {source} to {destination}"),
            SyncOutcome::Failure { code, output } => {
                error!(
                    "Error syncing {source} to {destination}: exit status {}",
                    exit_code_text(code)
                );
                error!("stdout: {}", output.stdout_text());
                error!("stderr: {}", output.stderr_text());
            }
            SyncOutcome::LaunchError { tool, cause } => {
                error!("Error syncing {source} to {destination}: failed to launch {tool:?}: {cause}")
            }
            SyncOutcome::Timeout { after, output } => {
                error!(
                    "Error syncing {source} to {destination}: timed out after {:.2} minutes",
                    after.as_secs_f64() / 60.0
                );
                error!("stdout: {}", output.stdout_text());
                error!("stderr: {}", output.stderr_text());
            }
        }
    }
}

enum StreamEvent {
    Line(OutputStream, String),
    ReadError(OutputStream, io::Error),
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: OutputStream,
    reader: R,
    tx: SyncSender<StreamEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(StreamEvent::Line(stream, line)).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(StreamEvent::ReadError(stream, e));
                    break;
                }
            }
        }
    })
}

/// `Ok(None)` once `deadline` passes with the child still running.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
    }
}

fn classify(status: ExitStatus, output: CapturedOutput) -> SyncOutcome {
    if status.success() {
        SyncOutcome::Success
    } else {
        SyncOutcome::Failure {
            code: status.code(),
            output,
        }
    }
}
