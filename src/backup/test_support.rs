//! Helpers shared by unit tests.

use crate::backup::logging::{initialize_logging, LogLevel, Logger, LoggingConfig};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// In-memory console sink.
#[derive(Clone, Default)]
pub struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

impl CapturedWriter {
    pub fn make_writer(&self) -> BoxMakeWriter {
        let this = self.clone();
        BoxMakeWriter::new(move || this.clone())
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Debug level logger writing `backup.log` into `dir`, console off.
pub fn file_logger(dir: &TempDir) -> Logger {
    let config = LoggingConfig::builder()
        .file(dir.path().join("backup.log"))
        .level(LogLevel::Debug)
        .console(false)
        .build();
    initialize_logging(&config).unwrap()
}

/// Lines of the active log file, empty when it was never created.
pub fn read_log(logger: &Logger) -> Vec<String> {
    let path = logger.file_path().unwrap();
    match std::fs::read_to_string(path) {
        Ok(s) => s.lines().map(str::to_string).collect(),
        Err(_) => vec![],
    }
}

/// Writes a `sh` script standing in for the sync tool. Run it as
/// `sh <script> sync <source> <destination> ...` so nothing is exec'd
/// straight from a freshly written file.
#[cfg(unix)]
pub fn fake_tool<P: AsRef<Path>>(dir: P, body: &str) -> PathBuf {
    let path = dir.as_ref().join("fake-sync-tool.sh");
    std::fs::write(&path, format!("{body}\n")).unwrap();
    path
}
