//! Size-based rotating file sink.
//!
//! `backup.log` is the active file. On rollover it becomes `backup.log.1`,
//! `backup.log.1` becomes `backup.log.2` and so on, up to `backup_count`
//! rotated files. The active file is opened lazily on the first write.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Debug)]
pub struct RotatingFileAppender {
    inner: Arc<Mutex<RotatingState>>,
}

#[derive(Debug)]
struct RotatingState {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: Option<File>,
    len: u64,
}

impl RotatingFileAppender {
    /// `max_bytes == 0` never rotates.
    pub fn new<P: Into<PathBuf>>(path: P, max_bytes: u64, backup_count: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RotatingState {
                path: path.into(),
                max_bytes,
                backup_count,
                file: None,
                len: 0,
            })),
        }
    }

    pub fn path(&self) -> io::Result<PathBuf> {
        Ok(self.lock()?.path.clone())
    }

    /// Writes one whole record, rotating first when it would overflow the active file.
    pub fn append(&self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.lock()?;
        state.ensure_open()?;
        if state.should_rollover(buf.len() as u64) {
            state.rollover()?;
        }
        let file = state.ensure_open()?;
        file.write_all(buf)?;
        state.len += buf.len() as u64;
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        match self.lock()?.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, RotatingState>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))
    }
}

impl RotatingState {
    fn ensure_open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.len = file.metadata()?.len();
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }

    fn should_rollover(&self, incoming: u64) -> bool {
        self.max_bytes > 0 && self.len > 0 && self.len + incoming > self.max_bytes
    }

    fn rollover(&mut self) -> io::Result<()> {
        if let Some(mut f) = self.file.take() {
            f.flush()?;
        }

        if self.backup_count == 0 {
            File::create(&self.path)?;
        } else {
            for i in (1..self.backup_count).rev() {
                let src = rotated_path(&self.path, i);
                if src.exists() {
                    let dst = rotated_path(&self.path, i + 1);
                    remove_if_exists(&dst)?;
                    std::fs::rename(&src, &dst)?;
                }
            }
            let first = rotated_path(&self.path, 1);
            remove_if_exists(&first)?;
            if self.path.exists() {
                std::fs::rename(&self.path, &first)?;
            }
        }

        self.len = 0;
        Ok(())
    }
}

pub fn rotated_path<P: AsRef<Path>>(path: P, index: usize) -> PathBuf {
    let mut name = OsString::from(path.as_ref().as_os_str());
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

pub struct RotatingFileWriter<'a> {
    appender: &'a RotatingFileAppender,
}

impl Write for RotatingFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.appender.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.appender.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileAppender {
    type Writer = RotatingFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileWriter { appender: self }
    }
}
