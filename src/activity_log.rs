//! Agent activity log (C9): the agent's own operational trail, distinct
//! from the log *records* it ingests from the host.
//!
//! A rolling, size-capped writer in the same "custom [`Write`] impl behind a
//! `Mutex`, tracking `current_size`" shape the rest of this crate's file
//! backends use, but with logrotate-style numbered backups (`.1`..`.3`,
//! newest is `.1`) rather than date-stamped rotation — the two rotation
//! shapes solve different problems and are kept as separate writer types.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;

use crate::error::{LogifyError, Result};

pub const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;
pub const BACKUP_COUNT: usize = 3;

pub const COMPONENT_LOGIFY: &str = "LOGIFY";
pub const COMPONENT_SYNC: &str = "SYNC";
pub const COMPONENT_WATCHER: &str = "WATCHER";
pub const COMPONENT_SHELL_HIST: &str = "SHELL-HIST";
pub const COMPONENT_DETECTOR: &str = "DETECTOR";

/// A writer that appends formatted lines to a capped file, shifting
/// `name.N` -> `name.N+1` (dropping anything past [`BACKUP_COUNT`]) and
/// starting a fresh file once the cap is hit.
struct RotatingWriter {
    path: PathBuf,
    file: File,
    current_size: u64,
}

impl RotatingWriter {
    fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_size = file.metadata()?.len();
        Ok(RotatingWriter {
            path: path.to_path_buf(),
            file,
            current_size,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        for i in (1..BACKUP_COUNT).rev() {
            let src = Self::numbered(&self.path, i);
            let dst = Self::numbered(&self.path, i + 1);
            if src.exists() {
                fs::rename(&src, &dst)?;
            }
        }
        let first_backup = Self::numbered(&self.path, 1);
        if self.path.exists() {
            fs::rename(&self.path, &first_backup)?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.current_size = 0;
        Ok(())
    }

    fn numbered(base: &Path, n: usize) -> PathBuf {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > MAX_LOG_BYTES {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Severity recorded alongside each activity-log line. Distinct from
/// [`crate::levels::Level`]: this is the agent's own operational logging,
/// not an inferred level from a tailed host line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// The agent's activity logger: one rotating file, guarded by a mutex so
/// every long-lived task can log through the same handle.
pub struct ActivityLog {
    writer: Arc<Mutex<RotatingWriter>>,
}

impl ActivityLog {
    pub fn open(path: &Path) -> Result<Self> {
        let writer = RotatingWriter::open(path).map_err(|e| LogifyError::Storage {
            detail: format!("opening activity log {}: {e}", path.display()),
        })?;
        Ok(ActivityLog {
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// `{ts} [{level:<8}] [{component}] {message}`, `ts` formatted
    /// `%Y-%m-%d %H:%M:%S`.
    fn write_line(&self, level: LogLevel, component: &str, message: &str) {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{ts} [{:<8}] [{component}] {message}\n", level.as_str());
        let mut guard = self.writer.lock();
        let _ = guard.write_all(line.as_bytes());
        let _ = guard.flush();
    }

    pub fn debug(&self, component: &str, message: &str) {
        self.write_line(LogLevel::Debug, component, message);
    }

    pub fn info(&self, component: &str, message: &str) {
        self.write_line(LogLevel::Info, component, message);
    }

    pub fn warning(&self, component: &str, message: &str) {
        self.write_line(LogLevel::Warning, component, message);
    }

    pub fn error(&self, component: &str, message: &str) {
        self.write_line(LogLevel::Error, component, message);
    }

    /// Always WARNING, always prefixed, regardless of the threat's own
    /// severity — the activity log's threat lines are meant to stand out
    /// in a plain-text tail, not to encode severity themselves.
    pub fn threat(&self, component: &str, message: &str) {
        self.write_line(LogLevel::Warning, component, &format!("\u{1f6a8} THREAT: {message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_formatted_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let log = ActivityLog::open(&path).unwrap();
        log.info(COMPONENT_WATCHER, "started tailing /var/log/auth.log");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[INFO    ] [WATCHER] started tailing /var/log/auth.log"));
    }

    #[test]
    fn threat_is_always_warning_with_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let log = ActivityLog::open(&path).unwrap();
        log.threat(COMPONENT_DETECTOR, "Reverse Shell detected");
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[WARNING "));
        assert!(contents.contains("THREAT: Reverse Shell detected"));
    }

    #[test]
    fn rotates_into_numbered_backups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let log = ActivityLog::open(&path).unwrap();
        let chunk = "x".repeat(1024);
        // Force several rotations.
        for _ in 0..(MAX_LOG_BYTES / 1024 + 10) {
            log.info(COMPONENT_LOGIFY, &chunk);
        }
        assert!(path.exists());
        assert!(dir.path().join("activity.log.1").exists());
    }

    #[test]
    fn backup_count_is_capped_at_three() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("activity.log");
        let log = ActivityLog::open(&path).unwrap();
        let chunk = "x".repeat(1024);
        // Force enough rotations that a 4th backup would exist if uncapped.
        for _ in 0..((MAX_LOG_BYTES / 1024 + 1) * 5) {
            log.info(COMPONENT_LOGIFY, &chunk);
        }
        assert!(!dir.path().join("activity.log.4").exists());
    }
}
