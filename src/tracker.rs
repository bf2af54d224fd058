//! File tracker (C3): per-file open handle, inode, and byte offset, with
//! rotation/truncation detection.
//!
//! Grounded in the inode/size-comparison algorithm a Python-side
//! `SmartLogHandler` used for interactive tailing; the keyboard/foreground
//! switching that lived alongside it belonged to that tool's CLI surface
//! and has no counterpart here.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::LogifyError;

/// Optional inotify-backed early wake-up for a tier worker (feature
/// `inotify`). Polling on the tier's cadence is the required floor — this
/// only shortens the wait when the kernel already knows a watched path
/// changed. Best-effort: a watch that fails to install (missing path, out
/// of inotify instances) just means that one file falls back to the
/// cadence alone.
#[cfg(feature = "inotify")]
pub struct ChangeWatcher {
    _watcher: notify::RecommendedWatcher,
    pub changes: crossbeam_channel::Receiver<()>,
}

#[cfg(feature = "inotify")]
pub fn watch_paths(paths: &[PathBuf]) -> Option<ChangeWatcher> {
    use notify::{RecursiveMode, Watcher};

    let (tx, rx) = crossbeam_channel::bounded(paths.len().max(1));
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = tx.try_send(());
        }
    })
    .ok()?;

    let mut any = false;
    for path in paths {
        if watcher.watch(path, RecursiveMode::NonRecursive).is_ok() {
            any = true;
        }
    }
    if !any {
        return None;
    }
    Some(ChangeWatcher { _watcher: watcher, changes: rx })
}

/// Per-file tracking state. `file` is `None` when the path could not be
/// opened (permission denied) or does not currently exist; the path stays
/// tracked regardless.
pub struct FileState {
    pub path: PathBuf,
    file: Option<File>,
    inode: Option<u64>,
    offset: u64,
    permission_denied_logged: bool,
}

/// Result of polling one tracked file once.
pub struct PollResult {
    /// Complete, non-empty, trimmed lines read this wake, in file order.
    pub lines: Vec<String>,
    /// Set when this poll observed a rotation (new inode).
    pub rotated: bool,
    /// Set once, the first time a path could not be opened.
    pub newly_denied: Option<LogifyError>,
}

impl FileState {
    /// Begin tracking `path`. Seeks to EOF if the file currently exists and
    /// opens successfully, so the agent only sees lines written from this
    /// point forward — the one exception (reading from offset 0) happens
    /// later, automatically, the first time a rotation is detected.
    pub fn start(path: &Path) -> FileState {
        let mut state = FileState {
            path: path.to_path_buf(),
            file: None,
            inode: None,
            offset: 0,
            permission_denied_logged: false,
        };
        if let Ok(metadata) = std::fs::metadata(path) {
            if let Ok(file) = File::open(path) {
                state.inode = Some(metadata.ino());
                state.offset = metadata.len();
                state.file = Some(file);
            }
        }
        state
    }

    /// Poll once: detect rotation/truncation, read any new complete lines,
    /// advance the offset.
    pub fn poll(&mut self) -> PollResult {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(_) => {
                return PollResult {
                    lines: Vec::new(),
                    rotated: false,
                    newly_denied: None,
                }
            }
        };

        let mut rotated = false;
        let mut newly_denied = None;

        let current_ino = metadata.ino();
        if self.inode != Some(current_ino) {
            rotated = self.inode.is_some();
            match File::open(&self.path) {
                Ok(file) => {
                    self.file = Some(file);
                    self.inode = Some(current_ino);
                    self.offset = 0;
                    self.permission_denied_logged = false;
                }
                Err(_) => {
                    self.file = None;
                    if !self.permission_denied_logged {
                        newly_denied = Some(LogifyError::PermissionDenied {
                            path: self.path.clone(),
                        });
                        self.permission_denied_logged = true;
                    }
                    return PollResult {
                        lines: Vec::new(),
                        rotated,
                        newly_denied,
                    };
                }
            }
        }

        if metadata.len() < self.offset {
            self.offset = 0;
        }

        let Some(file) = self.file.as_mut() else {
            return PollResult {
                lines: Vec::new(),
                rotated,
                newly_denied,
            };
        };

        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return PollResult {
                lines: Vec::new(),
                rotated,
                newly_denied,
            };
        }

        let mut buf = Vec::new();
        let read = match file.by_ref().take(u64::MAX).read_to_end(&mut buf) {
            Ok(n) => n,
            Err(_) => 0,
        };
        self.offset += read as u64;

        let lines = buf
            .split(|&b| b == b'\n')
            .filter_map(|chunk| {
                let text = String::from_utf8_lossy(chunk);
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect();

        PollResult {
            lines,
            rotated,
            newly_denied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn starts_at_eof_and_reads_only_new_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old line\n").unwrap();

        let mut tracker = FileState::start(&path);

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "new line").unwrap();

        let result = tracker.poll();
        assert_eq!(result.lines, vec!["new line".to_string()]);
        assert!(!result.rotated);
    }

    #[test]
    fn detects_rotation_via_inode_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first\n").unwrap();
        let mut tracker = FileState::start(&path);

        // Rotate: remove and recreate (new inode on most filesystems).
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, "after rotation\n").unwrap();

        let result = tracker.poll();
        assert!(result.rotated);
        assert_eq!(result.lines, vec!["after rotation".to_string()]);
    }

    #[test]
    fn detects_truncation_via_size_shrink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();
        let mut tracker = FileState::start(&path);

        std::fs::write(&path, "x\n").unwrap();

        let result = tracker.poll();
        assert_eq!(result.lines, vec!["x".to_string()]);
    }

    #[test]
    fn missing_file_yields_no_lines_and_no_panic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.log");
        let mut tracker = FileState::start(&path);
        let result = tracker.poll();
        assert!(result.lines.is_empty());
        assert!(!result.rotated);
        assert!(result.newly_denied.is_none());
    }

    #[test]
    fn blank_lines_are_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();
        let mut tracker = FileState::start(&path);

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "one").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "  ").unwrap();
        writeln!(f, "two").unwrap();

        let result = tracker.poll();
        assert_eq!(result.lines, vec!["one".to_string(), "two".to_string()]);
    }
}
