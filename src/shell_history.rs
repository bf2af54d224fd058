//! Shell-history watcher (C6): per-user polling of history files across
//! shells, sensitive-text redaction, and hand-off to the detector's
//! shell-specific ruleset.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

const HISTORY_FILE_NAMES: &[&str] = &[
    ".bash_history",
    ".zsh_history",
    ".zhistory",
    ".local/share/fish/fish_history",
    ".sh_history",
    ".ksh_history",
    ".csh_history",
    ".tcsh_history",
    ".history",
];

/// Glob-like snap sandbox variant: `<home>/snap/*/current/.bash_history`
/// etc. Enumerated separately since it nests under a wildcard directory.
const SNAP_SUBDIR: &str = "snap";

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"password\s*=",
        r"passwd\s+",
        r"api[_-]?key",
        r"token\s*=",
        r"secret\s*=",
        r"export\s+.*key",
        r"curl.*-h.*authorization",
        r"--password",
        r"-p\s+\S+",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern must compile"))
    .collect()
});

const REDACTED_PLACEHOLDER: &str = "[FILTERED: Contains sensitive data]";

/// Replace a command wholesale with the redaction placeholder if it matches
/// any sensitive-text pattern; otherwise return it unchanged.
pub fn sanitize_command(command: &str) -> String {
    if SENSITIVE_PATTERNS.iter().any(|re| re.is_match(command)) {
        REDACTED_PLACEHOLDER.to_string()
    } else {
        command.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
    Other,
}

fn shell_kind_for(path: &Path) -> ShellKind {
    let s = path.to_string_lossy();
    if s.ends_with(".zsh_history") || s.ends_with(".zhistory") {
        ShellKind::Zsh
    } else if s.ends_with("fish_history") {
        ShellKind::Fish
    } else if s.ends_with(".bash_history") {
        ShellKind::Bash
    } else {
        ShellKind::Other
    }
}

/// Parse raw, newly-read bytes from a history file into individual
/// commands, per the shell's on-disk format. `leftover` carries any
/// incomplete trailing fish record across polls; on return it holds the
/// new leftover (empty for bash/zsh, which are always complete per line).
pub fn parse_commands(kind: ShellKind, text: &str) -> Vec<String> {
    match kind {
        ShellKind::Zsh => parse_zsh(text),
        ShellKind::Fish => parse_fish(text),
        ShellKind::Bash | ShellKind::Other => parse_plain(text),
    }
}

fn parse_plain(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn parse_zsh(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            if let Some(rest) = line.strip_prefix(':') {
                rest.split_once(';').map(|(_, cmd)| cmd.trim().to_string())
            } else {
                Some(line.to_string())
            }
        })
        .filter(|c| !c.is_empty())
        .collect()
}

/// Fish's YAML-like stream: `- cmd: <cmd>` opens a record, the following
/// `  when: <epoch>` line closes it. A record with no following `when:`
/// line is incomplete and dropped (left for the next poll to re-read, since
/// the watcher tracks a byte offset rather than a record offset).
fn parse_fish(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut pending: Option<String> = None;
    for line in text.lines() {
        if let Some(cmd) = line.trim_start().strip_prefix("- cmd:") {
            pending = Some(cmd.trim().to_string());
        } else if line.trim_start().starts_with("when:") {
            if let Some(cmd) = pending.take() {
                commands.push(cmd);
            }
        }
    }
    commands
}

/// Derive the owning user from a history file path: the first path segment
/// after the home root, or `"root"` for `/root/...`.
pub fn user_for_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.starts_with("/root/") {
        return "root".to_string();
    }
    if let Some(rest) = s.strip_prefix("/home/") {
        if let Some((user, _)) = rest.split_once('/') {
            return user.to_string();
        }
    }
    "unknown".to_string()
}

/// Discover history files under one user's home directory.
pub fn history_files_for_home(home: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for name in HISTORY_FILE_NAMES {
        let candidate = home.join(name);
        if candidate.is_file() {
            found.push(candidate);
        }
    }
    let snap_dir = home.join(SNAP_SUBDIR);
    if let Ok(entries) = fs::read_dir(&snap_dir) {
        for entry in entries.flatten() {
            let current = entry.path().join("current");
            if !current.is_dir() {
                continue;
            }
            for name in HISTORY_FILE_NAMES {
                let candidate = current.join(name);
                if candidate.is_file() {
                    found.push(candidate);
                }
            }
        }
    }
    found
}

/// Enumerate candidate home directories: the system user database via the
/// `users` crate, falling back to a `/home/*` directory scan plus `/root`
/// for accounts the database lookup misses or when it is unavailable.
pub fn discover_homes() -> Vec<PathBuf> {
    let mut homes: HashMap<PathBuf, ()> = HashMap::new();

    for user in unsafe { users::all_users() } {
        let home = user.home_dir();
        if home.is_dir() {
            homes.insert(home.to_path_buf(), ());
        }
    }

    if let Ok(entries) = fs::read_dir("/home") {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                homes.insert(path, ());
            }
        }
    }
    if Path::new("/root").is_dir() {
        homes.insert(PathBuf::from("/root"), ());
    }

    homes.into_keys().collect()
}

pub fn classify_shell(path: &Path) -> ShellKind {
    shell_kind_for(path)
}
