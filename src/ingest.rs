//! One-shot admin-log discovery ingest.
//!
//! Replaces the original's per-service parser classes
//! (`ApacheLogParser`/`NginxLogParser`/`MySQLLogParser`/`PostgreSQLLogParser`,
//! plus the sudo/package-manager scans) with a dispatch table keyed by
//! log-kind. Invoked explicitly by the host program — not part of the
//! continuous tail loop C3 drives — and deliberately does not invoke the
//! detector (see the Open Question resolution in DESIGN.md).

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::enrich::classify_path;
use crate::error::{LogifyError, Result};
use crate::levels::Level;
use crate::model::LogRecord;
use crate::store::Store;

const TAIL_LINES: usize = 50;

/// Fields a per-kind parser manages to pull out of one raw line. Any field
/// the parser can't find is left `None` and defaulted by the caller.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedFields {
    pub level: Option<Level>,
    pub message: Option<String>,
}

type ParseFn = fn(&str) -> Option<ParsedFields>;

static APACHE_ACCESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) (\S+)"#).unwrap());
static APACHE_ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[[^\]]+\] \[(\w+)\] (.+)$").unwrap());
static NGINX_ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2} \[(\w+)\] (.+)$").unwrap());
static MYSQL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+\s+\d+\s+\[(\w+)\]\s+(.+)$").unwrap());
static POSTGRES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+ \S+ \S+) \[\d+\] (\w+):\s+(.+)$").unwrap());
static SUDO_COMMAND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"COMMAND=(.+)$").unwrap());
static PACKAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(install|remove|upgrade|purge)\b").unwrap());

fn parse_apache_access(line: &str) -> Option<ParsedFields> {
    let caps = APACHE_ACCESS_RE.captures(line)?;
    Some(ParsedFields {
        level: Some(Level::Info),
        message: Some(format!("{} {} {}", &caps[1], &caps[3], &caps[4])),
    })
}

fn parse_apache_error(line: &str) -> Option<ParsedFields> {
    let caps = APACHE_ERROR_RE.captures(line)?;
    Some(ParsedFields {
        level: Some(Level::infer(&caps[1])),
        message: Some(caps[2].to_string()),
    })
}

fn parse_nginx_error(line: &str) -> Option<ParsedFields> {
    let caps = NGINX_ERROR_RE.captures(line)?;
    Some(ParsedFields {
        level: Some(Level::infer(&caps[1])),
        message: Some(caps[2].to_string()),
    })
}

fn parse_mysql(line: &str) -> Option<ParsedFields> {
    if let Some(caps) = MYSQL_RE.captures(line) {
        return Some(ParsedFields {
            level: Some(Level::infer(&caps[1])),
            message: Some(caps[2].to_string()),
        });
    }
    Some(ParsedFields {
        level: Some(Level::infer(line)),
        message: Some(line.to_string()),
    })
}

fn parse_postgres(line: &str) -> Option<ParsedFields> {
    let caps = POSTGRES_RE.captures(line)?;
    Some(ParsedFields {
        level: Some(Level::infer(&caps[2])),
        message: Some(caps[3].to_string()),
    })
}

fn parse_sudo(line: &str) -> Option<ParsedFields> {
    if !line.contains("sudo") {
        return None;
    }
    let caps = SUDO_COMMAND_RE.captures(line)?;
    Some(ParsedFields {
        level: Some(Level::Info),
        message: Some(format!("sudo command: {}", &caps[1])),
    })
}

fn parse_package_change(line: &str) -> Option<ParsedFields> {
    if !PACKAGE_RE.is_match(line) {
        return None;
    }
    Some(ParsedFields {
        level: Some(Level::Info),
        message: Some(line.to_string()),
    })
}

/// `(log kind, parse function)` dispatch table, checked against a path's
/// well-known prefixes by [`discover_and_ingest`].
const PARSERS: &[(&str, ParseFn)] = &[
    ("apache-access", parse_apache_access),
    ("apache-error", parse_apache_error),
    ("nginx-error", parse_nginx_error),
    ("mysql", parse_mysql),
    ("postgres", parse_postgres),
    ("sudo", parse_sudo),
    ("package", parse_package_change),
];

const WELL_KNOWN_PATHS: &[(&str, &str)] = &[
    ("/var/log/apache2/access.log", "apache-access"),
    ("/var/log/apache2/error.log", "apache-error"),
    ("/var/log/httpd/access_log", "apache-access"),
    ("/var/log/httpd/error_log", "apache-error"),
    ("/var/log/nginx/error.log", "nginx-error"),
    ("/var/log/mysql/error.log", "mysql"),
    ("/var/log/mysqld.log", "mysql"),
    ("/var/log/sudo.log", "sudo"),
    ("/var/log/auth.log", "sudo"),
    ("/var/log/secure", "sudo"),
    ("/var/log/dpkg.log", "package"),
    ("/var/log/apt/history.log", "package"),
    ("/var/log/yum.log", "package"),
];

fn lookup_parser(kind: &str) -> Option<ParseFn> {
    PARSERS.iter().find(|(k, _)| *k == kind).map(|(_, f)| *f)
}

fn tail_lines(path: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].to_vec())
}

/// Scan the well-known admin-log paths that exist on disk, parse up to
/// [`TAIL_LINES`] trailing lines each with the matching parser, and insert
/// them directly into the store — tagged via [`classify_path`], same as any
/// tailed line, but **without** running them through the detector.
pub fn discover_and_ingest(store: &Store) -> Result<usize> {
    // Postgres logs are glob-named (`postgresql-*.log`); handle separately.
    let mut total = 0usize;
    for (path_str, kind) in WELL_KNOWN_PATHS {
        let path = Path::new(path_str);
        if !path.is_file() {
            continue;
        }
        total += ingest_one(store, path, kind)?;
    }
    total += ingest_postgres_glob(store)?;
    Ok(total)
}

fn ingest_one(store: &Store, path: &Path, kind: &str) -> Result<usize> {
    let parser = match lookup_parser(kind) {
        Some(p) => p,
        None => return Ok(0),
    };
    let lines = tail_lines(path, TAIL_LINES).map_err(|e| LogifyError::Storage {
        detail: format!("reading {}: {e}", path.display()),
    })?;

    let (category, subcategory, privacy) = classify_path(&path.to_string_lossy());
    let mut inserted = 0;
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = parser(&line).unwrap_or_default();
        let record = LogRecord {
            id: None,
            source: path.to_string_lossy().to_string(),
            timestamp: now_secs(),
            level: fields.level.unwrap_or(Level::Info),
            message: fields.message.unwrap_or(line),
            category,
            subcategory: subcategory.to_string(),
            privacy,
            source_ip: None,
            dest_ip: None,
            event_id: None,
            synced: false,
            meta: serde_json::Value::Null,
        };
        store.insert(&record)?;
        inserted += 1;
    }
    Ok(inserted)
}

fn ingest_postgres_glob(store: &Store) -> Result<usize> {
    let dir = Path::new("/var/log/postgresql");
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut total = 0;
    let entries = fs::read_dir(dir).map_err(|e| LogifyError::Storage {
        detail: format!("reading {}: {e}", dir.display()),
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with("postgresql-") && name.ends_with(".log") {
            total += ingest_one(store, &path, "postgres")?;
        }
    }
    Ok(total)
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apache_error_line() {
        let line = "[Mon Jan 01 00:00:00 2024] [error] client denied by server config";
        let fields = parse_apache_error(line).unwrap();
        assert_eq!(fields.level, Some(Level::Error));
        assert_eq!(fields.message.as_deref(), Some("client denied by server config"));
    }

    #[test]
    fn parses_nginx_error_line() {
        let line = "2024/01/01 00:00:00 [error] 123#0: connect() failed";
        let fields = parse_nginx_error(line).unwrap();
        assert_eq!(fields.level, Some(Level::Error));
    }

    #[test]
    fn parses_sudo_command() {
        let line = "Jan 01 00:00:00 host sudo: alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/usr/bin/apt update";
        let fields = parse_sudo(line).unwrap();
        assert!(fields.message.unwrap().contains("/usr/bin/apt update"));
    }

    #[test]
    fn non_matching_line_returns_none_for_sudo() {
        assert!(parse_sudo("just a regular line").is_none());
    }

    #[test]
    fn detects_package_change_keyword() {
        let fields = parse_package_change("2024-01-01 00:00:00 install vim:amd64 8.2").unwrap();
        assert!(fields.message.unwrap().contains("install"));
    }

    #[test]
    fn lookup_parser_finds_registered_kind() {
        assert!(lookup_parser("mysql").is_some());
        assert!(lookup_parser("unknown-kind").is_none());
    }

    #[test]
    fn discover_and_ingest_on_empty_filesystem_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("server.db")).unwrap();
        // None of WELL_KNOWN_PATHS exist inside a fresh tempdir-based
        // sandbox check, but the real paths are absolute `/var/log/...`
        // and may exist on the host running this test; only assert the
        // call itself does not error.
        let result = discover_and_ingest(&store);
        assert!(result.is_ok());
    }
}
