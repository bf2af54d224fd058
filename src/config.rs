//! Agent configuration (C10): on-disk JSON shape plus environment overrides.
//!
//! Loaded once at startup. `LOGIFY_HOME` and `LOGIFY_DB_PATH`, when set,
//! take precedence over both the file and the built-in defaults.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LogifyError, Result};

const CONFIG_DIR_NAME: &str = ".logify";
const CONFIG_FILE_NAME: &str = "config.json";
const DB_DIR_NAME: &str = "Logs_DB";
const DB_FILE_NAME: &str = "server.db";

/// Persisted agent configuration. Serializes to the `~/.logify/config.json`
/// shape; unknown fields on disk are ignored rather than rejected, and
/// missing fields fall back to `Default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the remote aggregator (`insforge_url` in the on-disk
    /// JSON). `None` until the user configures sync; absence means the
    /// sync cycle (C8) is skipped, not an error.
    #[serde(rename = "insforge_url")]
    pub server_url: Option<String>,
    /// Account-level credential identifying this host's sync session.
    /// Gates whether a sync cycle is attempted at all (together with
    /// `server_id`) — distinct from `anon_key`, which is the credential
    /// actually presented as the upload's bearer token.
    pub connection_key: Option<String>,
    /// Identifier of this host as registered with the aggregator.
    pub server_id: Option<String>,
    /// Identifier of the account/user this host is registered under.
    /// Round-tripped only; no pipeline code path branches on it.
    pub user_id: Option<String>,
    /// Anonymous/public API key presented as the upload's bearer token.
    pub anon_key: Option<String>,
    /// Optional AI-assist API key (`gemini_api_key` in the on-disk JSON).
    /// Round-tripped only — no code path in this crate reads or acts on
    /// it; it exists so a cooperating frontend can store it alongside the
    /// rest of the config.
    #[serde(rename = "gemini_api_key")]
    pub ai_key: Option<String>,
    /// Last successful sync cycle completion, Unix seconds.
    pub last_sync: Option<f64>,
    /// Override for the embedded store's file path. When absent, resolved
    /// relative to `project_root`.
    pub db_path: Option<PathBuf>,
    /// Root directory under which `Logs_DB/server.db` is resolved when
    /// `db_path` is not set explicitly.
    pub project_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_url: None,
            connection_key: None,
            server_id: None,
            user_id: None,
            anon_key: None,
            ai_key: None,
            last_sync: None,
            db_path: None,
            project_root: None,
        }
    }
}

impl Config {
    /// `~/.logify`, or `$LOGIFY_HOME` if set. Holds `config.json` and the
    /// activity log; never holds the database (see [`Config::db_path_resolved`]).
    pub fn home_dir() -> PathBuf {
        if let Ok(home) = env::var("LOGIFY_HOME") {
            return PathBuf::from(home);
        }
        dirs_home().join(CONFIG_DIR_NAME)
    }

    pub fn config_file_path() -> PathBuf {
        Self::home_dir().join(CONFIG_FILE_NAME)
    }

    /// Load configuration from disk, falling back to defaults if the file
    /// is absent. A present-but-unparseable file is a [`LogifyError::Storage`].
    pub fn load() -> Result<Config> {
        let path = Self::config_file_path();
        let mut cfg = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| LogifyError::Storage {
                detail: format!("parsing {}: {e}", path.display()),
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                return Err(LogifyError::Storage {
                    detail: format!("reading {}: {e}", path.display()),
                })
            }
        };
        if let Ok(db) = env::var("LOGIFY_DB_PATH") {
            cfg.db_path = Some(PathBuf::from(db));
        }
        Ok(cfg)
    }

    /// Write the config back to `~/.logify/config.json`, atomically: write
    /// to a sibling temp file then rename over the target so a crash never
    /// leaves a half-written file in place.
    pub fn save(&self) -> Result<()> {
        let dir = Self::home_dir();
        fs::create_dir_all(&dir).map_err(|e| LogifyError::Storage {
            detail: format!("creating {}: {e}", dir.display()),
        })?;
        let path = Self::config_file_path();
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(self).map_err(|e| LogifyError::Storage {
            detail: format!("serializing config: {e}"),
        })?;
        fs::write(&tmp_path, body).map_err(|e| LogifyError::Storage {
            detail: format!("writing {}: {e}", tmp_path.display()),
        })?;
        fs::rename(&tmp_path, &path).map_err(|e| LogifyError::Storage {
            detail: format!("renaming {} to {}: {e}", tmp_path.display(), path.display()),
        })?;
        Ok(())
    }

    /// Resolve the canonical embedded-store path: `db_path` if set
    /// explicitly (or via `LOGIFY_DB_PATH`), otherwise
    /// `<project_root>/Logs_DB/server.db` with `project_root` defaulting to
    /// the current working directory.
    pub fn db_path_resolved(&self) -> PathBuf {
        if let Some(p) = &self.db_path {
            return p.clone();
        }
        let root = self
            .project_root
            .clone()
            .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        root.join(DB_DIR_NAME).join(DB_FILE_NAME)
    }

    /// Gate for the sync cycle: "config has a `server_id` and a
    /// `connection_key`" per the uploader's contract. A missing aggregator
    /// URL also skips the cycle — there is nowhere to POST to — but is not
    /// itself part of the spec's stated gate condition.
    pub fn is_sync_configured(&self) -> bool {
        self.server_id.is_some() && self.connection_key.is_some() && self.server_url.is_some()
    }

    /// Read-modify-write update helper, matching the get/set/update/clear
    /// shape this config has always had: load, mutate, save.
    pub fn update(mutate: impl FnOnce(&mut Config)) -> Result<Config> {
        let mut cfg = Config::load()?;
        mutate(&mut cfg);
        cfg.save()?;
        Ok(cfg)
    }

    pub fn clear() -> Result<()> {
        let path = Self::config_file_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LogifyError::Storage {
                detail: format!("removing {}: {e}", path.display()),
            }),
        }
    }
}

fn dirs_home() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("/root").to_path_buf())
}
