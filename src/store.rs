//! Log store (C7): embedded record store with self-migrating schema and an
//! unsynced queue.
//!
//! `rusqlite::Connection` behind `Arc<Mutex<Connection>>`, the shape used by
//! an async-trait-based `SqliteAdapter` elsewhere in the example pack,
//! adapted here to a plain synchronous API matching this crate's
//! thread-based concurrency model.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{LogifyError, Result};
use crate::levels::Level;
use crate::model::{Category, LogRecord, Privacy};

/// Maximum number of ids per `UPDATE ... WHERE id IN (...)` statement in
/// [`Store::mark_synced`]. SQLite's default compiled-in expression-tree
/// limit sits just under 1000 terms; 900 keeps comfortable headroom.
const MARK_SYNCED_CHUNK: usize = 900;

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &std::path::Path) -> Result<Store> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LogifyError::Storage {
                detail: format!("creating {}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(path).map_err(|e| LogifyError::Storage {
            detail: format!("opening {}: {e}", path.display()),
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| LogifyError::Storage {
                detail: format!("setting WAL mode: {e}"),
            })?;
        let store = Store {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                timestamp REAL NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL
            );",
        )
        .map_err(|e| LogifyError::Storage {
            detail: format!("creating records table: {e}"),
        })?;

        let existing: Vec<String> = conn
            .prepare("PRAGMA table_info(records)")
            .and_then(|mut stmt| {
                stmt.query_map([], |row| row.get::<_, String>(1))?
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|e| LogifyError::Storage {
                detail: format!("reading table_info: {e}"),
            })?;

        let wanted: &[(&str, &str)] = &[
            ("synced", "INTEGER NOT NULL DEFAULT 0"),
            ("server_id", "TEXT"),
            ("category", "TEXT NOT NULL DEFAULT 'System'"),
            ("subcategory", "TEXT"),
            ("privacy", "TEXT NOT NULL DEFAULT 'public'"),
            ("source_ip", "TEXT"),
            ("dest_ip", "TEXT"),
            ("event_id", "TEXT"),
        ];
        for (name, ddl) in wanted {
            if !existing.iter().any(|c| c == name) {
                conn.execute_batch(&format!("ALTER TABLE records ADD COLUMN {name} {ddl};"))
                    .map_err(|e| LogifyError::Storage {
                        detail: format!("adding column {name}: {e}"),
                    })?;
            }
        }

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_records_category ON records(category);
             CREATE INDEX IF NOT EXISTS idx_records_subcategory ON records(subcategory);
             CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records(timestamp);",
        )
        .map_err(|e| LogifyError::Storage {
            detail: format!("creating indexes: {e}"),
        })?;

        Ok(())
    }

    pub fn insert(&self, record: &LogRecord) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO records (
                source, timestamp, level, message, synced, category,
                subcategory, privacy, source_ip, dest_ip, event_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.source,
                record.timestamp,
                record.level.as_str(),
                record.message,
                record.synced as i64,
                record.category.as_str(),
                record.subcategory,
                record.privacy.as_str(),
                record.source_ip,
                record.dest_ip,
                record.event_id,
            ],
        )
        .map_err(|e| LogifyError::Storage {
            detail: format!("inserting record: {e}"),
        })?;
        Ok(conn.last_insert_rowid())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<LogRecord> {
        let level_str: String = row.get("level")?;
        let category_str: String = row.get("category")?;
        let privacy_str: String = row.get("privacy")?;
        Ok(LogRecord {
            id: Some(row.get("id")?),
            source: row.get("source")?,
            timestamp: row.get("timestamp")?,
            level: parse_level(&level_str),
            message: row.get("message")?,
            category: parse_category(&category_str),
            subcategory: row.get::<_, Option<String>>("subcategory")?.unwrap_or_default(),
            privacy: parse_privacy(&privacy_str),
            source_ip: row.get("source_ip")?,
            dest_ip: row.get("dest_ip")?,
            event_id: row.get("event_id")?,
            synced: row.get::<_, i64>("synced")? != 0,
            meta: serde_json::Value::Null,
        })
    }

    pub fn query_unsynced(&self, limit: Option<usize>) -> Result<Vec<LogRecord>> {
        let conn = self.conn.lock();
        let sql = match limit {
            Some(n) => format!(
                "SELECT * FROM records WHERE synced = 0 ORDER BY timestamp ASC LIMIT {n}"
            ),
            None => "SELECT * FROM records WHERE synced = 0 ORDER BY timestamp ASC".to_string(),
        };
        let mut stmt = conn.prepare(&sql).map_err(|e| LogifyError::Storage {
            detail: format!("preparing unsynced query: {e}"),
        })?;
        let rows = stmt
            .query_map([], Self::row_to_record)
            .map_err(|e| LogifyError::Storage {
                detail: format!("querying unsynced: {e}"),
            })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LogifyError::Storage {
                detail: format!("reading unsynced rows: {e}"),
            })
    }

    /// Mark `ids` synced in a single transaction, chunked to
    /// [`MARK_SYNCED_CHUNK`] ids per statement.
    pub fn mark_synced(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| LogifyError::Storage {
            detail: format!("opening transaction: {e}"),
        })?;
        for chunk in ids.chunks(MARK_SYNCED_CHUNK) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("UPDATE records SET synced = 1 WHERE id IN ({placeholders})");
            tx.execute(&sql, params_from_iter(chunk.iter()))
                .map_err(|e| LogifyError::Storage {
                    detail: format!("marking synced: {e}"),
                })?;
        }
        tx.commit().map_err(|e| LogifyError::Storage {
            detail: format!("committing mark_synced: {e}"),
        })?;
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<LogRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM records ORDER BY timestamp DESC LIMIT ?1")
            .map_err(|e| LogifyError::Storage {
                detail: format!("preparing recent query: {e}"),
            })?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_record)
            .map_err(|e| LogifyError::Storage {
                detail: format!("querying recent: {e}"),
            })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LogifyError::Storage {
                detail: format!("reading recent rows: {e}"),
            })
    }

    pub fn distinct_sources(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT source FROM records ORDER BY source ASC")
            .map_err(|e| LogifyError::Storage {
                detail: format!("preparing distinct_sources query: {e}"),
            })?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| LogifyError::Storage {
                detail: format!("querying distinct sources: {e}"),
            })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| LogifyError::Storage {
                detail: format!("reading distinct sources: {e}"),
            })
    }

    #[cfg(test)]
    fn count(&self) -> i64 {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))
            .optional()
            .ok()
            .flatten()
            .unwrap_or(0)
    }
}

fn parse_level(s: &str) -> Level {
    match s {
        "DEBUG" => Level::Debug,
        "WARN" => Level::Warn,
        "ERROR" => Level::Error,
        "CRITICAL" => Level::Critical,
        _ => Level::Info,
    }
}

fn parse_category(s: &str) -> Category {
    match s {
        "Security" => Category::Security,
        "Administrator" => Category::Administrator,
        "User Activity" => Category::UserActivity,
        _ => Category::System,
    }
}

fn parse_privacy(s: &str) -> Privacy {
    match s {
        "internal" => Privacy::Internal,
        "sensitive" => Privacy::Sensitive,
        _ => Privacy::Public,
    }
}
