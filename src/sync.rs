//! Sync uploader (C8): batch push of unsynced records to the remote
//! aggregator, via `ureq` — the same synchronous HTTP client the teacher's
//! own stack already depends on.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::{LogifyError, Result};
use crate::model::LogRecord;
use crate::store::Store;

pub const DEFAULT_CYCLE_SECS: u64 = 300;
pub const MIN_CYCLE_SECS: u64 = 5;
pub const BATCH_SIZE: usize = 2000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Wire shape for the upload body, keyed exactly as the aggregator expects:
/// `server_id, source, level, message, timestamp, log_type, source_ip,
/// dest_ip, event_id, meta`. `log_type` carries the record's category —
/// `subcategory`/`privacy` stay local, queryable from the embedded store
/// but not part of the aggregator's contract.
#[derive(Serialize)]
struct OutgoingRecord {
    server_id: Option<String>,
    source: String,
    timestamp: String,
    level: String,
    message: String,
    log_type: String,
    source_ip: Option<String>,
    dest_ip: Option<String>,
    event_id: Option<String>,
    meta: serde_json::Value,
}

fn to_outgoing(record: &LogRecord, server_id: Option<&str>) -> OutgoingRecord {
    let ts = Utc
        .timestamp_opt(record.timestamp as i64, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    OutgoingRecord {
        server_id: server_id.map(|s| s.to_string()),
        source: record.source.replace('\0', ""),
        timestamp: ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        level: record.level.as_str().to_string(),
        message: record.sanitized_message(),
        log_type: record.category.as_str().to_string(),
        source_ip: record.source_ip.as_ref().map(|s| s.replace('\0', "")),
        dest_ip: record.dest_ip.as_ref().map(|s| s.replace('\0', "")),
        event_id: record.event_id.clone(),
        meta: record.meta.clone(),
    }
}

fn is_success(status: u16) -> bool {
    matches!(status, 200 | 201 | 204)
}

/// Run one sync cycle: drain the store's unsynced queue to the aggregator
/// in batches of up to [`BATCH_SIZE`]. Returns the number of records
/// synced. Aborts the whole cycle, without marking anything, on the first
/// batch that fails — the next cycle retries from the same records.
pub fn run_cycle(store: &Store, config: &Config) -> Result<usize> {
    if !config.is_sync_configured() {
        return Err(LogifyError::ConfigMissing);
    }
    let server_url = config.server_url.as_ref().expect("checked above");
    // The bearer credential presented to the aggregator is the anonymous
    // key, not the connection key that merely gates whether a cycle runs
    // at all (config.is_sync_configured checks server_id + connection_key).
    let bearer = config.anon_key.as_deref().unwrap_or_default();

    let unsynced = store.query_unsynced(None)?;
    if unsynced.is_empty() {
        return Ok(0);
    }

    let agent_config = ureq::Agent::config_builder()
        .timeout_global(Some(REQUEST_TIMEOUT))
        .build();
    let agent = ureq::Agent::new_with_config(agent_config);

    let mut total_synced = 0usize;
    for batch in unsynced.chunks(BATCH_SIZE) {
        let ids: Vec<i64> = batch.iter().filter_map(|r| r.id).collect();
        let payload: Vec<OutgoingRecord> = batch
            .iter()
            .map(|r| to_outgoing(r, config.server_id.as_deref()))
            .collect();

        let response = agent
            .post(format!("{server_url}/api/database/records/logs"))
            .header("Authorization", &format!("Bearer {bearer}"))
            .header("Prefer", "return=minimal")
            .send_json(&payload);

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if !is_success(status) {
                    return Err(LogifyError::UploadRejected {
                        status,
                        body_snippet: String::new(),
                    });
                }
            }
            Err(ureq::Error::StatusCode(status)) => {
                return Err(LogifyError::UploadRejected {
                    status,
                    body_snippet: String::new(),
                });
            }
            Err(e) => {
                return Err(LogifyError::Network { detail: e.to_string() });
            }
        }

        store.mark_synced(&ids)?;
        total_synced += ids.len();
    }

    if total_synced > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        Config::update(|cfg| {
            cfg.last_sync = Some(now);
        })?;
    }

    Ok(total_synced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::Level;
    use crate::model::{Category, Privacy};

    fn sample(ts: f64) -> LogRecord {
        LogRecord {
            id: Some(1),
            source: "/var/log/app.log".into(),
            timestamp: ts,
            level: Level::Info,
            message: "hello\0world".into(),
            category: Category::System,
            subcategory: "OS Events".into(),
            privacy: Privacy::Public,
            source_ip: Some("10.0.0.1\0".into()),
            dest_ip: None,
            event_id: None,
            synced: false,
            meta: serde_json::Value::Null,
        }
    }

    #[test]
    fn to_outgoing_strips_nul_bytes() {
        let out = to_outgoing(&sample(0.0), Some("host-1"));
        assert_eq!(out.message, "helloworld");
        assert_eq!(out.source_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(out.server_id.as_deref(), Some("host-1"));
    }

    #[test]
    fn to_outgoing_carries_category_as_log_type() {
        let out = to_outgoing(&sample(0.0), None);
        assert_eq!(out.log_type, Category::System.as_str());
    }

    #[test]
    fn to_outgoing_formats_iso8601_with_trailing_z() {
        let out = to_outgoing(&sample(1_700_000_000.0), None);
        assert!(out.timestamp.ends_with('Z'));
        assert_eq!(out.timestamp.len(), "2023-11-14T22:13:20Z".len());
    }

    #[test]
    fn success_statuses_are_200_201_204() {
        assert!(is_success(200));
        assert!(is_success(201));
        assert!(is_success(204));
        assert!(!is_success(400));
        assert!(!is_success(500));
    }

    #[test]
    fn cycle_without_configured_sync_returns_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("server.db")).unwrap();
        let config = Config::default();
        let err = run_cycle(&store, &config).unwrap_err();
        assert!(matches!(err, LogifyError::ConfigMissing));
    }

    #[test]
    fn cycle_with_no_unsynced_records_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("server.db")).unwrap();
        let mut config = Config::default();
        config.server_url = Some("https://example.invalid".into());
        config.server_id = Some("host-1".into());
        config.connection_key = Some("key".into());
        let synced = run_cycle(&store, &config).unwrap();
        assert_eq!(synced, 0);
    }
}
