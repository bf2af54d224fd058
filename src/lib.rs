//! # LOGify — host-resident log monitoring and threat-detection agent
//!
//! LOGify discovers log files across a host, tails them with
//! rotation-safe semantics, classifies and enriches each line, evaluates it
//! against a real-time threat-detection engine, persists it into a local
//! embedded store, and periodically pushes unsynced entries to a remote
//! aggregator.
//!
//! ## Architecture
//!
//! The crate is organized as one module per pipeline component, leaves
//! first:
//!
//! - [`resource_guard`]: verifies/raises file-descriptor and kernel watch
//!   limits before tailing (C1).
//! - [`scheduler`]: classifies paths into polling-priority tiers (C2).
//! - [`tracker`]: per-file rotation/truncation-safe tail state (C3).
//! - [`levels`] / [`enrich`]: level inference, classification, and
//!   network-field extraction (C4).
//! - [`detector`]: pattern rules, sliding-window rate detectors, and
//!   cooldowned threat alerts (C5).
//! - [`shell_history`]: per-user shell-history polling and redaction (C6).
//! - [`store`]: the embedded durable log store (C7).
//! - [`sync`]: the batch uploader to the remote aggregator (C8).
//! - [`activity_log`]: the agent's own rotating operational log (C9).
//! - [`config`]: persistent on-disk settings (C10).
//! - [`ingest`]: one-shot admin-log discovery ingest, invoked explicitly by
//!   the host program and never by the continuous tail loop.
//! - [`agent`]: the process-scoped facade wiring all of the above into the
//!   long-lived tasks a host program runs as threads, a supervisor
//!   process, or a system service.
//! - [`model`]: shared value types ([`model::LogRecord`],
//!   [`model::ThreatEvent`]) flowing through the pipeline.
//! - [`error`]: the crate-wide error taxonomy.
//!
//! ## Non-goals
//!
//! The CLI surface, web dashboard, remote aggregator's own schema, and AI
//! analysis add-on are external collaborators this crate does not
//! implement — see each module's documentation for the exact interface it
//! expects from them.

pub mod activity_log;
pub mod agent;
pub mod config;
pub mod detector;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod levels;
pub mod model;
pub mod resource_guard;
pub mod scheduler;
pub mod shell_history;
pub mod store;
pub mod sync;
pub mod tracker;

pub use agent::Agent;
pub use config::Config;
pub use error::{LogifyError, Result};
pub use model::{Category, LogRecord, Privacy, Severity, ThreatEvent};

/// Initialize the crate's developer-facing `tracing` subscriber, driven by
/// `RUST_LOG`. This is separate from, and in addition to, the user-facing
/// activity log ([`activity_log::ActivityLog`]): `tracing` answers "what is
/// this process doing internally right now," while the activity log is the
/// stable, line-oriented, long-term record the spec calls out by name. Safe
/// to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    });
}
