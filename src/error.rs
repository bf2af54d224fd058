//! Crate-wide error taxonomy.
//!
//! One enum per error *kind*, not per call site, mirroring the kinds
//! enumerated by the pipeline's error-handling design: most are recoverable
//! (logged and the pipeline continues), a small subset is fatal at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Every error the pipeline can produce, grouped by the component that
/// raises it. Variants are kinds, not call sites — multiple failure points
/// across the crate map onto the same variant.
#[derive(Debug, Error)]
pub enum LogifyError {
    /// A log file could not be opened for reading. Recorded once per path;
    /// the path stays tracked and is retried on the next wake.
    #[error("permission denied reading {path}")]
    PermissionDenied { path: PathBuf },

    /// Not a failure — a tracked file was rotated. Modeled as a variant so
    /// callers can route it through the same logging call as real errors
    /// without it ever aborting anything.
    #[error("rotation detected for {path}")]
    RotationDetected { path: PathBuf },

    /// File-descriptor or kernel-watch limits are insufficient and could
    /// not be raised. Fatal for the tailer invocation that hit it.
    #[error("resource limit: {detail}")]
    ResourceLimit { detail: String },

    /// The embedded store could not complete an insert or a schema
    /// migration. Insert failures are recovered (WARN + drop); migration
    /// failures are fatal.
    #[error("storage error: {detail}")]
    Storage { detail: String },

    /// Transport-level failure talking to the aggregator. The sync cycle
    /// aborts without marking any record synced; the next cycle retries.
    #[error("network error: {detail}")]
    Network { detail: String },

    /// The aggregator answered but not with a success status.
    #[error("upload rejected: {status} {body_snippet}")]
    UploadRejected { status: u16, body_snippet: String },

    /// The uploader has no `server_id`/`connection_key` configured yet.
    /// Not an error in the propagation sense — the cycle is skipped.
    #[error("sync not configured")]
    ConfigMissing,

    /// Reserved for symmetry with the source taxonomy. Never constructed:
    /// the enricher defaults every field instead of rejecting a line.
    #[error("malformed line")]
    MalformedLine,
}

pub type Result<T> = std::result::Result<T, LogifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path() {
        let err = LogifyError::PermissionDenied {
            path: PathBuf::from("/var/log/secure"),
        };
        assert_eq!(err.to_string(), "permission denied reading /var/log/secure");
    }

    #[test]
    fn upload_rejected_carries_status() {
        let err = LogifyError::UploadRejected {
            status: 503,
            body_snippet: "Service Unavailable".into(),
        };
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn config_missing_has_no_payload() {
        assert_eq!(LogifyError::ConfigMissing.to_string(), "sync not configured");
    }
}
