//! Log level type and the case-insensitive, first-match-wins inference rule
//! used by the line enricher.

use std::fmt;

/// Severity of a [`crate::model::LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    /// Infer a level from raw line text. Case-insensitive, first match in
    /// this order wins: `critical`, `error`/`fail`, `warn`, `debug`, else
    /// `INFO`.
    pub fn infer(line: &str) -> Level {
        let lower = line.to_lowercase();
        if lower.contains("critical") {
            Level::Critical
        } else if lower.contains("error") || lower.contains("fail") {
            Level::Error
        } else if lower.contains("warn") {
            Level::Warn
        } else if lower.contains("debug") {
            Level::Debug
        } else {
            Level::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_wins_over_error_cue() {
        // "critical" is checked first even though "fail" also appears.
        assert_eq!(Level::infer("CRITICAL failure in subsystem"), Level::Critical);
    }

    #[test]
    fn error_from_fail_cue() {
        assert_eq!(Level::infer("authentication failed for user root"), Level::Error);
    }

    #[test]
    fn warn_cue() {
        assert_eq!(Level::infer("disk usage warning: 90% full"), Level::Warn);
    }

    #[test]
    fn debug_cue() {
        assert_eq!(Level::infer("debug: entering handler"), Level::Debug);
    }

    #[test]
    fn defaults_to_info() {
        assert_eq!(Level::infer("service started on port 8080"), Level::Info);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(Level::infer("WaRn: low memory"), Level::Warn);
    }
}
