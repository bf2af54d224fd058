//! Shared value types flowing through the pipeline: the persisted record,
//! the classification taxonomy, and the threat-detector's output event.

use serde::{Deserialize, Serialize};

use crate::levels::Level;

/// `category` of a [`LogRecord`], assigned by the line enricher from path
/// tokens. Closed set — every record has exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    System,
    Security,
    Administrator,
    #[serde(rename = "User Activity")]
    UserActivity,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::System => "System",
            Category::Security => "Security",
            Category::Administrator => "Administrator",
            Category::UserActivity => "User Activity",
        }
    }
}

/// `privacy` tier of a [`LogRecord`]. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Privacy {
    Public,
    Internal,
    Sensitive,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Internal => "internal",
            Privacy::Sensitive => "sensitive",
        }
    }
}

/// The canonical unit flowing through the pipeline and persisted in the
/// log store. `id` is `None` until the store assigns one at insert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Option<i64>,
    pub source: String,
    pub timestamp: f64,
    pub level: Level,
    pub message: String,
    pub category: Category,
    pub subcategory: String,
    pub privacy: Privacy,
    pub source_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub event_id: Option<String>,
    pub synced: bool,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl LogRecord {
    /// Strip NUL bytes from the message, in place — required before a
    /// record crosses the upload boundary; local storage keeps them intact.
    pub fn sanitized_message(&self) -> String {
        self.message.replace('\0', "")
    }
}

/// Severity of a [`ThreatEvent`], ordered so callers can compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Output of the threat detector (C5) for a single analyzed line or shell
/// command. `None` from `analyze`/`analyze_shell_command` means no threat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatEvent {
    pub threat_type: String,
    pub severity: Severity,
    pub description: String,
    pub source_ip: Option<String>,
    pub log_source: Option<String>,
    pub recommendation: String,
}
