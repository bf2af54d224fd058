//! Priority scheduler (C2): classify paths into polling tiers, and rank a
//! tier's worklist so the busiest files drain first under load.

use std::path::Path;
use std::time::{Duration, SystemTime};

/// Polling tier. Lower tiers poll more often; every tier still polls every
/// one of its files on every cadence, nothing is ever dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Security,
    WebOrDatabase,
    KernelOrApplication,
    Other,
}

impl Tier {
    pub fn cadence(&self) -> Duration {
        match self {
            Tier::Security => Duration::from_secs(1),
            Tier::WebOrDatabase => Duration::from_secs(2),
            Tier::KernelOrApplication => Duration::from_secs(5),
            Tier::Other => Duration::from_secs(10),
        }
    }
}

const SECURITY_TOKENS: &[&str] = &["auth", "secure", "ufw", "audit", "fail2ban"];
const WEB_TOKENS: &[&str] = &["nginx", "apache", "httpd"];
const DB_TOKENS: &[&str] = &["mysql", "postgres", "redis", "mongo"];
const KERNEL_TOKENS: &[&str] = &["kern", "boot", "dmesg", "syslog"];
const APP_TOKENS: &[&str] = &["app", "service"];

/// Classify one path into a polling tier. Pure function, first matching
/// rule wins.
pub fn classify_file(path: &str) -> Tier {
    let lower = path.to_lowercase();
    let has_any = |tokens: &[&str]| tokens.iter().any(|t| lower.contains(t));

    if has_any(SECURITY_TOKENS) {
        return Tier::Security;
    }
    if has_any(WEB_TOKENS) || has_any(DB_TOKENS) {
        return Tier::WebOrDatabase;
    }
    if has_any(KERNEL_TOKENS) || has_any(APP_TOKENS) {
        return Tier::KernelOrApplication;
    }
    Tier::Other
}

const SIZE_CAP_BYTES: f64 = 10.0 * 1024.0 * 1024.0;
const RECENCY_HALF_LIFE_HOURS: f64 = 6.0;

/// Score a path for ordering *within* a tier: larger, more recently
/// modified files sort first. Never used to change cadence or drop a file,
/// only the iteration order of one tier's worklist under load.
pub fn rank_within_tier(path: &Path) -> f64 {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return 0.0,
    };

    let size_factor = (metadata.len() as f64).min(SIZE_CAP_BYTES) / SIZE_CAP_BYTES;

    let recency_factor = match metadata.modified() {
        Ok(modified) => {
            let age_hours = SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO)
                .as_secs_f64()
                / 3600.0;
            (-age_hours / RECENCY_HALF_LIFE_HOURS).exp()
        }
        Err(_) => 0.0,
    };

    size_factor * 2.0 + recency_factor
}

/// Sort a tier's worklist in place, busiest-first.
pub fn sort_worklist(paths: &mut [std::path::PathBuf]) {
    paths.sort_by(|a, b| {
        rank_within_tier(b)
            .partial_cmp(&rank_within_tier(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_security_tier() {
        assert_eq!(classify_file("/var/log/auth.log"), Tier::Security);
        assert_eq!(classify_file("/var/log/ufw.log"), Tier::Security);
    }

    #[test]
    fn classifies_web_and_database_tier() {
        assert_eq!(classify_file("/var/log/nginx/access.log"), Tier::WebOrDatabase);
        assert_eq!(classify_file("/var/log/mysql/error.log"), Tier::WebOrDatabase);
    }

    #[test]
    fn classifies_kernel_and_application_tier() {
        assert_eq!(classify_file("/var/log/kern.log"), Tier::KernelOrApplication);
        assert_eq!(classify_file("/var/log/myapp/service.log"), Tier::KernelOrApplication);
    }

    #[test]
    fn classifies_other_tier_by_default() {
        assert_eq!(classify_file("/var/log/random-thing.log"), Tier::Other);
    }

    #[test]
    fn cadences_match_spec() {
        assert_eq!(Tier::Security.cadence(), Duration::from_secs(1));
        assert_eq!(Tier::WebOrDatabase.cadence(), Duration::from_secs(2));
        assert_eq!(Tier::KernelOrApplication.cadence(), Duration::from_secs(5));
        assert_eq!(Tier::Other.cadence(), Duration::from_secs(10));
    }

    #[test]
    fn rank_of_missing_file_is_zero() {
        assert_eq!(rank_within_tier(Path::new("/nonexistent/path/xyz")), 0.0);
    }
}
