//! Line enricher (C4): classification and network-field extraction.
//!
//! Level inference lives in [`crate::levels`]; this module covers the two
//! remaining enrichment steps, both expressed as ordered, first-match-wins
//! rule tables so the evaluation order is data, not control flow.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Category, Privacy};

/// Classify a path into `(category, subcategory, privacy)`. First matching
/// rule wins; falls through to the System/OS Events bucket.
pub fn classify_path(path: &str) -> (Category, &'static str, Privacy) {
    let lower = path.to_lowercase();
    let name = lower.rsplit('/').next().unwrap_or(&lower);

    let has_any = |tokens: &[&str]| tokens.iter().any(|t| name.contains(t));
    let path_has_any = |tokens: &[&str]| tokens.iter().any(|t| lower.contains(t));

    if has_any(&["auth", "secure", "faillog", "btmp"]) {
        return (Category::Security, "Failed Authentication", Privacy::Internal);
    }
    if has_any(&["ufw", "firewalld"]) {
        return (Category::Security, "Firewall", Privacy::Internal);
    }
    if has_any(&["audit", "apparmor"]) {
        return (Category::Security, "Policy Violations", Privacy::Internal);
    }
    if has_any(&["wtmp", "utmp", "lastlog"]) {
        return (Category::Security, "Login Tracking", Privacy::Internal);
    }
    if path_has_any(&["nginx", "apache", "httpd"]) {
        let sub = if name.contains("error") {
            "Web Server Errors"
        } else {
            "Web Server"
        };
        let privacy = if name.contains("error") {
            Privacy::Internal
        } else {
            Privacy::Public
        };
        return (Category::Administrator, sub, privacy);
    }
    if path_has_any(&["mysql", "postgres", "redis", "mongodb", "mongo"]) {
        let sub = if name.contains("error") {
            "Database Errors"
        } else {
            "Database"
        };
        return (Category::Administrator, sub, Privacy::Internal);
    }
    if lower.contains("/sudo") || lower.contains("/root/") {
        return (Category::Administrator, "Root Actions", Privacy::Sensitive);
    }
    if has_any(&["dpkg", "apt", "yum", "dnf"]) {
        return (Category::Administrator, "Configuration Changes", Privacy::Internal);
    }
    if has_any(&["bash_history", "zsh_history", "fish_history"]) {
        return (Category::UserActivity, "Shell History", Privacy::Sensitive);
    }
    if path_has_any(&[".mozilla", "chrome", "chromium"]) {
        return (Category::UserActivity, "Browser History", Privacy::Sensitive);
    }
    if has_any(&["kern", "dmesg"]) {
        return (Category::System, "Kernel", Privacy::Public);
    }
    if name.contains("boot") {
        return (Category::System, "Startup/Shutdown", Privacy::Public);
    }
    if lower.contains("xorg") || lower.contains("hardware") {
        return (Category::System, "Hardware", Privacy::Public);
    }
    (Category::System, "OS Events", Privacy::Public)
}

static SRC_SRC_EQ: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)SRC=(\d{1,3}(?:\.\d{1,3}){3})").unwrap());
static SRC_SADDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)saddr=(\d{1,3}(?:\.\d{1,3}){3})").unwrap());
static SRC_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:from|client|rhost)\s+(\d{1,3}(?:\.\d{1,3}){3})").unwrap());
static DST_DST_EQ: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)DST=(\d{1,3}(?:\.\d{1,3}){3})").unwrap());
static DST_DADDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)daddr=(\d{1,3}(?:\.\d{1,3}){3})").unwrap());
static DST_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:to|dest|server)\s+(\d{1,3}(?:\.\d{1,3}){3})").unwrap());
static ANY_IPV4: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,3}(?:\.\d{1,3}){3}").unwrap());

static EVENT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)EventID[=:\s]+(\d+)").unwrap());
static EVENT_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)EventCode[=:\s]+(\d+)").unwrap());
static AUDIT_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"type=(\w+)").unwrap());
static UFW_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[UFW (\w+)\]").unwrap());

/// Network fields extracted from a line: `(source_ip, dest_ip, event_id)`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NetworkFields {
    pub source_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub event_id: Option<String>,
}

/// Extract `source_ip`, `dest_ip`, `event_id` per the declared probe order;
/// first hit wins per field.
pub fn extract_network_fields(line: &str) -> NetworkFields {
    let source_ip = SRC_SRC_EQ
        .captures(line)
        .or_else(|| SRC_SADDR.captures(line))
        .or_else(|| SRC_WORD.captures(line))
        .map(|c| c[1].to_string());

    let all_ips: Vec<&str> = ANY_IPV4.find_iter(line).map(|m| m.as_str()).collect();

    let source_ip = source_ip.or_else(|| all_ips.first().map(|s| s.to_string()));

    let dest_ip = DST_DST_EQ
        .captures(line)
        .or_else(|| DST_DADDR.captures(line))
        .or_else(|| DST_WORD.captures(line))
        .map(|c| c[1].to_string())
        .or_else(|| {
            // Generic fallback: the second distinct IPv4 in the line, if any.
            let src = source_ip.as_deref();
            all_ips
                .iter()
                .find(|ip| Some(**ip) != src)
                .map(|s| s.to_string())
        });

    let event_id = EVENT_ID
        .captures(line)
        .or_else(|| EVENT_CODE.captures(line))
        .map(|c| c[1].to_string())
        .or_else(|| UFW_BRACKET.captures(line).map(|c| c[1].to_string()))
        .or_else(|| AUDIT_TYPE.captures(line).map(|c| c[1].to_string()));

    NetworkFields {
        source_ip,
        dest_ip,
        event_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth_log() {
        let (cat, sub, priv_) = classify_path("/var/log/auth.log");
        assert_eq!(cat, Category::Security);
        assert_eq!(sub, "Failed Authentication");
        assert_eq!(priv_, Privacy::Internal);
    }

    #[test]
    fn classify_is_deterministic() {
        let a = classify_path("/var/log/nginx/error.log");
        let b = classify_path("/var/log/nginx/error.log");
        assert_eq!(a, b);
    }

    #[test]
    fn classify_nginx_error_vs_access() {
        let (_, sub_err, priv_err) = classify_path("/var/log/nginx/error.log");
        let (_, sub_ok, priv_ok) = classify_path("/var/log/nginx/access.log");
        assert_eq!(sub_err, "Web Server Errors");
        assert_eq!(priv_err, Privacy::Internal);
        assert_eq!(sub_ok, "Web Server");
        assert_eq!(priv_ok, Privacy::Public);
    }

    #[test]
    fn classify_shell_history() {
        let (cat, sub, priv_) = classify_path("/home/alice/.bash_history");
        assert_eq!(cat, Category::UserActivity);
        assert_eq!(sub, "Shell History");
        assert_eq!(priv_, Privacy::Sensitive);
    }

    #[test]
    fn classify_falls_through_to_os_events() {
        let (cat, sub, priv_) = classify_path("/var/log/some-random-app.log");
        assert_eq!(cat, Category::System);
        assert_eq!(sub, "OS Events");
        assert_eq!(priv_, Privacy::Public);
    }

    #[test]
    fn extract_iptables_style_fields() {
        let line = "kernel: [UFW BLOCK] IN=eth0 SRC=203.0.113.9 DST=10.0.0.5 DPT=22";
        let fields = extract_network_fields(line);
        assert_eq!(fields.source_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(fields.dest_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(fields.event_id.as_deref(), Some("BLOCK"));
    }

    #[test]
    fn extract_from_word_probe() {
        let line = "sshd: Failed password for root from 198.51.100.7 port 22";
        let fields = extract_network_fields(line);
        assert_eq!(fields.source_ip.as_deref(), Some("198.51.100.7"));
    }

    #[test]
    fn extract_generic_fallback_second_ip() {
        let line = "connection 192.0.2.1 -> 192.0.2.2 established";
        let fields = extract_network_fields(line);
        assert_eq!(fields.source_ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(fields.dest_ip.as_deref(), Some("192.0.2.2"));
    }

    #[test]
    fn extract_event_id_from_audit_type() {
        let line = "type=SYSCALL msg=audit(1234567890.123:42): success=no";
        let fields = extract_network_fields(line);
        assert_eq!(fields.event_id.as_deref(), Some("SYSCALL"));
    }

    #[test]
    fn extract_no_network_fields_present() {
        let fields = extract_network_fields("service started successfully");
        assert_eq!(fields, NetworkFields::default());
    }
}
