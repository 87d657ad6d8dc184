//! Service identification from banners, and the service detection run that
//! feeds it.
//!
//! [`identify`] is pure: it never touches the network and always returns
//! the same [`ServiceRecord`] for the same input. Banner keywords win over
//! the port table, the port table wins over `"Unknown"`.
use crate::scanner::{
    socket::SocketProbe,
    task::{ProbeResult, ProbeTask, Protocol},
    ConcurrentScanner,
};
use chrono::{DateTime, Local};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_derive::Serialize;
use std::time::Duration;

/// Ports probed by service detection when the caller names none.
pub const DEFAULT_DETECTION_PORTS: [u16; 15] = [
    21, 22, 23, 25, 53, 80, 110, 143, 443, 445, 3306, 3389, 5432, 8080, 8443,
];

/// Placeholder for anything we could not determine.
pub const UNKNOWN: &str = "Unknown";

/// Ordered keyword table, first match wins. Specific products sit above
/// generic protocol words so an HTTP error page mentioning mysql is still
/// matched as MySQL only when no earlier keyword hits, and `http` never
/// shadows a database greeting.
const BANNER_KEYWORDS: &[(&str, &str)] = &[
    ("ssh", "SSH"),
    ("ftp", "FTP"),
    ("mysql", "MySQL"),
    ("postgresql", "PostgreSQL"),
    ("postgres", "PostgreSQL"),
    ("redis", "Redis"),
    ("mongodb", "MongoDB"),
    ("mongo", "MongoDB"),
    ("smtp", "SMTP"),
    ("mail", "SMTP"),
    ("http", "HTTP"),
    ("apache", "HTTP"),
    ("nginx", "HTTP"),
];

const PORT_SERVICES: &[(u16, &str)] = &[
    (20, "FTP-Data"),
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
    (5900, "VNC"),
    (6379, "Redis"),
    (8080, "HTTP-Proxy"),
    (8443, "HTTPS-Alt"),
    (27017, "MongoDB"),
];

const FIRST_LINE_LIMIT: usize = 50;

static VERSION_PATTERNS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        Regex::new(r"(\d+\.\d+\.\d+)").expect("valid x.x.x pattern"),
        Regex::new(r"(\d+\.\d+)").expect("valid x.x pattern"),
        Regex::new(r"[vV]ersion[:\s]+(\S+)").expect("valid version: pattern"),
        Regex::new(r"[vV]([0-9.]+)").expect("valid v-token pattern"),
    ]
});

static SSH_PREAMBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^SSH-\d+(\.\d+)?-").expect("valid SSH preamble pattern"));

/// What runs on an open port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    pub port: u16,
    pub protocol: Protocol,
    #[serde(rename = "service")]
    pub name: String,
    pub version: String,
    pub banner: String,
}

/// Maps a port and its banner to a [`ServiceRecord`].
pub fn identify(port: u16, protocol: Protocol, banner: &str) -> ServiceRecord {
    let banner = banner.trim();
    ServiceRecord {
        port,
        protocol,
        name: identify_name(port, banner).to_owned(),
        version: extract_version(banner),
        banner: banner.to_owned(),
    }
}

/// Port-table name, or `"Unknown"`.
pub fn service_for_port(port: u16) -> &'static str {
    PORT_SERVICES
        .iter()
        .find(|(known, _)| *known == port)
        .map_or(UNKNOWN, |(_, name)| name)
}

fn identify_name(port: u16, banner: &str) -> &'static str {
    let lower = banner.to_lowercase();
    BANNER_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map_or_else(|| service_for_port(port), |(_, name)| name)
}

/// First pattern hit wins; the text searched skips protocol preambles that
/// would otherwise shadow the software version.
pub fn extract_version(banner: &str) -> String {
    if banner.is_empty() {
        return UNKNOWN.to_owned();
    }

    for text in version_candidates(banner) {
        for pattern in VERSION_PATTERNS.iter() {
            if let Some(found) = pattern.captures(text).and_then(|c| c.get(1)) {
                return found.as_str().to_owned();
            }
        }
    }

    let first_line: String = banner
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(FIRST_LINE_LIMIT)
        .collect();
    if first_line.is_empty() {
        UNKNOWN.to_owned()
    } else {
        first_line
    }
}

/// Text slices to search, most specific first.
fn version_candidates(banner: &str) -> Vec<&str> {
    if let Some(preamble) = SSH_PREAMBLE.find(banner) {
        // "SSH-2.0-" is the protocol version, the software follows it
        return vec![&banner[preamble.end()..]];
    }

    if banner.starts_with("HTTP/") {
        let server = banner.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case("server").then_some(value.trim())
        });
        let (status, rest) = banner.split_once('\n').unwrap_or((banner, ""));
        return server.into_iter().chain([rest, status]).collect();
    }

    vec![banner]
}

/// Results of one service detection run.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub target: String,
    pub timestamp: DateTime<Local>,
    pub services: Vec<ServiceRecord>,
    pub total_services: usize,
}

/// Connects to each port with banner collection enabled and identifies what
/// answered.
#[derive(Debug, Clone)]
pub struct ServiceDetector {
    probe: SocketProbe,
    scanner: ConcurrentScanner,
    timeout: Duration,
}

impl ServiceDetector {
    /// `probe` must have been built with banner collection enabled.
    pub const fn new(probe: SocketProbe, scanner: ConcurrentScanner, timeout: Duration) -> Self {
        Self {
            probe,
            scanner,
            timeout,
        }
    }

    pub async fn detect(&self, ports: &[u16]) -> ServiceReport {
        let ports = if ports.is_empty() {
            &DEFAULT_DETECTION_PORTS[..]
        } else {
            ports
        };
        info!("Detecting services on {} ports", ports.len());

        let tasks = ports
            .iter()
            .map(|&port| ProbeTask::new(self.probe.host(), port, Protocol::Tcp, self.timeout))
            .collect();

        let open = self
            .scanner
            .run(tasks, |task| {
                let probe = self.probe.clone();
                async move { probe.probe(task).await }
            })
            .await;

        let services: Vec<ServiceRecord> = open.iter().map(record_for).collect();
        for service in &services {
            info!("Detected {} on port {}", service.name, service.port);
        }

        ServiceReport {
            target: self.probe.host().to_owned(),
            timestamp: Local::now(),
            total_services: services.len(),
            services,
        }
    }
}

/// Builds the record for one open result.
pub fn record_for(result: &ProbeResult) -> ServiceRecord {
    let banner = result.response_text();
    debug!("Banner on port {}: {banner:?}", result.task().port());
    identify(result.task().port(), result.task().protocol(), &banner)
}
