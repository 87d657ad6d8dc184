//! Value types describing one unit of probing work and its outcome.
use serde_derive::Serialize;
use std::{fmt, sync::Arc, time::Duration};

/// Upper bound on bytes kept from any single response.
pub const RESPONSE_CAP: usize = 1024;

/// Transport used by a probe. `None` marks probes that are not port based,
/// such as a name resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    None,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// One unit of work: an address, port, protocol, deadline and optional payload.
///
/// Immutable once built. Identity, and therefore output ordering, is
/// `(address, port, protocol)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTask {
    address: String,
    port: u16,
    protocol: Protocol,
    timeout: Duration,
    payload: Option<Arc<[u8]>>,
}

impl ProbeTask {
    pub fn new(address: impl Into<String>, port: u16, protocol: Protocol, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            port,
            protocol,
            timeout,
            payload: None,
        }
    }

    /// A port-less task, used for name resolution work.
    pub fn lookup(name: impl Into<String>, timeout: Duration) -> Self {
        Self::new(name, 0, Protocol::None, timeout)
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Arc<[u8]>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Sort and dedup key. Port scans share one address, so they order by
    /// port; lookups all use port 0, so they order by name.
    pub fn identity(&self) -> (&str, u16, Protocol) {
        (&self.address, self.port, self.protocol)
    }
}

/// Verdict of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Open,
    Closed,
    /// No answer before the deadline. Not proof of closure.
    Filtered,
    Error,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Filtered => "filtered",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of one [`ProbeTask`]. Never mutated after creation.
///
/// An `Open` result always carries a response, possibly empty: the empty
/// vector is the explicit "connected, nothing said" marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    task: ProbeTask,
    state: ProbeState,
    response: Option<Vec<u8>>,
    error: Option<String>,
    service_hint: Option<String>,
    elapsed: Duration,
}

impl ProbeResult {
    pub fn open(task: ProbeTask, mut response: Vec<u8>, elapsed: Duration) -> Self {
        response.truncate(RESPONSE_CAP);
        Self {
            task,
            state: ProbeState::Open,
            response: Some(response),
            error: None,
            service_hint: None,
            elapsed,
        }
    }

    pub const fn closed(task: ProbeTask, elapsed: Duration) -> Self {
        Self::without_response(task, ProbeState::Closed, None, elapsed)
    }

    pub const fn filtered(task: ProbeTask, elapsed: Duration) -> Self {
        Self::without_response(task, ProbeState::Filtered, None, elapsed)
    }

    pub fn error(task: ProbeTask, detail: impl ToString, elapsed: Duration) -> Self {
        Self::without_response(task, ProbeState::Error, Some(detail.to_string()), elapsed)
    }

    const fn without_response(
        task: ProbeTask,
        state: ProbeState,
        error: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            task,
            state,
            response: None,
            error,
            service_hint: None,
            elapsed,
        }
    }

    /// Attach a service name reported by a backend that already knows it.
    #[must_use]
    pub fn with_service_hint(mut self, service: impl Into<String>) -> Self {
        self.service_hint = Some(service.into());
        self
    }

    pub const fn task(&self) -> &ProbeTask {
        &self.task
    }

    pub const fn state(&self) -> ProbeState {
        self.state
    }

    pub const fn is_open(&self) -> bool {
        matches!(self.state, ProbeState::Open)
    }

    pub fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    /// Response decoded as text. Invalid UTF-8 is replaced, never rejected.
    pub fn response_text(&self) -> String {
        self.response
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_owned())
            .unwrap_or_default()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn service_hint(&self) -> Option<&str> {
        self.service_hint.as_deref()
    }

    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> ProbeTask {
        ProbeTask::new("127.0.0.1", 22, Protocol::Tcp, Duration::from_secs(1))
    }

    #[test]
    fn open_result_is_capped() {
        let result = ProbeResult::open(task(), vec![b'a'; 4096], Duration::ZERO);
        assert_eq!(result.response().map(<[u8]>::len), Some(RESPONSE_CAP));
        assert!(result.is_open());
    }

    #[test]
    fn open_result_keeps_empty_marker() {
        let result = ProbeResult::open(task(), Vec::new(), Duration::ZERO);
        assert_eq!(result.response(), Some(&[][..]));
        assert_eq!(result.response_text(), "");
    }

    #[test]
    fn garbled_response_decodes_lossily() {
        let result = ProbeResult::open(task(), vec![0xff, 0xfe, b'o', b'k', b'\n'], Duration::ZERO);
        assert!(result.response_text().ends_with("ok"));
    }

    #[test]
    fn identity_orders_by_port_then_name() {
        let low = ProbeTask::new("host", 21, Protocol::Tcp, Duration::ZERO);
        let high = ProbeTask::new("host", 443, Protocol::Tcp, Duration::ZERO);
        assert!(low.identity() < high.identity());

        let api = ProbeTask::lookup("api.example.com", Duration::ZERO);
        let www = ProbeTask::lookup("www.example.com", Duration::ZERO);
        assert!(api.identity() < www.identity());
    }

    #[test]
    fn failures_carry_no_response() {
        let result = ProbeResult::error(task(), "network unreachable", Duration::ZERO);
        assert_eq!(result.state(), ProbeState::Error);
        assert!(result.response().is_none());
        assert_eq!(result.error_detail(), Some("network unreachable"));
    }
}
