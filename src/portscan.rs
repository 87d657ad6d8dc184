//! Port scanning: the [`PortProber`] capability, its two backends and the
//! report a scan produces.
use crate::input::{fmt_port_spec, ScanType};
use crate::scanner::{
    nmap::Nmap,
    socket::SocketProbe,
    task::{ProbeResult, ProbeState, ProbeTask, Protocol},
    Cancellation, ConcurrentScanner,
};
use crate::service::service_for_port;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::{info, warn};
use serde_derive::Serialize;
use std::time::Duration;

/// Something that can tell which of a set of ports are open.
#[async_trait]
pub trait PortProber: Send + Sync {
    /// Short name recorded as the report's `scan_method`.
    fn name(&self) -> &'static str;

    /// Returns open results only, sorted by port.
    async fn probe_ports(&self, ports: &[u16], protocol: Protocol) -> Vec<ProbeResult>;
}

/// Raw-socket prober: one [`SocketProbe`] per port under a [`ConcurrentScanner`].
#[derive(Debug, Clone)]
pub struct NativeProber {
    probe: SocketProbe,
    scanner: ConcurrentScanner,
    timeout: Duration,
}

impl NativeProber {
    pub const fn new(probe: SocketProbe, scanner: ConcurrentScanner, timeout: Duration) -> Self {
        Self {
            probe,
            scanner,
            timeout,
        }
    }
}

#[async_trait]
impl PortProber for NativeProber {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn probe_ports(&self, ports: &[u16], protocol: Protocol) -> Vec<ProbeResult> {
        let tasks = ports
            .iter()
            .map(|&port| ProbeTask::new(self.probe.host(), port, protocol, self.timeout))
            .collect();

        self.scanner
            .run(tasks, |task| {
                let probe = self.probe.clone();
                async move { probe.probe(task).await }
            })
            .await
    }
}

/// Delegates TCP probing to an installed nmap. Cancelling stops waiting
/// for the run and kills the subprocess.
#[derive(Debug, Clone)]
pub struct NmapProber {
    nmap: Nmap,
    target: String,
    timeout: Duration,
    cancellation: Cancellation,
}

impl NmapProber {
    pub fn new(
        nmap: Nmap,
        target: impl Into<String>,
        timeout: Duration,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            nmap,
            target: target.into(),
            timeout,
            cancellation,
        }
    }
}

#[async_trait]
impl PortProber for NmapProber {
    fn name(&self) -> &'static str {
        "nmap"
    }

    async fn probe_ports(&self, ports: &[u16], _protocol: Protocol) -> Vec<ProbeResult> {
        let spec = fmt_port_spec(ports);
        let outcome = tokio::select! {
            outcome = self.nmap.scan(&self.target, &spec, self.timeout) => outcome,
            () = self.cancellation.cancelled() => {
                warn!("nmap scan interrupted, no results kept");
                return Vec::new();
            }
        };

        match outcome {
            Ok(mut results) => {
                results.retain(ProbeResult::is_open);
                results.sort_by_key(|r| r.task().port());
                results.dedup_by_key(|r| r.task().port());
                results
            }
            Err(e) => {
                warn!("nmap scan failed: {e}");
                Vec::new()
            }
        }
    }
}

/// Picks the backend once, at startup. nmap is only considered for SYN
/// scans and only if `nmap_available`.
pub fn select_prober(
    scan_type: ScanType,
    nmap_available: bool,
    native: NativeProber,
    nmap: NmapProber,
) -> Box<dyn PortProber> {
    if scan_type == ScanType::Syn && nmap_available {
        info!("Using nmap for port scanning");
        Box::new(nmap)
    } else {
        info!("Using the native port scanner");
        Box::new(native)
    }
}

/// One open port as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenPort {
    pub port: u16,
    pub protocol: Protocol,
    pub state: ProbeState,
    pub service: String,
}

impl From<&ProbeResult> for OpenPort {
    fn from(result: &ProbeResult) -> Self {
        let port = result.task().port();
        Self {
            port,
            protocol: result.task().protocol(),
            state: result.state(),
            service: result
                .service_hint()
                .map_or_else(|| service_for_port(port).to_owned(), str::to_owned),
        }
    }
}

/// Results of one port scan.
#[derive(Debug, Clone, Serialize)]
pub struct PortScanReport {
    pub target: String,
    pub scan_type: ScanType,
    pub port_range: String,
    pub timestamp: DateTime<Local>,
    pub scan_method: &'static str,
    pub open_ports: Vec<OpenPort>,
    pub total_open_ports: usize,
}

/// Runs a port scan through whichever [`PortProber`] was selected.
pub struct PortScanner {
    target: String,
    prober: Box<dyn PortProber>,
}

impl PortScanner {
    pub fn new(target: impl Into<String>, prober: Box<dyn PortProber>) -> Self {
        Self {
            target: target.into(),
            prober,
        }
    }

    pub async fn scan(&self, ports: &[u16], scan_type: ScanType) -> PortScanReport {
        let port_range = fmt_port_spec(ports);
        info!(
            "Scanning ports {port_range} on {} using {scan_type} scan",
            self.target
        );

        let open_ports: Vec<OpenPort> = self
            .prober
            .probe_ports(ports, scan_type.protocol())
            .await
            .iter()
            .map(OpenPort::from)
            .collect();

        for open in &open_ports {
            info!("Port {} is open", open.port);
        }
        info!("Found {} open ports", open_ports.len());

        PortScanReport {
            target: self.target.clone(),
            scan_type,
            port_range,
            timestamp: Local::now(),
            scan_method: self.prober.name(),
            total_open_ports: open_ports.len(),
            open_ports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Cancellation;
    use std::net::{IpAddr, Ipv4Addr};

    struct Canned(Vec<ProbeResult>);

    #[async_trait]
    impl PortProber for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn probe_ports(&self, _ports: &[u16], _protocol: Protocol) -> Vec<ProbeResult> {
            self.0.clone()
        }
    }

    fn native() -> NativeProber {
        let probe = SocketProbe::new(IpAddr::V4(Ipv4Addr::LOCALHOST), "localhost", false).unwrap();
        NativeProber::new(
            probe,
            ConcurrentScanner::new(10, Cancellation::new()),
            Duration::from_millis(100),
        )
    }

    fn nmap() -> NmapProber {
        NmapProber::new(
            Nmap::default(),
            "localhost",
            Duration::from_millis(100),
            Cancellation::new(),
        )
    }

    #[test]
    fn syn_with_nmap_selects_nmap() {
        assert_eq!(select_prober(ScanType::Syn, true, native(), nmap()).name(), "nmap");
    }

    #[test]
    fn everything_else_stays_native() {
        assert_eq!(select_prober(ScanType::Syn, false, native(), nmap()).name(), "native");
        assert_eq!(select_prober(ScanType::Tcp, true, native(), nmap()).name(), "native");
        assert_eq!(select_prober(ScanType::Udp, true, native(), nmap()).name(), "native");
    }

    #[tokio::test]
    async fn report_uses_hint_then_port_table() {
        let timeout = Duration::from_secs(1);
        let canned = Canned(vec![
            ProbeResult::open(ProbeTask::new("h", 22, Protocol::Tcp, timeout), Vec::new(), Duration::ZERO),
            ProbeResult::open(ProbeTask::new("h", 2222, Protocol::Tcp, timeout), Vec::new(), Duration::ZERO)
                .with_service_hint("ssh"),
        ]);

        let report = PortScanner::new("h", Box::new(canned))
            .scan(&[22, 2222], ScanType::Tcp)
            .await;

        assert_eq!(report.scan_method, "canned");
        assert_eq!(report.port_range, "22,2222");
        assert_eq!(report.total_open_ports, 2);
        assert_eq!(report.open_ports[0].service, "SSH");
        assert_eq!(report.open_ports[1].service, "ssh");
    }

    #[tokio::test]
    async fn zero_findings_is_a_valid_report() {
        let report = PortScanner::new("h", Box::new(Canned(Vec::new())))
            .scan(&[1, 2, 3], ScanType::Udp)
            .await;

        assert!(report.open_ports.is_empty());
        assert_eq!(report.total_open_ports, 0);
        assert_eq!(report.port_range, "1-3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_nmap_run_returns_promptly() {
        use std::os::unix::fs::PermissionsExt;

        // stands in for an nmap run that would take minutes
        let dir = tempfile::tempdir().unwrap();
        let slow = dir.path().join("slow-nmap");
        std::fs::write(&slow, "#!/bin/sh\nsleep 60\n").unwrap();
        std::fs::set_permissions(&slow, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cancellation = Cancellation::new();
        let prober = NmapProber::new(
            Nmap::new(slow.to_string_lossy()),
            "localhost",
            Duration::from_millis(100),
            cancellation.clone(),
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancellation.cancel();
        });

        let results = tokio::time::timeout(
            Duration::from_secs(5),
            prober.probe_ports(&[22, 80], Protocol::Tcp),
        )
        .await
        .unwrap();

        assert!(results.is_empty());
    }
}
