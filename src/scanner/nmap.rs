//! Optional nmap backend.
//!
//! When nmap is installed it can stand in for the native TCP prober. Its XML
//! report is normalised into [`ProbeResult`]s so nothing downstream can tell
//! which backend produced a verdict.
use super::task::{ProbeResult, ProbeTask, Protocol};
use crate::error::{Error, Result};
use log::{debug, warn};
use serde_derive::Deserialize;
use std::time::{Duration, Instant};
use tokio::{process::Command, time};

/// Ceiling for a whole nmap run.
pub const NMAP_RUN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<Host>,
}

#[derive(Debug, Deserialize)]
struct Host {
    ports: Option<Ports>,
}

#[derive(Debug, Deserialize)]
struct Ports {
    #[serde(rename = "port", default)]
    ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
struct Port {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: u16,
    state: State,
    service: Option<Service>,
}

#[derive(Debug, Deserialize)]
struct State {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(rename = "@name")]
    name: String,
}

/// One `<port>` element of an nmap report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmapPort {
    pub port: u16,
    pub protocol: Protocol,
    pub state: String,
    pub service: String,
}

/// Runs nmap as a subprocess.
#[derive(Debug, Clone)]
pub struct Nmap {
    program: String,
}

impl Default for Nmap {
    fn default() -> Self {
        Self::new("nmap")
    }
}

impl Nmap {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Checks once whether the binary runs at all. Absence is a capability
    /// downgrade, never an error.
    pub async fn is_available(&self) -> bool {
        match Command::new(&self.program).arg("--version").output().await {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                warn!("{} --version exited with {}", self.program, output.status);
                false
            }
            Err(e) => {
                warn!("{} not found, using the native scanner: {e}", self.program);
                false
            }
        }
    }

    /// Scans `ports` (already in `a-b,c` syntax) on `target`.
    pub async fn scan(&self, target: &str, ports: &str, timeout: Duration) -> Result<Vec<ProbeResult>> {
        let started = Instant::now();
        let args = ["-p", ports, "-T4", "--open", "-oX", "-", target];
        debug!("Running {} {}", self.program, args.join(" "));

        let output = time::timeout(
            NMAP_RUN_TIMEOUT,
            Command::new(&self.program).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| Error::Timeout(NMAP_RUN_TIMEOUT))?
        .map_err(|e| Error::ToolUnavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(Error::ToolUnavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let xml = String::from_utf8_lossy(&output.stdout);
        let elapsed = started.elapsed();
        Ok(parse_report(&xml)?
            .into_iter()
            .map(|port| normalise(target, port, timeout, elapsed))
            .collect())
    }
}

/// Extracts every `<port>` element from an nmap XML report.
pub fn parse_report(xml: &str) -> Result<Vec<NmapPort>> {
    let run: NmapRun = quick_xml::de::from_str(xml).map_err(|e| Error::parse("nmap XML report", e))?;

    Ok(run
        .hosts
        .into_iter()
        .filter_map(|host| host.ports)
        .flat_map(|ports| ports.ports)
        .map(|port| NmapPort {
            port: port.portid,
            protocol: match port.protocol.as_str() {
                "udp" => Protocol::Udp,
                _ => Protocol::Tcp,
            },
            state: port.state.state,
            service: port.service.map_or_else(|| "unknown".to_owned(), |s| s.name),
        })
        .collect())
}

fn normalise(target: &str, port: NmapPort, timeout: Duration, elapsed: Duration) -> ProbeResult {
    let task = ProbeTask::new(target, port.port, port.protocol, timeout);
    let result = match port.state.as_str() {
        "open" => ProbeResult::open(task, Vec::new(), elapsed),
        "closed" => ProbeResult::closed(task, elapsed),
        "filtered" | "open|filtered" | "closed|filtered" | "unfiltered" => {
            ProbeResult::filtered(task, elapsed)
        }
        other => ProbeResult::error(task, format!("unknown nmap state {other:?}"), elapsed),
    };
    result.with_service_hint(port.service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::task::ProbeState;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -p 20-22,80 -T4 --open -oX - scanme.example" start="1700000000" version="7.94">
<scaninfo type="syn" protocol="tcp" numservices="4" services="20-22,80"/>
<verbose level="0"/>
<debugging level="0"/>
<host starttime="1700000000" endtime="1700000001">
<status state="up" reason="syn-ack" reason_ttl="0"/>
<address addr="192.0.2.10" addrtype="ipv4"/>
<hostnames><hostname name="scanme.example" type="user"/></hostnames>
<ports>
<extraports state="closed" count="2"><extrareasons reason="reset" count="2"/></extraports>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack" reason_ttl="64"/><service name="ssh" method="table" conf="3"/></port>
<port protocol="tcp" portid="80"><state state="filtered" reason="no-response" reason_ttl="0"/></port>
</ports>
<times srtt="100" rttvar="100" to="100000"/>
</host>
<runstats><finished time="1700000001" elapsed="1.00" exit="success"/><hosts up="1" down="0" total="1"/></runstats>
</nmaprun>
"#;

    #[test]
    fn parses_ports_from_report() {
        let ports = parse_report(REPORT).unwrap();
        assert_eq!(
            ports,
            vec![
                NmapPort {
                    port: 22,
                    protocol: Protocol::Tcp,
                    state: "open".to_owned(),
                    service: "ssh".to_owned(),
                },
                NmapPort {
                    port: 80,
                    protocol: Protocol::Tcp,
                    state: "filtered".to_owned(),
                    service: "unknown".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn report_without_hosts_is_empty() {
        let xml = r#"<nmaprun scanner="nmap"><runstats><finished time="1"/></runstats></nmaprun>"#;
        assert!(parse_report(xml).unwrap().is_empty());
    }

    #[test]
    fn bad_port_number_is_a_parse_error() {
        let xml = r#"<nmaprun><host><ports><port protocol="tcp" portid="ssh"><state state="open"/></port></ports></host></nmaprun>"#;
        assert!(matches!(parse_report(xml), Err(Error::Parse { .. })));
    }

    #[test]
    fn normalised_results_match_native_shape() {
        let results: Vec<ProbeResult> = parse_report(REPORT)
            .unwrap()
            .into_iter()
            .map(|port| normalise("scanme.example", port, Duration::from_secs(1), Duration::ZERO))
            .collect();

        assert_eq!(results[0].state(), ProbeState::Open);
        assert_eq!(results[0].response(), Some(&[][..]));
        assert_eq!(results[0].service_hint(), Some("ssh"));
        assert_eq!(results[1].state(), ProbeState::Filtered);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let nmap = Nmap::new("definitely-not-an-installed-scanner");
        assert!(!nmap.is_available().await);
    }
}
