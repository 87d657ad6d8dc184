//! End-to-end scenarios against listeners created inside each test.
use async_trait::async_trait;
use spotter::address::HostResolver;
use spotter::error::{Error, Result};
use spotter::input::{parse_ports_and_ranges, OutputFormat, ScanType};
use spotter::portscan::{NativeProber, PortScanner};
use spotter::report::Report;
use spotter::scanner::socket::SocketProbe;
use spotter::scanner::task::{ProbeState, Protocol};
use spotter::scanner::{Cancellation, ConcurrentScanner};
use spotter::service::ServiceDetector;
use spotter::subdomain::aggregate::Aggregator;
use spotter::subdomain::brute_force::BruteForce;
use spotter::subdomain::zone_transfer::ZoneTransfer;
use spotter::subdomain::{DiscoveryMethod, SubdomainDiscovery, SubdomainSource};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WWW: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 44));

struct OnlyWww;

#[async_trait]
impl HostResolver for OnlyWww {
    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if host == "www.example.com" {
            Ok(WWW)
        } else {
            Err(Error::Resolution(host.to_owned()))
        }
    }
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Answers every AXFR query with a header-only REFUSED response.
async fn refusing_name_server() -> SocketAddr {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let len = stream.read_u16().await.unwrap();
            let mut query = vec![0; usize::from(len)];
            stream.read_exact(&mut query).await.unwrap();

            // id, QR + RCODE 5, all counts zero
            let mut response = vec![query[0], query[1], 0x80, 0x05];
            response.extend_from_slice(&[0; 8]);
            stream.write_u16(12).await.unwrap();
            stream.write_all(&response).await.unwrap();
        }
    });
    addr
}

fn brute_force(words: &[&str], resolver: Arc<dyn HostResolver>) -> BruteForce {
    BruteForce::new(
        words.iter().map(|&w| w.to_owned()).collect(),
        resolver,
        ConcurrentScanner::new(20, Cancellation::new()),
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn only_the_listening_port_is_reported() {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let open = listener.local_addr().unwrap().port();
    tokio::spawn(async move { while listener.accept().await.is_ok() {} });

    let spec = format!(
        "{},{},{open},{}",
        closed_port().await,
        closed_port().await,
        closed_port().await
    );
    let ports = parse_ports_and_ranges(&spec).unwrap();

    let prober = NativeProber::new(
        SocketProbe::new(LOCALHOST, "127.0.0.1", false).unwrap(),
        ConcurrentScanner::new(50, Cancellation::new()),
        Duration::from_millis(500),
    );
    let report = PortScanner::new("127.0.0.1", Box::new(prober))
        .scan(&ports, ScanType::Tcp)
        .await;

    assert_eq!(report.total_open_ports, 1);
    assert_eq!(report.open_ports[0].port, open);
    assert_eq!(report.open_ports[0].protocol, Protocol::Tcp);
    assert_eq!(report.open_ports[0].state, ProbeState::Open);
    assert_eq!(report.scan_method, "native");
}

#[tokio::test]
async fn ssh_banner_is_identified() {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(b"SSH-2.0-OpenSSH_8.2p1\r\n").await;
        }
    });
    let closed = closed_port().await;

    let detector = ServiceDetector::new(
        SocketProbe::new(LOCALHOST, "127.0.0.1", true).unwrap(),
        ConcurrentScanner::new(10, Cancellation::new()),
        Duration::from_millis(500),
    );
    let report = detector.detect(&[closed, port]).await;

    assert_eq!(report.total_services, 1);
    let ssh = &report.services[0];
    assert_eq!((ssh.port, ssh.name.as_str(), ssh.version.as_str()), (port, "SSH", "8.2"));
}

#[tokio::test]
async fn brute_force_keeps_only_resolving_names() {
    let resolver: Arc<dyn HostResolver> = Arc::new(OnlyWww);
    let discovery = SubdomainDiscovery::new(
        vec![Box::new(brute_force(&["www", "mail"], Arc::clone(&resolver)))],
        Aggregator::new(
            resolver,
            ConcurrentScanner::new(20, Cancellation::new()),
            Duration::from_secs(1),
        ),
    );

    let report = discovery.discover("example.com").await;

    assert_eq!(report.total_found, 1);
    assert_eq!(report.subdomains[0].subdomain, "www.example.com");
    assert_eq!(report.subdomains[0].ip_address, WWW.to_string());
    assert_eq!(report.subdomains[0].method, DiscoveryMethod::BruteForce);
}

#[tokio::test]
async fn refused_zone_transfers_leave_other_methods_alone() {
    let resolver: Arc<dyn HostResolver> = Arc::new(OnlyWww);
    let zone_transfer = ZoneTransfer::new(
        hickory_resolver::TokioAsyncResolver::tokio(
            hickory_resolver::config::ResolverConfig::new(),
            hickory_resolver::config::ResolverOpts::default(),
        ),
        Duration::from_secs(2),
    )
    .with_servers(vec![refusing_name_server().await, refusing_name_server().await]);
    assert!(zone_transfer.discover("example.com").await.is_empty());

    let sources: Vec<Box<dyn SubdomainSource>> = vec![
        Box::new(brute_force(&["www", "mail"], Arc::clone(&resolver))),
        Box::new(zone_transfer),
    ];
    let report = SubdomainDiscovery::new(
        sources,
        Aggregator::new(
            resolver,
            ConcurrentScanner::new(20, Cancellation::new()),
            Duration::from_secs(1),
        ),
    )
    .discover("example.com")
    .await;

    assert_eq!(
        report.methods_used,
        vec![DiscoveryMethod::BruteForce, DiscoveryMethod::ZoneTransfer]
    );
    assert_eq!(report.total_found, 1);
    assert_eq!(report.subdomains[0].subdomain, "www.example.com");
}

#[tokio::test]
async fn zero_findings_still_render_in_every_format() {
    let prober = NativeProber::new(
        SocketProbe::new(LOCALHOST, "127.0.0.1", false).unwrap(),
        ConcurrentScanner::new(5, Cancellation::new()),
        Duration::from_millis(200),
    );
    let scan = PortScanner::new("127.0.0.1", Box::new(prober))
        .scan(&[closed_port().await], ScanType::Tcp)
        .await;

    let mut report = Report::new();
    report.insert("port_scan", &scan).unwrap();

    for format in [OutputFormat::Json, OutputFormat::Xml, OutputFormat::Txt] {
        let rendered = report.render(format).unwrap();
        assert!(rendered.contains("total_open_ports"), "{format:?}: {rendered}");
    }
}
