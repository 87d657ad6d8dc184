use anyhow::Context;
use log::{debug, info};
use spotter::address::{get_resolver, resolve_target, DnsResolver, HostResolver};
use spotter::dns::DnsEnumerator;
use spotter::input::{Config, Opts, ScanType};
use spotter::portscan::{select_prober, NativeProber, NmapProber, PortScanner};
use spotter::report::{save_results, Report};
use spotter::scanner::{nmap::Nmap, socket::SocketProbe, Cancellation, ConcurrentScanner};
use spotter::service::ServiceDetector;
use spotter::subdomain::{
    aggregate::Aggregator, brute_force::load_wordlist, brute_force::BruteForce,
    cert_transparency::CertTransparency, zone_transfer::ZoneTransfer, SubdomainDiscovery,
    SubdomainSource, LOOKUP_TIMEOUT, ZONE_TRANSFER_TIMEOUT,
};
use spotter::whois::WhoisClient;
use spotter::{detail, funny_opening, output, warning};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Runs the selected modules in order and saves whatever was gathered.
#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut opts: Opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    init_logging(opts.verbose);
    debug!("Main() `opts` arguments are {opts:?}");

    if !opts.accessible {
        funny_opening!();
    }

    if !opts.any_module() {
        warning!(
            "No modules selected. Use --full or pick modules, see --help.",
            opts.accessible
        );
        anyhow::bail!("no modules selected");
    }

    let dns = DnsResolver::new(get_resolver(opts.resolver.as_deref()).await);
    let ip = resolve_target(&opts.target, &dns)
        .await
        .with_context(|| format!("Target {} could not be resolved", opts.target))?;
    detail!(format!("Target {} resolves to {ip}", opts.target), opts.accessible);

    let cancellation = Cancellation::new();
    listen_for_interrupt(cancellation.clone(), opts.accessible);

    let mut results = Report::new();
    let timeout = Duration::from_millis(opts.timeout);
    let port_scanner = ConcurrentScanner::new(opts.workers, cancellation.clone());

    if opts.full || opts.whois {
        let report = WhoisClient::default().lookup(&opts.target).await;
        match &report.error {
            Some(e) => warning!(format!("WHOIS lookup failed: {e}"), opts.accessible),
            None => output!(
                format!(
                    "WHOIS: registrar {}",
                    report.whois_data.registrar.as_deref().unwrap_or("unknown")
                ),
                opts.accessible
            ),
        }
        results.insert("whois", &report)?;
    }

    if (opts.full || opts.dns_enum) && !interrupted(&cancellation, opts.accessible) {
        let report = DnsEnumerator::new(dns.inner().clone())
            .enumerate(&opts.target)
            .await;
        for (kind, records) in &report.records {
            output!(format!("{} {kind} record(s)", records.len()), opts.accessible);
        }
        results.insert("dns_enumeration", &report)?;
    }

    if (opts.full || opts.port_scan) && !interrupted(&cancellation, opts.accessible) {
        let native = NativeProber::new(
            SocketProbe::new(ip, &opts.target, false)?,
            port_scanner.clone(),
            timeout,
        );
        let nmap = Nmap::default();
        let nmap_available = opts.scan_type == ScanType::Syn && nmap.is_available().await;
        let prober = select_prober(
            opts.scan_type,
            nmap_available,
            native,
            NmapProber::new(
                nmap,
                &opts.target,
                timeout,
                port_scanner.cancellation().clone(),
            ),
        );

        let report = PortScanner::new(&opts.target, prober)
            .scan(&opts.ports, opts.scan_type)
            .await;
        for open in &report.open_ports {
            output!(
                format!("{}/{} open {}", open.port, open.protocol, open.service),
                opts.accessible
            );
        }
        results.insert("port_scan", &report)?;
    }

    if (opts.full || opts.service_detect) && !interrupted(&cancellation, opts.accessible) {
        let detector = ServiceDetector::new(
            SocketProbe::new(ip, &opts.target, true)?,
            port_scanner.clone(),
            Duration::from_millis(opts.banner_timeout),
        );
        let report = detector
            .detect(opts.specific_ports.as_deref().unwrap_or_default())
            .await;
        for service in &report.services {
            output!(
                format!("{}: {} {}", service.port, service.name, service.version),
                opts.accessible
            );
        }
        results.insert("service_detection", &report)?;
    }

    if (opts.full || opts.subdomain_discovery) && !interrupted(&cancellation, opts.accessible) {
        if opts.target.parse::<IpAddr>().is_ok() {
            warning!(
                "Subdomain discovery needs a domain, skipping it for an IP target",
                opts.accessible
            );
        } else {
            let host_resolver: Arc<dyn HostResolver> = Arc::new(dns.clone());
            let lookups = ConcurrentScanner::new(opts.subdomain_workers, cancellation.clone());
            let words = load_wordlist(opts.wordlist.as_deref()).await;

            let sources: Vec<Box<dyn SubdomainSource>> = vec![
                Box::new(BruteForce::new(
                    words,
                    Arc::clone(&host_resolver),
                    lookups.clone(),
                    LOOKUP_TIMEOUT,
                )),
                Box::new(ZoneTransfer::new(dns.inner().clone(), ZONE_TRANSFER_TIMEOUT)),
                Box::new(CertTransparency::new(opts.ct_endpoint.as_str())?),
            ];
            let aggregator = Aggregator::new(host_resolver, lookups, LOOKUP_TIMEOUT);

            let report = SubdomainDiscovery::new(sources, aggregator)
                .discover(&opts.target)
                .await;
            for record in &report.subdomains {
                output!(
                    format!("{} -> {} ({})", record.subdomain, record.ip_address, record.method),
                    opts.accessible
                );
            }
            results.insert("subdomain_discovery", &report)?;
        }
    }

    if opts.no_save || results.is_empty() {
        return Ok(());
    }

    let path = save_results(
        &results,
        &opts.output_dir,
        &opts.target,
        opts.output_format,
    )
    .context("Could not save results")?;
    output!(format!("Results saved to: {}", path.display()), opts.accessible);

    Ok(())
}

/// `-v` raises the default filter for this crate to debug. `RUST_LOG`
/// still wins.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "info,spotter=debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Ctrl-C stops dispatching new probes. Running modules return what they
/// have and the rest are skipped.
fn listen_for_interrupt(cancellation: Cancellation, accessible: bool) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warning!(
                "Interrupted, saving partial results. Press Ctrl-C again to abort.",
                accessible
            );
            cancellation.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
}

fn interrupted(cancellation: &Cancellation, accessible: bool) -> bool {
    if cancellation.is_cancelled() {
        info!("Skipping remaining modules after interrupt");
        detail!("Skipping remaining modules", accessible);
        return true;
    }
    false
}
