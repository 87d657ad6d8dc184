//! Name resolution: resolver construction, the [`HostResolver`] capability
//! and the up-front target check every scan performs.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use log::debug;
use tokio::{fs, io};

use crate::error::{Error, Result};

/// Resolves a host name to one address.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr>;
}

/// Resolves through the system resolver first and falls back to a hickory
/// resolver, the way a user's own tools would see the name.
#[derive(Clone)]
pub struct DnsResolver {
    backup: TokioAsyncResolver,
}

impl DnsResolver {
    pub const fn new(backup: TokioAsyncResolver) -> Self {
        Self { backup }
    }

    /// Access to the underlying resolver for record-level queries.
    pub const fn inner(&self) -> &TokioAsyncResolver {
        &self.backup
    }
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if let Ok(ip) = IpAddr::from_str(host) {
            return Ok(ip);
        }

        if let Ok(mut addrs) = tokio::net::lookup_host((host, 80)).await {
            if let Some(addr) = addrs.next() {
                return Ok(addr.ip());
            }
        }

        match self.backup.lookup_ip(host).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .ok_or_else(|| Error::Resolution(host.to_owned())),
            Err(e) => {
                debug!("Backup resolver failed for {host}: {e}");
                Err(Error::Resolution(host.to_owned()))
            }
        }
    }
}

/// Resolves the scan target before any probe is sent. Failure here is the
/// one resolution error that aborts a run.
pub async fn resolve_target(target: &str, resolver: &dyn HostResolver) -> Result<IpAddr> {
    let target = target.trim();
    if target.is_empty() {
        return Err(Error::InvalidInput("empty target".to_owned()));
    }
    resolver.resolve(target).await
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
pub async fn get_resolver(resolver: Option<&str>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses an input file of resolver IPs, one per line.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}
