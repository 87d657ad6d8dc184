//! Subdomain discovery.
//!
//! Three independent [`SubdomainSource`]s propose candidate names. The
//! [`Aggregator`] merges their sets, keeping the first method that found
//! each name, and resolves every survivor once.
pub mod aggregate;
pub mod brute_force;
pub mod cert_transparency;
pub mod zone_transfer;

use crate::address::HostResolver;
use crate::scanner::task::{ProbeResult, ProbeTask};
use aggregate::{Aggregator, SubdomainRecord};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::future;
use log::info;
use serde_derive::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;

/// Deadline for a single name lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for one zone transfer from one server.
pub const ZONE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// How a subdomain was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    BruteForce,
    ZoneTransfer,
    CertTransparency,
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BruteForce => "brute_force",
            Self::ZoneTransfer => "zone_transfer",
            Self::CertTransparency => "cert_transparency",
        };
        f.write_str(name)
    }
}

/// A way of proposing subdomains of a domain. Failures are absorbed by the
/// source and show up as an empty set.
#[async_trait]
pub trait SubdomainSource: Send + Sync {
    fn method(&self) -> DiscoveryMethod;

    async fn discover(&self, domain: &str) -> BTreeSet<String>;
}

/// Normalises a name reported by a zone or a certificate and keeps it only
/// if it is a proper subdomain of `domain`.
pub fn in_scope(name: &str, domain: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    let domain = domain.trim().trim_end_matches('.');
    if name.is_empty() || name.contains('*') {
        return None;
    }

    name.strip_suffix(domain)
        .and_then(|head| head.strip_suffix('.'))
        .filter(|head| !head.is_empty())
        .map(|_| name.to_owned())
}

/// Resolves `task.address()` within the task's deadline. The resolved
/// address travels as the response text of an open result.
pub(crate) async fn lookup(resolver: Arc<dyn HostResolver>, task: ProbeTask) -> ProbeResult {
    let started = Instant::now();
    match time::timeout(task.timeout(), resolver.resolve(task.address())).await {
        Ok(Ok(ip)) => ProbeResult::open(task, ip.to_string().into_bytes(), started.elapsed()),
        Ok(Err(e)) => ProbeResult::error(task, e, started.elapsed()),
        Err(_) => ProbeResult::filtered(task, started.elapsed()),
    }
}

/// Results of one discovery run.
#[derive(Debug, Clone, Serialize)]
pub struct SubdomainReport {
    pub target: String,
    pub timestamp: DateTime<Local>,
    pub methods_used: Vec<DiscoveryMethod>,
    pub subdomains: Vec<SubdomainRecord>,
    pub total_found: usize,
}

/// Runs every source concurrently, then aggregates.
pub struct SubdomainDiscovery {
    sources: Vec<Box<dyn SubdomainSource>>,
    aggregator: Aggregator,
}

impl SubdomainDiscovery {
    pub fn new(sources: Vec<Box<dyn SubdomainSource>>, aggregator: Aggregator) -> Self {
        Self {
            sources,
            aggregator,
        }
    }

    pub async fn discover(&self, domain: &str) -> SubdomainReport {
        info!("Starting subdomain discovery for {domain}");

        let found = future::join_all(self.sources.iter().map(|source| async move {
            let names = source.discover(domain).await;
            info!("{} proposed {} names", source.method(), names.len());
            (source.method(), names)
        }))
        .await;

        let methods_used = found.iter().map(|(method, _)| *method).collect();
        let subdomains = self.aggregator.resolve(aggregate::merge(found)).await;
        info!("Found {} subdomains", subdomains.len());

        SubdomainReport {
            target: domain.to_owned(),
            timestamp: Local::now(),
            methods_used,
            total_found: subdomains.len(),
            subdomains,
        }
    }
}
