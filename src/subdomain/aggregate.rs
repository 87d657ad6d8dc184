//! Merging candidate names from every source and attaching addresses.
use super::{lookup, DiscoveryMethod};
use crate::address::HostResolver;
use crate::scanner::{task::ProbeTask, ConcurrentScanner};
use log::debug;
use serde_derive::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Address recorded for a name that did not resolve.
pub const UNRESOLVED: &str = "unresolved";

/// Name → method that found it first. Ordered by name.
pub type Candidates = BTreeMap<String, DiscoveryMethod>;

/// One discovered subdomain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubdomainRecord {
    pub subdomain: String,
    pub ip_address: String,
    pub method: DiscoveryMethod,
}

/// Adds `names` to `candidates`. A name already present keeps its method.
pub fn merge_into(candidates: &mut Candidates, method: DiscoveryMethod, names: BTreeSet<String>) {
    for name in names {
        candidates.entry(name).or_insert(method);
    }
}

/// Folds every `(method, names)` pair, in order, into one candidate map.
pub fn merge<I>(sets: I) -> Candidates
where
    I: IntoIterator<Item = (DiscoveryMethod, BTreeSet<String>)>,
{
    sets.into_iter()
        .fold(Candidates::new(), |mut candidates, (method, names)| {
            merge_into(&mut candidates, method, names);
            candidates
        })
}

/// Resolves merged candidates under a bounded pool.
#[derive(Clone)]
pub struct Aggregator {
    resolver: Arc<dyn HostResolver>,
    scanner: ConcurrentScanner,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(resolver: Arc<dyn HostResolver>, scanner: ConcurrentScanner, timeout: Duration) -> Self {
        Self {
            resolver,
            scanner,
            timeout,
        }
    }

    /// One lookup per candidate. Every candidate appears in the output, with
    /// [`UNRESOLVED`] when its lookup failed or never ran.
    pub async fn resolve(&self, candidates: Candidates) -> Vec<SubdomainRecord> {
        let tasks = candidates
            .keys()
            .map(|name| ProbeTask::lookup(name.as_str(), self.timeout))
            .collect();

        let mut addresses: HashMap<String, String> = self
            .scanner
            .run(tasks, |task| lookup(Arc::clone(&self.resolver), task))
            .await
            .into_iter()
            .map(|result| (result.task().address().to_owned(), result.response_text()))
            .collect();
        debug!("{} of {} candidates resolved", addresses.len(), candidates.len());

        candidates
            .into_iter()
            .map(|(subdomain, method)| SubdomainRecord {
                ip_address: addresses
                    .remove(&subdomain)
                    .unwrap_or_else(|| UNRESOLVED.to_owned()),
                subdomain,
                method,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::scanner::Cancellation;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    struct OnlyWww;

    #[async_trait]
    impl HostResolver for OnlyWww {
        async fn resolve(&self, host: &str) -> Result<IpAddr> {
            if host.starts_with("www.") {
                Ok(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 80)))
            } else {
                Err(Error::Resolution(host.to_owned()))
            }
        }
    }

    #[test]
    fn first_method_wins() {
        let merged = merge([
            (DiscoveryMethod::CertTransparency, names(&["www.t.com", "api.t.com"])),
            (DiscoveryMethod::BruteForce, names(&["www.t.com", "mail.t.com"])),
        ]);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged["www.t.com"], DiscoveryMethod::CertTransparency);
        assert_eq!(merged["mail.t.com"], DiscoveryMethod::BruteForce);
    }

    #[test]
    fn merge_is_commutative_and_idempotent_on_names() {
        let a = names(&["a.t.com", "b.t.com"]);
        let b = names(&["b.t.com", "c.t.com"]);
        let c = names(&["c.t.com", "d.t.com"]);

        let mut staged = merge([
            (DiscoveryMethod::BruteForce, a.clone()),
            (DiscoveryMethod::ZoneTransfer, b.clone()),
        ]);
        merge_into(&mut staged, DiscoveryMethod::CertTransparency, c.clone());

        let reversed = merge([
            (DiscoveryMethod::CertTransparency, c.clone()),
            (DiscoveryMethod::ZoneTransfer, b.clone()),
            (DiscoveryMethod::BruteForce, a.clone()),
        ]);

        let mut twice = staged.clone();
        merge_into(&mut twice, DiscoveryMethod::BruteForce, a);
        merge_into(&mut twice, DiscoveryMethod::ZoneTransfer, b);

        let keys = |m: &Candidates| m.keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys(&staged), keys(&reversed));
        assert_eq!(twice, staged);
        assert_eq!(keys(&staged), vec!["a.t.com", "b.t.com", "c.t.com", "d.t.com"]);
    }

    #[tokio::test]
    async fn unresolved_names_are_kept_with_sentinel() {
        let aggregator = Aggregator::new(
            Arc::new(OnlyWww),
            ConcurrentScanner::new(4, Cancellation::new()),
            Duration::from_secs(1),
        );
        let candidates = merge([(DiscoveryMethod::ZoneTransfer, names(&["www.t.com", "db.t.com"]))]);

        let records = aggregator.resolve(candidates).await;

        assert_eq!(
            records,
            vec![
                SubdomainRecord {
                    subdomain: "db.t.com".to_owned(),
                    ip_address: UNRESOLVED.to_owned(),
                    method: DiscoveryMethod::ZoneTransfer,
                },
                SubdomainRecord {
                    subdomain: "www.t.com".to_owned(),
                    ip_address: "192.0.2.80".to_owned(),
                    method: DiscoveryMethod::ZoneTransfer,
                },
            ]
        );
    }

    #[tokio::test]
    async fn nothing_to_resolve() {
        let aggregator = Aggregator::new(
            Arc::new(OnlyWww),
            ConcurrentScanner::new(4, Cancellation::new()),
            Duration::from_secs(1),
        );
        assert!(aggregator.resolve(Candidates::new()).await.is_empty());
    }
}
