//! Wordlist brute force: `word.domain` for every word, kept if it resolves.
use super::{lookup, DiscoveryMethod, SubdomainSource};
use crate::address::HostResolver;
use crate::scanner::{task::ProbeTask, ConcurrentScanner};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

/// Words tried when no wordlist is given.
pub const DEFAULT_WORDS: &[&str] = &[
    "www", "mail", "ftp", "localhost", "webmail", "smtp", "pop", "ns1", "ns2", "webdisk", "ns",
    "cpanel", "whm", "autodiscover", "autoconfig", "mx", "mx1", "mx2", "imap", "pop3", "admin",
    "portal", "api", "dev", "staging", "test", "vpn", "remote", "blog", "shop", "store",
    "mobile", "m", "cdn", "static", "assets", "img", "images", "video", "media", "download",
    "downloads", "app", "apps", "cloud", "secure", "login", "sso", "auth", "support", "help",
    "docs", "documentation", "wiki", "forum", "community", "chat", "beta", "alpha", "demo",
];

pub fn default_words() -> Vec<String> {
    DEFAULT_WORDS.iter().map(|&word| word.to_owned()).collect()
}

/// Reads one word per line, skipping blanks. An unreadable file falls back
/// to [`DEFAULT_WORDS`].
pub async fn load_wordlist(path: Option<&Path>) -> Vec<String> {
    let Some(path) = path else {
        return default_words();
    };

    match fs::read_to_string(path).await {
        Ok(content) => {
            let words: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect();
            info!("Loaded {} words from {}", words.len(), path.display());
            words
        }
        Err(e) => {
            warn!(
                "Failed to load wordlist {}: {e}, using defaults",
                path.display()
            );
            default_words()
        }
    }
}

pub struct BruteForce {
    words: Vec<String>,
    resolver: Arc<dyn HostResolver>,
    scanner: ConcurrentScanner,
    timeout: Duration,
}

impl BruteForce {
    pub fn new(
        words: Vec<String>,
        resolver: Arc<dyn HostResolver>,
        scanner: ConcurrentScanner,
        timeout: Duration,
    ) -> Self {
        Self {
            words,
            resolver,
            scanner,
            timeout,
        }
    }
}

#[async_trait]
impl SubdomainSource for BruteForce {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::BruteForce
    }

    async fn discover(&self, domain: &str) -> BTreeSet<String> {
        info!("Brute forcing {} names under {domain}", self.words.len());
        let tasks = self
            .words
            .iter()
            .map(|word| ProbeTask::lookup(format!("{word}.{domain}"), self.timeout))
            .collect();

        self.scanner
            .run(tasks, |task| lookup(Arc::clone(&self.resolver), task))
            .await
            .into_iter()
            .map(|result| {
                debug!("Found subdomain: {}", result.task().address());
                result.task().address().to_owned()
            })
            .collect()
    }
}
