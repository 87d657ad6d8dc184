//! Core functionality for actual scanning behaviour.
//!
//! [`ConcurrentScanner`] fans a batch of [`ProbeTask`]s out to at most
//! `worker_limit` in-flight probes, absorbs every failure into the probe's
//! own verdict and hands back results sorted by task identity, whatever
//! order they completed in.
pub mod nmap;
pub mod socket;
pub mod task;

use futures::{future, stream, StreamExt};
use log::debug;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use task::{ProbeResult, ProbeState, ProbeTask};

/// Default number of concurrent port probes.
pub const DEFAULT_PORT_WORKERS: usize = 50;

/// Default number of concurrent subdomain resolutions.
pub const DEFAULT_SUBDOMAIN_WORKERS: usize = 20;

/// How often [`Cancellation::cancelled`] looks at the flag.
pub const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Cooperative stop signal shared between the caller and running scans.
///
/// Cancelling stops new probes from being dispatched. Probes already in
/// flight finish or hit their own deadline.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called. The flag is
    /// polled, so this lags by up to [`CANCEL_POLL`].
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(CANCEL_POLL).await;
        }
    }
}

/// Bounded worker pool for short-lived network probes.
#[derive(Debug, Clone)]
pub struct ConcurrentScanner {
    worker_limit: usize,
    cancellation: Cancellation,
}

impl ConcurrentScanner {
    /// A `worker_limit` of zero is corrected to one.
    pub fn new(worker_limit: usize, cancellation: Cancellation) -> Self {
        Self {
            worker_limit: worker_limit.max(1),
            cancellation,
        }
    }

    pub const fn worker_limit(&self) -> usize {
        self.worker_limit
    }

    pub const fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Runs every task and returns only the open results, sorted by identity.
    pub async fn run<F, Fut>(&self, tasks: Vec<ProbeTask>, probe: F) -> Vec<ProbeResult>
    where
        F: Fn(ProbeTask) -> Fut,
        Fut: Future<Output = ProbeResult> + Send + 'static,
    {
        self.execute(tasks, probe)
            .await
            .into_iter()
            .filter(ProbeResult::is_open)
            .collect()
    }

    /// Runs every task and returns one result per dispatched task, sorted by
    /// identity and deduplicated on it.
    ///
    /// Each probe runs as its own tokio task so a slow probe never stalls
    /// collection of the others. A probe that panics is reported as
    /// [`ProbeState::Error`]. Once cancelled, undispatched tasks are skipped
    /// and whatever was already collected is returned.
    pub async fn execute<F, Fut>(&self, tasks: Vec<ProbeTask>, probe: F) -> Vec<ProbeResult>
    where
        F: Fn(ProbeTask) -> Fut,
        Fut: Future<Output = ProbeResult> + Send + 'static,
    {
        let tasks_len = tasks.len();
        debug!(
            "Start probing. \nWorker limit {}\nNumber of tasks {}",
            self.worker_limit, tasks_len
        );

        let cancellation = self.cancellation.clone();
        let mut results = stream::iter(tasks)
            .take_while(move |_| future::ready(!cancellation.is_cancelled()))
            .map(|task| {
                let handle = tokio::spawn(probe(task.clone()));
                async move {
                    handle.await.unwrap_or_else(|e| {
                        ProbeResult::error(task, format!("probe aborted: {e}"), Duration::ZERO)
                    })
                }
            })
            .buffer_unordered(self.worker_limit)
            .collect::<Vec<_>>()
            .await;

        if results.len() < tasks_len {
            debug!(
                "Scan cancelled after {} of {} tasks",
                results.len(),
                tasks_len
            );
        }

        results.sort_by(|a, b| a.task().identity().cmp(&b.task().identity()));
        results.dedup_by(|a, b| a.task().identity() == b.task().identity());

        debug!("Verdicts: {:?}", tally(&results));
        if let Some(slowest) = results.iter().max_by_key(|r| r.elapsed()) {
            debug!(
                "Slowest probe {}:{} took {:?}",
                slowest.task().address(),
                slowest.task().port(),
                slowest.elapsed()
            );
        }
        results
    }
}

fn tally(results: &[ProbeResult]) -> HashMap<ProbeState, usize> {
    results.iter().fold(HashMap::new(), |mut counts, result| {
        *counts.entry(result.state()).or_default() += 1;
        counts
    })
}
