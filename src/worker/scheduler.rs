//! Poll scheduler
//!
//! Owns one interval loop per poller. Shutdown stops scheduling new cycles;
//! a cycle already running finishes (its handlers complete or time out)
//! within the grace period, after which the loop is aborted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::types::Result;

/// Counters for one poll cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Events handed to handlers
    pub fetched: usize,
    /// Events handled to completion
    pub handled: usize,
    /// Already processed or claimed elsewhere
    pub duplicates: usize,
    /// Left for a later cycle (deferred or transient failure)
    pub deferred: usize,
    /// Non-transient handler errors
    pub failed: usize,
}

/// An event source polled on its own cadence
#[async_trait]
pub trait Poller: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// Fetch new events and run them through their handlers
    async fn poll_once(&self) -> Result<PollReport>;
}

pub struct PollScheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PollScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Start polling `poller`. The first cycle runs immediately.
    pub fn spawn(&mut self, poller: Arc<dyn Poller>) {
        let name = poller.name().to_string();
        let shutdown_rx = self.shutdown_tx.subscribe();

        info!(poller = %name, interval = ?poller.interval(), "Starting poller");
        let handle = tokio::spawn(run_poller(poller, shutdown_rx));
        self.tasks.push((name, handle));
    }

    pub fn poller_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop scheduling and wait up to `grace` for running cycles
    pub async fn shutdown(self, grace: Duration) {
        info!("Stopping {} pollers", self.tasks.len());
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + grace;
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(poller = %name, "Poller stopped"),
                Ok(Err(e)) => error!(poller = %name, "Poller task failed: {}", e),
                Err(_) => {
                    warn!(poller = %name, "Poller did not stop within grace period, aborting");
                    handle.abort();
                }
            }
        }
        info!("Poll scheduler stopped");
    }
}

async fn run_poller(poller: Arc<dyn Poller>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(poller.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match poller.poll_once().await {
            Ok(report) if report == PollReport::default() => {}
            Ok(report) => debug!(poller = %poller.name(), report = ?report, "Poll cycle complete"),
            Err(e) if e.is_transient() => {
                warn!(poller = %poller.name(), error = %e, "Poll cycle failed, retrying next tick")
            }
            Err(e) => error!(poller = %poller.name(), error = %e, "Poll cycle failed"),
        }
    }

    debug!(poller = %poller.name(), "Poll loop exited");
}
