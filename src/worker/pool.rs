//! Bounded handler pool
//!
//! Each poll batch is fanned out over at most `concurrency` concurrent
//! handler tasks. Every handler runs under a timeout; a timed-out handler
//! is dropped (releasing its event claim) and reported as
//! `ProviderUnavailable` so the event is retried on a later cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::types::{Result, TipRelayError};

/// Configuration for the handler pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Handlers allowed to run at once
    pub concurrency: usize,
    /// Upper bound on one handler invocation
    pub handler_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            handler_timeout: Duration::from_secs(60),
        }
    }
}

pub struct HandlerPool {
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    concurrency: usize,
}

impl HandlerPool {
    pub fn new(config: PoolConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            timeout: config.handler_timeout,
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `handler` over every item. Results come back in input order.
    pub async fn run_all<T, O, F, Fut>(&self, items: Vec<T>, handler: F) -> Vec<Result<O>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<O>> + Send + 'static,
        O: Send + 'static,
    {
        let total = items.len();
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let work = handler(item);
            let semaphore = Arc::clone(&self.semaphore);
            let timeout = self.timeout;

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => match tokio::time::timeout(timeout, work).await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(index, "Handler timed out after {:?}", timeout);
                            Err(TipRelayError::ProviderUnavailable(format!(
                                "handler timed out after {:?}",
                                timeout
                            )))
                        }
                    },
                    Err(_) => Err(TipRelayError::Internal("handler pool closed".into())),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<O>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!("Handler task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(TipRelayError::Internal("handler task panicked".into())))
            })
            .collect()
    }
}
