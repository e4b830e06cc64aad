//! Event pollers: ledger blocks, inbox messages, tip posts
//!
//! Each poller fetches one batch, fans it out over the handler pool and
//! folds the results into a [`PollReport`]. Dedupe happens inside the
//! handlers through the event ledger.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::clients::{LedgerClient, LedgerTransaction, SocialClient};
use crate::db::{events, Database};
use crate::services::{
    InboxOutcome, MentionHandler, MentionOutcome, RegistrationOrchestrator, RegistrationOutcome,
    RelayOutcome, UserRegistry,
};
use crate::types::{Result, TipRelayError};

use super::pool::HandlerPool;
use super::scheduler::{PollReport, Poller};

/// Cursor row used by the block poller
pub const BLOCK_CURSOR: &str = "blocks";

/// How one handler result counts in the report
enum Tally {
    Handled,
    Duplicate,
    Deferred,
}

/// Fold handler results into `report`. Returns false if any event was left
/// for a later cycle.
fn tally<O>(report: &mut PollReport, results: Vec<Result<O>>, classify: impl Fn(&O) -> Tally) -> bool {
    let mut complete = true;
    for result in results {
        match result {
            Ok(outcome) => match classify(&outcome) {
                Tally::Handled => report.handled += 1,
                Tally::Duplicate => report.duplicates += 1,
                Tally::Deferred => {
                    report.deferred += 1;
                    complete = false;
                }
            },
            Err(e) if e.is_transient() => {
                warn!(error = %e, kind = e.kind(), "Handler failed, will retry");
                report.deferred += 1;
                complete = false;
            }
            Err(e) => {
                error!(error = %e, kind = e.kind(), "Handler failed");
                report.failed += 1;
            }
        }
    }
    complete
}

// =============================================================================
// Blocks
// =============================================================================

/// Polls new blocks for transactions addressed to users with a pending
/// registration.
///
/// The height cursor is persisted and advances only past blocks whose
/// transactions all reached a terminal outcome.
pub struct BlockPoller {
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<UserRegistry>,
    orchestrator: Arc<RegistrationOrchestrator>,
    db: Arc<Database>,
    pool: Arc<HandlerPool>,
    interval: Duration,
    start_height: u64,
}

impl BlockPoller {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        registry: Arc<UserRegistry>,
        orchestrator: Arc<RegistrationOrchestrator>,
        db: Arc<Database>,
        pool: Arc<HandlerPool>,
        interval: Duration,
        start_height: u64,
    ) -> Self {
        Self {
            ledger,
            registry,
            orchestrator,
            db,
            pool,
            interval,
            start_height,
        }
    }

    pub fn cursor(&self) -> Result<u64> {
        Ok(self
            .db
            .with_conn(|conn| events::get_cursor(conn, BLOCK_CURSOR))?
            .unwrap_or(self.start_height))
    }
}

#[async_trait]
impl Poller for BlockPoller {
    fn name(&self) -> &str {
        "blocks"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self) -> Result<PollReport> {
        let cursor = self.cursor()?;
        let blocks = self.ledger.blocks_after(cursor).await?;
        let mut report = PollReport::default();
        if blocks.is_empty() {
            return Ok(report);
        }

        let pending: HashSet<String> = self
            .registry
            .pending_addresses()?
            .into_iter()
            .map(|(_, address)| address)
            .collect();

        let mut reached = cursor;
        for block in blocks {
            let candidates: Vec<LedgerTransaction> = block
                .transactions
                .into_iter()
                .filter(|tx| pending.contains(&tx.recipient_address))
                .collect();
            report.fetched += candidates.len();

            let orchestrator = Arc::clone(&self.orchestrator);
            let results = self
                .pool
                .run_all(candidates, move |tx| {
                    let orchestrator = Arc::clone(&orchestrator);
                    async move { orchestrator.handle_ledger_transaction(&tx).await }
                })
                .await;

            let complete = tally(&mut report, results, |outcome| match outcome {
                RegistrationOutcome::Duplicate => Tally::Duplicate,
                _ => Tally::Handled,
            });
            if !complete {
                debug!(height = block.height, "Holding block cursor");
                break;
            }
            reached = block.height;
        }

        if reached > cursor {
            self.db
                .with_conn(|conn| events::set_cursor(conn, BLOCK_CURSOR, reached))?;
            debug!(from = cursor, to = reached, "Advanced block cursor");
        }
        Ok(report)
    }
}

// =============================================================================
// Inbox
// =============================================================================

/// Polls the bot's inbox for registration requests
pub struct InboxPoller {
    social: Arc<dyn SocialClient>,
    orchestrator: Arc<RegistrationOrchestrator>,
    pool: Arc<HandlerPool>,
    interval: Duration,
}

impl InboxPoller {
    pub fn new(
        social: Arc<dyn SocialClient>,
        orchestrator: Arc<RegistrationOrchestrator>,
        pool: Arc<HandlerPool>,
        interval: Duration,
    ) -> Self {
        Self {
            social,
            orchestrator,
            pool,
            interval,
        }
    }
}

#[async_trait]
impl Poller for InboxPoller {
    fn name(&self) -> &str {
        "inbox"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self) -> Result<PollReport> {
        let messages = self.social.inbox().await?;
        let mut report = PollReport {
            fetched: messages.len(),
            ..Default::default()
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let results = self
            .pool
            .run_all(messages, move |message| {
                let orchestrator = Arc::clone(&orchestrator);
                async move { orchestrator.handle_inbox_message(&message).await }
            })
            .await;

        tally(&mut report, results, |outcome| match outcome {
            InboxOutcome::Duplicate => Tally::Duplicate,
            _ => Tally::Handled,
        });
        Ok(report)
    }
}

// =============================================================================
// Mentions
// =============================================================================

/// Polls posts matching the tip pattern
pub struct MentionPoller {
    social: Arc<dyn SocialClient>,
    handler: Arc<MentionHandler>,
    pool: Arc<HandlerPool>,
    pattern: String,
    interval: Duration,
}

impl MentionPoller {
    pub fn new(
        social: Arc<dyn SocialClient>,
        handler: Arc<MentionHandler>,
        pool: Arc<HandlerPool>,
        pattern: impl Into<String>,
        interval: Duration,
    ) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(TipRelayError::Config("tip pattern must not be empty".into()));
        }
        Ok(Self {
            social,
            handler,
            pool,
            pattern,
            interval,
        })
    }
}

#[async_trait]
impl Poller for MentionPoller {
    fn name(&self) -> &str {
        "mentions"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self) -> Result<PollReport> {
        let posts = self.social.matching_posts(&self.pattern).await?;
        let mut report = PollReport {
            fetched: posts.len(),
            ..Default::default()
        };

        let handler = Arc::clone(&self.handler);
        let results = self
            .pool
            .run_all(posts, move |post| {
                let handler = Arc::clone(&handler);
                async move { handler.handle_post(&post).await }
            })
            .await;

        tally(&mut report, results, |outcome| match outcome {
            MentionOutcome::Duplicate => Tally::Duplicate,
            MentionOutcome::Relayed(RelayOutcome::Deferred { .. }) => Tally::Deferred,
            _ => Tally::Handled,
        });

        if report.handled > 0 {
            info!(handled = report.handled, deferred = report.deferred, "Processed tip mentions");
        }
        Ok(report)
    }
}
