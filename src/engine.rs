//! Composition root
//!
//! Builds every service from the three injected dependencies (store, ledger
//! client, social client) and wires the pollers to them.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clients::{LedgerClient, SocialClient};
use crate::db::Database;
use crate::services::{
    ChallengeProtocol, EventLedger, MentionHandler, ReconcileReport, RegistrationOrchestrator,
    TipRelay, UserRegistry, WalletProvisioner,
};
use crate::types::Result;
use crate::worker::{
    BlockPoller, HandlerPool, InboxPoller, MentionPoller, PollScheduler, PoolConfig,
};

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Token symbol shown in notices
    pub token_symbol: String,
    /// Pattern handed to the social client to find tip posts
    pub tip_pattern: String,
    pub pool: PoolConfig,
    pub block_interval: Duration,
    pub inbox_interval: Duration,
    pub mention_interval: Duration,
    /// Block height to start from when no cursor is stored
    pub block_start_height: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_symbol: "XEM".to_string(),
            tip_pattern: r"!tipxem\s+(\d+(\.\d+)?)".to_string(),
            pool: PoolConfig::default(),
            block_interval: Duration::from_secs(15),
            inbox_interval: Duration::from_secs(10),
            mention_interval: Duration::from_secs(30),
            block_start_height: 0,
        }
    }
}

/// All services, sharing one store and one client of each kind
pub struct Engine {
    pub config: EngineConfig,
    pub db: Arc<Database>,
    pub ledger: Arc<dyn LedgerClient>,
    pub social: Arc<dyn SocialClient>,
    pub registry: Arc<UserRegistry>,
    pub events: Arc<EventLedger>,
    pub challenge: Arc<ChallengeProtocol>,
    pub provisioner: Arc<WalletProvisioner>,
    pub orchestrator: Arc<RegistrationOrchestrator>,
    pub relay: Arc<TipRelay>,
    pub mentions: Arc<MentionHandler>,
    pub pool: Arc<HandlerPool>,
}

impl Engine {
    pub fn new(
        db: Arc<Database>,
        ledger: Arc<dyn LedgerClient>,
        social: Arc<dyn SocialClient>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(UserRegistry::new(Arc::clone(&db)));
        let events = Arc::new(EventLedger::new(Arc::clone(&db)));
        let challenge = Arc::new(ChallengeProtocol::new(Arc::clone(&registry)));
        let provisioner = Arc::new(WalletProvisioner::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
        ));
        let orchestrator = Arc::new(RegistrationOrchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::clone(&challenge),
            Arc::clone(&provisioner),
            Arc::clone(&ledger),
            Arc::clone(&social),
        ));
        let relay = Arc::new(TipRelay::new(
            Arc::clone(&registry),
            Arc::clone(&provisioner),
            Arc::clone(&ledger),
        ));
        let mentions = Arc::new(MentionHandler::new(
            Arc::clone(&events),
            Arc::clone(&relay),
            Arc::clone(&social),
            config.token_symbol.clone(),
        ));
        let pool = Arc::new(HandlerPool::new(config.pool.clone()));

        Self {
            config,
            db,
            ledger,
            social,
            registry,
            events,
            challenge,
            provisioner,
            orchestrator,
            relay,
            mentions,
            pool,
        }
    }

    /// Catch up on registrations whose ledger messages arrived while offline
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        self.orchestrator.reconcile_pending().await
    }

    pub fn block_poller(&self) -> BlockPoller {
        BlockPoller::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.registry),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.db),
            Arc::clone(&self.pool),
            self.config.block_interval,
            self.config.block_start_height,
        )
    }

    pub fn inbox_poller(&self) -> InboxPoller {
        InboxPoller::new(
            Arc::clone(&self.social),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.pool),
            self.config.inbox_interval,
        )
    }

    pub fn mention_poller(&self) -> Result<MentionPoller> {
        MentionPoller::new(
            Arc::clone(&self.social),
            Arc::clone(&self.mentions),
            Arc::clone(&self.pool),
            self.config.tip_pattern.clone(),
            self.config.mention_interval,
        )
    }

    /// Spawn all three pollers
    pub fn start(&self) -> Result<PollScheduler> {
        let mut scheduler = PollScheduler::new();
        scheduler.spawn(Arc::new(self.block_poller()));
        scheduler.spawn(Arc::new(self.inbox_poller()));
        scheduler.spawn(Arc::new(self.mention_poller()?));

        info!(
            pollers = scheduler.poller_count(),
            concurrency = self.pool.concurrency(),
            "Engine started"
        );
        Ok(scheduler)
    }
}
