//! tiprelay - social tip relay
//!
//! Binds social identities to custodial ledger accounts and relays tips
//! triggered by social-platform posts.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiprelay::{
    clients::{
        http::{HttpLedgerGateway, HttpSocialGateway},
        memory::{MemoryLedger, MemorySocial},
        LedgerClient, SocialClient,
    },
    config::Args,
    custodial_keys::KeyVault,
    db::Database,
    Engine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tiprelay={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  tiprelay - social tip relay");
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Database: {}", args.database_path.display());
    if !args.dev_mode {
        info!("Ledger gateway: {} ({})", args.ledger_gateway_url, args.ledger_network);
        info!("Social gateway: {} (community {})", args.social_gateway_url, args.social_community);
    }
    info!("Tip pattern: {}", args.tip_pattern);
    info!(
        "Poll intervals: blocks {}s, inbox {}s, mentions {}s",
        args.block_poll_interval_secs, args.inbox_poll_interval_secs, args.mention_poll_interval_secs
    );
    info!("Handler concurrency: {}", args.handler_concurrency);
    info!("======================================");

    let secret = args
        .wallet_secret()
        .ok_or_else(|| anyhow::anyhow!("WALLET_SECRET is required"))?;
    let vault = Arc::new(KeyVault::from_secret(&secret)?);

    let db = if args.dev_mode {
        warn!("Dev mode: using in-memory database");
        Arc::new(Database::open_in_memory()?)
    } else {
        Arc::new(Database::open(&args.database_path)?)
    };
    let stats = db.stats()?;
    info!(
        users = stats.users,
        registered = stats.registered_users,
        processed_events = stats.processed_events,
        "Database ready"
    );

    let (ledger, social): (Arc<dyn LedgerClient>, Arc<dyn SocialClient>) = if args.dev_mode {
        warn!("Dev mode: using in-memory ledger and social adapters");
        (
            Arc::new(MemoryLedger::new(Arc::clone(&vault))),
            Arc::new(MemorySocial::new()),
        )
    } else {
        (
            Arc::new(HttpLedgerGateway::new(
                &args.ledger_gateway(),
                Arc::clone(&vault),
                args.ledger_network.clone(),
            )?),
            Arc::new(HttpSocialGateway::new(
                &args.social_gateway(),
                args.social_community.clone(),
            )?),
        )
    };

    let engine = Engine::new(db, ledger, social, args.engine_config());

    match engine.reconcile_pending().await {
        Ok(report) => info!(
            addresses = report.addresses,
            transactions = report.transactions,
            deferred = report.deferred,
            "Startup reconciliation finished"
        ),
        Err(e) => warn!(error = %e, "Startup reconciliation failed, continuing with pollers"),
    }

    let scheduler = engine.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler.shutdown(args.shutdown_grace()).await;
    info!("tiprelay stopped");
    Ok(())
}
