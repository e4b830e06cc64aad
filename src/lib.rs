//! tiprelay - social tip relay and registration reconciliation engine
//!
//! Links social-platform identities to custodial ledger accounts and relays
//! tips between them when a matching post appears.
//!
//! ## Components
//!
//! - **Event Ledger**: exactly-once gate over transactions, messages and posts
//! - **User Registry**: per-identity rows with optimistic compare-and-update
//! - **Challenge Protocol**: single-use codes returned in ledger messages
//! - **Wallet Provisioner**: deterministic custodial accounts per identity
//! - **Registration Orchestrator**: verified challenge → 2-of-3 multisig
//! - **Tip Relay**: transfers between primary accounts
//! - **Pollers**: blocks, inbox and tip posts on independent cadences

pub mod clients;
pub mod config;
pub mod custodial_keys;
pub mod db;
pub mod engine;
pub mod services;
pub mod types;
pub mod worker;

pub use config::Args;
pub use engine::{Engine, EngineConfig};
pub use types::{Result, TipRelayError};
