//! Custodial Key Management
//!
//! Each social identity owns two custodial Ed25519 accounts:
//! - **primary**: holds funds; converted to a 2-of-3 multisig at registration
//! - **cosigner**: the bot's cosignatory on that multisig
//!
//! Keys are never stored. They are derived on demand from the operator's
//! master secret, and the registry only ever sees `WalletRef`s.

pub mod crypto;
pub mod vault;

pub use crypto::{generate_challenge_code, generate_random_bytes, CHALLENGE_CODE_BYTES};
pub use vault::KeyVault;
