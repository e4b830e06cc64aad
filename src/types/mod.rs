//! Core types shared across tiprelay

pub mod amount;
pub mod error;
pub mod event;
pub mod user;

pub use amount::{Amount, AMOUNT_DECIMALS, MICROS_PER_UNIT};
pub use error::{Result, TipRelayError};
pub use event::{EventClass, EventKey, ProcessedEvent};
pub use user::{RegistrationState, User, WalletRef, WalletRole};
