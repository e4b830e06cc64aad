//! Polling loops and the handler pool they feed
//!
//! - [`scheduler`]: one interval loop per source, clean shutdown
//! - [`pool`]: bounded, timed handler fan-out per batch
//! - [`pollers`]: block, inbox and mention sources

pub mod pollers;
pub mod pool;
pub mod scheduler;

pub use pollers::{BlockPoller, InboxPoller, MentionPoller, BLOCK_CURSOR};
pub use pool::{HandlerPool, PoolConfig};
pub use scheduler::{PollReport, PollScheduler, Poller};
