//! Synchronization primitives shared by application threads and the pumps.
//!
//! - [`queue`]: the lock-guarded message queue used for both the outbox and
//!   the mailbox.

pub mod queue;

pub use queue::{MessageQueue, Timeout};
