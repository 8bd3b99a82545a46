//! Client runtime.
//!
//! - `clock`: wall-clock timestamps shared with the broker.
//! - `skew`: broker clock offset estimated from timing traffic.
//! - `client`: the writer/reader thread pair and the application handle.

pub mod client;
pub mod clock;
pub mod skew;

pub use client::{Client, ClientConfig, ClientError, MailHook};
pub use clock::{LocalClock, Timestamp};
pub use skew::SkewEstimator;
