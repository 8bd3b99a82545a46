//! Broker clock-skew estimation from timing traffic.
//!
//! The writer stamps each heartbeat with local time. The broker answers with
//! a `Timing` message that echoes our stamp as its value and carries the
//! broker clock as its timestamp. Each answer gives one sample:
//!
//! ```text
//!   local   request ─────────────────────────── receive
//!                      \                     /
//!   broker              ──────── remote ─────
//!
//!   skew       = remote − receive
//!   round trip = receive − request
//! ```
//!
//! Policy is single-sample replace: each accepted sample overwrites the
//! estimate. Samples whose broker time is older than the stored one are
//! dropped so a late packet can never roll the estimate back.

use super::clock::Timestamp;

/// Stored skew estimate (broker clock minus local clock, seconds).
#[derive(Debug, Clone, Default)]
pub struct SkewEstimator {
    skew: f64,
    round_trip: Option<f64>,
    /// Broker time of the sample that produced `skew`.
    latest_remote: Option<Timestamp>,
    samples: u64,
}

impl SkewEstimator {
    /// Starts at zero skew with no samples.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            skew: 0.0,
            round_trip: None,
            latest_remote: None,
            samples: 0,
        }
    }

    /// Feeds one `(request, remote, receive)` triple.
    ///
    /// Returns the new estimate, or `None` if the sample was older than the
    /// one already applied.
    pub fn update(
        &mut self,
        request: Timestamp,
        remote: Timestamp,
        receive: Timestamp,
    ) -> Option<f64> {
        if self.latest_remote.is_some_and(|latest| remote < latest) {
            return None;
        }

        self.skew = remote.secs_since(receive);
        self.round_trip = Some(receive.secs_since(request));
        self.latest_remote = Some(remote);
        self.samples += 1;
        Some(self.skew)
    }

    /// Current estimate: how far the broker clock is ahead of ours.
    #[inline]
    #[must_use]
    pub const fn estimate(&self) -> f64 {
        self.skew
    }

    /// Round trip implied by the last accepted sample.
    ///
    /// Only meaningful for real timing echoes; legacy samples fabricate the
    /// request time.
    #[inline]
    #[must_use]
    pub const fn round_trip(&self) -> Option<f64> {
        self.round_trip
    }

    /// Number of samples applied so far.
    #[inline]
    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.samples
    }

    /// Translates a broker timestamp into local time.
    #[inline]
    #[must_use]
    pub fn remote_to_local(&self, remote: Timestamp) -> Timestamp {
        remote - self.skew
    }

    /// Translates a local timestamp into broker time.
    #[inline]
    #[must_use]
    pub fn local_to_remote(&self, local: Timestamp) -> Timestamp {
        local + self.skew
    }
}

/// Reconstructs a timing triple from a legacy null message.
///
/// Older brokers put their send time at the head of every packet but never
/// echo our heartbeat, so there is no real request time. Pretend the trip to
/// the broker took as long as the trip back.
#[must_use]
pub fn legacy_null_sample(
    broker_send: Timestamp,
    local_receive: Timestamp,
) -> (Timestamp, Timestamp, Timestamp) {
    let skew = broker_send.secs_since(local_receive);
    let request = broker_send + skew;
    (request, broker_send, local_receive)
}
