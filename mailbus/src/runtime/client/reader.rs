//! Reader pump: receives packets and files them in the mailbox.
//!
//! The reader never connects, closes or reconnects. It borrows the live link
//! for one receive at a time and idles while there is none. Control traffic
//! at the head of a packet feeds the skew estimate before the rest of the
//! packet is appended, all under the mailbox lock, so a `fetch` never sees a
//! packet half filed.

use std::collections::LinkedList;
use std::sync::Arc;
use std::time::Duration;

use super::Shared;
use crate::data::message::{Message, MessageKind};
use crate::net::link::{Link, LinkError};
use crate::runtime::clock::Timestamp;
use crate::runtime::skew::{SkewEstimator, legacy_null_sample};
use crate::trace::{debug, trace, warn};

/// How long the reader sleeps while there is no link, and after a failed
/// receive.
pub const IDLE_POLL: Duration = Duration::from_millis(100);

/// Mailbox side state, guarded by the mailbox lock.
#[derive(Debug, Default)]
pub(crate) struct Inbound {
    pub(crate) skew: SkewEstimator,
    /// Overflow purges so far.
    pub(crate) purges: u64,
}

impl Inbound {
    /// Removes a leading timing or legacy null message and feeds it to the
    /// skew estimate.
    fn absorb_timing(&mut self, batch: &mut LinkedList<Message>, received: Timestamp) {
        let Some(first) = batch.front() else {
            return;
        };
        let sample = match first.kind {
            // Value echoes our heartbeat stamp; time is the broker clock.
            MessageKind::Timing => first
                .as_double()
                .map(|request| (Timestamp::from_secs(request), first.time, received)),
            // Value is the broker's send time.
            MessageKind::Null => first
                .as_double()
                .map(|sent| legacy_null_sample(Timestamp::from_secs(sent), received)),
            _ => return,
        };
        batch.pop_front();

        if let Some((request, remote, receive)) = sample {
            match self.skew.update(request, remote, receive) {
                Some(skew) => {
                    trace!(skew, "skew updated");
                }
                None => {
                    trace!(%remote, "stale timing sample ignored");
                }
            }
        }
    }
}

pub(crate) struct ReaderPump<L> {
    shared: Arc<Shared<L>>,
}

impl<L: Link> ReaderPump<L> {
    pub(crate) const fn new(shared: Arc<Shared<L>>) -> Self {
        Self { shared }
    }

    pub(crate) fn run(&mut self) {
        while !self.shared.quitting() {
            let Some(link) = self.shared.connection.link() else {
                self.shared.pause(IDLE_POLL);
                continue;
            };

            match link.recv() {
                Ok(frame) => {
                    let received = self.shared.clock.now();
                    self.dispatch(&frame, received);
                }
                Err(LinkError::Idle) => {}
                Err(e) => {
                    drop(link);
                    if !self.shared.quitting() {
                        debug!(error = %e, "receive failed");
                        // Let the writer see the dead link now rather than
                        // at its next timeout.
                        self.shared.outbox.wake_all();
                        self.shared.pause(IDLE_POLL);
                    }
                }
            }
        }
    }

    /// Files one received packet.
    pub(crate) fn dispatch(&self, frame: &[u8], received: Timestamp) {
        let mut batch = match self.shared.codec.decode(frame) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, bytes = frame.len(), "dropping undecodable packet");
                return;
            }
        };

        let limit = self.shared.config.inbound_pending_limit;
        let correct = self.shared.config.local_time_correction;

        let mail_present = self.shared.mailbox.with_locked(|items, inbound| {
            if items.len() > limit {
                warn!(pending = items.len(), limit, "mailbox overflow; discarding pending mail");
                items.clear();
                inbound.purges += 1;
            }
            if correct {
                inbound.absorb_timing(&mut batch, received);
            }
            items.append(&mut batch);
            !items.is_empty()
        });

        if !mail_present {
            return;
        }
        let hook = self.shared.hook.read().clone();
        if let Some(hook) = hook
            && !hook.on_mail()
        {
            warn!("mail hook reported failure");
        }
    }
}
