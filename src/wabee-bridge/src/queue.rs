//! Unbounded FIFO between one protocol thread and the main context.

use crate::envelope::Envelope;
use crossbeam_channel::{Receiver, Sender};

/// Creates the producer and consumer ends of a session's event queue.
pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer end, owned by the protocol thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Envelope>,
}

impl EventSender {
    /// Enqueues an envelope without blocking.
    ///
    /// Once the receiving session is gone there is nobody left to apply the
    /// envelope, so it is dropped.
    pub fn push(&self, envelope: Envelope) {
        if let Err(err) = self.tx.send(envelope) {
            tracing::debug!(kind = %err.0.kind(), "session gone, dropping envelope");
        }
    }
}

/// Consumer end, owned by the dispatcher.
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<Envelope>,
}

impl EventReceiver {
    /// Takes every envelope queued at call time, oldest first.
    ///
    /// Envelopes pushed while draining stay queued for the next call.
    pub fn drain(&self) -> Vec<Envelope> {
        let pending = self.rx.len();
        self.rx.try_iter().take(pending).collect()
    }

    /// Drops everything still queued and returns how many envelopes were lost.
    pub fn discard_pending(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
