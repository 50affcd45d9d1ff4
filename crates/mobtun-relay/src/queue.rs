//! Bounded output queue between the stack's worker and the polling host.
//!
//! Push never blocks: a full queue drops the packet. Pop never blocks
//! either; an empty queue just yields nothing.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Result of offering a packet to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue at capacity, packet dropped
    Full,
    /// Consumer gone (relay stopped), packet dropped
    Closed,
}

/// Create a queue holding at most `capacity` packets
pub fn output_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = bounded(capacity);
    (QueueProducer { tx }, QueueConsumer { rx, capacity })
}

/// Producer half, owned by the stack's output callback
#[derive(Clone)]
pub struct QueueProducer {
    tx: Sender<Bytes>,
}

impl QueueProducer {
    /// Copy `packet` into the queue
    pub fn push(&self, packet: &[u8]) -> PushOutcome {
        match self.tx.try_send(Bytes::copy_from_slice(packet)) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) => PushOutcome::Full,
            Err(TrySendError::Disconnected(_)) => PushOutcome::Closed,
        }
    }
}

/// Consumer half, polled by the host
pub struct QueueConsumer {
    rx: Receiver<Bytes>,
    capacity: usize,
}

impl QueueConsumer {
    /// Take the oldest packet, if any
    pub fn pop(&self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Packets currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
