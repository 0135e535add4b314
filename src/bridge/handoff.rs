//! Handoff queue between the bus event-loop thread and the link scheduler.
//!
//! Producers never block: a full or closed queue rejects the message and the
//! caller reports the drop.

use crate::domain::models::DropReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// One bus → link command waiting for the link scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub seq: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub seq: u64,
    pub reason: DropReason,
}

#[derive(Clone)]
pub struct HandoffSender {
    tx: mpsc::Sender<PendingWrite>,
    next_seq: Arc<AtomicU64>,
}

pub struct HandoffReceiver {
    rx: mpsc::Receiver<PendingWrite>,
}

pub fn channel(capacity: usize) -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        HandoffSender {
            tx,
            next_seq: Arc::new(AtomicU64::new(1)),
        },
        HandoffReceiver { rx },
    )
}

impl HandoffSender {
    /// Enqueue `payload` and return its sequence number.
    pub fn submit(&self, payload: Vec<u8>) -> Result<u64, Rejected> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(PendingWrite { seq, payload }) {
            Ok(()) => Ok(seq),
            Err(TrySendError::Full(_)) => Err(Rejected {
                seq,
                reason: DropReason::QueueFull,
            }),
            Err(TrySendError::Closed(_)) => Err(Rejected {
                seq,
                reason: DropReason::QueueClosed,
            }),
        }
    }
}

impl HandoffReceiver {
    pub async fn recv(&mut self) -> Option<PendingWrite> {
        self.rx.recv().await
    }

    /// Refuse further submissions and hand back whatever was still queued.
    pub fn close_and_drain(&mut self) -> Vec<PendingWrite> {
        self.rx.close();
        let mut remaining = Vec::new();
        while let Ok(write) = self.rx.try_recv() {
            remaining.push(write);
        }
        remaining
    }
}
