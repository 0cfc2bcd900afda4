use std::collections::VecDeque;
use std::time::{Duration, Instant};

use event_schema::ClientOp;

struct QueuedOp {
    op: ClientOp,
    enqueued_at: Instant,
}

/// Outbound operations held while the channel is down, in submission order.
///
/// On flush the queue splits into operations worth replaying and operations
/// that sat too long: a message sent into a conversation the user abandoned
/// minutes ago must fail locally, not surprise the other side.
pub struct OutboundQueue {
    staleness: Duration,
    items: VecDeque<QueuedOp>,
}

impl OutboundQueue {
    pub fn new(staleness: Duration) -> Self {
        Self {
            staleness,
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, op: ClientOp) {
        self.items.push_back(QueuedOp {
            op,
            enqueued_at: Instant::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain everything, preserving submission order within both halves.
    /// Returns (replayable, stale).
    pub fn drain(&mut self) -> (Vec<ClientOp>, Vec<ClientOp>) {
        let now = Instant::now();
        let mut fresh = Vec::new();
        let mut stale = Vec::new();

        for queued in self.items.drain(..) {
            if now.duration_since(queued.enqueued_at) >= self.staleness {
                stale.push(queued.op);
            } else {
                fresh.push(queued.op);
            }
        }

        (fresh, stale)
    }
}
