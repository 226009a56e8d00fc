// ── Ingest queue ──
//
// Bounded hand-off from transport adapters to the session loop. A burst of
// `ValueChanged` for one path collapses to the latest value instead of
// growing the queue. Coalescing never reorders: any structural op or
// status change is a barrier, and later values for a path queue behind it.
//
// When the queue is full of distinct entries, `send` waits for the loop to
// drain. It yields the adapter task; it never blocks a thread.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::backend::ConnectionState;
use crate::error::CoreError;
use crate::model::ItemPath;
use crate::tree::Mutation;

/// Default number of distinct queued entries.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One entry handed from an adapter to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Mutation(Mutation),
    Status(ConnectionState),
}

impl From<Mutation> for Inbound {
    fn from(m: Mutation) -> Self {
        Self::Mutation(m)
    }
}

struct Queue {
    entries: VecDeque<Inbound>,
    /// Sequence number of `entries[0]`.
    head: u64,
    /// Path → sequence number of its queued `ValueChanged`, for paths
    /// with no barrier queued after it.
    coalescible: HashMap<ItemPath, u64>,
    coalesced: u64,
    closed: bool,
}

enum Push {
    Queued,
    Coalesced,
    Full(Inbound),
    Closed,
}

impl Queue {
    fn push(&mut self, entry: Inbound, capacity: usize) -> Push {
        if self.closed {
            return Push::Closed;
        }
        if let Inbound::Mutation(Mutation::ValueChanged { path, value }) = &entry {
            if let Some(seq) = self.coalescible.get(path) {
                let slot = usize::try_from(seq - self.head)
                    .ok()
                    .and_then(|idx| self.entries.get_mut(idx));
                if let Some(Inbound::Mutation(Mutation::ValueChanged { value: queued, .. })) = slot {
                    *queued = value.clone();
                    self.coalesced += 1;
                    return Push::Coalesced;
                }
            }
        }
        if self.entries.len() >= capacity {
            return Push::Full(entry);
        }

        let seq = self.head + self.entries.len() as u64;
        match &entry {
            Inbound::Mutation(Mutation::ValueChanged { path, .. }) => {
                self.coalescible.insert(path.clone(), seq);
            }
            _ => self.coalescible.clear(),
        }
        self.entries.push_back(entry);
        Push::Queued
    }

    fn drain(&mut self) -> Vec<Inbound> {
        let batch: Vec<Inbound> = self.entries.drain(..).collect();
        self.head += batch.len() as u64;
        self.coalescible.clear();
        batch
    }
}

struct Shared {
    queue: Mutex<Queue>,
    capacity: usize,
    senders: AtomicUsize,
    /// Signalled when entries become available or the queue closes.
    readable: Notify,
    /// Signalled when the loop drains.
    writable: Notify,
}

/// Create a queue holding at most `capacity` distinct entries.
pub fn channel(capacity: usize) -> (IngestSender, IngestReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(Queue {
            entries: VecDeque::new(),
            head: 0,
            coalescible: HashMap::new(),
            coalesced: 0,
            closed: false,
        }),
        capacity: capacity.max(1),
        senders: AtomicUsize::new(1),
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        IngestSender {
            shared: Arc::clone(&shared),
        },
        IngestReceiver { shared },
    )
}

// ── Sender ───────────────────────────────────────────────────────────

pub struct IngestSender {
    shared: Arc<Shared>,
}

impl IngestSender {
    /// Queue an entry, coalescing with a pending value for the same path.
    /// Waits only while the queue is full of distinct entries.
    pub async fn send(&self, entry: impl Into<Inbound>) -> Result<(), CoreError> {
        let mut entry = entry.into();
        loop {
            let writable = self.shared.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();

            let outcome = self.shared.queue.lock().push(entry, self.shared.capacity);
            match outcome {
                Push::Queued => {
                    self.shared.readable.notify_one();
                    return Ok(());
                }
                Push::Coalesced => return Ok(()),
                Push::Closed => return Err(CoreError::SessionClosed),
                Push::Full(back) => {
                    trace!("ingest queue full, waiting for drain");
                    entry = back;
                    writable.await;
                }
            }
        }
    }

    /// Shorthand for a status entry.
    pub async fn status(&self, state: ConnectionState) -> Result<(), CoreError> {
        self.send(Inbound::Status(state)).await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }
}

impl Clone for IngestSender {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for IngestSender {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.queue.lock().closed = true;
            self.shared.readable.notify_one();
        }
    }
}

impl std::fmt::Debug for IngestSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestSender").finish_non_exhaustive()
    }
}

// ── Receiver ─────────────────────────────────────────────────────────

pub struct IngestReceiver {
    shared: Arc<Shared>,
}

impl IngestReceiver {
    /// Wait for entries and take all of them in order. `None` once every
    /// sender is gone and the queue is empty.
    pub async fn recv_batch(&mut self) -> Option<Vec<Inbound>> {
        loop {
            let readable = self.shared.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            let (batch, closed) = {
                let mut queue = self.shared.queue.lock();
                (queue.drain(), queue.closed)
            };
            if !batch.is_empty() {
                self.shared.writable.notify_waiters();
                return Some(batch);
            }
            if closed {
                return None;
            }
            readable.await;
        }
    }

    /// Take whatever is queued without waiting.
    pub fn try_recv_batch(&mut self) -> Vec<Inbound> {
        let batch = self.shared.queue.lock().drain();
        if !batch.is_empty() {
            self.shared.writable.notify_waiters();
        }
        batch
    }

    /// Values replaced in place since the queue was created.
    pub fn coalesced(&self) -> u64 {
        self.shared.queue.lock().coalesced
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for IngestReceiver {
    fn drop(&mut self) {
        self.shared.queue.lock().closed = true;
        self.shared.writable.notify_waiters();
    }
}

impl std::fmt::Debug for IngestReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestReceiver")
            .field("queued", &self.len())
            .finish()
    }
}
