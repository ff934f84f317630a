//! Client side outbox holding invocations while the server is unreachable.

use std::collections::VecDeque;

use parking_lot::Mutex;

use xmlblaster_utils::Timestamp;

use crate::error::XmlBlasterError;
use crate::queue_property::QueueProperty;
use crate::types::{MethodName, MsgUnitRaw, Priority};

/// A queued invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Publish(MsgUnitRaw),
    Subscribe { key: String, qos: String },
}

impl Invocation {
    #[inline]
    pub fn method(&self) -> MethodName {
        match self {
            Invocation::Publish(_) => MethodName::Publish,
            Invocation::Subscribe { .. } => MethodName::Subscribe,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        match self {
            Invocation::Publish(msg) => msg.size(),
            Invocation::Subscribe { key, qos } => key.len() + qos.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Unique and ascending, the enqueue time in nanoseconds
    pub id: i64,
    pub priority: Priority,
    pub invocation: Invocation,
}

impl QueueEntry {
    pub fn new(priority: Priority, invocation: Invocation) -> Self {
        Self { id: Timestamp::now().nanos(), priority, invocation }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.invocation.size()
    }

    #[inline]
    pub fn is_publish(&self) -> bool {
        matches!(self.invocation, Invocation::Publish(_))
    }
}

/// An entry the queue refused, handed back with the reason.
#[derive(Debug)]
pub struct Rejected {
    pub entry: QueueEntry,
    pub reason: XmlBlasterError,
}

struct Inner {
    entries: VecDeque<QueueEntry>,
    bytes: usize,
}

/// Bounded FIFO, the capacity check and the insert happen under one lock.
pub struct ClientQueue {
    max_entries: usize,
    max_bytes: usize,
    inner: Mutex<Inner>,
}

impl Drop for ClientQueue {
    #[inline]
    fn drop(&mut self) {
        log::debug!("ClientQueue Drop ... len: {}", self.len());
    }
}

impl ClientQueue {
    #[inline]
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self { max_entries, max_bytes, inner: Mutex::new(Inner { entries: VecDeque::new(), bytes: 0 }) }
    }

    /// Limits from `maxMsg` and `maxSize` of the queue configuration
    #[inline]
    pub fn with_property(prop: &QueueProperty) -> Self {
        Self::new(prop.max_entries().max(0) as usize, prop.max_bytes().max(0) as usize)
    }

    #[inline]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    #[inline]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn num_bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Appends `entry`, or hands it back if `maxMsg` or `maxSize` would be exceeded.
    pub fn push(&self, entry: QueueEntry) -> Result<(), Rejected> {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= self.max_entries {
            let reason = XmlBlasterError::QueueOverflowEntries(format!(
                "client queue is full, maxEntries={} reached",
                self.max_entries
            ));
            return Err(Rejected { entry, reason });
        }
        let size = entry.size();
        if inner.bytes + size > self.max_bytes {
            let reason = XmlBlasterError::QueueOverflowBytes(format!(
                "client queue is full, {} + {} bytes exceed maxBytes={}",
                inner.bytes, size, self.max_bytes
            ));
            return Err(Rejected { entry, reason });
        }
        inner.bytes += size;
        inner.entries.push_back(entry);
        Ok(())
    }

    #[inline]
    pub fn peek(&self) -> Option<QueueEntry> {
        self.inner.lock().entries.front().cloned()
    }

    /// The longest run of publishes at the head, limited by `max_entries` and `max_bytes`,
    /// negative limits are unbounded. The first entry is always part of the batch.
    pub fn peek_publishes(&self, max_entries: i64, max_bytes: i64) -> Vec<QueueEntry> {
        let inner = self.inner.lock();
        let mut batch = Vec::new();
        let mut bytes = 0i64;
        for e in inner.entries.iter().take_while(|e| e.is_publish()) {
            let size = e.size() as i64;
            if !batch.is_empty() {
                if max_entries >= 0 && batch.len() as i64 >= max_entries {
                    break;
                }
                if max_bytes >= 0 && bytes + size > max_bytes {
                    break;
                }
            }
            bytes += size;
            batch.push(e.clone());
        }
        batch
    }

    /// Removes the first `n` entries after they were delivered.
    pub fn remove(&self, n: usize) -> usize {
        let mut inner = self.inner.lock();
        let n = n.min(inner.entries.len());
        let bytes: usize = inner.entries.drain(..n).map(|e| e.size()).sum();
        inner.bytes -= bytes;
        n
    }

    #[inline]
    pub fn pop(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.lock();
        let e = inner.entries.pop_front()?;
        inner.bytes -= e.size();
        Some(e)
    }

    /// Empties the queue, returning what was held.
    pub fn take_all(&self) -> Vec<QueueEntry> {
        let mut inner = self.inner.lock();
        inner.bytes = 0;
        inner.entries.drain(..).collect()
    }
}
