//! In-process exchange channels.

use crate::{
    Cancellation, ChannelKey, Discovery, ExchangeChannel, MAX_MESSAGE_SIZE, MessageClass,
};
use bytes::Bytes;
use shared::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Upper bound on how long a blocked receive goes without checking for cancellation.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// Default number of messages a queue holds before publishing fails.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Default, Debug)]
struct QueueState {
    messages: VecDeque<(MessageClass, Bytes)>,
    removed: bool,
}

impl QueueState {
    fn pop(&mut self, class: MessageClass) -> Option<Bytes> {
        let idx = self.messages.iter().position(|(c, _)| *c == class)?;
        self.messages.remove(idx).map(|(_, payload)| payload)
    }
}

/// A class-filtered FIFO living in this process.
#[derive(Debug)]
pub struct MemoryQueue {
    key: ChannelKey,
    capacity: usize,
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl MemoryQueue {
    pub fn new(key: ChannelKey) -> Self {
        Self::with_capacity(key, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(key: ChannelKey, capacity: usize) -> Self {
        Self {
            key,
            capacity,
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().map(|s| s.removed).unwrap_or(true)
    }
}

impl ExchangeChannel for MemoryQueue {
    fn key(&self) -> ChannelKey {
        self.key
    }

    fn publish(&self, class: MessageClass, payload: &[u8]) -> Result<()> {
        let class = class.validate()?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(Error::ErrMessageTooLarge(payload.len(), MAX_MESSAGE_SIZE));
        }

        let mut state = self.state.lock()?;
        if state.removed {
            return Err(Error::ErrChannelRemoved);
        }
        if state.messages.len() >= self.capacity {
            return Err(Error::ErrChannelFull(self.key.0));
        }
        state
            .messages
            .push_back((class, Bytes::copy_from_slice(payload)));
        self.cond.notify_all();
        Ok(())
    }

    fn pending(&self) -> Result<usize> {
        let state = self.state.lock()?;
        if state.removed {
            return Err(Error::ErrChannelRemoved);
        }
        Ok(state.messages.len())
    }

    fn try_recv(&self, class: MessageClass) -> Result<Option<Bytes>> {
        let mut state = self.state.lock()?;
        if state.removed {
            return Err(Error::ErrChannelRemoved);
        }
        Ok(state.pop(class))
    }

    fn recv_timeout(
        &self,
        class: MessageClass,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock()?;
        loop {
            if state.removed {
                return Err(Error::ErrChannelRemoved);
            }
            if cancel.is_cancelled() {
                return Err(Error::ErrExchangeCancelled);
            }
            if let Some(payload) = state.pop(class) {
                return Ok(payload);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ErrExchangeTimeout(timeout));
            }
            let wait = (deadline - now).min(CANCEL_CHECK_INTERVAL);
            state = self.cond.wait_timeout(state, wait)?.0;
        }
    }

    fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        state.removed = true;
        state.messages.clear();
        self.cond.notify_all();
        Ok(())
    }
}

/// Registry of in-process queues, keyed like SysV IPC keys.
///
/// Clones share the same registry.
#[derive(Default, Clone)]
pub struct MemoryBus {
    queues: Arc<Mutex<HashMap<ChannelKey, Arc<MemoryQueue>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the queue for `key`, creating it if needed. A removed queue is replaced.
    pub fn create(&self, key: ChannelKey) -> Arc<MemoryQueue> {
        self.create_with_capacity(key, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn create_with_capacity(&self, key: ChannelKey, capacity: usize) -> Arc<MemoryQueue> {
        let mut queues = match self.queues.lock() {
            Ok(queues) => queues,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(queue) = queues.get(&key)
            && !queue.is_removed()
        {
            return Arc::clone(queue);
        }
        let queue = Arc::new(MemoryQueue::with_capacity(key, capacity));
        queues.insert(key, Arc::clone(&queue));
        queue
    }

    pub fn get(&self, key: ChannelKey) -> Option<Arc<MemoryQueue>> {
        let queues = self.queues.lock().ok()?;
        queues.get(&key).filter(|q| !q.is_removed()).cloned()
    }
}

impl Discovery for MemoryBus {
    fn probe(&self, key: ChannelKey) -> Option<Arc<dyn ExchangeChannel>> {
        self.get(key).map(|q| q as Arc<dyn ExchangeChannel>)
    }
}
