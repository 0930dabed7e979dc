//! RTC IPC - Named inter-process exchange channels.
//!
//! An exchange channel is a pre-existing, named message queue shared with an
//! external cooperating process. The splice adapter publishes captured RTP
//! payloads on one channel and pulls substitute payloads from another.
//!
//! # Backends
//!
//! | Backend | Description |
//! |---------|-------------|
//! | [`sysv::SysvQueue`] | System V message queue addressed by an integer IPC key (Linux only) |
//! | [`MemoryQueue`] | In-process queue with identical semantics, for tests and loopback demos |
//!
//! # Discovery
//!
//! Channels are never created by the adapter. [`discover`] probes a key through
//! a [`Discovery`] implementation and yields a [`ChannelHandle`] that is either
//! present or absent for the adapter's lifetime. Absence is an expected outcome,
//! the cooperating process may simply not be running.
//!
//! ```ignore
//! use rtc_ipc::{ChannelKey, MemoryBus, discover};
//!
//! let bus = MemoryBus::new();
//! bus.create(ChannelKey::OUTBOUND);
//!
//! assert!(discover(&bus, ChannelKey::OUTBOUND).is_present());
//! assert!(!discover(&bus, ChannelKey::INBOUND).is_present());
//! ```

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shared::error::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

mod cancel;
mod memory;
#[cfg(target_os = "linux")]
pub mod sysv;

pub use cancel::Cancellation;
pub use memory::{MemoryBus, MemoryQueue};

/// Largest message accepted by any backend, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Integer key naming an exchange channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(pub i32);

impl ChannelKey {
    /// Channel carrying captured payloads to the cooperating process.
    pub const OUTBOUND: ChannelKey = ChannelKey(81);
    /// Channel carrying substitute payloads back from the cooperating process.
    pub const INBOUND: ChannelKey = ChannelKey(82);
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message class (SysV `mtype`). Receives only match messages of the same class.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageClass(pub i64);

impl MessageClass {
    pub const PAYLOAD: MessageClass = MessageClass(1);

    pub(crate) fn validate(self) -> Result<Self> {
        if self.0 > 0 {
            Ok(self)
        } else {
            Err(Error::ErrInvalidMessageClass(self.0))
        }
    }
}

impl Default for MessageClass {
    fn default() -> Self {
        Self::PAYLOAD
    }
}

/// Capability offered by a present exchange channel.
///
/// All operations except [`recv_timeout`](ExchangeChannel::recv_timeout) are
/// non-blocking.
pub trait ExchangeChannel: Send + Sync + fmt::Debug {
    fn key(&self) -> ChannelKey;

    /// Enqueues one message. Fails instead of blocking when the queue is full.
    fn publish(&self, class: MessageClass, payload: &[u8]) -> Result<()>;

    /// Number of messages currently queued, of any class.
    fn pending(&self) -> Result<usize>;

    /// Dequeues the oldest message of `class`, or `None` if there is none.
    fn try_recv(&self, class: MessageClass) -> Result<Option<Bytes>>;

    /// Waits for the oldest message of `class`.
    ///
    /// Returns [`Error::ErrExchangeTimeout`] once `timeout` elapses and
    /// [`Error::ErrExchangeCancelled`] promptly after `cancel` fires.
    fn recv_timeout(
        &self,
        class: MessageClass,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<Bytes>;

    /// Removes the channel. Later operations on any handle fail.
    fn destroy(&self) -> Result<()>;

    /// Dequeues every pending message of `class` without blocking and returns
    /// the newest one, with the number of older ones discarded.
    ///
    /// Messages of other classes stay queued. Failures stop the drain early
    /// and are not reported; whatever was dequeued before is kept.
    fn drain_stale(&self, class: MessageClass) -> (Option<Bytes>, usize) {
        let mut latest = None;
        let mut drained = 0;
        loop {
            match self.try_recv(class) {
                Ok(Some(message)) => {
                    if latest.replace(message).is_some() {
                        drained += 1;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    log::debug!("channel {}: drain stopped: {}", self.key(), err);
                    break;
                }
            }
        }
        (latest, drained)
    }
}

/// Probes for pre-existing channels.
pub trait Discovery {
    fn probe(&self, key: ChannelKey) -> Option<Arc<dyn ExchangeChannel>>;
}

/// Lifecycle of one exchange channel as seen by an adapter.
///
/// `Unprobed` moves to `Absent` or `Present` exactly once, there is no re-probing.
#[derive(Default, Clone)]
pub enum ChannelHandle {
    #[default]
    Unprobed,
    Absent(ChannelKey),
    Present(Arc<dyn ExchangeChannel>),
}

impl ChannelHandle {
    pub fn is_present(&self) -> bool {
        matches!(self, ChannelHandle::Present(_))
    }

    pub fn channel(&self) -> Option<&Arc<dyn ExchangeChannel>> {
        match self {
            ChannelHandle::Present(channel) => Some(channel),
            _ => None,
        }
    }

    /// Removes the underlying channel, if present.
    pub fn destroy(&self) -> Result<()> {
        match self {
            ChannelHandle::Present(channel) => channel.destroy(),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelHandle::Unprobed => write!(f, "Unprobed"),
            ChannelHandle::Absent(key) => write!(f, "Absent({key})"),
            ChannelHandle::Present(channel) => write!(f, "Present({})", channel.key()),
        }
    }
}

/// Probes `key` and records whether the channel exists.
pub fn discover(discovery: &dyn Discovery, key: ChannelKey) -> ChannelHandle {
    match discovery.probe(key) {
        Some(channel) => {
            log::info!("exchange channel {} exists", key);
            ChannelHandle::Present(channel)
        }
        None => {
            log::info!("exchange channel {} does not exist", key);
            ChannelHandle::Absent(key)
        }
    }
}
