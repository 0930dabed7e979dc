//! System V message queue backend.
//!
//! A queue is addressed by an integer IPC key. Messages carry a positive
//! `mtype` ([`MessageClass`]) and at most [`MAX_MESSAGE_SIZE`] bytes of text.
//! The kernel offers no timed receive, so [`SysvQueue::recv_timeout`] polls a
//! non-blocking receive until the deadline or cancellation.

use crate::{
    Cancellation, ChannelKey, Discovery, ExchangeChannel, MAX_MESSAGE_SIZE, MessageClass,
};
use bytes::Bytes;
use libc::{IPC_CREAT, IPC_NOWAIT, IPC_RMID, IPC_STAT, MSG_NOERROR, c_int, c_long, c_void};
use nix::errno::Errno;
use shared::error::{Error, Result};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default sleep between non-blocking receive attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Permission bits used when a queue is created.
const QUEUE_MODE: c_int = 0o666;

#[repr(C)]
struct MsgBuf {
    mtype: c_long,
    mtext: [u8; MAX_MESSAGE_SIZE],
}

impl MsgBuf {
    fn new(mtype: c_long) -> Self {
        Self {
            mtype,
            mtext: [0u8; MAX_MESSAGE_SIZE],
        }
    }
}

fn last_error(op: &'static str) -> Error {
    match Errno::last() {
        Errno::EIDRM | Errno::EINVAL => Error::ErrChannelRemoved,
        errno => Error::ErrChannelOperation {
            op,
            errno: errno as i32,
        },
    }
}

/// Handle to an existing System V message queue.
#[derive(Debug)]
pub struct SysvQueue {
    key: ChannelKey,
    id: c_int,
    poll_interval: Duration,
}

impl SysvQueue {
    /// Opens the queue for `key`. Fails if it does not exist.
    pub fn open(key: ChannelKey) -> Result<Self> {
        Self::get(key, 0)
    }

    /// Opens the queue for `key`, creating it if needed.
    pub fn create(key: ChannelKey) -> Result<Self> {
        Self::get(key, IPC_CREAT | QUEUE_MODE)
    }

    fn get(key: ChannelKey, flags: c_int) -> Result<Self> {
        // SAFETY: msgget takes only integer arguments and touches no caller memory.
        let id = unsafe { libc::msgget(key.0, flags) };
        if id < 0 {
            return Err(match Errno::last() {
                Errno::ENOENT => Error::ErrChannelAbsent(key.0),
                errno => Error::ErrChannelOperation {
                    op: "msgget",
                    errno: errno as i32,
                },
            });
        }
        Ok(Self {
            key,
            id,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Kernel queue identifier.
    pub fn id(&self) -> c_int {
        self.id
    }
}

impl ExchangeChannel for SysvQueue {
    fn key(&self) -> ChannelKey {
        self.key
    }

    fn publish(&self, class: MessageClass, payload: &[u8]) -> Result<()> {
        let class = class.validate()?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(Error::ErrMessageTooLarge(payload.len(), MAX_MESSAGE_SIZE));
        }

        let mut buf = MsgBuf::new(class.0 as c_long);
        buf.mtext[..payload.len()].copy_from_slice(payload);

        // SAFETY: buf is a repr(C) msgbuf whose text holds at least payload.len() bytes.
        let rc = unsafe {
            libc::msgsnd(
                self.id,
                &buf as *const MsgBuf as *const c_void,
                payload.len(),
                IPC_NOWAIT,
            )
        };
        if rc < 0 {
            if Errno::last() == Errno::EAGAIN {
                return Err(Error::ErrChannelFull(self.key.0));
            }
            return Err(last_error("msgsnd"));
        }
        Ok(())
    }

    fn pending(&self) -> Result<usize> {
        // SAFETY: msqid_ds is plain old data, IPC_STAT fills it in.
        let mut ds: libc::msqid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: `ds` is a valid, exclusively borrowed msqid_ds for the whole call.
        let rc = unsafe { libc::msgctl(self.id, IPC_STAT, &mut ds) };
        if rc < 0 {
            return Err(last_error("msgctl"));
        }
        Ok(ds.msg_qnum as usize)
    }

    fn try_recv(&self, class: MessageClass) -> Result<Option<Bytes>> {
        let class = class.validate()?;
        let mut buf = MsgBuf::new(0);

        // SAFETY: the kernel writes at most MAX_MESSAGE_SIZE bytes of text,
        // longer messages are truncated by MSG_NOERROR.
        let n = unsafe {
            libc::msgrcv(
                self.id,
                &mut buf as *mut MsgBuf as *mut c_void,
                MAX_MESSAGE_SIZE,
                class.0 as c_long,
                IPC_NOWAIT | MSG_NOERROR,
            )
        };
        if n < 0 {
            return match Errno::last() {
                Errno::ENOMSG | Errno::EINTR => Ok(None),
                _ => Err(last_error("msgrcv")),
            };
        }
        Ok(Some(Bytes::copy_from_slice(&buf.mtext[..n as usize])))
    }

    fn recv_timeout(
        &self,
        class: MessageClass,
        timeout: Duration,
        cancel: &Cancellation,
    ) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::ErrExchangeCancelled);
            }
            if let Some(payload) = self.try_recv(class)? {
                return Ok(payload);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ErrExchangeTimeout(timeout));
            }
            thread::sleep((deadline - now).min(self.poll_interval));
        }
    }

    fn destroy(&self) -> Result<()> {
        // SAFETY: IPC_RMID ignores the buffer argument, so a null pointer is never read.
        let rc = unsafe { libc::msgctl(self.id, IPC_RMID, std::ptr::null_mut()) };
        if rc < 0 {
            return match last_error("msgctl") {
                // already gone
                Error::ErrChannelRemoved => Ok(()),
                err => Err(err),
            };
        }
        log::debug!("removed exchange channel {} (id {})", self.key, self.id);
        Ok(())
    }
}

/// Probes System V message queues by key.
#[derive(Debug, Clone)]
pub struct SysvDiscovery {
    poll_interval: Duration,
}

impl Default for SysvDiscovery {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SysvDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep between receive attempts of discovered queues.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Discovery for SysvDiscovery {
    fn probe(&self, key: ChannelKey) -> Option<Arc<dyn ExchangeChannel>> {
        match SysvQueue::open(key) {
            Ok(queue) => Some(Arc::new(queue.with_poll_interval(self.poll_interval))),
            Err(err) => {
                log::trace!("probe of exchange channel {} failed: {}", key, err);
                None
            }
        }
    }
}
