#![allow(dead_code)]

use std::io;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // packet errors
    #[error("malformed packet: {len} bytes, payload starts at {offset}")]
    ErrMalformedPacket { len: usize, offset: usize },

    // exchange channel errors
    #[error("exchange channel {0} is absent")]
    ErrChannelAbsent(i32),
    #[error("exchange channel {op} failed: {}", os_error(.errno))]
    ErrChannelOperation { op: &'static str, errno: i32 },
    #[error("exchange channel {0} is full")]
    ErrChannelFull(i32),
    #[error("exchange channel has been removed")]
    ErrChannelRemoved,
    #[error("exchange message too large: {0} bytes, limit {1}")]
    ErrMessageTooLarge(usize, usize),
    #[error("invalid message class {0}, must be positive")]
    ErrInvalidMessageClass(i64),
    #[error("substitute length mismatch: payload {expected} bytes, message {actual} bytes")]
    ErrLengthMismatch { expected: usize, actual: usize },
    #[error("exchange timed out after {0:?}")]
    ErrExchangeTimeout(Duration),
    #[error("exchange cancelled")]
    ErrExchangeCancelled,

    // transport errors
    #[error("transport already attached")]
    ErrAlreadyAttached,
    #[error("transport not attached")]
    ErrNotAttached,
    #[error("transport closed")]
    ErrTransportClosed,

    #[error("{0}")]
    Io(#[source] IoError),
    #[error("mutex poison: {0}")]
    PoisonError(String),
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Failures that only affect the current exchange; the packet passes through
    /// unmodified and the next packet tries again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ErrChannelOperation { .. }
                | Error::ErrChannelFull(_)
                | Error::ErrMessageTooLarge(..)
                | Error::ErrLengthMismatch { .. }
                | Error::ErrExchangeTimeout(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ErrExchangeTimeout(_))
    }
}

fn os_error(errno: &i32) -> io::Error {
    io::Error::from_raw_os_error(*errno)
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::PoisonError(e.to_string())
    }
}
