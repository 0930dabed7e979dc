//! Media transport boundary.
//!
//! A [`MediaTransport`] sends RTP/RTCP packets and delivers received ones to
//! callbacks registered with [`attach`](MediaTransport::attach). Transports
//! compose by wrapping: an outer transport holds the inner one and forwards
//! every call, altering only what it needs to.

use bytes::BytesMut;
use shared::error::Result;
use std::fmt;
use std::net::SocketAddr;

/// Callback invoked with each received packet.
pub type PacketHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Static description of a transport.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    pub name: String,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => write!(f, "incoming"),
            Direction::Outgoing => write!(f, "outgoing"),
        }
    }
}

pub trait MediaTransport: Send {
    fn info(&self) -> TransportInfo;

    /// Registers the receive callbacks. Packets received before this are dropped.
    fn attach(&mut self, rtp: PacketHandler, rtcp: PacketHandler) -> Result<()>;

    /// Unregisters the receive callbacks.
    fn detach(&mut self) -> Result<()>;

    fn send_rtp(&mut self, packet: BytesMut) -> Result<()>;

    fn send_rtcp(&mut self, packet: BytesMut) -> Result<()>;

    fn send_rtcp_to(&mut self, addr: SocketAddr, packet: BytesMut) -> Result<()>;

    /// Session negotiation finished; media may flow.
    fn media_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn media_stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drops `percent` of the packets in `direction`, for testing.
    fn simulate_lost(&mut self, _direction: Direction, _percent: u8) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()>;

    /// Wraps this transport with an outer one produced by `f`.
    fn with<O, F>(self, f: F) -> O
    where
        F: FnOnce(Self) -> O,
        O: MediaTransport,
        Self: Sized,
    {
        f(self)
    }
}
