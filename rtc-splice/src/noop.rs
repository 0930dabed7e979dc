//! NoOp Transport - A pass-through terminal for transport chains.

use crate::transport::{Direction, MediaTransport, PacketHandler, TransportInfo};
use bytes::BytesMut;
use rand::Rng;
use shared::error::{Error, Result};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Handlers {
    rtp: Option<PacketHandler>,
    rtcp: Option<PacketHandler>,
    incoming_loss: u8,
}

/// A transport that queues sent packets instead of transmitting them.
///
/// `NoopTransport` serves as the innermost layer of a transport chain. Sent
/// packets are returned by `poll_rtp_sent`/`poll_rtcp_sent`, and received
/// packets are injected through a [`NoopInjector`].
///
/// # Example
///
/// ```ignore
/// use rtc_splice::{MediaTransport, NoopTransport};
///
/// let mut noop = NoopTransport::new();
/// let injector = noop.injector();
/// noop.attach(Box::new(|pkt: &[u8]| println!("rtp {}", pkt.len())), Box::new(|_: &[u8]| {})).unwrap();
/// injector.deliver_rtp(&[0x80, 0x60, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1]);
/// ```
pub struct NoopTransport {
    rtp_sent: VecDeque<BytesMut>,
    rtcp_sent: VecDeque<(Option<SocketAddr>, BytesMut)>,
    handlers: Arc<Mutex<Handlers>>,
    outgoing_loss: u8,
    started: bool,
    closed: bool,
}

impl NoopTransport {
    /// Create a new NoopTransport.
    pub fn new() -> Self {
        Self {
            rtp_sent: VecDeque::new(),
            rtcp_sent: VecDeque::new(),
            handlers: Arc::new(Mutex::new(Handlers::default())),
            outgoing_loss: 0,
            started: false,
            closed: false,
        }
    }

    /// Handle for delivering received packets to the attached callbacks.
    pub fn injector(&self) -> NoopInjector {
        NoopInjector {
            handlers: Arc::clone(&self.handlers),
        }
    }

    pub fn poll_rtp_sent(&mut self) -> Option<BytesMut> {
        self.rtp_sent.pop_front()
    }

    pub fn poll_rtcp_sent(&mut self) -> Option<(Option<SocketAddr>, BytesMut)> {
        self.rtcp_sent.pop_front()
    }

    pub fn is_attached(&self) -> bool {
        self.handlers
            .lock()
            .map(|h| h.rtp.is_some() || h.rtcp.is_some())
            .unwrap_or(false)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ErrTransportClosed)
        } else {
            Ok(())
        }
    }
}

impl Default for NoopTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaTransport for NoopTransport {
    fn info(&self) -> TransportInfo {
        TransportInfo {
            name: "noop".to_string(),
            ..Default::default()
        }
    }

    fn attach(&mut self, rtp: PacketHandler, rtcp: PacketHandler) -> Result<()> {
        self.check_open()?;
        let mut handlers = self.handlers.lock()?;
        handlers.rtp = Some(rtp);
        handlers.rtcp = Some(rtcp);
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        let mut handlers = self.handlers.lock()?;
        handlers.rtp = None;
        handlers.rtcp = None;
        Ok(())
    }

    fn send_rtp(&mut self, packet: BytesMut) -> Result<()> {
        self.check_open()?;
        if !lost(self.outgoing_loss) {
            self.rtp_sent.push_back(packet);
        }
        Ok(())
    }

    fn send_rtcp(&mut self, packet: BytesMut) -> Result<()> {
        self.check_open()?;
        self.rtcp_sent.push_back((None, packet));
        Ok(())
    }

    fn send_rtcp_to(&mut self, addr: SocketAddr, packet: BytesMut) -> Result<()> {
        self.check_open()?;
        self.rtcp_sent.push_back((Some(addr), packet));
        Ok(())
    }

    fn media_start(&mut self) -> Result<()> {
        self.check_open()?;
        self.started = true;
        Ok(())
    }

    fn media_stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn simulate_lost(&mut self, direction: Direction, percent: u8) -> Result<()> {
        let percent = percent.min(100);
        match direction {
            Direction::Incoming => self.handlers.lock()?.incoming_loss = percent,
            Direction::Outgoing => self.outgoing_loss = percent,
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.started = false;
        self.rtp_sent.clear();
        self.rtcp_sent.clear();
        self.detach()
    }
}

/// Delivers packets to the callbacks attached to a [`NoopTransport`].
#[derive(Clone)]
pub struct NoopInjector {
    handlers: Arc<Mutex<Handlers>>,
}

impl NoopInjector {
    /// Returns `false` if no RTP callback is attached or the packet was lost.
    pub fn deliver_rtp(&self, packet: &[u8]) -> bool {
        self.deliver(packet, |h| h.rtp.as_mut())
    }

    pub fn deliver_rtcp(&self, packet: &[u8]) -> bool {
        self.deliver(packet, |h| h.rtcp.as_mut())
    }

    fn deliver<F>(&self, packet: &[u8], select: F) -> bool
    where
        F: FnOnce(&mut Handlers) -> Option<&mut PacketHandler>,
    {
        let Ok(mut handlers) = self.handlers.lock() else {
            return false;
        };
        if lost(handlers.incoming_loss) {
            return false;
        }
        match select(&mut handlers) {
            Some(handler) => {
                handler(packet);
                true
            }
            None => false,
        }
    }
}

fn lost(percent: u8) -> bool {
    percent > 0 && rand::rng().random_range(0..100u8) < percent
}
