//! Splice Transport - payload interception around another transport.

use crate::config::SpliceConfig;
use crate::engine::ExchangeEngine;
use crate::gate::Gate;
use crate::stats::StatsSnapshot;
use crate::transport::{Direction, MediaTransport, PacketHandler, TransportInfo};
use bytes::BytesMut;
use ipc::{Cancellation, Discovery};
use shared::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;

/// Transport decorator exchanging RTP payloads with an external process.
///
/// Every received RTP packet goes through the receive leg before reaching the
/// attached callback, unmodified. Every sent RTP packet goes through the send
/// leg, once substitution is active and the gate is open, and is transmitted
/// with its payload replaced. On any exchange failure the original packet is
/// delivered or transmitted. RTCP passes through untouched.
pub struct SpliceTransport<T> {
    inner: T,
    engine: Arc<ExchangeEngine>,
    owns_inner: bool,
    attached: bool,
    closed: bool,
}

impl<T: MediaTransport> SpliceTransport<T> {
    /// Wraps `inner`, probing the exchange channels through `discovery`.
    pub fn new(inner: T, config: SpliceConfig, discovery: &dyn Discovery) -> Self {
        Self::from_engine(inner, Arc::new(ExchangeEngine::new(config, discovery)), true)
    }

    pub fn from_engine(inner: T, engine: Arc<ExchangeEngine>, owns_inner: bool) -> Self {
        log::debug!(
            "splice over {}: outbound {:?}, inbound {:?}, substitution {}",
            inner.info().name,
            engine.outbound(),
            engine.inbound(),
            engine.substitution()
        );
        Self {
            inner,
            engine,
            owns_inner,
            attached: false,
            closed: false,
        }
    }

    pub fn engine(&self) -> &Arc<ExchangeEngine> {
        &self.engine
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    pub fn gate(&self) -> &Gate {
        self.engine.gate()
    }

    pub fn cancellation(&self) -> &Cancellation {
        self.engine.cancellation()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: MediaTransport> MediaTransport for SpliceTransport<T> {
    fn info(&self) -> TransportInfo {
        self.inner.info()
    }

    fn attach(&mut self, mut rtp: PacketHandler, rtcp: PacketHandler) -> Result<()> {
        if self.attached {
            return Err(Error::ErrAlreadyAttached);
        }

        let engine = Arc::clone(&self.engine);
        let wrapped: PacketHandler = Box::new(move |packet: &[u8]| {
            // failures are counted and logged by the engine, delivery goes on
            let _ = engine.receive_leg(packet);
            rtp(packet);
        });

        self.inner.attach(wrapped, rtcp)?;
        self.attached = true;
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Err(Error::ErrNotAttached);
        }
        self.attached = false;

        let result = self.inner.detach();
        self.engine.teardown();
        result
    }

    fn send_rtp(&mut self, mut packet: BytesMut) -> Result<()> {
        if self.engine.is_ready() {
            // on error the packet is left as it was
            let _ = self.engine.send_leg(&mut packet);
        }
        self.inner.send_rtp(packet)
    }

    fn send_rtcp(&mut self, packet: BytesMut) -> Result<()> {
        self.inner.send_rtcp(packet)
    }

    fn send_rtcp_to(&mut self, addr: SocketAddr, packet: BytesMut) -> Result<()> {
        self.inner.send_rtcp_to(addr, packet)
    }

    fn media_start(&mut self) -> Result<()> {
        self.inner.media_start()
    }

    fn media_stop(&mut self) -> Result<()> {
        self.inner.media_stop()
    }

    fn simulate_lost(&mut self, direction: Direction, percent: u8) -> Result<()> {
        self.inner.simulate_lost(direction, percent)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.engine.cancel();

        let mut result = Ok(());
        if self.attached {
            result = self.detach();
        } else {
            self.engine.teardown();
        }
        if self.owns_inner {
            self.inner.close()?;
        }
        result
    }
}
