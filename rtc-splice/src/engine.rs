//! Exchange Engine - moves payloads between RTP packets and the exchange channels.
//!
//! # Receive leg
//!
//! Runs on every inbound packet before it reaches the stream. The packet is
//! never modified.
//!
//! - Substitution active: the first packet opens the [`Gate`]. No channel is touched.
//! - Otherwise: the payload window is computed and traced. With `inbound_capture`
//!   set, the payload is also published to the outbound channel.
//!
//! # Send leg
//!
//! Runs on an outbound packet just before transmission:
//!
//! 1. compute the payload window,
//! 2. publish the payload to the outbound channel, if present, and record `capture`,
//! 3. if the inbound channel is present, discard all but the newest pending
//!    message, wait (bounded) for one message, overwrite the payload with its
//!    first `len` bytes and record `substitute`.
//!
//! Any failure leaves the packet exactly as it was.

use crate::config::SpliceConfig;
use crate::gate::Gate;
use crate::payload::{self, Extracted, PayloadWindow};
use crate::stats::{SpliceStats, StatsSnapshot};
use crate::timing::{OpTag, TimingLog};
use ipc::{Cancellation, ChannelHandle, Discovery, ExchangeChannel, discover};
use shared::error::{Error, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the receive leg did with a packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Substitution is active; `opened` is set for the packet that opened the gate.
    Gate { opened: bool },
    /// The payload was inspected and, if `captured`, published.
    Observed {
        window: PayloadWindow,
        captured: bool,
    },
}

/// What the send leg did with a packet.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub window: PayloadWindow,
    pub captured: bool,
    pub substituted: bool,
    pub drained: usize,
}

/// Per-adapter exchange state: channel handles, mode, gate, timing log and counters.
pub struct ExchangeEngine {
    config: SpliceConfig,
    outbound: ChannelHandle,
    inbound: ChannelHandle,
    substitution: bool,
    gate: Gate,
    timing: TimingLog,
    stats: SpliceStats,
    cancel: Cancellation,
    /// Serializes publish, drain and receive so concurrent senders pair up correctly.
    exchange: Mutex<()>,
    torn_down: AtomicBool,
}

impl ExchangeEngine {
    /// Probes both channels through `discovery`.
    pub fn new(config: SpliceConfig, discovery: &dyn Discovery) -> Self {
        let outbound = discover(discovery, config.outbound_key);
        let inbound = discover(discovery, config.inbound_key);
        Self::with_channels(config, outbound, inbound)
    }

    pub fn with_channels(
        config: SpliceConfig,
        outbound: ChannelHandle,
        inbound: ChannelHandle,
    ) -> Self {
        let substitution = config.substitution_mode(inbound.is_present());
        if config.substitute && !inbound.is_present() {
            log::info!(
                "inbound channel {} absent, substitution disabled",
                config.inbound_key
            );
        }
        if config.legacy_coupling && !config.substitute && substitution {
            log::warn!(
                "inbound channel {} present, substitution enabled by legacy coupling",
                config.inbound_key
            );
        }

        Self {
            timing: TimingLog::new(config.timing_capacity),
            config,
            outbound,
            inbound,
            substitution,
            gate: Gate::new(),
            stats: SpliceStats::default(),
            cancel: Cancellation::new(),
            exchange: Mutex::new(()),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SpliceConfig {
        &self.config
    }

    pub fn outbound(&self) -> &ChannelHandle {
        &self.outbound
    }

    pub fn inbound(&self) -> &ChannelHandle {
        &self.inbound
    }

    /// Whether substitution is active for this adapter's lifetime.
    pub fn substitution(&self) -> bool {
        self.substitution
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Whether outbound packets should go through the send leg.
    pub fn is_ready(&self) -> bool {
        self.substitution && self.gate.is_open()
    }

    pub fn timing(&self) -> &TimingLog {
        &self.timing
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Unblocks any bounded receive in progress and fails later ones immediately.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn receive_leg(&self, packet: &[u8]) -> Result<ReceiveOutcome> {
        self.stats.inc_observed();

        if self.substitution {
            let opened = self.gate.open();
            if opened {
                log::info!("first inbound packet seen, substitution gate open");
            }
            return Ok(ReceiveOutcome::Gate { opened });
        }

        let result = self.observe(packet);
        self.account(&result);
        result
    }

    fn observe(&self, packet: &[u8]) -> Result<ReceiveOutcome> {
        let extracted = payload::extract(packet)?;
        trace_packet(&extracted, packet);

        let window = extracted.window;
        let mut captured = false;
        if self.config.inbound_capture
            && let Some(outbound) = self.outbound.channel()
        {
            self.capture(outbound.as_ref(), window.slice(packet))?;
            captured = true;
        }
        Ok(ReceiveOutcome::Observed { window, captured })
    }

    /// Runs the send leg on `packet` in place.
    ///
    /// On error the packet is left unmodified.
    pub fn send_leg(&self, packet: &mut [u8]) -> Result<SendOutcome> {
        let result = self.exchange(packet);
        self.account(&result);
        result
    }

    fn exchange(&self, packet: &mut [u8]) -> Result<SendOutcome> {
        let extracted = payload::extract(packet)?;
        trace_packet(&extracted, packet);

        let window = extracted.window;
        let mut outcome = SendOutcome {
            window,
            ..Default::default()
        };

        let _guard = self.exchange.lock()?;

        if let Some(outbound) = self.outbound.channel() {
            self.capture(outbound.as_ref(), window.slice(packet))?;
            outcome.captured = true;
        }

        if let Some(inbound) = self.inbound.channel() {
            if self.cancel.is_cancelled() {
                return Err(Error::ErrExchangeCancelled);
            }
            let class = self.config.message_class;
            let (latest, drained) = inbound.drain_stale(class);
            outcome.drained = drained;
            self.stats.add_drained(drained);

            let message = match latest {
                Some(message) => message,
                None => inbound.recv_timeout(class, self.config.receive_timeout, &self.cancel)?,
            };
            if message.len() < window.len {
                return Err(Error::ErrLengthMismatch {
                    expected: window.len,
                    actual: message.len(),
                });
            }
            if message.len() > window.len {
                log::trace!(
                    "substitute of {} bytes truncated to payload of {} bytes",
                    message.len(),
                    window.len
                );
            }

            window
                .slice_mut(packet)
                .copy_from_slice(&message[..window.len]);
            self.timing.record_now(OpTag::Substitute);
            self.stats.inc_substituted();
            outcome.substituted = true;
        }

        Ok(outcome)
    }

    fn capture(&self, outbound: &dyn ExchangeChannel, payload: &[u8]) -> Result<()> {
        outbound.publish(self.config.message_class, payload)?;
        self.timing.record_now(OpTag::Capture);
        self.stats.inc_captured();
        Ok(())
    }

    fn account<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => {}
            Err(err @ Error::ErrMalformedPacket { .. }) => {
                self.stats.inc_malformed();
                log::debug!("{}", err);
            }
            Err(err) if err.is_timeout() => {
                self.stats.inc_timeouts();
                log::warn!("{}, passing payload through", err);
            }
            Err(Error::ErrExchangeCancelled) => {
                log::debug!("exchange cancelled, passing payload through");
            }
            Err(err) => {
                self.stats.inc_failures();
                log::debug!("exchange failed: {}, passing payload through", err);
            }
        }
    }

    /// Cancels pending receives, removes the channels if configured and writes
    /// the timing log. Only the first call has any effect.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel();

        if self.config.remove_channels_on_detach {
            if let Err(err) = self.outbound.destroy() {
                log::warn!("failed to remove outbound channel: {}", err);
            }
            if self.substitution
                && let Err(err) = self.inbound.destroy()
            {
                log::warn!("failed to remove inbound channel: {}", err);
            }
        }

        match self.timing.flush(&self.config.timing_log_path) {
            Ok(Some(n)) => log::info!(
                "timing log: {} records written to {}, {} dropped",
                n,
                self.config.timing_log_path.display(),
                self.timing.dropped()
            ),
            Ok(None) => {}
            Err(err) => log::warn!(
                "failed to write timing log {}: {}",
                self.config.timing_log_path.display(),
                err
            ),
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

fn trace_packet(extracted: &Extracted, packet: &[u8]) {
    let header = &extracted.header;
    if header.version != 2 || !log::log_enabled!(log::Level::Trace) {
        return;
    }
    let payload = extracted.window.slice(packet);
    log::trace!(
        "rtp version {}, payload type {}, seq {}, ts {}, ssrc={:x}, payload size {}, firstb {:x?}, lastb {:x?}",
        header.version,
        header.payload_type,
        header.sequence_number,
        header.timestamp,
        header.ssrc,
        payload.len(),
        payload.first(),
        payload.last(),
    );
}
