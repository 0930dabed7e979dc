//! RTC Splice - transparent RTP payload interception.
//!
//! This crate sits between a media transport and the stream consuming it. It
//! copies the payload of RTP packets to an external cooperating process over a
//! named exchange channel and, when that process supplies replacements on a
//! second channel, overwrites outgoing payloads with them. Headers, sizes and
//! RTCP are never touched. Each exchange is timestamped for later analysis.
//!
//! # Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`payload::extract`] | Locates the payload window of a raw RTP packet |
//! | [`ExchangeEngine`] | Receive and send legs, drain of stale messages, bounded receive |
//! | [`Gate`] | Opens on the first inbound packet, enables outbound substitution |
//! | [`TimingLog`] | Bounded `capture`/`substitute` timestamp log, written once at detach |
//! | [`SpliceTransport`] | [`MediaTransport`] decorator wiring the legs into a transport |
//! | [`NoopTransport`] | Pass-through terminal for transport chains |
//!
//! # Modes
//!
//! Channel presence is probed once, when the adapter is built:
//!
//! - outbound present, inbound absent: payloads are captured, nothing is substituted;
//! - both present: after the first inbound packet, every outbound payload is
//!   captured and then replaced by the newest message from the inbound channel;
//! - neither present: the adapter is a pure pass-through.
//!
//! A receive that does not complete within `receive_timeout`, or that is
//! cancelled by detach, leaves the packet unmodified.
//!
//! # Quick Start
//!
//! ```ignore
//! use rtc_ipc::sysv::SysvDiscovery;
//! use rtc_splice::{MediaTransport, NoopTransport, SpliceBuilder};
//! use std::time::Duration;
//!
//! let mut transport = NoopTransport::new().with(
//!     SpliceBuilder::new()
//!         .with_receive_timeout(Duration::from_millis(50))
//!         .build(&SysvDiscovery::new()),
//! );
//!
//! transport.attach(Box::new(|pkt: &[u8]| { /* deliver */ }), Box::new(|_: &[u8]| {}))?;
//! // ...
//! transport.detach()?;
//! ```

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod config;
mod engine;
mod gate;
mod noop;
pub mod payload;
mod splice;
mod stats;
mod timing;
mod transport;

pub use config::{
    DEFAULT_POLL_INTERVAL, DEFAULT_RECEIVE_TIMEOUT, DEFAULT_TIMING_LOG_PATH, SpliceBuilder,
    SpliceConfig,
};
pub use engine::{ExchangeEngine, ReceiveOutcome, SendOutcome};
pub use gate::Gate;
pub use noop::{NoopInjector, NoopTransport};
pub use payload::{Extracted, HeaderView, PayloadWindow, extract};
pub use splice::SpliceTransport;
pub use stats::{SpliceStats, StatsSnapshot};
pub use timing::{DEFAULT_TIMING_CAPACITY, OpTag, TimingLog, TimingRecord};
pub use transport::{Direction, MediaTransport, PacketHandler, TransportInfo};
