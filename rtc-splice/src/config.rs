use crate::engine::ExchangeEngine;
use crate::splice::SpliceTransport;
use crate::timing::DEFAULT_TIMING_CAPACITY;
use crate::transport::MediaTransport;
use ipc::{ChannelKey, Discovery, MessageClass};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on the blocking receive of a substitute payload.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);
/// Default sleep between receive attempts on polled backends.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Default destination of the timing log.
pub const DEFAULT_TIMING_LOG_PATH: &str = "splice_times.log";

/// Settings of one splice adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpliceConfig {
    /// Channel receiving captured payloads.
    pub outbound_key: ChannelKey,
    /// Channel supplying substitute payloads.
    pub inbound_key: ChannelKey,
    /// Class of every message published or received.
    pub message_class: MessageClass,
    /// Substitute outbound payloads when the inbound channel exists.
    pub substitute: bool,
    /// Let inbound channel presence alone turn substitution on, ignoring `substitute`.
    pub legacy_coupling: bool,
    /// Publish inbound payloads to the outbound channel while not substituting.
    pub inbound_capture: bool,
    /// Bound on waiting for a substitute payload.
    pub receive_timeout: Duration,
    /// Sleep between receive attempts on polled backends.
    pub poll_interval: Duration,
    /// Records kept by the timing log.
    pub timing_capacity: usize,
    /// File the timing log is written to at detach.
    pub timing_log_path: PathBuf,
    /// Remove the exchange channels at detach.
    pub remove_channels_on_detach: bool,
}

impl Default for SpliceConfig {
    fn default() -> Self {
        Self {
            outbound_key: ChannelKey::OUTBOUND,
            inbound_key: ChannelKey::INBOUND,
            message_class: MessageClass::PAYLOAD,
            substitute: true,
            legacy_coupling: false,
            inbound_capture: false,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timing_capacity: DEFAULT_TIMING_CAPACITY,
            timing_log_path: PathBuf::from(DEFAULT_TIMING_LOG_PATH),
            remove_channels_on_detach: true,
        }
    }
}

impl SpliceConfig {
    /// Whether outbound payloads get substituted, given whether the inbound channel exists.
    ///
    /// Without an inbound channel there is nothing to substitute with, whatever
    /// the settings say.
    pub fn substitution_mode(&self, inbound_present: bool) -> bool {
        inbound_present && (self.legacy_coupling || self.substitute)
    }

    /// Discovery of System V queues honoring `poll_interval`.
    #[cfg(target_os = "linux")]
    pub fn sysv_discovery(&self) -> ipc::sysv::SysvDiscovery {
        ipc::sysv::SysvDiscovery::new().with_poll_interval(self.poll_interval)
    }
}

/// Builder for the [`SpliceTransport`] adapter.
///
/// # Example
///
/// ```ignore
/// use rtc_splice::{MediaTransport, NoopTransport, SpliceBuilder};
/// use rtc_ipc::MemoryBus;
/// use std::time::Duration;
///
/// let bus = MemoryBus::new();
/// let transport = NoopTransport::new().with(
///     SpliceBuilder::new()
///         .with_receive_timeout(Duration::from_millis(50))
///         .with_timing_log_path("call_times.log")
///         .build(&bus),
/// );
/// ```
pub struct SpliceBuilder<T> {
    config: SpliceConfig,
    owns_inner: bool,
    _phantom: PhantomData<T>,
}

impl<T> Default for SpliceBuilder<T> {
    fn default() -> Self {
        Self {
            config: SpliceConfig::default(),
            owns_inner: true,
            _phantom: PhantomData,
        }
    }
}

impl<T> SpliceBuilder<T> {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every setting at once.
    pub fn with_config(mut self, config: SpliceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_outbound_key(mut self, key: ChannelKey) -> Self {
        self.config.outbound_key = key;
        self
    }

    pub fn with_inbound_key(mut self, key: ChannelKey) -> Self {
        self.config.inbound_key = key;
        self
    }

    pub fn with_message_class(mut self, class: MessageClass) -> Self {
        self.config.message_class = class;
        self
    }

    pub fn with_substitute(mut self, substitute: bool) -> Self {
        self.config.substitute = substitute;
        self
    }

    pub fn with_legacy_coupling(mut self, legacy_coupling: bool) -> Self {
        self.config.legacy_coupling = legacy_coupling;
        self
    }

    pub fn with_inbound_capture(mut self, inbound_capture: bool) -> Self {
        self.config.inbound_capture = inbound_capture;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_timing_capacity(mut self, capacity: usize) -> Self {
        self.config.timing_capacity = capacity;
        self
    }

    pub fn with_timing_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.timing_log_path = path.into();
        self
    }

    pub fn with_remove_channels_on_detach(mut self, remove: bool) -> Self {
        self.config.remove_channels_on_detach = remove;
        self
    }

    /// Close the wrapped transport when the adapter is closed.
    pub fn with_owns_inner(mut self, owns_inner: bool) -> Self {
        self.owns_inner = owns_inner;
        self
    }

    pub fn config(&self) -> &SpliceConfig {
        &self.config
    }

    /// Probe the exchange channels and return the adapter factory.
    pub fn build(self, discovery: &dyn Discovery) -> impl FnOnce(T) -> SpliceTransport<T>
    where
        T: MediaTransport,
    {
        let engine = Arc::new(ExchangeEngine::new(self.config, discovery));
        let owns_inner = self.owns_inner;
        move |inner| SpliceTransport::from_engine(inner, engine, owns_inner)
    }
}
