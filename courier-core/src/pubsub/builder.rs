//! Builder for creating buses

use super::bus::Bus;
use super::diagnostics::{DiagnosticsSink, LoggingDiagnostics};
use super::transport::{LocalTransport, Transport};
use crate::config::{BackpressurePolicy, BusConfig};
use crate::error::Result;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating [`Bus`] instances
pub struct BusBuilder<C = ()> {
    config: BusConfig,
    transport: Option<Arc<dyn Transport>>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    _context: PhantomData<fn() -> C>,
}

impl<C: Send + Sync + 'static> BusBuilder<C> {
    /// Create a new bus builder
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            transport: None,
            diagnostics: None,
            _context: PhantomData,
        }
    }

    /// Use the given configuration, replacing any limits set so far
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Set maximum channel name and pattern length
    pub fn max_channel_length(mut self, len: usize) -> Self {
        self.config.max_channel_length = len;
        self
    }

    /// Set maximum payload size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set inbound queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_queue_capacity = capacity;
        self
    }

    /// Set backpressure policy
    pub fn backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.config.backpressure_policy = policy;
        self
    }

    /// Set transport send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Use local-only delivery (default)
    pub fn local(mut self) -> Self {
        self.transport = Some(Arc::new(LocalTransport));
        self
    }

    /// Use a transport
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a transport shared with other owners
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Report callback faults, drops and background transport failures to
    /// `sink` instead of the log
    pub fn diagnostics(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.diagnostics = Some(Arc::new(sink));
        self
    }

    /// Build the bus and attach it to its transport.
    ///
    /// The dispatch loop is not started; call [`Bus::start`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a limit or capacity is zero.
    pub fn build(self) -> Result<Bus<C>> {
        self.config.validate()?;

        let transport = self.transport.unwrap_or_else(|| Arc::new(LocalTransport));
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(LoggingDiagnostics));

        Ok(Bus::from_parts(self.config, transport, diagnostics))
    }
}

impl<C: Send + Sync + 'static> Default for BusBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for BusBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusBuilder")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}
