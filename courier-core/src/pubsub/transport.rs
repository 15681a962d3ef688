//! Transport contract
//!
//! A transport moves frames between processes or machines. The bus needs
//! only two things from it: best-effort egress via [`Transport::send`], and
//! a place to push received frames, handed over once through
//! [`Transport::on_receive`] as an [`InboundSink`].

use super::diagnostics::{DiagnosticEvent, DiagnosticsSink};
use super::message::InboundMessage;
use super::queue::{InboundQueue, PushError};
use super::traits::TransportKind;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The frame could not be sent
    #[error("send failed: {0}")]
    Send(String),

    /// The send did not complete in time
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// The transport has been shut down
    #[error("transport closed")]
    Closed,

    /// No runtime available to drive the send
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Physical delivery of frames
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send a frame. Best effort; no retries are expected of the caller.
    async fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Register the sink that received frames should be delivered to.
    ///
    /// Called once, when the bus is built.
    fn on_receive(&self, sink: InboundSink);

    /// Whether the bus should deliver its own publications to local
    /// subscribers itself
    fn wants_loopback(&self) -> bool {
        true
    }

    /// Whether `send` does anything; `false` lets the bus skip it
    fn has_egress(&self) -> bool {
        true
    }

    /// Transport type for monitoring
    fn kind(&self) -> TransportKind {
        TransportKind::Custom
    }

    /// Release transport resources
    async fn close(&self) {}

    /// Stop delivering into the registered sink, without waiting.
    ///
    /// Called when a bus is dropped without being stopped.
    fn detach(&self) {}
}

/// Entry point for frames received by a transport.
///
/// Cloneable and cheap to share across receive threads. Frames exceeding
/// the bus limits are rejected; drops are counted by the bus and reported
/// to its diagnostics sink.
#[derive(Clone)]
pub struct InboundSink {
    queue: Arc<InboundQueue>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    max_channel_length: usize,
    max_payload_size: usize,
}

impl InboundSink {
    pub(crate) fn new(
        queue: Arc<InboundQueue>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        max_channel_length: usize,
        max_payload_size: usize,
    ) -> Self {
        Self {
            queue,
            diagnostics,
            max_channel_length,
            max_payload_size,
        }
    }

    /// Deliver a frame, waiting for room if the bus uses the `Block` policy.
    ///
    /// # Errors
    ///
    /// `Oversized`, `Dropped` or `Closed`.
    pub async fn deliver(&self, channel: &str, payload: impl Into<Vec<u8>>) -> Result<(), PushError> {
        let message = self.admit(channel, payload.into())?;
        let result = self.queue.push(message).await;
        self.settle(channel, result)
    }

    /// Deliver a frame without waiting.
    ///
    /// # Errors
    ///
    /// `Oversized`, `Dropped` or `Closed`.
    pub fn try_deliver(&self, channel: &str, payload: impl Into<Vec<u8>>) -> Result<(), PushError> {
        let message = self.admit(channel, payload.into())?;
        let result = self.queue.try_push(message);
        self.settle(channel, result)
    }

    fn admit(&self, channel: &str, payload: Vec<u8>) -> Result<InboundMessage, PushError> {
        if channel.len() > self.max_channel_length || payload.len() > self.max_payload_size {
            tracing::warn!(
                channel = %channel,
                size = payload.len(),
                "Rejected oversized inbound frame"
            );
            return Err(PushError::Oversized);
        }
        Ok(InboundMessage::new(channel, payload))
    }

    fn settle(
        &self,
        channel: &str,
        result: Result<Option<InboundMessage>, PushError>,
    ) -> Result<(), PushError> {
        match result {
            Ok(None) => Ok(()),
            Ok(Some(evicted)) => {
                self.report_drop(&evicted.channel);
                Ok(())
            }
            Err(PushError::Dropped) => {
                self.report_drop(channel);
                Err(PushError::Dropped)
            }
            Err(e) => Err(e),
        }
    }

    fn report_drop(&self, channel: &str) {
        self.diagnostics.report(DiagnosticEvent::MessageDropped {
            channel: channel.to_string(),
            dropped_total: self.queue.dropped(),
        });
    }
}

impl fmt::Debug for InboundSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundSink")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// In-process only transport: no egress, every publication is looped back.
///
/// This is the default transport of a bus.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, _channel: &str, _payload: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    fn on_receive(&self, _sink: InboundSink) {}

    fn has_egress(&self) -> bool {
        false
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }
}
