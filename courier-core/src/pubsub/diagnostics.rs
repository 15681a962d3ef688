//! Diagnostics for faults that never reach a caller
//!
//! Callback failures happen on the dispatch task long after the publisher
//! returned, and loopback drops or background transport failures have no
//! caller to return to. These are reported to a [`DiagnosticsSink`].
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::pubsub::{diagnostics_channel, BusBuilder};
//!
//! let (sink, mut events) = diagnostics_channel(64);
//! let bus = BusBuilder::<()>::new().diagnostics(sink).build()?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         eprintln!("{event}");
//!     }
//! });
//! ```

use super::traits::SubscriptionId;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// How a callback failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum FaultKind {
    /// Handler returned an error
    Error(String),
    /// Handler panicked
    Panic(String),
}

/// A subscriber callback failed while handling a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackFault {
    /// Subscription whose handler failed
    pub subscription: SubscriptionId,
    /// Channel of the message being handled
    pub channel: String,
    /// Queue sequence number of the message
    pub seq: u64,
    /// Failure details
    pub kind: FaultKind,
}

/// Event reported to a diagnostics sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// A subscriber callback returned an error or panicked
    CallbackFault(CallbackFault),

    /// An inbound message was dropped by the backpressure policy
    MessageDropped {
        channel: String,
        dropped_total: u64,
    },

    /// A transport send failed where no caller could be told
    TransportFailure { channel: String, error: String },
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::CallbackFault(fault) => match &fault.kind {
                FaultKind::Error(e) => write!(
                    f,
                    "callback {} failed on '{}' (seq {}): {}",
                    fault.subscription, fault.channel, fault.seq, e
                ),
                FaultKind::Panic(e) => write!(
                    f,
                    "callback {} panicked on '{}' (seq {}): {}",
                    fault.subscription, fault.channel, fault.seq, e
                ),
            },
            DiagnosticEvent::MessageDropped {
                channel,
                dropped_total,
            } => write!(f, "message on '{}' dropped ({} total)", channel, dropped_total),
            DiagnosticEvent::TransportFailure { channel, error } => {
                write!(f, "transport send on '{}' failed: {}", channel, error)
            }
        }
    }
}

/// Receiver of diagnostic events.
///
/// Called from the dispatch task and from producers; implementations must
/// not block.
pub trait DiagnosticsSink: Send + Sync + fmt::Debug {
    /// Report one event
    fn report(&self, event: DiagnosticEvent);
}

/// Default sink: structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDiagnostics;

impl DiagnosticsSink for LoggingDiagnostics {
    fn report(&self, event: DiagnosticEvent) {
        match event {
            DiagnosticEvent::CallbackFault(fault) => {
                tracing::warn!(
                    subscription = %fault.subscription,
                    channel = %fault.channel,
                    seq = fault.seq,
                    fault = ?fault.kind,
                    "Subscriber callback failed"
                );
            }
            DiagnosticEvent::MessageDropped {
                channel,
                dropped_total,
            } => {
                tracing::warn!(channel = %channel, dropped_total, "Inbound message dropped");
            }
            DiagnosticEvent::TransportFailure { channel, error } => {
                tracing::warn!(channel = %channel, error = %error, "Transport send failed");
            }
        }
    }
}

/// Sink forwarding events into a bounded channel.
///
/// Events are discarded if the receiver falls behind or is gone.
#[derive(Debug, Clone)]
pub struct ChannelDiagnostics {
    sender: mpsc::Sender<DiagnosticEvent>,
}

impl DiagnosticsSink for ChannelDiagnostics {
    fn report(&self, event: DiagnosticEvent) {
        if let Err(e) = self.sender.try_send(event) {
            tracing::debug!(error = %e, "Diagnostic event discarded");
        }
    }
}

/// Create a channel-backed diagnostics sink
pub fn diagnostics_channel(buffer_size: usize) -> (ChannelDiagnostics, mpsc::Receiver<DiagnosticEvent>) {
    let (sender, receiver) = mpsc::channel(buffer_size.max(1));
    (ChannelDiagnostics { sender }, receiver)
}
