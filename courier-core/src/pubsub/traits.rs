//! Core pub/sub trait definitions

use super::message::InboundMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned by a failing message handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for message handlers
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Callback invoked for every message matching a subscription.
///
/// Handlers run synchronously on the dispatch task, one at a time. A slow
/// handler delays delivery of every later message to every subscriber.
/// Returning `Err` or panicking is reported as a callback fault and does not
/// affect other handlers.
///
/// Any `Fn(&InboundMessage, &C) -> HandlerResult` closure is a handler.
pub trait MessageHandler<C>: Send + Sync + 'static {
    /// Handle one message; `context` is the value supplied at subscribe time
    fn handle(&self, message: &InboundMessage, context: &C) -> HandlerResult;
}

impl<C, F> MessageHandler<C> for F
where
    F: Fn(&InboundMessage, &C) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, message: &InboundMessage, context: &C) -> HandlerResult {
        self(message, context)
    }
}

/// Handle to a subscription (used to unsubscribe)
///
/// Identifiers carry the id of the bus that issued them, so a handle from
/// one bus never resolves on another. Sequence numbers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId {
    bus: Uuid,
    seq: u64,
}

impl SubscriptionId {
    pub(crate) fn new(bus: Uuid, seq: u64) -> Self {
        Self { bus, seq }
    }

    /// Id of the bus that issued this handle
    pub fn bus_id(&self) -> &Uuid {
        &self.bus
    }

    /// Registration sequence number
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bus, self.seq)
    }
}

/// Transport type for monitoring/debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process only, no egress
    Local,
    /// In-process hub shared by several buses
    Hub,
    /// Anything supplied by the embedding application
    Custom,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Local => f.write_str("local"),
            TransportKind::Hub => f.write_str("hub"),
            TransportKind::Custom => f.write_str("custom"),
        }
    }
}
