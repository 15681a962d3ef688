//! Publish/subscribe bus
//!
//! This module provides the in-process core of a publish/subscribe system:
//! - Subscriptions on literal channel names or anchored regex patterns
//! - A bounded inbound queue with configurable backpressure
//! - A single dispatch loop invoking callbacks in registration order
//! - A [`Transport`] seam for moving frames between processes
//!
//! Callback faults, drops and background transport failures are reported to
//! a [`DiagnosticsSink`] rather than to publishers.

mod builder;
mod bus;
mod diagnostics;
mod dispatch;
mod error;
mod hub;
mod matcher;
mod message;
mod queue;
mod registry;
mod traits;
mod transport;

pub use builder::BusBuilder;
pub use bus::{Bus, BusStats, WeakBus};
pub use diagnostics::{
    diagnostics_channel, CallbackFault, ChannelDiagnostics, DiagnosticEvent, DiagnosticsSink,
    FaultKind, LoggingDiagnostics,
};
pub use dispatch::DispatchState;
pub use error::PubSubError;
pub use hub::{HubTransport, MemoryHub};
pub use matcher::{matches, ChannelPattern};
pub use message::InboundMessage;
pub use queue::{InboundQueue, PushError};
pub use registry::{Subscription, SubscriptionInfo, SubscriptionRegistry};
pub use traits::{HandlerError, HandlerResult, MessageHandler, SubscriptionId, TransportKind};
pub use transport::{InboundSink, LocalTransport, Transport, TransportError};
