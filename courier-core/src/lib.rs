//! # Courier - In-Process Publish/Subscribe Core
//!
//! Courier routes opaque byte payloads from publishers to subscriber
//! callbacks by channel name:
//! - Subscriptions on literal channel names or full-match regex patterns
//! - A bounded inbound queue with drop-newest, drop-oldest or blocking
//!   backpressure and a visible drop counter
//! - A single dispatch loop, so callbacks for a subscriber never overlap
//! - Callback isolation: errors and panics are reported, never propagated
//! - A pluggable transport for moving frames between processes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus: Bus<&'static str> = Bus::builder()
//!         .queue_capacity(256)
//!         .build()?;
//!     bus.start()?;
//!
//!     bus.subscribe(
//!         "sensor\\..*",
//!         true,
//!         |msg: &InboundMessage, name: &&'static str| -> HandlerResult {
//!             println!("{name}: {} bytes on {}", msg.size(), msg.channel);
//!             Ok(())
//!         },
//!         "sensors",
//!     )?;
//!
//!     bus.publish("sensor.temp", b"21.5").await?;
//!     bus.flush().await?;
//!     bus.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Registry**: copy-on-write snapshots; subscribe and unsubscribe are
//!   safe from inside callbacks
//! - **Inbound queue**: many producers, one consumer
//! - **Dispatch loop**: one tokio task per bus; shutdown and pause take
//!   effect between messages
//! - **Transport**: egress via `send`, ingress via an [`pubsub::InboundSink`]

pub mod config;
pub mod error;
pub mod pubsub;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{BackpressurePolicy, BusConfig, CourierConfig};
    pub use crate::error::{CourierError, Result};
    pub use crate::pubsub::{
        Bus, BusBuilder, BusStats, DiagnosticEvent, DiagnosticsSink, DispatchState, HandlerResult,
        HubTransport, InboundMessage, LocalTransport, MemoryHub, MessageHandler, PubSubError,
        SubscriptionId, Transport, TransportError,
    };
}
