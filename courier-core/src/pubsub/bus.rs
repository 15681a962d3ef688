//! The bus: subscription registry, inbound queue, dispatch loop and
//! transport wired together
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::pubsub::{Bus, HandlerResult, InboundMessage};
//!
//! let bus: Bus<&'static str> = Bus::new();
//! bus.start()?;
//!
//! bus.subscribe("odom", false, |msg: &InboundMessage, who: &&'static str| -> HandlerResult {
//!     println!("{who} got {} bytes on {}", msg.size(), msg.channel);
//!     Ok(())
//! }, "logger")?;
//!
//! bus.publish("odom", b"\x01\x02").await?;
//! bus.flush().await?;
//! bus.stop().await;
//! ```

use super::builder::BusBuilder;
use super::diagnostics::{DiagnosticEvent, DiagnosticsSink, LoggingDiagnostics};
use super::dispatch::{BusCounters, DispatchControl, DispatchState, Dispatcher};
use super::error::PubSubError;
use super::queue::{InboundQueue, PushError};
use super::registry::{SubscriptionInfo, SubscriptionRegistry};
use super::traits::{MessageHandler, SubscriptionId, TransportKind};
use super::transport::{InboundSink, LocalTransport, Transport, TransportError};
use crate::config::BusConfig;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Point-in-time bus statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Accepted publications
    pub published: u64,
    /// Successful callback invocations
    pub delivered: u64,
    /// Messages taken off the queue and dispatched
    pub dispatched: u64,
    /// Inbound messages dropped under backpressure
    pub dropped: u64,
    /// Callbacks that returned an error or panicked
    pub callback_faults: u64,
    /// Failed transport sends
    pub transport_failures: u64,
    /// Live subscriptions
    pub subscriptions: usize,
    /// Messages waiting in the inbound queue
    pub queued: usize,
}

struct BusInner<C> {
    config: BusConfig,
    registry: Arc<SubscriptionRegistry<C>>,
    queue: Arc<InboundQueue>,
    sink: InboundSink,
    transport: Arc<dyn Transport>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    counters: Arc<BusCounters>,
    control: Arc<DispatchControl>,
    started: AtomicBool,
    stopping: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C> Drop for BusInner<C> {
    fn drop(&mut self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropped without stop(): let the dispatch task exit on its own
        self.control.shutdown();
        let discarded = self.queue.close();
        self.transport.detach();
        debug!(
            bus = %self.registry.instance_id(),
            discarded,
            "Bus dropped without stop"
        );
    }
}

/// Publish/subscribe bus.
///
/// `C` is the per-subscription context handed back to the callback on every
/// delivery. Cloning a bus is cheap; all clones share the same state.
pub struct Bus<C = ()> {
    inner: Arc<BusInner<C>>,
}

impl<C> Clone for Bus<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> Bus<C> {
    /// Create a bus with default configuration and the local transport
    pub fn new() -> Self {
        Self::from_parts(
            BusConfig::default(),
            Arc::new(LocalTransport),
            Arc::new(LoggingDiagnostics),
        )
    }

    /// Start building a bus
    pub fn builder() -> BusBuilder<C> {
        BusBuilder::new()
    }

    /// Assemble a bus from validated parts and attach it to the transport
    pub(crate) fn from_parts(
        config: BusConfig,
        transport: Arc<dyn Transport>,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(config.max_channel_length));
        let queue = Arc::new(InboundQueue::new(
            config.inbound_queue_capacity,
            config.backpressure_policy,
        ));
        let sink = InboundSink::new(
            queue.clone(),
            diagnostics.clone(),
            config.max_channel_length,
            config.max_payload_size,
        );

        transport.on_receive(sink.clone());

        info!(
            bus = %registry.instance_id(),
            transport = %transport.kind(),
            capacity = queue.capacity(),
            policy = %queue.policy(),
            "Bus created"
        );

        Self {
            inner: Arc::new(BusInner {
                config,
                registry,
                queue,
                sink,
                transport,
                diagnostics,
                counters: Arc::new(BusCounters::default()),
                control: Arc::new(DispatchControl::new()),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Register a callback for every channel matching `pattern`.
    ///
    /// With `is_regex` the pattern must match the whole channel name.
    /// Callable from inside a callback; the change takes effect from the
    /// next message.
    ///
    /// # Errors
    ///
    /// `PatternTooLong` or `InvalidPattern`; nothing is registered.
    pub fn subscribe(
        &self,
        pattern: &str,
        is_regex: bool,
        handler: impl MessageHandler<C>,
        context: C,
    ) -> Result<SubscriptionId, PubSubError> {
        self.inner
            .registry
            .subscribe(pattern, is_regex, Arc::new(handler), context)
    }

    /// Remove a subscription.
    ///
    /// Once this returns, the callback is not invoked for any message whose
    /// dispatch starts afterwards.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown, already removed, or foreign handles.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PubSubError> {
        self.inner.registry.unsubscribe(id)
    }

    /// Publish a message.
    ///
    /// The frame goes to the transport first (bounded by the configured send
    /// timeout), then into the local inbound queue if the transport wants
    /// loopback. Under the `Block` policy this waits for queue room. A
    /// loopback drop is counted, not returned.
    ///
    /// # Errors
    ///
    /// `ChannelTooLong` and `PayloadTooLarge` before anything happens,
    /// `Closed` once the bus is stopped, and `TransportFailure` after
    /// loopback was attempted.
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), PubSubError> {
        self.admit(channel, payload)?;
        let inner = &self.inner;

        let egress = if inner.transport.has_egress() {
            send_with_timeout(inner.transport.as_ref(), channel, payload, inner.config.send_timeout).await
        } else {
            Ok(())
        };

        if inner.transport.wants_loopback() {
            let result = inner.sink.deliver(channel, payload).await;
            self.settle_loopback(channel, result)?;
        }

        egress.map_err(|e| {
            inner.counters.transport_failures.fetch_add(1, Ordering::Relaxed);
            warn!(channel = %channel, error = %e, "Transport send failed");
            PubSubError::TransportFailure(e)
        })
    }

    /// Publish without waiting.
    ///
    /// Loopback never waits, even under the `Block` policy (a full queue
    /// drops). Transport egress runs in the background; its failures are
    /// reported to the diagnostics sink. Safe to call from a callback.
    ///
    /// # Errors
    ///
    /// `ChannelTooLong`, `PayloadTooLarge` and `Closed`, plus
    /// `TransportFailure` if egress is needed and no tokio runtime is
    /// available.
    pub fn try_publish(&self, channel: &str, payload: &[u8]) -> Result<(), PubSubError> {
        self.admit(channel, payload)?;
        let inner = &self.inner;

        let egress = if inner.transport.has_egress() {
            self.spawn_egress(channel, payload)
        } else {
            Ok(())
        };

        if inner.transport.wants_loopback() {
            let result = inner.sink.try_deliver(channel, payload);
            self.settle_loopback(channel, result)?;
        }

        egress.map_err(|e| {
            inner.counters.transport_failures.fetch_add(1, Ordering::Relaxed);
            PubSubError::TransportFailure(e)
        })
    }

    fn admit(&self, channel: &str, payload: &[u8]) -> Result<(), PubSubError> {
        let config = &self.inner.config;
        if channel.len() > config.max_channel_length {
            return Err(PubSubError::ChannelTooLong {
                len: channel.len(),
                max: config.max_channel_length,
            });
        }
        if payload.len() > config.max_payload_size {
            return Err(PubSubError::PayloadTooLarge {
                size: payload.len(),
                max: config.max_payload_size,
            });
        }
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }
        self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn settle_loopback(&self, channel: &str, result: Result<(), PushError>) -> Result<(), PubSubError> {
        match result {
            Ok(()) | Err(PushError::Dropped) => Ok(()),
            Err(PushError::Closed) => Err(PubSubError::Closed),
            Err(PushError::Oversized) => {
                // admit() already enforced the same limits
                debug!(channel = %channel, "Loopback rejected oversized frame");
                Ok(())
            }
        }
    }

    fn spawn_egress(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        let handle = Handle::try_current().map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let transport = self.inner.transport.clone();
        let diagnostics = self.inner.diagnostics.clone();
        let counters = self.inner.counters.clone();
        let timeout = self.inner.config.send_timeout;
        let channel = channel.to_string();
        let payload = payload.to_vec();

        handle.spawn(async move {
            if let Err(e) = send_with_timeout(transport.as_ref(), &channel, &payload, timeout).await {
                counters.transport_failures.fetch_add(1, Ordering::Relaxed);
                diagnostics.report(DiagnosticEvent::TransportFailure {
                    channel,
                    error: e.to_string(),
                });
            }
        });
        Ok(())
    }

    /// Number of inbound messages dropped under backpressure
    pub fn dropped_message_count(&self) -> u64 {
        self.inner.queue.dropped()
    }

    /// Spawn the dispatch loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` on a second call, `Closed` after `stop`.
    ///
    /// # Panics
    ///
    /// Outside a tokio runtime.
    pub fn start(&self) -> Result<(), PubSubError> {
        let inner = &self.inner;
        if inner.control.is_shutdown() {
            return Err(PubSubError::Closed);
        }
        if inner.started.swap(true, Ordering::AcqRel) {
            return Err(PubSubError::AlreadyRunning);
        }

        let dispatcher = Dispatcher::new(
            inner.registry.clone(),
            inner.queue.clone(),
            inner.diagnostics.clone(),
            inner.counters.clone(),
            inner.control.clone(),
        );
        let task = tokio::spawn(dispatcher.run());
        *inner.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!(bus = %inner.registry.instance_id(), "Bus started");
        Ok(())
    }

    /// Stop the bus.
    ///
    /// The dispatch loop finishes the message it is dispatching, if any,
    /// and exits. Queued messages are discarded, later publications fail
    /// with `Closed`, and the transport is closed. Idempotent; concurrent
    /// callers all return once the dispatch loop has stopped.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if inner.stopping.swap(true, Ordering::AcqRel) {
            let mut state = inner.control.watch_state();
            let _ = state.wait_for(|s| *s == DispatchState::Stopped).await;
            return;
        }

        inner.control.shutdown();
        let discarded = inner.queue.close();

        let task = inner.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    warn!(error = %e, "Dispatch task ended abnormally");
                }
            }
            None => inner.control.set_state(DispatchState::Stopped),
        }

        inner.transport.close().await;
        info!(
            bus = %inner.registry.instance_id(),
            discarded,
            "Bus stopped"
        );
    }

    /// Park dispatch at the next message boundary; messages keep queueing
    pub fn pause(&self) {
        debug!("Pause requested");
        self.inner.control.pause();
    }

    /// Resume a paused bus
    pub fn resume(&self) {
        debug!("Resume requested");
        self.inner.control.resume();
    }

    /// Whether pause is in effect
    pub fn is_paused(&self) -> bool {
        self.inner.control.is_paused()
    }

    /// Wait until every message enqueued before this call was dispatched.
    ///
    /// Waits through a pause, and until `start` if the loop has not been
    /// started. Must not be awaited from a callback.
    ///
    /// # Errors
    ///
    /// `Closed` if the bus stops before the messages were dispatched.
    pub async fn flush(&self) -> Result<(), PubSubError> {
        let target = self.inner.queue.last_seq();
        let mut progress = self.inner.control.progress();
        let mut state = self.inner.control.watch_state();

        let stopped = tokio::select! {
            _ = async { progress.wait_for(|seq| *seq >= target).await.is_ok() } => false,
            _ = async { state.wait_for(|s| *s == DispatchState::Stopped).await.is_ok() } => true,
        };

        if !stopped || *progress.borrow() >= target {
            Ok(())
        } else {
            Err(PubSubError::Closed)
        }
    }

    /// Dispatch loop state
    pub fn state(&self) -> DispatchState {
        self.inner.control.state()
    }

    /// Whether the bus has been stopped
    pub fn is_closed(&self) -> bool {
        self.inner.control.is_shutdown() || self.inner.queue.is_closed()
    }

    /// Counters snapshot
    pub fn stats(&self) -> BusStats {
        let inner = &self.inner;
        let counters = &inner.counters;
        BusStats {
            published: counters.published.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            dropped: inner.queue.dropped(),
            callback_faults: counters.callback_faults.load(Ordering::Relaxed),
            transport_failures: counters.transport_failures.load(Ordering::Relaxed),
            subscriptions: inner.registry.len(),
            queued: inner.queue.len(),
        }
    }

    /// Live subscriptions in registration order
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.registry.subscriptions()
    }

    /// Effective configuration
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Transport type
    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    /// Unique id of this bus; stamped into every subscription handle
    pub fn id(&self) -> &uuid::Uuid {
        self.inner.registry.instance_id()
    }

    /// Non-owning handle, for callbacks that need to reach their own bus
    /// without keeping it alive
    pub fn downgrade(&self) -> WeakBus<C> {
        WeakBus {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<C: Send + Sync + 'static> Default for Bus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Bus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("id", self.inner.registry.instance_id())
            .field("state", &self.inner.control.state())
            .field("registry", &self.inner.registry)
            .field("queue", &self.inner.queue)
            .field("transport", &self.inner.transport)
            .finish()
    }
}

/// Weak reference to a [`Bus`]
pub struct WeakBus<C = ()> {
    inner: Weak<BusInner<C>>,
}

impl<C> WeakBus<C> {
    /// The bus, if it is still alive
    pub fn upgrade(&self) -> Option<Bus<C>> {
        self.inner.upgrade().map(|inner| Bus { inner })
    }
}

impl<C> Clone for WeakBus<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> fmt::Debug for WeakBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakBus").finish_non_exhaustive()
    }
}

async fn send_with_timeout(
    transport: &dyn Transport,
    channel: &str,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), TransportError> {
    match tokio::time::timeout(timeout, transport.send(channel, payload)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}
