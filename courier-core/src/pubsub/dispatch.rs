//! Dispatch loop
//!
//! A single consumer drains the inbound queue in order. For each message it
//! takes one registry snapshot and invokes every matching handler, in
//! registration order, on the dispatch thread.
//!
//! # State machine
//!
//! ```text
//! Idle -> Waiting -> Dispatching -> Waiting -> ... -> ShuttingDown -> Stopped
//!                 \-> Paused -> Dispatching
//! ```
//!
//! Shutdown and pause are only observed at the `Waiting -> Dispatching`
//! boundary; a running handler is never interrupted.
//!
//! # Fault isolation
//!
//! Handlers returning `Err` or panicking are caught here (panics via
//! [`std::panic::catch_unwind`]), counted, and reported to the diagnostics
//! sink. The remaining handlers for the message still run.

use super::diagnostics::{CallbackFault, DiagnosticEvent, DiagnosticsSink, FaultKind};
use super::message::InboundMessage;
use super::queue::InboundQueue;
use super::registry::SubscriptionRegistry;
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Dispatch loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Not started yet
    Idle,
    /// Waiting for the next message
    Waiting,
    /// Parked at the dispatch boundary by `pause`
    Paused,
    /// Running handlers for one message
    Dispatching,
    /// Stop requested; finishing the in-flight pass
    ShuttingDown,
    /// Loop exited
    Stopped,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Waiting => "waiting",
            DispatchState::Paused => "paused",
            DispatchState::Dispatching => "dispatching",
            DispatchState::ShuttingDown => "shutting_down",
            DispatchState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters shared by the bus and its dispatch loop
#[derive(Debug, Default)]
pub struct BusCounters {
    /// Accepted `publish`/`try_publish` calls
    pub published: AtomicU64,
    /// Failed transport sends
    pub transport_failures: AtomicU64,
    /// Messages fully dispatched
    pub dispatched: AtomicU64,
    /// Successful handler invocations
    pub delivered: AtomicU64,
    /// Failed handler invocations
    pub callback_faults: AtomicU64,
}

/// Control signals between the bus and its dispatch loop
#[derive(Debug)]
pub struct DispatchControl {
    state: watch::Sender<DispatchState>,
    paused: watch::Sender<bool>,
    progress: watch::Sender<u64>,
    shutdown: CancellationToken,
}

impl DispatchControl {
    /// Signals for a loop that has not started: idle, unpaused, nothing dispatched
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(DispatchState::Idle),
            paused: watch::Sender::new(false),
            progress: watch::Sender::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Current loop state
    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<DispatchState> {
        self.state.subscribe()
    }

    /// Sequence number of the last message fully dispatched
    pub fn progress(&self) -> watch::Receiver<u64> {
        self.progress.subscribe()
    }

    /// Park the loop at its next dispatch boundary
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Let a paused loop continue
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Whether pause is requested
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Request cooperative shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn set_state(&self, state: DispatchState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

impl Default for DispatchControl {
    fn default() -> Self {
        Self::new()
    }
}

/// The single consumer of an inbound queue
pub struct Dispatcher<C> {
    registry: Arc<SubscriptionRegistry<C>>,
    queue: Arc<InboundQueue>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    counters: Arc<BusCounters>,
    control: Arc<DispatchControl>,
}

impl<C: Send + Sync + 'static> Dispatcher<C> {
    /// Create the consumer for `queue`; it reports through `control` and `counters`
    pub fn new(
        registry: Arc<SubscriptionRegistry<C>>,
        queue: Arc<InboundQueue>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        counters: Arc<BusCounters>,
        control: Arc<DispatchControl>,
    ) -> Self {
        Self {
            registry,
            queue,
            diagnostics,
            counters,
            control,
        }
    }

    /// Run until shutdown is requested or the queue is closed.
    pub async fn run(self) {
        info!("Dispatch loop started");

        loop {
            self.control.set_state(DispatchState::Waiting);

            let message = tokio::select! {
                biased;
                _ = self.control.shutdown.cancelled() => break,
                next = self.queue.pop() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            if self.control.is_paused() && !self.wait_while_paused().await {
                break;
            }

            if self.control.is_shutdown() {
                debug!(seq = message.seq, "Shutdown requested, message not dispatched");
                break;
            }

            self.control.set_state(DispatchState::Dispatching);
            self.dispatch(&message);
            self.control.progress.send_replace(message.seq);
        }

        self.control.set_state(DispatchState::ShuttingDown);
        self.control.set_state(DispatchState::Stopped);
        info!(
            dispatched = self.counters.dispatched.load(Ordering::Relaxed),
            "Dispatch loop stopped"
        );
    }

    /// Returns `false` if shutdown was requested while paused.
    async fn wait_while_paused(&self) -> bool {
        self.control.set_state(DispatchState::Paused);
        debug!("Dispatch loop paused");

        let mut paused = self.control.paused.subscribe();
        tokio::select! {
            biased;
            _ = self.control.shutdown.cancelled() => false,
            resumed = paused.wait_for(|p| !*p) => {
                debug!("Dispatch loop resumed");
                resumed.is_ok()
            }
        }
    }

    /// Run one dispatch pass; returns the number of successful invocations.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let snapshot = self.registry.snapshot();
        let mut delivered = 0;

        for subscription in snapshot.iter().filter(|s| s.matches(&message.channel)) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                subscription.handler().handle(message, subscription.context())
            }));

            let kind = match outcome {
                Ok(Ok(())) => {
                    delivered += 1;
                    continue;
                }
                Ok(Err(e)) => FaultKind::Error(e.to_string()),
                Err(panic) => FaultKind::Panic(panic_message(panic.as_ref())),
            };

            self.counters.callback_faults.fetch_add(1, Ordering::Relaxed);
            self.diagnostics.report(DiagnosticEvent::CallbackFault(CallbackFault {
                subscription: subscription.id(),
                channel: message.channel.clone(),
                seq: message.seq,
                kind,
            }));
        }

        self.counters.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        delivered
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackpressurePolicy;
    use crate::pubsub::diagnostics::diagnostics_channel;
    use crate::pubsub::traits::{HandlerResult, MessageHandler};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Fixture {
        registry: Arc<SubscriptionRegistry<&'static str>>,
        queue: Arc<InboundQueue>,
        counters: Arc<BusCounters>,
        control: Arc<DispatchControl>,
        events: tokio::sync::mpsc::Receiver<DiagnosticEvent>,
        dispatcher: Dispatcher<&'static str>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SubscriptionRegistry::new(32));
        let queue = Arc::new(InboundQueue::new(16, BackpressurePolicy::DropNewest));
        let counters = Arc::new(BusCounters::default());
        let control = Arc::new(DispatchControl::new());
        let (sink, events) = diagnostics_channel(16);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            queue.clone(),
            Arc::new(sink),
            counters.clone(),
            control.clone(),
        );
        Fixture {
            registry,
            queue,
            counters,
            control,
            events,
            dispatcher,
        }
    }

    fn recorder(log: &Log) -> Arc<dyn MessageHandler<&'static str>> {
        let log = log.clone();
        Arc::new(move |msg: &InboundMessage, ctx: &&'static str| -> HandlerResult {
            log.lock().unwrap().push(format!("{}:{}", ctx, msg.channel));
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let f = fixture();
        let log = Log::default();
        f.registry.subscribe("odom", false, recorder(&log), "first").unwrap();
        f.registry.subscribe("o.*", true, recorder(&log), "second").unwrap();
        f.registry.subscribe("imu", false, recorder(&log), "third").unwrap();

        let delivered = f.dispatcher.dispatch(&InboundMessage::new("odom", b"x".to_vec()));

        assert_eq!(delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["first:odom", "second:odom"]);
        assert_eq!(f.counters.delivered.load(Ordering::Relaxed), 2);
        assert_eq!(f.counters.dispatched.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let mut f = fixture();
        let log = Log::default();
        let failing: Arc<dyn MessageHandler<&'static str>> =
            Arc::new(|_: &InboundMessage, _: &&'static str| -> HandlerResult { Err("nope".into()) });
        let panicking: Arc<dyn MessageHandler<&'static str>> =
            Arc::new(|_: &InboundMessage, _: &&'static str| -> HandlerResult { panic!("kaboom") });

        f.registry.subscribe("c", false, failing, "a").unwrap();
        f.registry.subscribe("c", false, panicking, "b").unwrap();
        f.registry.subscribe("c", false, recorder(&log), "c").unwrap();

        let delivered = f.dispatcher.dispatch(&InboundMessage::new("c", Vec::new()));

        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["c:c"]);
        assert_eq!(f.counters.callback_faults.load(Ordering::Relaxed), 2);

        let first = f.events.try_recv().unwrap();
        assert!(matches!(
            first,
            DiagnosticEvent::CallbackFault(CallbackFault { kind: FaultKind::Error(ref e), .. }) if e == "nope"
        ));
        let second = f.events.try_recv().unwrap();
        assert!(matches!(
            second,
            DiagnosticEvent::CallbackFault(CallbackFault { kind: FaultKind::Panic(ref e), .. }) if e == "kaboom"
        ));
    }

    #[test]
    fn test_reentrant_subscribe_does_not_affect_current_pass() {
        let f = fixture();
        let log = Log::default();
        let registry = f.registry.clone();
        let inner_log = log.clone();
        let reentrant: Arc<dyn MessageHandler<&'static str>> =
            Arc::new(move |_: &InboundMessage, _: &&'static str| -> HandlerResult {
                let log = inner_log.clone();
                registry.subscribe(
                    "c",
                    false,
                    Arc::new(move |_: &InboundMessage, _: &&'static str| -> HandlerResult {
                        log.lock().unwrap().push("late".to_string());
                        Ok(())
                    }),
                    "late",
                )?;
                Ok(())
            });
        f.registry.subscribe("c", false, reentrant, "r").unwrap();

        f.dispatcher.dispatch(&InboundMessage::new("c", Vec::new()));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(f.registry.len(), 2);

        f.dispatcher.dispatch(&InboundMessage::new("c", Vec::new()));
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let f = fixture();
        let log = Log::default();
        f.registry.subscribe("c", false, recorder(&log), "x").unwrap();

        let mut progress = f.control.progress();
        let control = f.control.clone();
        let queue = f.queue.clone();
        let task = tokio::spawn(f.dispatcher.run());

        for _ in 0..3 {
            queue.try_push(InboundMessage::new("c", Vec::new())).unwrap();
        }
        timeout(Duration::from_secs(1), progress.wait_for(|seq| *seq >= 3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.lock().unwrap().len(), 3);

        control.shutdown();
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(control.state(), DispatchState::Stopped);
    }

    #[tokio::test]
    async fn test_pause_holds_dispatch() {
        let f = fixture();
        let log = Log::default();
        f.registry.subscribe("c", false, recorder(&log), "x").unwrap();

        let control = f.control.clone();
        let queue = f.queue.clone();
        let mut state = control.watch_state();
        let mut progress = control.progress();
        control.pause();
        let task = tokio::spawn(f.dispatcher.run());

        queue.try_push(InboundMessage::new("c", Vec::new())).unwrap();
        timeout(Duration::from_secs(1), state.wait_for(|s| *s == DispatchState::Paused))
            .await
            .unwrap()
            .unwrap();
        assert!(log.lock().unwrap().is_empty());

        control.resume();
        timeout(Duration::from_secs(1), progress.wait_for(|seq| *seq >= 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);

        control.shutdown();
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[test]
    fn test_fresh_control() {
        let control = DispatchControl::new();
        assert_eq!(control.state(), DispatchState::Idle);
        assert!(!control.is_paused());
        assert!(!control.is_shutdown());
        let progress = control.progress();
        assert_eq!(*progress.borrow(), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DispatchState::ShuttingDown.to_string(), "shutting_down");
        assert_eq!(DispatchState::Idle.to_string(), "idle");
    }
}
