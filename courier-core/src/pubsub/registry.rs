//! Subscription registry
//!
//! The registry owns every live [`Subscription`]. Writers (`subscribe`,
//! `unsubscribe`) serialize on a mutex and publish a fresh immutable
//! snapshot; readers load the current snapshot without locking.
//!
//! A dispatch pass holds one [`Snapshot`] for the whole of one message, so
//! subscriptions added or removed while callbacks run (including from the
//! callbacks themselves) take effect from the next message on. A snapshot
//! loaded just before an `unsubscribe` completes may still deliver that
//! message to the removed subscription.

use super::error::PubSubError;
use super::matcher::ChannelPattern;
use super::traits::{MessageHandler, SubscriptionId};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Registered binding of a channel pattern to a handler
pub struct Subscription<C> {
    id: SubscriptionId,
    pattern: ChannelPattern,
    handler: Arc<dyn MessageHandler<C>>,
    context: C,
}

impl<C> Subscription<C> {
    /// Subscription handle
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Channel pattern
    pub fn pattern(&self) -> &ChannelPattern {
        &self.pattern
    }

    /// User context supplied at registration
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Handler invoked on match
    pub fn handler(&self) -> &Arc<dyn MessageHandler<C>> {
        &self.handler
    }

    /// Whether `channel` matches this subscription
    #[inline]
    pub fn matches(&self, channel: &str) -> bool {
        self.pattern.matches(channel)
    }
}

impl<C> fmt::Debug for Subscription<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Immutable, registration-ordered view of the registry
pub type Snapshot<C> = Arc<Vec<Arc<Subscription<C>>>>;

/// Summary of a subscription for diagnostics and listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    /// Subscription handle
    pub id: SubscriptionId,
    /// Pattern text
    pub pattern: String,
    /// Whether the pattern is a regex
    pub is_regex: bool,
}

/// Registry of live subscriptions
pub struct SubscriptionRegistry<C> {
    instance: Uuid,
    max_pattern_len: usize,
    next_seq: AtomicU64,
    current: ArcSwap<Vec<Arc<Subscription<C>>>>,
    writer: Mutex<()>,
}

impl<C> SubscriptionRegistry<C> {
    /// Create an empty registry accepting patterns up to `max_pattern_len` bytes
    pub fn new(max_pattern_len: usize) -> Self {
        Self {
            instance: Uuid::new_v4(),
            max_pattern_len,
            next_seq: AtomicU64::new(1),
            current: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    /// Id stamped into every handle this registry issues
    pub fn instance_id(&self) -> &Uuid {
        &self.instance
    }

    /// Register a subscription.
    ///
    /// The pattern is validated and compiled before anything is installed;
    /// on error the registry is unchanged.
    ///
    /// # Errors
    ///
    /// `PatternTooLong` or `InvalidPattern`.
    pub fn subscribe(
        &self,
        pattern: &str,
        is_regex: bool,
        handler: Arc<dyn MessageHandler<C>>,
        context: C,
    ) -> Result<SubscriptionId, PubSubError> {
        let pattern = ChannelPattern::new(pattern, is_regex, self.max_pattern_len)?;

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let id = SubscriptionId::new(self.instance, self.next_seq.fetch_add(1, Ordering::Relaxed));
        debug!(subscription = %id, pattern = %pattern, regex = pattern.is_regex(), "Subscription added");

        let subscription = Arc::new(Subscription {
            id,
            pattern,
            handler,
            context,
        });

        let current = self.current.load();
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(subscription);
        self.current.store(Arc::new(next));

        Ok(id)
    }

    /// Remove a subscription.
    ///
    /// An invocation already running for this subscription is allowed to
    /// finish.
    ///
    /// # Errors
    ///
    /// `NotFound` if the handle is unknown, already removed, or was issued
    /// by another registry.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PubSubError> {
        if id.bus_id() != &self.instance {
            return Err(PubSubError::NotFound(id.to_string()));
        }

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.current.load();
        let Some(position) = current.iter().position(|s| s.id == id) else {
            return Err(PubSubError::NotFound(id.to_string()));
        };

        let next: Vec<_> = current
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, s)| s.clone())
            .collect();
        self.current.store(Arc::new(next));

        debug!(subscription = %id, "Subscription removed");
        Ok(())
    }

    /// Point-in-time view in registration order
    pub fn snapshot(&self) -> Snapshot<C> {
        self.current.load_full()
    }

    /// Whether the handle is currently registered
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.current.load().iter().any(|s| s.id == id)
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    /// Whether there are no live subscriptions
    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    /// Summaries of all live subscriptions, in registration order
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.current
            .load()
            .iter()
            .map(|s| SubscriptionInfo {
                id: s.id,
                pattern: s.pattern.as_str().to_string(),
                is_regex: s.pattern.is_regex(),
            })
            .collect()
    }
}

impl<C> fmt::Debug for SubscriptionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("instance", &self.instance)
            .field("subscriptions", &self.len())
            .finish()
    }
}
