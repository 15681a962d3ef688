//! In-process hub transport
//!
//! Connects several buses living in the same process, standing in for a
//! network transport. A frame sent by one attached bus is delivered to every
//! other attached bus; the sender's own subscribers are served by its local
//! loopback, so nothing is delivered twice.

use super::queue::PushError;
use super::traits::TransportKind;
use super::transport::{InboundSink, Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Shared fan-out point for [`HubTransport`]s
#[derive(Debug, Default)]
pub struct MemoryHub {
    nodes: Mutex<Vec<(Uuid, InboundSink)>>,
    closed: AtomicBool,
}

impl MemoryHub {
    /// Create a new hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a transport attached to this hub.
    ///
    /// The node joins the hub when a bus registers its sink.
    pub fn transport(self: &Arc<Self>) -> HubTransport {
        HubTransport {
            hub: self.clone(),
            node: Uuid::new_v4(),
        }
    }

    /// Number of attached nodes
    pub fn node_count(&self) -> usize {
        self.lock().len()
    }

    /// Detach every node; subsequent sends fail with `Closed`
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Uuid, InboundSink)>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peers_of(&self, node: Uuid) -> Vec<InboundSink> {
        self.lock()
            .iter()
            .filter(|(id, _)| *id != node)
            .map(|(_, sink)| sink.clone())
            .collect()
    }
}

/// One bus's attachment to a [`MemoryHub`]
#[derive(Debug, Clone)]
pub struct HubTransport {
    hub: Arc<MemoryHub>,
    node: Uuid,
}

impl HubTransport {
    /// Node id of this attachment
    pub fn node_id(&self) -> &Uuid {
        &self.node
    }
}

#[async_trait]
impl Transport for HubTransport {
    async fn send(&self, channel: &str, payload: &[u8]) -> Result<(), TransportError> {
        if self.hub.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        // Drops are counted by the receiving bus; only a closed peer matters here
        for peer in self.hub.peers_of(self.node) {
            if let Err(PushError::Closed) = peer.deliver(channel, payload.to_vec()).await {
                debug!(channel = %channel, "Hub peer closed, frame not delivered");
            }
        }
        Ok(())
    }

    fn on_receive(&self, sink: InboundSink) {
        if self.hub.closed.load(Ordering::Acquire) {
            return;
        }
        let mut nodes = self.hub.lock();
        nodes.retain(|(id, _)| *id != self.node);
        nodes.push((self.node, sink));
        debug!(node = %self.node, nodes = nodes.len(), "Node attached to hub");
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Hub
    }

    async fn close(&self) {
        self.detach();
    }

    fn detach(&self) {
        let mut nodes = self.hub.lock();
        let before = nodes.len();
        nodes.retain(|(id, _)| *id != self.node);
        if nodes.len() != before {
            debug!(node = %self.node, "Node detached from hub");
        }
    }
}
