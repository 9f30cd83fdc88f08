use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::net::message::Message;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for one accepted socket. Disconnect events are
/// keyed by this, not by worker id, because a connection that never completed
/// a pledge has no worker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of one live connection. Cloning shares the same underlying
/// channel; frames are serialized and flushed by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelHandle {
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: ConnectionId::next(),
            sender,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for the peer. Fails only if the connection's writer
    /// task has already shut down.
    pub fn send(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Binds a worker identity to its live transport channel.
///
/// Purely in-memory: nothing here survives a restart, workers re-pledge and
/// the table rebuilds. A re-pledge over a new connection replaces the old
/// entry; the old socket is left to the transport layer to close.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, ChannelHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `worker_id` to `channel`, superseding any previous binding.
    pub fn register(&self, worker_id: Uuid, channel: ChannelHandle) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if let Some(old) = inner.insert(worker_id, channel) {
            tracing::debug!(
                worker_id = %worker_id,
                old_connection = %old.connection_id(),
                "Worker re-pledged, superseding previous channel"
            );
        }
    }

    pub fn lookup(&self, worker_id: Uuid) -> Option<ChannelHandle> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .get(&worker_id)
            .cloned()
    }

    /// Drop whatever binding the closed connection held, if it still holds
    /// one. A binding already superseded by a reconnect is left in place.
    pub fn unregister(&self, connection_id: ConnectionId) {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .retain(|_, channel| channel.connection_id() != connection_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
