//! Per-process registry of live WebSocket connections.

use std::sync::Arc;

use dashmap::DashMap;
use plinth_types::{FanoutCommand, FanoutMessage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::Result;

/// Receiving end of a connection's fanout inbox.
pub type ConnectionInbox = mpsc::UnboundedReceiver<FanoutCommand>;

/// Sending end of a connection's fanout inbox.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<FanoutCommand>,
}

impl ConnectionHandle {
    pub fn channel() -> (Self, ConnectionInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: impl Into<String>, handle: ConnectionHandle) {
        let connection_id = connection_id.into();
        debug!(target: "plinth::ws", %connection_id, "Registered connection");
        self.connections.insert(connection_id, handle);
    }

    /// Remove a connection. Returns false if it was not registered.
    pub fn deregister(&self, connection_id: &str) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            debug!(target: "plinth::ws", %connection_id, "Deregistered connection");
        }
        removed
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue a fanout message for its connection if it lives in this process.
    ///
    /// Returns `Ok(false)` when the connection is unknown here or its inbox is
    /// gone. Fails only when a locally addressed message cannot be decoded.
    pub fn deliver(&self, message: &FanoutMessage) -> Result<bool> {
        let Some(handle) = self.connections.get(&message.connection_id) else {
            return Ok(false);
        };
        let command = message.command()?;
        Ok(handle.tx.send(command).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_types::{CloseFrame, FanoutAction};
    use serde_json::json;

    #[test]
    fn test_register_and_deliver() {
        let registry = ConnectionRegistry::new();
        let (handle, mut inbox) = ConnectionHandle::channel();
        registry.register("c1", handle);

        assert!(registry.deliver(&FanoutMessage::send("c1", json!({"n": 1}))).unwrap());
        assert!(registry.deliver(&FanoutMessage::close("c1", 1000, "")).unwrap());
        assert_eq!(inbox.try_recv().unwrap(), FanoutCommand::Send(json!({"n": 1})));
        assert_eq!(
            inbox.try_recv().unwrap(),
            FanoutCommand::Close(CloseFrame {
                code: 1000,
                reason: String::new()
            })
        );
    }

    #[test]
    fn test_unknown_connection_is_discarded() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.deliver(&FanoutMessage::send("elsewhere", json!(1))).unwrap());
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (handle, _inbox) = ConnectionHandle::channel();
        registry.register("c1", handle);
        assert_eq!(registry.len(), 1);
        assert!(registry.deregister("c1"));
        assert!(!registry.deregister("c1"));
        assert!(registry.is_empty());
        assert!(!registry.contains("c1"));
    }

    #[test]
    fn test_malformed_local_message_is_an_error() {
        let registry = ConnectionRegistry::new();
        let (handle, _inbox) = ConnectionHandle::channel();
        registry.register("c1", handle);
        let message = FanoutMessage {
            connection_id: "c1".into(),
            action: FanoutAction::Close,
            data: json!("oops"),
        };
        assert!(registry.deliver(&message).is_err());
    }

    #[test]
    fn test_dropped_inbox_is_not_delivered() {
        let registry = ConnectionRegistry::new();
        let (handle, inbox) = ConnectionHandle::channel();
        registry.register("c1", handle);
        drop(inbox);
        assert!(!registry.deliver(&FanoutMessage::send("c1", json!(1))).unwrap());
    }
}
