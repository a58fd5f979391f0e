//! WebSocket connection handed to middleware and handlers.

use std::collections::HashMap;

use plinth_types::{OutboundEvent, Scope};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::Result;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Accepted,
    Closed,
}

#[derive(Debug)]
pub struct WebSocket {
    id: String,
    path: String,
    query_string: String,
    headers: Vec<(String, String)>,
    client: Option<String>,
    path_variables: HashMap<String, String>,
    attributes: HashMap<String, Value>,
    state: ConnectionState,
    close_code: Option<u16>,
    outbound: mpsc::Sender<OutboundEvent>,
}

impl WebSocket {
    pub fn new(scope: &Scope, outbound: mpsc::Sender<OutboundEvent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            path: scope.path.clone(),
            query_string: scope.query_string.clone(),
            headers: scope.headers.clone(),
            client: scope.client.clone(),
            path_variables: HashMap::new(),
            attributes: HashMap::new(),
            state: ConnectionState::Pending,
            close_code: None,
            outbound,
        }
    }

    /// Identifier used to address this connection through fanout.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn client(&self) -> Option<&str> {
        self.client.as_deref()
    }

    pub fn path_variable(&self, name: &str) -> Option<&str> {
        self.path_variables.get(name).map(String::as_str)
    }

    pub fn set_path_variables(&mut self, variables: HashMap<String, String>) {
        self.path_variables = variables;
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_accepted(&self) -> bool {
        self.state == ConnectionState::Accepted
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Close code sent by us or reported by the peer.
    pub fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    pub async fn accept(&mut self, subprotocol: Option<String>) -> Result<()> {
        match self.state {
            ConnectionState::Accepted => Ok(()),
            ConnectionState::Closed => Err(Error::Connection("cannot accept a closed connection".into())),
            ConnectionState::Pending => {
                self.emit(OutboundEvent::WebSocketAccept {
                    subprotocol,
                    headers: Vec::new(),
                })
                .await?;
                self.state = ConnectionState::Accepted;
                Ok(())
            }
        }
    }

    /// Send a JSON value. Strings go out as-is, anything else as compact JSON text.
    pub async fn send(&mut self, data: Value) -> Result<()> {
        let text = match data {
            Value::String(text) => text,
            other => other.to_string(),
        };
        self.send_text(text).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.emit(OutboundEvent::WebSocketSend {
            text: Some(text.into()),
            bytes: None,
        })
        .await
    }

    pub async fn send_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.emit(OutboundEvent::WebSocketSend {
            text: None,
            bytes: Some(bytes),
        })
        .await
    }

    /// Close the socket. Closing twice is a no-op.
    pub async fn close(&mut self, code: u16, reason: impl Into<String>) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;
        self.close_code = Some(code);
        self.emit(OutboundEvent::WebSocketClose {
            code,
            reason: reason.into(),
        })
        .await
    }

    pub(crate) fn mark_disconnected(&mut self, code: u16) {
        if self.state != ConnectionState::Closed {
            debug!(target: "plinth::ws", connection_id = %self.id, code, "Peer disconnected");
            self.state = ConnectionState::Closed;
            self.close_code = Some(code);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Accepted => Ok(()),
            ConnectionState::Pending => Err(Error::Connection("connection is not accepted yet".into())),
            ConnectionState::Closed => Err(Error::Connection("connection is closed".into())),
        }
    }

    async fn emit(&self, event: OutboundEvent) -> Result<()> {
        self.outbound.send(event).await.map_err(|_| Error::GatewayClosed)
    }
}
