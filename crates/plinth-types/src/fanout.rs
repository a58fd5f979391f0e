//! Fanout messages addressing a WebSocket connection from any process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::WS_1000_NORMAL_CLOSURE;

/// Well-known broadcast channel every worker subscribes to.
pub const WEBSOCKET_CHANNEL: &str = "websocket_connections";

/// Action requested on the target connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutAction {
    Send,
    Close,
}

/// Envelope published on the fanout transport.
///
/// Wire format: `{"connection_id": "...", "action": "send"|"close", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutMessage {
    pub connection_id: String,
    pub action: FanoutAction,
    #[serde(default)]
    pub data: Value,
}

/// Payload of a `close` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFrame {
    #[serde(default = "default_code")]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
}

fn default_code() -> u16 {
    WS_1000_NORMAL_CLOSURE
}

/// Decoded action, ready to be applied to a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutCommand {
    Send(Value),
    Close(CloseFrame),
}

impl FanoutMessage {
    pub fn send(connection_id: impl Into<String>, data: Value) -> Self {
        Self {
            connection_id: connection_id.into(),
            action: FanoutAction::Send,
            data,
        }
    }

    pub fn close(connection_id: impl Into<String>, code: u16, reason: impl Into<String>) -> Self {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        Self {
            connection_id: connection_id.into(),
            action: FanoutAction::Close,
            data: serde_json::json!({ "code": frame.code, "reason": frame.reason }),
        }
    }

    /// Decode the action-specific payload.
    pub fn command(&self) -> Result<FanoutCommand, serde_json::Error> {
        match self.action {
            FanoutAction::Send => Ok(FanoutCommand::Send(self.data.clone())),
            FanoutAction::Close => {
                let frame: CloseFrame = serde_json::from_value(self.data.clone())?;
                Ok(FanoutCommand::Close(frame))
            }
        }
    }

    /// Compact JSON encoding used on the broadcast channel.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
