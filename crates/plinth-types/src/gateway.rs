//! Gateway protocol between the hosting server and the dispatch core.
//!
//! A gateway call is made of three parts: a [`Scope`] describing the event,
//! a stream of [`InboundEvent`]s (body chunks, client frames, lifespan
//! signals) and a sink of [`OutboundEvent`]s (response start/body,
//! WebSocket accept/send/close).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Kind of event a scope describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Lifespan,
    Http,
    #[serde(rename = "websocket")]
    WebSocket,
}

/// Event descriptor handed to the dispatch core for every gateway call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "type")]
    pub kind: ScopeKind,
    /// Request method (empty for lifespan and WebSocket scopes).
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    /// Raw query string without the leading `?`.
    #[serde(default)]
    pub query_string: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Peer address as `ip:port`, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

impl Scope {
    pub fn lifespan() -> Self {
        Self::new(ScopeKind::Lifespan, "", "")
    }

    pub fn http(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(ScopeKind::Http, method, path)
    }

    pub fn websocket(path: impl Into<String>) -> Self {
        Self::new(ScopeKind::WebSocket, "GET", path)
    }

    fn new(kind: ScopeKind, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind,
            method: method.into(),
            path: path.into(),
            query_string: String::new(),
            headers: Vec::new(),
            client: None,
        }
    }

    pub fn with_query(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// First header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Messages flowing from the gateway into the dispatch core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "lifespan.startup")]
    LifespanStartup,
    #[serde(rename = "lifespan.shutdown")]
    LifespanShutdown,
    /// One chunk of the request body. `more_body` is false on the last chunk.
    #[serde(rename = "http.request")]
    HttpRequest {
        #[serde(default)]
        body: Vec<u8>,
        #[serde(default)]
        more_body: bool,
    },
    #[serde(rename = "http.disconnect")]
    HttpDisconnect,
    #[serde(rename = "websocket.connect")]
    WebSocketConnect,
    #[serde(rename = "websocket.receive")]
    WebSocketReceive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
    },
    #[serde(rename = "websocket.disconnect")]
    WebSocketDisconnect {
        #[serde(default = "default_close_code")]
        code: u16,
    },
}

/// Messages flowing from the dispatch core back to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "lifespan.startup.complete")]
    LifespanStartupComplete,
    #[serde(rename = "lifespan.startup.failed")]
    LifespanStartupFailed { message: String },
    #[serde(rename = "lifespan.shutdown.complete")]
    LifespanShutdownComplete,
    #[serde(rename = "http.response.start")]
    HttpResponseStart {
        status: u16,
        headers: Vec<(String, String)>,
    },
    #[serde(rename = "http.response.body")]
    HttpResponseBody {
        body: Vec<u8>,
        #[serde(default)]
        more_body: bool,
    },
    #[serde(rename = "websocket.accept")]
    WebSocketAccept {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subprotocol: Option<String>,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
    #[serde(rename = "websocket.send")]
    WebSocketSend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
    },
    #[serde(rename = "websocket.close")]
    WebSocketClose {
        #[serde(default = "default_close_code")]
        code: u16,
        #[serde(default)]
        reason: String,
    },
}

fn default_close_code() -> u16 {
    crate::status::WS_1000_NORMAL_CLOSURE
}

/// A single client frame as seen by WebSocket handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Build a frame from a `websocket.receive` payload. Text wins when both are set.
    pub fn from_parts(text: Option<String>, bytes: Option<Vec<u8>>) -> Option<Self> {
        match (text, bytes) {
            (Some(text), _) => Some(Frame::Text(text)),
            (None, Some(bytes)) => Some(Frame::Binary(bytes)),
            (None, None) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes,
        }
    }

    /// Decode the frame payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_header_lookup_is_case_insensitive() {
        let scope = Scope::http("POST", "/users")
            .with_header("Content-Type", "application/json")
            .with_query("page=2");
        assert_eq!(scope.header("content-type"), Some("application/json"));
        assert_eq!(scope.header("accept"), None);
        assert_eq!(scope.query_string, "page=2");
        assert_eq!(scope.kind, ScopeKind::Http);
    }

    #[test]
    fn test_scope_kind_serialization() {
        let scope = Scope::websocket("/ws");
        let value = serde_json::to_value(&scope).unwrap();
        assert_eq!(value["type"], "websocket");
        assert!(value.get("client").is_none());
    }

    #[test]
    fn test_inbound_event_tags() {
        let json = serde_json::to_string(&InboundEvent::LifespanStartup).unwrap();
        assert_eq!(json, r#"{"type":"lifespan.startup"}"#);

        let event: InboundEvent =
            serde_json::from_value(json!({"type": "http.request", "body": [123, 125]})).unwrap();
        assert_eq!(
            event,
            InboundEvent::HttpRequest {
                body: b"{}".to_vec(),
                more_body: false
            }
        );
    }

    #[test]
    fn test_disconnect_defaults_to_normal_closure() {
        let event: InboundEvent =
            serde_json::from_value(json!({"type": "websocket.disconnect"})).unwrap();
        assert_eq!(event, InboundEvent::WebSocketDisconnect { code: 1000 });
    }

    #[test]
    fn test_outbound_close_serialization() {
        let event = OutboundEvent::WebSocketClose {
            code: 1014,
            reason: String::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"websocket.close""#));
        assert!(json.contains(r#""code":1014"#));
    }

    #[test]
    fn test_frame_from_parts() {
        assert_eq!(
            Frame::from_parts(Some("hi".into()), Some(vec![1])),
            Some(Frame::Text("hi".into()))
        );
        assert_eq!(
            Frame::from_parts(None, Some(vec![1, 2])),
            Some(Frame::Binary(vec![1, 2]))
        );
        assert_eq!(Frame::from_parts(None, None), None);
    }

    #[test]
    fn test_frame_json() {
        let frame = Frame::Text(r#"{"msg":"hi"}"#.into());
        let value: serde_json::Value = frame.json().unwrap();
        assert_eq!(value, json!({"msg": "hi"}));
        assert!(Frame::Binary(vec![0xff]).json::<serde_json::Value>().is_err());
    }
}
