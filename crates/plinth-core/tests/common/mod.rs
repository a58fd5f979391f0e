//! Shared helpers for dispatch integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use plinth_core::types::{InboundEvent, OutboundEvent, Scope};
use plinth_core::{
    App, Endpoint, GatewayChannels, GatewayPeer, Middleware, Request, Response, Result,
    RouteResolver, WebSocket,
};

/// Route table matching `/literal/<variable>` patterns segment by segment.
#[derive(Clone, Default)]
pub struct Routes {
    routes: Vec<(String, Endpoint)>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: &str, endpoint: impl Into<Endpoint>) -> Self {
        self.routes.push((pattern.to_string(), endpoint.into()));
        self
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').collect()
}

fn is_variable(segment: &str) -> bool {
    segment.starts_with('<') && segment.ends_with('>')
}

impl RouteResolver for Routes {
    fn find_endpoint(&self, path: &str) -> Option<(Endpoint, String)> {
        let wanted = segments(path);
        self.routes
            .iter()
            .find(|(pattern, _)| {
                let parts = segments(pattern);
                parts.len() == wanted.len()
                    && parts
                        .iter()
                        .zip(&wanted)
                        .all(|(p, w)| is_variable(p) || p == w)
            })
            .map(|(pattern, endpoint)| (endpoint.clone(), pattern.clone()))
    }

    fn collect_path_variables(&self, path: &str, pattern: &str) -> HashMap<String, String> {
        segments(pattern)
            .into_iter()
            .zip(segments(path))
            .filter(|(p, _)| is_variable(p))
            .map(|(p, w)| (p[1..p.len() - 1].to_string(), w.to_string()))
            .collect()
    }
}

/// Counts every hook invocation.
#[derive(Default)]
pub struct Counters {
    pub before_http: AtomicUsize,
    pub after_http: AtomicUsize,
    pub before_websocket: AtomicUsize,
    pub after_websocket: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct Counting(pub Arc<Counters>);

#[async_trait]
impl Middleware for Counting {
    async fn before_http(&self, _request: &mut Request) -> Result<()> {
        self.0.before_http.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn after_http(&self, _response: &mut Response) -> Result<()> {
        self.0.after_http.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn before_websocket(&self, _connection: &mut WebSocket) -> Result<()> {
        self.0.before_websocket.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn after_websocket(&self, _connection: &WebSocket) -> Result<()> {
        self.0.after_websocket.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Drive one HTTP gateway call to completion.
pub async fn http(app: &App, scope: Scope, body: &[u8]) -> HttpReply {
    let (channels, mut peer) = GatewayChannels::pair(16);
    peer.inbound
        .send(InboundEvent::HttpRequest {
            body: body.to_vec(),
            more_body: false,
        })
        .await
        .unwrap();
    app.call(scope, channels).await;

    let (status, headers) = match peer.outbound.recv().await {
        Some(OutboundEvent::HttpResponseStart { status, headers }) => (status, headers),
        other => panic!("expected response start, got {:?}", other),
    };
    let body = match peer.outbound.recv().await {
        Some(OutboundEvent::HttpResponseBody { body, more_body }) => {
            assert!(!more_body);
            body
        }
        other => panic!("expected response body, got {:?}", other),
    };
    HttpReply {
        status,
        headers,
        body,
    }
}

/// Start a WebSocket gateway call in the background.
pub fn websocket(app: &App, scope: Scope) -> (GatewayPeer, tokio::task::JoinHandle<()>) {
    let (channels, peer) = GatewayChannels::pair(16);
    let app = app.clone();
    let task = tokio::spawn(async move { app.call(scope, channels).await });
    (peer, task)
}

pub async fn next_event(peer: &mut GatewayPeer) -> OutboundEvent {
    tokio::time::timeout(Duration::from_secs(2), peer.outbound.recv())
        .await
        .expect("timed out waiting for gateway event")
        .expect("gateway channel closed")
}

pub async fn finish(task: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("gateway call did not finish")
        .unwrap();
}

/// Wait until the dispatch task has registered `connection_id`.
pub async fn registered(app: &App, connection_id: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !app.registry().contains(connection_id) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("connection was never registered");
}
