//! Axum adapter speaking the gateway protocol to the dispatch core.
//!
//! Every request lands on the router fallback. Plain HTTP requests are
//! streamed into [`App::call`] chunk by chunk and the response events are
//! collected into an axum response. WebSocket upgrades are completed by axum
//! and then bridged frame by frame.

use std::net::SocketAddr;

use anyhow::{Context, Result, anyhow, bail};
use axum::{
    Router,
    body::Body,
    extract::{
        ConnectInfo, FromRequestParts, Request, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use plinth_core::types::{
    InboundEvent, OutboundEvent, Scope, ScopeKind,
    status::{WS_1000_NORMAL_CLOSURE, WS_1006_ABNORMAL_CLOSURE},
};
use plinth_core::{App, GatewayChannels, GatewayPeer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

const CHANNEL_BUFFER: usize = 32;

/// Router sending every path through the dispatch core.
pub fn router(app: App) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn dispatch(State(app): State<App>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();
    let scope = scope_from_parts(&parts);

    if is_websocket_upgrade(&parts.headers) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => {
                let scope = Scope {
                    kind: ScopeKind::WebSocket,
                    ..scope
                };
                upgrade.on_upgrade(move |socket| bridge_websocket(app, scope, socket))
            }
            Err(rejection) => rejection.into_response(),
        };
    }

    serve_http(app, scope, body).await
}

fn scope_from_parts(parts: &Parts) -> Scope {
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    Scope {
        kind: ScopeKind::Http,
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        query_string: parts.uri.query().unwrap_or_default().to_string(),
        headers,
        client: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string()),
    }
}

pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let has_token = |name: HeaderName, token: &str| {
        headers.get_all(name).iter().any(|value| {
            value
                .to_str()
                .map(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
                .unwrap_or(false)
        })
    };
    has_token(header::UPGRADE, "websocket") && has_token(header::CONNECTION, "upgrade")
}

async fn serve_http(app: App, scope: Scope, body: Body) -> Response {
    let (channels, peer) = GatewayChannels::pair(CHANNEL_BUFFER);
    let GatewayPeer {
        inbound,
        mut outbound,
    } = peer;

    let feed = async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let event = match chunk {
                Ok(bytes) => InboundEvent::HttpRequest {
                    body: bytes.to_vec(),
                    more_body: true,
                },
                Err(err) => {
                    debug!(target: "plinth::dispatch", error = %err, "Request body aborted");
                    let _ = inbound.send(InboundEvent::HttpDisconnect).await;
                    return;
                }
            };
            // The core stops reading once it has answered.
            if inbound.send(event).await.is_err() {
                return;
            }
        }
        let _ = inbound
            .send(InboundEvent::HttpRequest {
                body: Vec::new(),
                more_body: false,
            })
            .await;
    };
    tokio::join!(app.call(scope, channels), feed);

    let mut start = None;
    let mut content = Vec::new();
    while let Some(event) = outbound.recv().await {
        match event {
            OutboundEvent::HttpResponseStart { status, headers } => start = Some((status, headers)),
            OutboundEvent::HttpResponseBody { body, more_body } => {
                content.extend_from_slice(&body);
                if !more_body {
                    break;
                }
            }
            other => warn!(target: "plinth::dispatch", event = ?other, "Unexpected event on HTTP call"),
        }
    }

    match start {
        Some((status, headers)) => build_response(status, headers, content),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn build_response(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Response {
    let Ok(status) = StatusCode::from_u16(status) else {
        warn!(target: "plinth::dispatch", status, "Dispatch core produced an invalid status");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => warn!(target: "plinth::dispatch", header = %name, "Dropping invalid response header"),
        }
    }
    response
}

async fn bridge_websocket(app: App, scope: Scope, socket: WebSocket) {
    let (channels, peer) = GatewayChannels::pair(CHANNEL_BUFFER);
    let GatewayPeer {
        inbound,
        mut outbound,
    } = peer;
    let (mut sink, stream) = socket.split();

    if inbound.send(InboundEvent::WebSocketConnect).await.is_err() {
        return;
    }
    let reader = tokio::spawn(read_frames(stream, inbound));

    let write = async move {
        while let Some(event) = outbound.recv().await {
            let message = match event {
                // The handshake already completed when axum upgraded the socket.
                OutboundEvent::WebSocketAccept { .. } => continue,
                OutboundEvent::WebSocketSend {
                    text: Some(text), ..
                } => Message::Text(text.into()),
                OutboundEvent::WebSocketSend {
                    bytes: Some(bytes), ..
                } => Message::Binary(bytes.into()),
                OutboundEvent::WebSocketSend { .. } => continue,
                OutboundEvent::WebSocketClose { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                other => {
                    warn!(target: "plinth::ws", event = ?other, "Unexpected event on WebSocket call");
                    continue;
                }
            };
            if let Err(err) = sink.send(message).await {
                debug!(target: "plinth::ws", error = %err, "WebSocket send failed");
                break;
            }
        }
    };

    tokio::join!(app.call(scope, channels), write);
    reader.abort();
}

async fn read_frames(
    mut stream: futures::stream::SplitStream<WebSocket>,
    inbound: mpsc::Sender<InboundEvent>,
) {
    let mut code = WS_1006_ABNORMAL_CLOSURE;
    while let Some(message) = stream.next().await {
        let event = match message {
            Ok(Message::Text(text)) => InboundEvent::WebSocketReceive {
                text: Some(text.as_str().to_owned()),
                bytes: None,
            },
            Ok(Message::Binary(bytes)) => InboundEvent::WebSocketReceive {
                text: None,
                bytes: Some(bytes.to_vec()),
            },
            Ok(Message::Close(frame)) => {
                code = frame.map(|f| f.code).unwrap_or(WS_1000_NORMAL_CLOSURE);
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(err) => {
                debug!(target: "plinth::ws", error = %err, "WebSocket receive failed");
                break;
            }
        };
        if inbound.send(event).await.is_err() {
            return;
        }
    }
    let _ = inbound.send(InboundEvent::WebSocketDisconnect { code }).await;
}

/// Running lifespan call. Dropping it without [`Lifespan::shutdown`] skips the shutdown hook.
#[derive(Debug)]
pub struct Lifespan {
    peer: GatewayPeer,
    task: JoinHandle<()>,
}

/// Start the lifespan call and wait for startup to finish.
pub async fn run_lifespan(app: &App) -> Result<Lifespan> {
    let (channels, mut peer) = GatewayChannels::pair(4);
    let app = app.clone();
    let task = tokio::spawn(async move { app.call(Scope::lifespan(), channels).await });

    peer.inbound
        .send(InboundEvent::LifespanStartup)
        .await
        .map_err(|_| anyhow!("lifespan call ended before startup"))?;
    match peer.outbound.recv().await {
        Some(OutboundEvent::LifespanStartupComplete) => Ok(Lifespan { peer, task }),
        Some(OutboundEvent::LifespanStartupFailed { message }) => {
            bail!("startup failed: {}", message)
        }
        other => bail!("unexpected lifespan reply: {:?}", other),
    }
}

impl Lifespan {
    /// Run the shutdown hook and wait for the lifespan call to end.
    pub async fn shutdown(mut self) -> Result<()> {
        self.peer
            .inbound
            .send(InboundEvent::LifespanShutdown)
            .await
            .map_err(|_| anyhow!("lifespan call ended before shutdown"))?;
        match self.peer.outbound.recv().await {
            Some(OutboundEvent::LifespanShutdownComplete) => {}
            other => bail!("unexpected lifespan reply: {:?}", other),
        }
        self.task.await.context("lifespan task failed")
    }
}
