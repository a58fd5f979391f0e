//! Demo application served by the `plinth-server` binary.
//!
//! Routes:
//! - `GET /health`
//! - `GET|POST /echo` class endpoint with a validated body
//! - `/ws/echo` WebSocket echo, greeting each client with its connection id
//! - `POST|DELETE /notify/<connection_id>` pushes to (or closes) a socket on any worker

use std::collections::HashMap;

use async_trait::async_trait;
use plinth_core::types::{
    Frame,
    status::{HTTP_202_ACCEPTED, WS_1000_NORMAL_CLOSURE},
};
use plinth_core::{
    Api, ApiError, App, AppConfig, Endpoint, Fanout, GenericApi, LifespanHook, Middleware, Request,
    Response, Result, RouteResolver, Schema, SerdeSchema, WebSocket, WebSocketHandler,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

const MAX_REPEAT: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

#[derive(Clone)]
struct Route {
    pattern: String,
    segments: Vec<Segment>,
    endpoint: Endpoint,
}

/// Route table matching `/literal/<variable>` patterns segment by segment.
/// The first registered match wins.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: &str, endpoint: impl Into<Endpoint>) -> Self {
        self.routes.push(Route {
            pattern: pattern.to_string(),
            segments: parse_pattern(pattern),
            endpoint: endpoint.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    split_path(pattern)
        .into_iter()
        .map(|segment| {
            match segment
                .strip_prefix('<')
                .and_then(|rest| rest.strip_suffix('>'))
            {
                Some(name) => Segment::Variable(name.to_string()),
                None => Segment::Literal(segment.to_string()),
            }
        })
        .collect()
}

fn matches(segments: &[Segment], path: &[&str]) -> bool {
    segments.len() == path.len()
        && segments.iter().zip(path).all(|(segment, part)| match segment {
            Segment::Literal(literal) => literal == part,
            Segment::Variable(_) => true,
        })
}

impl RouteResolver for RouteTable {
    fn find_endpoint(&self, path: &str) -> Option<(Endpoint, String)> {
        let parts = split_path(path);
        self.routes
            .iter()
            .find(|route| matches(&route.segments, &parts))
            .map(|route| (route.endpoint.clone(), route.pattern.clone()))
    }

    fn collect_path_variables(&self, path: &str, pattern: &str) -> HashMap<String, String> {
        parse_pattern(pattern)
            .into_iter()
            .zip(split_path(path))
            .filter_map(|(segment, part)| match segment {
                Segment::Variable(name) => Some((name, part.to_string())),
                Segment::Literal(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EchoInput {
    pub message: String,
    #[serde(default)]
    pub repeat: Option<usize>,
}

/// Class endpoint echoing the query string on GET and the message on POST.
pub struct Echo {
    input: SerdeSchema<EchoInput>,
}

impl Default for Echo {
    fn default() -> Self {
        Self {
            input: SerdeSchema::named("EchoInput"),
        }
    }
}

#[async_trait]
impl GenericApi for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn input_schema(&self) -> Option<&dyn Schema> {
        Some(&self.input)
    }

    async fn get(&self, request: Request) -> Result<Response> {
        Response::json(&json!({ "query": request.query_string() }))
    }

    async fn post(&self, request: Request) -> Result<Response> {
        let input: EchoInput = request.json()?;
        let repeat = input.repeat.unwrap_or(1).clamp(1, MAX_REPEAT);
        Response::json(&json!({ "message": input.message.repeat(repeat) }))
    }
}

/// Echoes every frame back. The first frame sent is the connection id.
pub struct EchoSocket;

#[async_trait]
impl WebSocketHandler for EchoSocket {
    fn name(&self) -> &str {
        "ws-echo"
    }

    async fn connect(&self, connection: &mut WebSocket) -> Result<()> {
        connection.accept(None).await?;
        let id = connection.id().to_string();
        connection.send(json!({ "connection_id": id })).await
    }

    async fn receive(&self, connection: &mut WebSocket, frame: Frame) -> Result<()> {
        match frame {
            Frame::Text(text) => connection.send_text(text).await,
            Frame::Binary(bytes) => connection.send_bytes(bytes).await,
        }
    }
}

/// Stamps a `Server` header on every HTTP response.
pub struct ServerHeader;

#[async_trait]
impl Middleware for ServerHeader {
    fn name(&self) -> &str {
        "server-header"
    }

    async fn after_http(&self, response: &mut Response) -> Result<()> {
        response.set_header("Server", concat!("plinth/", env!("CARGO_PKG_VERSION")));
        Ok(())
    }
}

fn health(fanout: &Fanout) -> Api {
    let transport = fanout.transport().name().to_string();
    Api::new("health", move |_request: Request| {
        let transport = transport.clone();
        async move { Response::json(&json!({ "status": "ok", "fanout": transport })) }
    })
    .methods(&["GET"])
}

fn notify(fanout: Fanout) -> Api {
    Api::new("notify", move |request: Request| {
        let fanout = fanout.clone();
        async move {
            let connection_id = request
                .path_variable("connection_id")
                .ok_or_else(ApiError::not_found)?
                .to_string();
            if request.method() == "DELETE" {
                fanout
                    .publish_close(&connection_id, WS_1000_NORMAL_CLOSURE, "closed by server")
                    .await?;
            } else {
                fanout.publish_send(&connection_id, &request.data()?).await?;
            }
            Response::with_status(json!({ "published": connection_id }), HTTP_202_ACCEPTED)
        }
    })
    .methods(&["POST", "DELETE"])
}

pub fn routes(fanout: &Fanout) -> RouteTable {
    RouteTable::new()
        .route("/health", health(fanout))
        .route("/echo", Endpoint::class(Echo::default()))
        .route("/ws/echo", Endpoint::websocket(EchoSocket))
        .route("/notify/<connection_id>", notify(fanout.clone()))
}

/// Build the demo application. The fanout transport is opened first so
/// `/notify` publishes on the same transport the bridge listens to.
pub fn build(config: AppConfig) -> Result<App> {
    let fanout = Fanout::from_config(&config.fanout)?;
    let routes = routes(&fanout);
    info!(target: "plinth::startup", routes = routes.len(), "Demo routes registered");

    App::builder(config)
        .resolver(routes)
        .middleware(ServerHeader)
        .fanout_transport(fanout.transport())
        .on_startup(LifespanHook::blocking(|| {
            info!(target: "plinth::startup", "Demo application starting");
            Ok(())
        }))
        .on_shutdown(LifespanHook::future(|| async {
            info!(target: "plinth::startup", "Demo application stopping");
            Ok(())
        }))
        .build()
}
