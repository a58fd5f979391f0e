//! Request and connection dispatch core for Plinth.

mod config;
mod dispatcher;
mod endpoint;
mod error;
mod fanout;
mod lifecycle;
mod middleware;
mod monitoring;
mod registry;
mod request;
mod response;
mod routing;
mod schema;
mod shaper;
mod websocket;

pub use config::{AppConfig, FanoutConfig};
pub use dispatcher::{App, AppBuilder, GatewayChannels, GatewayPeer};
pub use endpoint::{Api, Endpoint, GenericApi, HandlerFuture, WebSocketHandler, call_method};
pub use error::{ApiError, Error, ValidationError};
pub use fanout::{Fanout, FanoutBridge, FanoutTransport, LocalTransport, RedisTransport};
pub use lifecycle::{LifespanHook, Shutdown};
pub use middleware::{BeforeOutcome, Middleware, Pipeline};
pub use monitoring::Monitoring;
pub use registry::{ConnectionHandle, ConnectionInbox, ConnectionRegistry};
pub use request::Request;
pub use response::{ContentKind, Response, ResponseData, prepare_data};
pub use routing::RouteResolver;
pub use schema::{FieldKind, ObjectSchema, Schema, SerdeSchema};
pub use shaper::{shape_output, validate_input};
pub use websocket::{ConnectionState, WebSocket};

pub use plinth_types as types;

/// Result type for Plinth dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
