//! Dispatch engine: routes gateway calls through the middleware pipeline to
//! endpoints and writes protocol-correct replies.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use plinth_types::status::{
    HTTP_413_PAYLOAD_TOO_LARGE, HTTP_501_NOT_IMPLEMENTED, WS_1000_NORMAL_CLOSURE,
    WS_1011_INTERNAL_ERROR, WS_1014_BAD_GATEWAY,
};
use plinth_types::{FanoutCommand, Frame, InboundEvent, OutboundEvent, Scope, ScopeKind};
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::endpoint::{Endpoint, WebSocketHandler, call_method};
use crate::error::{ApiError, Error};
use crate::fanout::{Fanout, FanoutBridge, FanoutTransport};
use crate::lifecycle::{LifespanHook, Shutdown};
use crate::middleware::{BeforeOutcome, Middleware, Pipeline};
use crate::monitoring::Monitoring;
use crate::registry::{ConnectionHandle, ConnectionInbox, ConnectionRegistry};
use crate::request::Request;
use crate::response::Response;
use crate::routing::RouteResolver;
use crate::websocket::WebSocket;

/// The dispatch core's side of one gateway call.
#[derive(Debug)]
pub struct GatewayChannels {
    pub receive: mpsc::Receiver<InboundEvent>,
    pub send: mpsc::Sender<OutboundEvent>,
}

/// The hosting server's side of one gateway call.
#[derive(Debug)]
pub struct GatewayPeer {
    pub inbound: mpsc::Sender<InboundEvent>,
    pub outbound: mpsc::Receiver<OutboundEvent>,
}

impl GatewayChannels {
    pub fn pair(buffer: usize) -> (GatewayChannels, GatewayPeer) {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer);
        (
            GatewayChannels {
                receive: inbound_rx,
                send: outbound_tx,
            },
            GatewayPeer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }
}

pub struct AppBuilder {
    config: AppConfig,
    resolver: Option<Arc<dyn RouteResolver>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    on_startup: Option<LifespanHook>,
    on_shutdown: Option<LifespanHook>,
    transport: Option<Arc<dyn FanoutTransport>>,
}

impl AppBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            resolver: None,
            middlewares: Vec::new(),
            on_startup: None,
            on_shutdown: None,
            transport: None,
        }
    }

    pub fn resolver(mut self, resolver: impl RouteResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Append a middleware. `before` hooks run in the order they are added.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn on_startup(mut self, hook: LifespanHook) -> Self {
        self.on_startup = Some(hook);
        self
    }

    pub fn on_shutdown(mut self, hook: LifespanHook) -> Self {
        self.on_shutdown = Some(hook);
        self
    }

    /// Override the transport selected from `config.fanout`.
    pub fn fanout_transport(mut self, transport: Arc<dyn FanoutTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<App> {
        let resolver = self
            .resolver
            .ok_or_else(|| Error::Configuration("no route resolver configured".into()))?;
        let fanout = match self.transport {
            Some(transport) => Fanout::new(transport),
            None => Fanout::from_config(&self.config.fanout)?,
        };
        info!(
            target: "plinth::startup",
            middlewares = self.middlewares.len(),
            fanout = fanout.transport().name(),
            "Application built"
        );
        Ok(App {
            inner: Arc::new(AppInner {
                config: self.config,
                resolver,
                pipeline: Pipeline::new(self.middlewares),
                registry: ConnectionRegistry::new(),
                fanout,
                on_startup: self.on_startup,
                on_shutdown: self.on_shutdown,
                started: OnceCell::new(),
                stopped: AtomicBool::new(false),
            }),
        })
    }
}

struct AppInner {
    config: AppConfig,
    resolver: Arc<dyn RouteResolver>,
    pipeline: Pipeline,
    registry: ConnectionRegistry,
    fanout: Fanout,
    on_startup: Option<LifespanHook>,
    on_shutdown: Option<LifespanHook>,
    started: OnceCell<()>,
    stopped: AtomicBool,
}

/// Gateway application. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

enum BodyRead {
    Complete(Vec<u8>),
    Disconnected,
    TooLarge,
}

impl App {
    pub fn builder(config: AppConfig) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Publisher used to reach connections owned by any worker.
    pub fn fanout(&self) -> &Fanout {
        &self.inner.fanout
    }

    /// Start this process's fanout listener thread.
    pub fn spawn_fanout_bridge(&self, shutdown: Shutdown) -> std::io::Result<FanoutBridge> {
        FanoutBridge::spawn(
            self.inner.fanout.transport(),
            self.inner.registry.clone(),
            self.inner.config.fanout.poll_interval(),
            shutdown,
        )
    }

    /// Gateway entry point. Every failure is answered on `channels`.
    pub async fn call(&self, scope: Scope, channels: GatewayChannels) {
        match scope.kind {
            ScopeKind::Lifespan => self.handle_lifespan(channels).await,
            ScopeKind::Http => self.handle_http(scope, channels).await,
            ScopeKind::WebSocket => self.handle_websocket(scope, channels).await,
        }
    }

    /// Run the startup hook until it succeeds once. Concurrent callers wait
    /// for the running attempt; a failed attempt is retried by the next call.
    pub async fn startup(&self) -> anyhow::Result<()> {
        self.inner
            .started
            .get_or_try_init(|| async {
                if let Some(hook) = &self.inner.on_startup {
                    hook.run().await?;
                }
                info!(target: "plinth::startup", "Startup complete");
                Ok::<_, anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Run the shutdown hook once. Failures are logged.
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(hook) = &self.inner.on_shutdown {
            if let Err(err) = hook.run().await {
                error!(target: "plinth::startup", error = %format!("{:#}", err), "Shutdown hook failed");
            }
        }
        info!(target: "plinth::startup", "Shutdown complete");
    }

    async fn handle_lifespan(&self, mut channels: GatewayChannels) {
        while let Some(event) = channels.receive.recv().await {
            match event {
                InboundEvent::LifespanStartup => {
                    let reply = match self.startup().await {
                        Ok(()) => OutboundEvent::LifespanStartupComplete,
                        Err(err) => {
                            let message = format!("{:#}", err);
                            error!(target: "plinth::startup", error = %message, "Startup hook failed");
                            OutboundEvent::LifespanStartupFailed { message }
                        }
                    };
                    if channels.send.send(reply).await.is_err() {
                        return;
                    }
                }
                InboundEvent::LifespanShutdown => {
                    self.shutdown().await;
                    let _ = channels.send.send(OutboundEvent::LifespanShutdownComplete).await;
                    return;
                }
                other => {
                    debug!(target: "plinth::startup", event = ?other, "Ignoring event on lifespan scope");
                }
            }
        }
    }

    async fn handle_http(&self, scope: Scope, mut channels: GatewayChannels) {
        let mut monitoring = Monitoring::new(self.inner.config.monitoring);
        monitoring.before(&scope);

        let response = match read_body(&mut channels.receive, self.inner.config.max_body_size).await {
            BodyRead::Complete(body) => self.dispatch_http(&scope, body).await,
            BodyRead::TooLarge => ApiError::from_status(HTTP_413_PAYLOAD_TOO_LARGE).into_response(),
            BodyRead::Disconnected => {
                debug!(target: "plinth::dispatch", path = %scope.path, "Client disconnected before the body was read");
                return;
            }
        };

        send_response(&channels.send, &response).await;
        monitoring.after(response.status_code());
    }

    async fn dispatch_http(&self, scope: &Scope, body: Vec<u8>) -> Response {
        let mut request = Request::from_scope(scope, body);
        let resolver = &self.inner.resolver;
        let Some((endpoint, pattern)) = resolver.find_endpoint(request.path()) else {
            return ApiError::not_found().into_response();
        };
        if let Endpoint::WebSocket(handler) = &endpoint {
            error!(
                target: "plinth::dispatch",
                endpoint = handler.name(),
                "WebSocket endpoint cannot serve HTTP requests"
            );
            return ApiError::from_status(HTTP_501_NOT_IMPLEMENTED).into_response();
        }
        let variables = resolver.collect_path_variables(request.path(), &pattern);
        request.set_path_variables(variables);

        let pipeline = &self.inner.pipeline;
        let BeforeOutcome { completed, result } = pipeline.before_http(&mut request).await;
        let result = match result {
            Ok(()) => self.invoke(&endpoint, request).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(response) => pipeline.after_http(completed, response).await,
            Err(err) => match err.to_api_error() {
                Some(api) => pipeline.after_http(completed, api.into_response()).await,
                None => unhandled_response(&endpoint, err),
            },
        }
    }

    async fn invoke(&self, endpoint: &Endpoint, request: Request) -> Result<Response> {
        let call = match endpoint {
            Endpoint::Function(api) => api.call(request).boxed(),
            Endpoint::Class(api) => call_method(api.as_ref(), request).boxed(),
            Endpoint::WebSocket(handler) => {
                return Err(Error::Configuration(format!(
                    "{} is a WebSocket endpoint and cannot serve HTTP requests",
                    handler.name()
                )));
            }
        };
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::Unhandled(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    async fn handle_websocket(&self, scope: Scope, mut channels: GatewayChannels) {
        let mut monitoring = Monitoring::new(self.inner.config.monitoring);
        monitoring.before(&scope);

        let resolver = &self.inner.resolver;
        let Some((endpoint, pattern)) = resolver.find_endpoint(&scope.path) else {
            monitoring.after("Rejected");
            reject(&channels.send, WS_1000_NORMAL_CLOSURE).await;
            return;
        };
        let handler = match endpoint {
            Endpoint::WebSocket(handler) => handler,
            other => {
                error!(
                    target: "plinth::ws",
                    endpoint = other.name(),
                    "Endpoint is not WebSocket-capable; implement WebSocketHandler for it"
                );
                monitoring.after("Rejected");
                reject(&channels.send, WS_1014_BAD_GATEWAY).await;
                return;
            }
        };

        let mut connection = WebSocket::new(&scope, channels.send.clone());
        connection.set_path_variables(resolver.collect_path_variables(&scope.path, &pattern));

        let pipeline = &self.inner.pipeline;
        let BeforeOutcome { completed, result } = pipeline.before_websocket(&mut connection).await;
        match result {
            Ok(()) => {
                self.serve_connection(handler.as_ref(), &mut connection, &mut channels.receive, &monitoring)
                    .await;
            }
            Err(err) => {
                let code = if err.is_client() {
                    WS_1000_NORMAL_CLOSURE
                } else {
                    error!(target: "plinth::ws", error = %err.sanitized(), "before_websocket failed");
                    WS_1011_INTERNAL_ERROR
                };
                let _ = connection.close(code, "").await;
            }
        }

        pipeline.after_websocket(completed, &connection).await;
        monitoring.after("Closed");
    }

    async fn serve_connection(
        &self,
        handler: &dyn WebSocketHandler,
        connection: &mut WebSocket,
        receive: &mut mpsc::Receiver<InboundEvent>,
        monitoring: &Monitoring,
    ) {
        if let Err(err) = handler.connect(connection).await {
            let code = close_code_for(&err);
            log_handler_error(connection.id(), &err);
            let _ = connection.close(code, "").await;
            monitoring.after("Rejected");
            return;
        }
        if !connection.is_accepted() {
            let _ = connection.close(WS_1000_NORMAL_CLOSURE, "").await;
            monitoring.after("Rejected");
            return;
        }

        let (handle, mut inbox) = ConnectionHandle::channel();
        self.inner.registry.register(connection.id(), handle);
        monitoring.after("Accepted");

        listen(handler, connection, receive, &mut inbox).await;

        self.inner.registry.deregister(connection.id());
    }
}

/// Serve client frames and fanout commands until either side closes.
async fn listen(
    handler: &dyn WebSocketHandler,
    connection: &mut WebSocket,
    receive: &mut mpsc::Receiver<InboundEvent>,
    inbox: &mut ConnectionInbox,
) {
    while !connection.is_closed() {
        tokio::select! {
            event = receive.recv() => match event {
                Some(InboundEvent::WebSocketReceive { text, bytes }) => {
                    let Some(frame) = Frame::from_parts(text, bytes) else {
                        continue;
                    };
                    if let Err(err) = handler.receive(connection, frame).await {
                        log_handler_error(connection.id(), &err);
                        if !err.is_client() {
                            let _ = connection.close(WS_1011_INTERNAL_ERROR, "").await;
                        }
                    }
                }
                Some(InboundEvent::WebSocketDisconnect { code }) => connection.mark_disconnected(code),
                Some(_) => {}
                None => connection.mark_disconnected(WS_1000_NORMAL_CLOSURE),
            },
            command = inbox.recv() => match command {
                Some(FanoutCommand::Send(data)) => {
                    if let Err(err) = connection.send(data).await {
                        debug!(target: "plinth::ws", connection_id = %connection.id(), error = %err, "Fanout send failed");
                        connection.mark_disconnected(WS_1000_NORMAL_CLOSURE);
                    }
                }
                Some(FanoutCommand::Close(frame)) => {
                    let _ = connection.close(frame.code, frame.reason).await;
                }
                None => break,
            },
        }
    }
}

async fn read_body(receive: &mut mpsc::Receiver<InboundEvent>, limit: usize) -> BodyRead {
    let mut body = Vec::new();
    loop {
        match receive.recv().await {
            Some(InboundEvent::HttpRequest { body: chunk, more_body }) => {
                if body.len() + chunk.len() > limit {
                    return BodyRead::TooLarge;
                }
                body.extend_from_slice(&chunk);
                if !more_body {
                    return BodyRead::Complete(body);
                }
            }
            Some(InboundEvent::HttpDisconnect) | None => return BodyRead::Disconnected,
            Some(_) => {}
        }
    }
}

async fn send_response(send: &mpsc::Sender<OutboundEvent>, response: &Response) {
    let start = OutboundEvent::HttpResponseStart {
        status: response.status_code(),
        headers: response.headers(),
    };
    let body = OutboundEvent::HttpResponseBody {
        body: response.body(),
        more_body: false,
    };
    if send.send(start).await.is_err() || send.send(body).await.is_err() {
        debug!(target: "plinth::dispatch", "Gateway closed before the response was sent");
    }
}

async fn reject(send: &mpsc::Sender<OutboundEvent>, code: u16) {
    let close = OutboundEvent::WebSocketClose {
        code,
        reason: String::new(),
    };
    if send.send(close).await.is_err() {
        debug!(target: "plinth::ws", "Gateway closed before the rejection was sent");
    }
}

fn unhandled_response(endpoint: &Endpoint, err: Error) -> Response {
    match err {
        Error::Configuration(message) => {
            error!(target: "plinth::dispatch", endpoint = endpoint.name(), "{}", message);
            ApiError::from_status(HTTP_501_NOT_IMPLEMENTED).into_response()
        }
        other => {
            error!(
                target: "plinth::dispatch",
                endpoint = endpoint.name(),
                error = %other.sanitized(),
                "Unhandled error"
            );
            ApiError::internal().into_response()
        }
    }
}

fn close_code_for(err: &Error) -> u16 {
    if err.is_client() {
        WS_1000_NORMAL_CLOSURE
    } else {
        WS_1011_INTERNAL_ERROR
    }
}

fn log_handler_error(connection_id: &str, err: &Error) {
    if err.is_client() {
        warn!(target: "plinth::ws", %connection_id, error = %err, "WebSocket handler rejected input");
    } else {
        error!(target: "plinth::ws", %connection_id, error = %err.sanitized(), "WebSocket handler failed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
