//! Resolved endpoints and the handler traits behind them.

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use plinth_types::Frame;

use crate::Result;
use crate::error::ApiError;
use crate::request::Request;
use crate::response::Response;
use crate::schema::Schema;
use crate::shaper::{shape_output, validate_input};
use crate::websocket::WebSocket;

pub type HandlerFuture = BoxFuture<'static, Result<Response>>;

type Handler = dyn Fn(Request) -> HandlerFuture + Send + Sync;

/// Methods whose body is validated against the input schema.
const BODY_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

/// Function endpoint with optional schemas and method restrictions.
#[derive(Clone)]
pub struct Api {
    name: String,
    handler: Arc<Handler>,
    input: Option<Arc<dyn Schema>>,
    output: Option<Arc<dyn Schema>>,
    methods: Option<Vec<String>>,
}

impl Api {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |request| handler(request).boxed()),
            input: None,
            output: None,
            methods: None,
        }
    }

    pub fn input(mut self, schema: impl Schema + 'static) -> Self {
        self.input = Some(Arc::new(schema));
        self
    }

    pub fn output(mut self, schema: impl Schema + 'static) -> Self {
        self.output = Some(Arc::new(schema));
        self
    }

    /// Restrict the endpoint to `methods`. Other methods answer 405.
    pub fn methods(mut self, methods: &[&str]) -> Self {
        self.methods = Some(methods.iter().map(|m| m.to_ascii_uppercase()).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allows(&self, method: &str) -> bool {
        match &self.methods {
            None => true,
            Some(methods) => methods.iter().any(|m| m.eq_ignore_ascii_case(method)),
        }
    }

    pub async fn call(&self, mut request: Request) -> Result<Response> {
        if !self.allows(request.method()) {
            return Err(ApiError::method_not_allowed().into());
        }
        prepare_input(&mut request, self.input.as_deref())?;
        let response = (self.handler)(request).await?;
        shape_response(response, self.output.as_deref())
    }
}

/// Class-style endpoint with one handler per method.
#[async_trait]
pub trait GenericApi: Send + Sync {
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    fn input_schema(&self) -> Option<&dyn Schema> {
        None
    }

    fn output_schema(&self) -> Option<&dyn Schema> {
        None
    }

    async fn get(&self, _request: Request) -> Result<Response> {
        Err(ApiError::method_not_allowed().into())
    }

    async fn post(&self, _request: Request) -> Result<Response> {
        Err(ApiError::method_not_allowed().into())
    }

    async fn put(&self, _request: Request) -> Result<Response> {
        Err(ApiError::method_not_allowed().into())
    }

    async fn patch(&self, _request: Request) -> Result<Response> {
        Err(ApiError::method_not_allowed().into())
    }

    async fn delete(&self, _request: Request) -> Result<Response> {
        Err(ApiError::method_not_allowed().into())
    }
}

/// Dispatch a request to the method handler of a class endpoint.
pub async fn call_method(api: &dyn GenericApi, mut request: Request) -> Result<Response> {
    prepare_input(&mut request, api.input_schema())?;
    let method = request.method().to_string();
    let response = match method.as_str() {
        "GET" => api.get(request).await,
        "POST" => api.post(request).await,
        "PUT" => api.put(request).await,
        "PATCH" => api.patch(request).await,
        "DELETE" => api.delete(request).await,
        _ => Err(ApiError::method_not_allowed().into()),
    }?;
    shape_response(response, api.output_schema())
}

fn prepare_input(request: &mut Request, schema: Option<&dyn Schema>) -> Result<()> {
    let Some(schema) = schema else {
        return Ok(());
    };
    if !BODY_METHODS.contains(&request.method()) {
        return Ok(());
    }
    let validated = validate_input(&request.data()?, Some(schema))?;
    request.set_validated_data(validated);
    Ok(())
}

fn shape_response(mut response: Response, schema: Option<&dyn Schema>) -> Result<Response> {
    if schema.is_some() {
        let shaped = shape_output(response.take_data(), schema)?;
        response.set_data(shaped);
    }
    Ok(response)
}

/// WebSocket endpoint.
#[async_trait]
pub trait WebSocketHandler: Send + Sync {
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    /// Runs once before the connection is registered. The default accepts.
    /// Leaving the socket unaccepted rejects it.
    async fn connect(&self, connection: &mut WebSocket) -> Result<()> {
        connection.accept(None).await
    }

    async fn receive(&self, _connection: &mut WebSocket, _frame: Frame) -> Result<()> {
        Ok(())
    }
}

/// Endpoint variant, fixed when the route is resolved.
#[derive(Clone)]
pub enum Endpoint {
    Function(Api),
    Class(Arc<dyn GenericApi>),
    WebSocket(Arc<dyn WebSocketHandler>),
}

impl Endpoint {
    pub fn class(api: impl GenericApi + 'static) -> Self {
        Endpoint::Class(Arc::new(api))
    }

    pub fn websocket(handler: impl WebSocketHandler + 'static) -> Self {
        Endpoint::WebSocket(Arc::new(handler))
    }

    pub fn name(&self) -> &str {
        match self {
            Endpoint::Function(api) => api.name(),
            Endpoint::Class(api) => api.name(),
            Endpoint::WebSocket(handler) => handler.name(),
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Endpoint::WebSocket(_))
    }
}

impl From<Api> for Endpoint {
    fn from(api: Api) -> Self {
        Endpoint::Function(api)
    }
}
