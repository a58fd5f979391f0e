//! Ordered middleware pipeline.
//!
//! `before` hooks run in declaration order and stop at the first failure.
//! `after` hooks run in exact reverse order, only for the middlewares whose
//! `before` completed.

use std::any::type_name;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::Result;
use crate::error::{ApiError, Error};
use crate::request::Request;
use crate::response::Response;
use crate::websocket::WebSocket;

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    async fn before_http(&self, _request: &mut Request) -> Result<()> {
        Ok(())
    }

    async fn after_http(&self, _response: &mut Response) -> Result<()> {
        Ok(())
    }

    async fn before_websocket(&self, _connection: &mut WebSocket) -> Result<()> {
        Ok(())
    }

    async fn after_websocket(&self, _connection: &WebSocket) -> Result<()> {
        Ok(())
    }
}

/// Result of a `before` sweep.
#[derive(Debug)]
pub struct BeforeOutcome {
    /// Number of hooks that completed successfully.
    pub completed: usize,
    pub result: Result<()>,
}

#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Arc<Vec<Arc<dyn Middleware>>>,
}

impl Pipeline {
    pub fn new(layers: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            layers: Arc::new(layers),
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub async fn before_http(&self, request: &mut Request) -> BeforeOutcome {
        for (index, layer) in self.layers.iter().enumerate() {
            if let Err(err) = layer.before_http(request).await {
                debug!(target: "plinth::dispatch", middleware = layer.name(), error = %err, "before_http stopped the chain");
                return BeforeOutcome {
                    completed: index,
                    result: Err(err),
                };
            }
        }
        BeforeOutcome {
            completed: self.layers.len(),
            result: Ok(()),
        }
    }

    /// Run `after_http` for the first `completed` layers in reverse.
    ///
    /// A failing hook replaces the response with the converted error and the
    /// sweep continues, so the last conversion wins.
    pub async fn after_http(&self, completed: usize, mut response: Response) -> Response {
        for layer in self.prefix(completed).iter().rev() {
            if let Err(err) = layer.after_http(&mut response).await {
                response = convert_after_error(layer.name(), err);
            }
        }
        response
    }

    pub async fn before_websocket(&self, connection: &mut WebSocket) -> BeforeOutcome {
        for (index, layer) in self.layers.iter().enumerate() {
            if let Err(err) = layer.before_websocket(connection).await {
                debug!(target: "plinth::ws", middleware = layer.name(), error = %err, "before_websocket stopped the chain");
                return BeforeOutcome {
                    completed: index,
                    result: Err(err),
                };
            }
        }
        BeforeOutcome {
            completed: self.layers.len(),
            result: Ok(()),
        }
    }

    /// Run `after_websocket` for the first `completed` layers in reverse.
    /// Failures are logged and suppressed.
    pub async fn after_websocket(&self, completed: usize, connection: &WebSocket) {
        for layer in self.prefix(completed).iter().rev() {
            if let Err(err) = layer.after_websocket(connection).await {
                if err.is_client() {
                    debug!(target: "plinth::ws", middleware = layer.name(), error = %err, "after_websocket rejected");
                } else {
                    warn!(target: "plinth::ws", middleware = layer.name(), error = %err.sanitized(), "after_websocket failed");
                }
            }
        }
    }

    fn prefix(&self, completed: usize) -> &[Arc<dyn Middleware>] {
        &self.layers[..completed.min(self.layers.len())]
    }
}

fn convert_after_error(middleware: &str, err: Error) -> Response {
    match err.to_api_error() {
        Some(api) => api.into_response(),
        None => {
            error!(
                target: "plinth::dispatch",
                middleware,
                error = %err.sanitized(),
                "Unhandled error in after_http"
            );
            ApiError::internal().into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_types::Scope;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_before: bool,
        fail_after: Option<u16>,
    }

    impl Recorder {
        fn new(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                tag,
                log: log.clone(),
                fail_before: false,
                fail_after: None,
            }
        }
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn before_http(&self, request: &mut Request) -> Result<()> {
            self.log.lock().unwrap().push(format!("before:{}", self.tag));
            request.set_attribute(self.tag, true);
            if self.fail_before {
                return Err(ApiError::forbidden().into());
            }
            Ok(())
        }

        async fn after_http(&self, response: &mut Response) -> Result<()> {
            self.log.lock().unwrap().push(format!("after:{}", self.tag));
            match self.fail_after {
                Some(500) => Err(Error::Unhandled(anyhow::anyhow!("broken"))),
                Some(code) => Err(ApiError::from_status(code).into()),
                None => {
                    response.set_header(format!("X-{}", self.tag), "1");
                    Ok(())
                }
            }
        }
    }

    fn request() -> Request {
        Request::from_scope(&Scope::http("GET", "/"), Vec::new())
    }

    #[tokio::test]
    async fn test_after_runs_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            Arc::new(Recorder::new("a", &log)),
            Arc::new(Recorder::new("b", &log)),
        ]);
        let mut req = request();
        let outcome = pipeline.before_http(&mut req).await;
        assert_eq!(outcome.completed, 2);
        assert!(outcome.result.is_ok());
        assert_eq!(req.attribute("b"), Some(&json!(true)));

        pipeline.after_http(outcome.completed, Response::new("ok")).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before:a", "before:b", "after:b", "after:a"]
        );
    }

    #[tokio::test]
    async fn test_before_failure_limits_after_sweep() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = Recorder::new("b", &log);
        failing.fail_before = true;
        let pipeline = Pipeline::new(vec![
            Arc::new(Recorder::new("a", &log)),
            Arc::new(failing),
            Arc::new(Recorder::new("c", &log)),
        ]);
        let mut req = request();
        let outcome = pipeline.before_http(&mut req).await;
        assert_eq!(outcome.completed, 1);
        assert!(outcome.result.unwrap_err().is_client());

        pipeline.after_http(outcome.completed, Response::new(())).await;
        assert_eq!(*log.lock().unwrap(), vec!["before:a", "before:b", "after:a"]);
    }

    #[tokio::test]
    async fn test_last_after_conversion_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut outer = Recorder::new("outer", &log);
        outer.fail_after = Some(429);
        let mut inner = Recorder::new("inner", &log);
        inner.fail_after = Some(403);
        let pipeline = Pipeline::new(vec![Arc::new(outer), Arc::new(inner)]);

        let response = pipeline.after_http(2, Response::new("ok")).await;
        assert_eq!(response.status_code(), 429);
        assert_eq!(response.body(), br#"{"detail":"Too Many Requests"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_unhandled_after_error_becomes_500_and_sweep_continues() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut inner = Recorder::new("inner", &log);
        inner.fail_after = Some(500);
        let pipeline = Pipeline::new(vec![
            Arc::new(Recorder::new("outer", &log)),
            Arc::new(inner),
        ]);

        let response = pipeline.after_http(2, Response::new("ok")).await;
        assert_eq!(response.status_code(), 500);
        let headers = response.headers();
        assert!(headers.iter().any(|(k, _)| k == "X-outer"));
        assert_eq!(*log.lock().unwrap(), vec!["after:inner", "after:outer"]);
    }

    #[tokio::test]
    async fn test_completed_beyond_len_is_clamped() {
        let pipeline = Pipeline::default();
        let response = pipeline.after_http(5, Response::new("ok")).await;
        assert_eq!(response.status_code(), 200);
        assert!(pipeline.is_empty());
    }
}
