//! Per-request monitoring log.

use std::fmt::Display;
use std::time::Instant;

use plinth_types::{Scope, ScopeKind};
use tracing::info;

#[derive(Debug)]
pub struct Monitoring {
    enabled: bool,
    started: Instant,
    method: String,
    path: String,
    client: String,
}

impl Monitoring {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            started: Instant::now(),
            method: String::new(),
            path: String::new(),
            client: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Capture the request line and start the clock.
    pub fn before(&mut self, scope: &Scope) {
        if !self.enabled {
            return;
        }
        self.started = Instant::now();
        self.method = match scope.kind {
            ScopeKind::WebSocket => "WS".to_string(),
            _ => scope.method.clone(),
        };
        self.path = scope.path.clone();
        self.client = scope.client.clone().unwrap_or_else(|| "-".to_string());
    }

    /// Log the outcome: a status code for HTTP, a lifecycle label for WebSockets.
    pub fn after(&self, outcome: impl Display) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        info!(
            target: "plinth::monitoring",
            method = %self.method,
            path = %self.path,
            client = %self.client,
            elapsed_ms,
            outcome = %outcome,
            "{} | {} | {} | {:.2} ms | {}",
            self.method,
            self.path,
            self.client,
            elapsed_ms,
            outcome
        );
    }
}
