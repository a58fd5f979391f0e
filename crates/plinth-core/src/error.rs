//! Error types for Plinth.

use std::collections::BTreeMap;

use plinth_types::status::{self, HTTP_500_INTERNAL_SERVER_ERROR};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::response::Response;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ApiError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Type of response data does not match the output schema")]
    TypeMismatch,

    #[error("Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("Invalid response type: {0}")]
    InvalidResponseType(String),

    #[error("Invalid status code: {0} (expected 100..=999)")]
    InvalidStatusCode(u16),

    #[error("WebSocket connection error: {0}")]
    Connection(String),

    #[error("Fanout transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Gateway channel closed")]
    GatewayClosed,

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl Error {
    /// Client errors are expected outcomes that map onto a status response.
    pub fn is_client(&self) -> bool {
        matches!(self, Error::Client(_) | Error::Validation(_))
    }

    pub fn to_api_error(&self) -> Option<ApiError> {
        match self {
            Error::Client(err) => Some(err.clone()),
            Error::Validation(err) => Some(ApiError::bad_request(err.to_value())),
            _ => None,
        }
    }

    /// Error chain on one line, without backtraces.
    pub fn sanitized(&self) -> String {
        match self {
            Error::Unhandled(err) => format!("{:#}", err),
            other => other.to_string(),
        }
    }
}

/// Client-facing failure carrying a status code and a detail payload.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("API error {status_code}: {detail}")]
pub struct ApiError {
    pub status_code: u16,
    pub detail: Value,
}

impl ApiError {
    pub fn new(status_code: u16, detail: impl Into<Value>) -> Self {
        Self {
            status_code,
            detail: detail.into(),
        }
    }

    /// Error whose detail is the standard reason phrase of `status_code`.
    pub fn from_status(status_code: u16) -> Self {
        Self::new(status_code, status::reason_phrase(status_code))
    }

    pub fn bad_request(detail: impl Into<Value>) -> Self {
        Self::new(status::HTTP_400_BAD_REQUEST, detail)
    }

    pub fn unauthorized() -> Self {
        Self::from_status(status::HTTP_401_UNAUTHORIZED)
    }

    pub fn forbidden() -> Self {
        Self::from_status(status::HTTP_403_FORBIDDEN)
    }

    pub fn not_found() -> Self {
        Self::from_status(status::HTTP_404_NOT_FOUND)
    }

    pub fn method_not_allowed() -> Self {
        Self::from_status(status::HTTP_405_METHOD_NOT_ALLOWED)
    }

    pub fn internal() -> Self {
        Self::from_status(HTTP_500_INTERNAL_SERVER_ERROR)
    }

    /// Response body: mapping details pass through, anything else is wrapped
    /// as `{"detail": ...}`.
    pub fn body(&self) -> Value {
        match &self.detail {
            Value::Object(_) => self.detail.clone(),
            other => {
                let mut map = Map::new();
                map.insert("detail".to_string(), other.clone());
                Value::Object(map)
            }
        }
    }

    pub fn into_response(self) -> Response {
        let body = self.body();
        Response::error(self.status_code, body)
    }
}

/// Field-level validation failures, keyed by field name.
#[derive(Error, Debug, Clone, PartialEq, Eq, Default)]
#[error("validation failed: {}", summarize(.errors))]
pub struct ValidationError {
    errors: BTreeMap<String, String>,
}

fn summarize(errors: &BTreeMap<String, String>) -> String {
    errors
        .iter()
        .map(|(field, reason)| format!("{}: {}", field, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.add(field, reason);
        err
    }

    /// Record a failure. The first reason recorded for a field is kept.
    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| reason.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.errors
                .iter()
                .map(|(field, reason)| (field.clone(), Value::String(reason.clone())))
                .collect(),
        )
    }
}
