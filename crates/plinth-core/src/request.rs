//! HTTP request connection.

use std::collections::HashMap;

use plinth_types::Scope;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Result;
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct Request {
    id: String,
    method: String,
    path: String,
    query_string: String,
    headers: Vec<(String, String)>,
    client: Option<String>,
    body: Vec<u8>,
    path_variables: HashMap<String, String>,
    validated_data: Option<Value>,
    attributes: HashMap<String, Value>,
}

impl Request {
    pub fn from_scope(scope: &Scope, body: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: scope.method.to_ascii_uppercase(),
            path: scope.path.clone(),
            query_string: scope.query_string.clone(),
            headers: scope.headers.clone(),
            client: scope.client.clone(),
            body,
            path_variables: HashMap::new(),
            validated_data: None,
            attributes: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn client(&self) -> Option<&str> {
        self.client.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body parsed as JSON. An empty body reads as an empty mapping.
    pub fn data(&self) -> Result<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|_| ApiError::bad_request("Invalid JSON body").into())
    }

    /// Input after schema validation, falling back to the parsed body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.validated_data {
            Some(value) => value.clone(),
            None => self.data()?,
        };
        serde_json::from_value(value).map_err(|err| ApiError::bad_request(err.to_string()).into())
    }

    pub fn validated_data(&self) -> Option<&Value> {
        self.validated_data.as_ref()
    }

    pub(crate) fn set_validated_data(&mut self, data: Value) {
        self.validated_data = Some(data);
    }

    pub fn path_variable(&self, name: &str) -> Option<&str> {
        self.path_variables.get(name).map(String::as_str)
    }

    pub fn path_variables(&self) -> &HashMap<String, String> {
        &self.path_variables
    }

    pub fn set_path_variables(&mut self, variables: HashMap<String, String>) {
        self.path_variables = variables;
    }

    /// Per-request value set by middleware (for example the authenticated user).
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }
}
