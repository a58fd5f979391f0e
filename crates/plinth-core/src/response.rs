//! Response envelope.
//!
//! A response holds its data, status code, content kind and caller header
//! overrides. The encoded body and the final header list are derived on
//! demand, so they always agree with the current data.

use std::fmt;

use plinth_types::status::HTTP_200_OK;
use serde::Serialize;
use serde_json::Value;

use crate::Result;
use crate::error::Error;

/// Payload carried by a response.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseData {
    #[default]
    Null,
    /// Raw bytes, sent unchanged.
    Bytes(Vec<u8>),
    Value(Value),
}

impl ResponseData {
    pub fn is_null(&self) -> bool {
        matches!(self, ResponseData::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ResponseData::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for ResponseData {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ResponseData::Null,
            other => ResponseData::Value(other),
        }
    }
}

impl From<Vec<u8>> for ResponseData {
    fn from(bytes: Vec<u8>) -> Self {
        ResponseData::Bytes(bytes)
    }
}

impl From<&str> for ResponseData {
    fn from(text: &str) -> Self {
        ResponseData::Value(Value::String(text.to_string()))
    }
}

impl From<String> for ResponseData {
    fn from(text: String) -> Self {
        ResponseData::Value(Value::String(text))
    }
}

impl From<()> for ResponseData {
    fn from(_: ()) -> Self {
        ResponseData::Null
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    #[default]
    Json,
    Html,
    PlainText,
}

impl ContentKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            ContentKind::Json => "application/json",
            ContentKind::Html => "text/html; charset=utf-8",
            ContentKind::PlainText => "text/plain; charset=utf-8",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    data: ResponseData,
    status_code: u16,
    kind: ContentKind,
    headers: Vec<(String, String)>,
}

impl Response {
    /// JSON response with status 200.
    pub fn new(data: impl Into<ResponseData>) -> Self {
        Self::build(data.into(), HTTP_200_OK, ContentKind::Json)
    }

    pub fn with_status(data: impl Into<ResponseData>, status_code: u16) -> Result<Self> {
        check_status(status_code)?;
        Ok(Self::build(data.into(), status_code, ContentKind::Json))
    }

    /// JSON response from any serializable record.
    pub fn json<T: Serialize + ?Sized>(record: &T) -> Result<Self> {
        Ok(Self::new(prepare_data(record)?))
    }

    pub fn html(data: impl Into<ResponseData>) -> Self {
        Self::build(data.into(), HTTP_200_OK, ContentKind::Html)
    }

    pub fn plain_text(data: impl Into<ResponseData>) -> Self {
        Self::build(data.into(), HTTP_200_OK, ContentKind::PlainText)
    }

    /// Error responses skip status validation; the code comes from an `ApiError`.
    pub(crate) fn error(status_code: u16, body: Value) -> Self {
        Self::build(body.into(), status_code, ContentKind::Json)
    }

    fn build(data: ResponseData, status_code: u16, kind: ContentKind) -> Self {
        Self {
            data,
            status_code,
            kind,
            headers: Vec::new(),
        }
    }

    pub fn status(mut self, status_code: u16) -> Result<Self> {
        self.set_status_code(status_code)?;
        Ok(self)
    }

    /// Add a header override. Overrides replace derived headers of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn data(&self) -> &ResponseData {
        &self.data
    }

    pub fn set_data(&mut self, data: impl Into<ResponseData>) {
        self.data = data.into();
    }

    pub(crate) fn take_data(&mut self) -> ResponseData {
        std::mem::take(&mut self.data)
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn set_status_code(&mut self, status_code: u16) -> Result<()> {
        check_status(status_code)?;
        self.status_code = status_code;
        Ok(())
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Encoded body for the current data.
    pub fn body(&self) -> Vec<u8> {
        match (&self.data, self.kind) {
            (ResponseData::Null, _) => Vec::new(),
            (ResponseData::Bytes(bytes), _) => bytes.clone(),
            (ResponseData::Value(Value::String(text)), ContentKind::Html | ContentKind::PlainText) => {
                text.as_bytes().to_vec()
            }
            (ResponseData::Value(value), _) => serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    /// Final header list: content type, length and CORS, then overrides.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), self.kind.content_type().to_string()),
            ("Content-Length".to_string(), self.body().len().to_string()),
            ("Access-Control-Allow-Origin".to_string(), "*".to_string()),
        ];
        for (name, value) in &self.headers {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        headers
    }
}

fn check_status(status_code: u16) -> Result<()> {
    if (100..=999).contains(&status_code) {
        Ok(())
    } else {
        Err(Error::InvalidStatusCode(status_code))
    }
}

/// Normalize a structured record into a plain JSON value.
pub fn prepare_data<T: Serialize + ?Sized>(record: &T) -> Result<ResponseData> {
    serde_json::to_value(record)
        .map(ResponseData::from)
        .map_err(|err| Error::InvalidResponseType(err.to_string()))
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match &self.data {
            ResponseData::Null => "null".to_string(),
            ResponseData::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ResponseData::Value(value) => value.to_string(),
        };
        let data = if data.chars().count() > 30 {
            format!("{}...", data.chars().take(27).collect::<String>())
        } else {
            data
        };
        write!(f, "Response(status_code={}, data={})", self.status_code, data)
    }
}
