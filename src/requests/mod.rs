//! Externally defined requests: templates, result queries and the runner seam.
//!
//! Commands and dynamic choice sources describe their HTTP request as a
//! [`RequestTemplate`]. Before running, the template is rendered against a
//! [`SubstitutionContext`] built from the resolved view layered over the
//! global defaults. The [`RequestRunner`] trait is the only place I/O happens,
//! which keeps the engine testable with [`crate::testing::StubRunner`].

mod http;
pub mod query;
pub mod template;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RequestError;

pub use http::ReqwestRunner;
pub use query::{QueryMatch, QueryMode, ResultQuery};
pub use template::{RequestTemplate, SubstitutionContext};

/// Performs a fully rendered request.
///
/// Implementations must not retry internally: every call is a single
/// attempt, and the `Result` tells the caller whether it succeeded.
#[async_trait]
pub trait RequestRunner: Send + Sync {
    /// Execute the request and return the raw response.
    async fn execute(&self, request: &RequestTemplate) -> Result<HttpResponse, RequestError>;
}

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Numeric status code.
    pub status: u16,
    /// Reason phrase (`OK`, `Not Found`, ...).
    pub reason: String,
    /// Response headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create an empty response with the canonical reason for `status`.
    pub fn new(status: u16) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a JSON body and the matching content type.
    pub fn with_json(self, value: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    /// Look up a header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The response media type, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }

    /// Whether the payload is an image.
    pub fn is_image(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("image/"))
    }

    /// Body decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Result<Value, RequestError> {
        serde_json::from_slice(&self.body).map_err(|e| RequestError::InvalidPayload {
            reason: format!("body is not valid JSON: {e}"),
        })
    }
}

/// Render a JSON value as plain text: strings verbatim, `null` empty,
/// everything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
