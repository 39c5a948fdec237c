//! Request templates and typed placeholder substitution.
//!
//! Placeholders use the `{{name}}` form (`{{{name}}}` is accepted too).
//! A string that consists of exactly one placeholder is replaced by the
//! typed JSON value, so `"count": "{{limit}}"` can become a number. Embedded
//! placeholders interpolate the value's text. Dotted names walk into object
//! and array values. Unknown names render as an empty string.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RequestError;
use crate::requests::value_text;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\{?\s*([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}?\}\}")
        .expect("placeholder pattern is valid")
});

/// Values available to a template, in precedence order: resolved view
/// entries first, then the global defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstitutionContext {
    values: Map<String, Value>,
}

impl SubstitutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer `view` over `defaults`. View entries win; defaults only fill
    /// names the view does not have.
    pub fn layered<'a>(
        view: impl IntoIterator<Item = (&'a str, &'a Value)>,
        defaults: &Map<String, Value>,
    ) -> Self {
        let mut values = defaults.clone();
        for (name, value) in view {
            values.insert(name.to_string(), value.clone());
        }
        Self { values }
    }

    /// Add or replace a single value.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Resolve a placeholder name, following dotted paths.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value);
        }

        let mut parts = name.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Render a string, keeping the typed value for whole-string placeholders.
    pub fn render_str(&self, input: &str) -> Value {
        if let Some(caps) = PLACEHOLDER.captures(input)
            && let Some(whole) = caps.get(0)
            && whole.start() == 0
            && whole.end() == input.len()
        {
            return match self.lookup(&caps[1]) {
                Some(value) => value.clone(),
                None => Value::String(String::new()),
            };
        }
        Value::String(self.render_text(input))
    }

    /// Render a string, always producing text.
    pub fn render_text(&self, input: &str) -> String {
        PLACEHOLDER
            .replace_all(input, |caps: &Captures<'_>| {
                self.lookup(&caps[1]).map(value_text).unwrap_or_default()
            })
            .into_owned()
    }

    /// Render every string (keys included) inside a JSON value.
    pub fn render_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.render_str(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.render_text(k), self.render_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// Structured description of an HTTP request.
///
/// Field names follow the catalog file (`qs` and `uri` are accepted as
/// aliases). `json: true` only asks for a JSON response and sends no body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(alias = "uri")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
    #[serde(default, alias = "qs", skip_serializing_if = "Map::is_empty")]
    pub query: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub form: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RequestTemplate {
    /// A `GET` request to `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            url: url.into(),
            headers: Map::new(),
            query: Map::new(),
            json: None,
            form: Map::new(),
            body: None,
            timeout_ms: None,
        }
    }

    /// Set the method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set a JSON body.
    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), Value::String(value.into()));
        self
    }

    /// The JSON body to send, if any (`json: true` sends none).
    pub fn json_body(&self) -> Option<&Value> {
        self.json.as_ref().filter(|v| !v.is_boolean())
    }

    /// Substitute `ctx` into every string field.
    pub fn render(&self, ctx: &SubstitutionContext) -> Result<Self, RequestError> {
        let raw = serde_json::to_value(self).map_err(|e| RequestError::InvalidTemplate {
            reason: e.to_string(),
        })?;
        let rendered = ctx.render_value(&raw);
        serde_json::from_value(rendered).map_err(|e| RequestError::InvalidTemplate {
            reason: format!("rendered request is not valid: {e}"),
        })
    }
}
