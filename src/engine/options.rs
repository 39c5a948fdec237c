//! Choice option resolution.
//!
//! Literal lists resolve without I/O. Fetch sources render their request
//! against the instance's substitution context, run it, and read the options
//! from the JSON result.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{ChoiceOption, FetchSource, OptionsSource};
use crate::error::RequestError;
use crate::requests::{RequestRunner, SubstitutionContext};

/// Resolves a choice parameter's option list.
pub struct OptionProvider {
    runner: Arc<dyn RequestRunner>,
}

impl OptionProvider {
    pub fn new(runner: Arc<dyn RequestRunner>) -> Self {
        Self { runner }
    }

    /// Options available without I/O, or `None` for fetch sources.
    pub fn literal(source: &OptionsSource) -> Option<Vec<ChoiceOption>> {
        match source {
            OptionsSource::Static(values) => Some(normalize(values)),
            OptionsSource::Resolved(options) => Some(options.clone()),
            OptionsSource::Fetch(_) => None,
        }
    }

    /// Resolve any source, fetching when needed.
    pub async fn resolve(
        &self,
        source: &OptionsSource,
        ctx: &SubstitutionContext,
    ) -> Result<Vec<ChoiceOption>, RequestError> {
        match source {
            OptionsSource::Fetch(fetch) => self.fetch(fetch, ctx).await,
            other => Ok(Self::literal(other).unwrap_or_default()),
        }
    }

    /// Run the fetch request and normalize its result.
    pub async fn fetch(
        &self,
        fetch: &FetchSource,
        ctx: &SubstitutionContext,
    ) -> Result<Vec<ChoiceOption>, RequestError> {
        let request = fetch.request.render(ctx)?;
        let response = self.runner.execute(&request).await?;
        if response.status >= 400 {
            return Err(RequestError::InvalidPayload {
                reason: format!("{} answered {} {}", request.url, response.status, response.reason),
            });
        }

        let body = response.json()?;
        let literals = match &fetch.query {
            Some(query) => query.option_literals(&body)?,
            None => match body {
                Value::Array(items) => items,
                other => {
                    return Err(RequestError::InvalidPayload {
                        reason: format!(
                            "expected a JSON array of options, got {}",
                            json_kind(&other)
                        ),
                    });
                }
            },
        };

        Ok(normalize(&literals))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Normalize raw option literals, dropping unusable entries and collapsing
/// duplicate labels (the first occurrence wins).
pub fn normalize(raw: &[Value]) -> Vec<ChoiceOption> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(normalize_one)
        .filter(|option| seen.insert(option.name.clone()))
        .collect()
}

fn normalize_one(raw: &Value) -> Option<ChoiceOption> {
    match raw {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(ChoiceOption {
            name: s.clone(),
            value: raw.clone(),
        }),
        Value::Number(n) => Some(ChoiceOption {
            name: n.to_string(),
            value: raw.clone(),
        }),
        Value::Bool(b) => Some(ChoiceOption {
            name: b.to_string(),
            value: raw.clone(),
        }),
        Value::Object(map) => {
            let name = map.get("name").and_then(Value::as_str).filter(|n| !n.is_empty());
            match name {
                Some(name) => Some(ChoiceOption {
                    name: name.to_string(),
                    value: map
                        .get("value")
                        .cloned()
                        .unwrap_or_else(|| Value::String(name.to_string())),
                }),
                None => {
                    tracing::debug!(option = %raw, "Dropping option object without a name");
                    None
                }
            }
        }
        Value::Array(_) => {
            tracing::debug!(option = %raw, "Dropping array option");
            None
        }
    }
}
