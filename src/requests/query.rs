//! JSONPath-like queries over response payloads.
//!
//! Supported syntax: an optional leading `$`, dotted field access
//! (`items.name`), array indexing (`items[0]`), quoted fields
//! (`['odd key']`) and wildcards (`*` or `[*]`) over arrays and objects.
//! Missing fields produce no match rather than an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RequestError;
use crate::requests::value_text;

/// How query matches are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// The matched values, in order.
    #[default]
    List,
    /// Each matched value paired with its location.
    Path,
}

/// A query plus its rendering mode.
///
/// Accepts either a bare path string (list mode) or `{path, mode}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "QuerySpec")]
pub struct ResultQuery {
    pub path: String,
    pub mode: QueryMode,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuerySpec {
    Bare(String),
    Full {
        #[serde(alias = "query", alias = "jsonpath")]
        path: String,
        #[serde(default, alias = "type")]
        mode: QueryMode,
    },
}

impl From<QuerySpec> for ResultQuery {
    fn from(spec: QuerySpec) -> Self {
        match spec {
            QuerySpec::Bare(path) => Self::list(path),
            QuerySpec::Full { path, mode } => Self { path, mode },
        }
    }
}

/// One query match.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    /// Normalized location, e.g. `$.items[0].name`.
    pub location: String,
    /// The matched value.
    pub value: Value,
}

impl QueryMatch {
    /// `location: value` label line.
    pub fn label(&self) -> String {
        format!("{}: {}", self.location, value_text(&self.value))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

impl ResultQuery {
    /// A `list` mode query.
    pub fn list(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: QueryMode::List,
        }
    }

    /// A `path` mode query.
    pub fn paths(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: QueryMode::Path,
        }
    }

    /// Evaluate the query against `data`.
    pub fn apply(&self, data: &Value) -> Result<Vec<QueryMatch>, RequestError> {
        let segments = parse_segments(&self.path)?;
        let mut current: Vec<(String, &Value)> = vec![("$".to_string(), data)];

        for segment in &segments {
            let mut next = Vec::new();
            for (location, value) in current {
                match segment {
                    Segment::Field(name) => {
                        if let Some(child) = value.get(name.as_str()) {
                            next.push((format!("{location}.{name}"), child));
                        }
                    }
                    Segment::Index(index) => {
                        if let Some(child) = value.get(*index) {
                            next.push((format!("{location}[{index}]"), child));
                        }
                    }
                    Segment::Wildcard => match value {
                        Value::Array(items) => {
                            for (i, child) in items.iter().enumerate() {
                                next.push((format!("{location}[{i}]"), child));
                            }
                        }
                        Value::Object(map) => {
                            for (key, child) in map {
                                next.push((format!("{location}.{key}"), child));
                            }
                        }
                        _ => {}
                    },
                }
            }
            current = next;
        }

        Ok(current
            .into_iter()
            .map(|(location, value)| QueryMatch {
                location,
                value: value.clone(),
            })
            .collect())
    }

    /// Option literals for a choice menu.
    ///
    /// `list` mode yields the matched values; `path` mode yields
    /// `{name: "<location>: <value>", value}` objects.
    pub fn option_literals(&self, data: &Value) -> Result<Vec<Value>, RequestError> {
        let matches = self.apply(data)?;
        Ok(match self.mode {
            QueryMode::List => matches.into_iter().map(|m| m.value).collect(),
            QueryMode::Path => matches
                .into_iter()
                .map(|m| serde_json::json!({ "name": m.label(), "value": m.value }))
                .collect(),
        })
    }

    /// Render matches as text, one per line.
    pub fn render(&self, data: &Value) -> Result<String, RequestError> {
        let matches = self.apply(data)?;
        let lines: Vec<String> = match self.mode {
            QueryMode::List => matches.iter().map(|m| value_text(&m.value)).collect(),
            QueryMode::Path => matches.iter().map(QueryMatch::label).collect(),
        };
        Ok(lines.join("\n"))
    }
}

fn parse_segments(path: &str) -> Result<Vec<Segment>, RequestError> {
    let invalid = |reason: &str| RequestError::InvalidQuery {
        query: path.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = path.trim();
    let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let mut segments = Vec::new();

    for part in body.split('.') {
        if part.is_empty() {
            continue;
        }

        let (field, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        match field {
            "" => {}
            "*" => segments.push(Segment::Wildcard),
            name => segments.push(Segment::Field(name.to_string())),
        }

        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return Err(invalid("expected '[' after index"));
            }
            let close = rest.find(']').ok_or_else(|| invalid("unclosed '['"))?;
            let inner = rest[1..close].trim();
            let segment = if inner == "*" {
                Segment::Wildcard
            } else if let Some(quoted) = inner
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            {
                Segment::Field(quoted.to_string())
            } else {
                let index = inner
                    .parse::<usize>()
                    .map_err(|_| invalid(&format!("invalid array index: {inner}")))?;
                Segment::Index(index)
            };
            segments.push(segment);
            rest = &rest[close + 1..];
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data() -> Value {
        json!({
            "foo": {"bar": [1, 2, 3], "baz": "hello"},
            "items": [
                {"name": "alpha", "id": 1},
                {"name": "beta", "id": 2},
                {"id": 3}
            ]
        })
    }

    #[test]
    fn test_simple_paths() {
        let found = ResultQuery::list("foo.baz").apply(&data()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, json!("hello"));
        assert_eq!(found[0].location, "$.foo.baz");

        let found = ResultQuery::list("$.foo.bar[2]").apply(&data()).unwrap();
        assert_eq!(found[0].value, json!(3));
        assert_eq!(found[0].location, "$.foo.bar[2]");
    }

    #[test]
    fn test_wildcard_skips_missing_fields() {
        let values: Vec<Value> = ResultQuery::list("$.items[*].name")
            .apply(&data())
            .unwrap()
            .into_iter()
            .map(|m| m.value)
            .collect();
        assert_eq!(values, vec![json!("alpha"), json!("beta")]);
    }

    #[test]
    fn test_object_wildcard_and_quoted_field() {
        let found = ResultQuery::list("$['foo'].*").apply(&data()).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_missing_path_is_empty() {
        assert!(ResultQuery::list("nope.deeper").apply(&data()).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_index() {
        let err = ResultQuery::list("items[x]").apply(&data()).unwrap_err();
        assert!(err.to_string().contains("invalid array index"));
    }

    #[test]
    fn test_render_modes() {
        let list = ResultQuery::list("$.items[*].id").render(&data()).unwrap();
        assert_eq!(list, "1\n2\n3");

        let paths = ResultQuery::paths("$.items[0:].name");
        assert!(paths.apply(&data()).is_err());

        let paths = ResultQuery::paths("$.items[*].name").render(&data()).unwrap();
        assert_eq!(paths, "$.items[0].name: alpha\n$.items[1].name: beta");
    }

    #[test]
    fn test_path_mode_option_literals() {
        let literals = ResultQuery::paths("$.foo.baz")
            .option_literals(&data())
            .unwrap();
        assert_eq!(literals, vec![json!({"name": "$.foo.baz: hello", "value": "hello"})]);
    }

    #[test]
    fn test_mode_deserializes_lowercase() {
        let q: ResultQuery = serde_json::from_value(json!({"query": "$.a", "mode": "path"})).unwrap();
        assert_eq!(q.mode, QueryMode::Path);
        let q: ResultQuery = serde_json::from_value(json!({"path": "$.a"})).unwrap();
        assert_eq!(q.mode, QueryMode::List);
        let q: ResultQuery = serde_json::from_value(json!("$.items[*]")).unwrap();
        assert_eq!(q, ResultQuery::list("$.items[*]"));
    }
}
