//! reqwest-backed request runner.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::error::RequestError;
use crate::requests::{HttpResponse, RequestRunner, RequestTemplate, value_text};

/// Runs rendered templates over HTTP with a shared connection pool.
pub struct ReqwestRunner {
    client: Client,
}

impl ReqwestRunner {
    /// Create a runner whose requests time out after `timeout` unless the
    /// template sets its own `timeout_ms`.
    pub fn new(timeout: Duration) -> Result<Self, RequestError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("request-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RequestError::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

fn pairs(map: &serde_json::Map<String, serde_json::Value>) -> Vec<(String, String)> {
    map.iter().map(|(k, v)| (k.clone(), value_text(v))).collect()
}

fn classify(url: &str, err: reqwest::Error) -> RequestError {
    if err.is_timeout() {
        RequestError::Timeout {
            url: url.to_string(),
        }
    } else {
        RequestError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl RequestRunner for ReqwestRunner {
    async fn execute(&self, request: &RequestTemplate) -> Result<HttpResponse, RequestError> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| RequestError::InvalidMethod(request.method.clone()))?;

        let mut builder = self.client.request(method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value_text(value));
        }
        if !request.query.is_empty() {
            builder = builder.query(&pairs(&request.query));
        }
        if let Some(json) = request.json_body() {
            builder = builder.json(json);
        } else if !request.form.is_empty() {
            builder = builder.form(&pairs(&request.form));
        } else if let Some(body) = &request.body {
            builder = builder.body(value_text(body));
        }
        if let Some(ms) = request.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        tracing::debug!(method = %method, url = %request.url, "Performing request");

        let response = builder
            .send()
            .await
            .map_err(|e| classify(&request.url, e))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(&request.url, e))?
            .to_vec();

        tracing::debug!(
            url = %request.url,
            status = status.as_u16(),
            bytes = body.len(),
            "Request completed"
        );

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_method_is_rejected_before_sending() {
        let runner = ReqwestRunner::new(Duration::from_secs(1)).unwrap();
        let template = RequestTemplate::get("http://127.0.0.1:9/").with_method("BAD METHOD");
        let err = runner.execute(&template).await.unwrap_err();
        assert!(matches!(err, RequestError::InvalidMethod(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_transport_error() {
        let runner = ReqwestRunner::new(Duration::from_secs(2)).unwrap();
        let template = RequestTemplate::get("http://127.0.0.1:9/");
        let err = runner.execute(&template).await.unwrap_err();
        assert!(matches!(
            err,
            RequestError::Transport { .. } | RequestError::Timeout { .. }
        ));
    }

    #[test]
    fn test_pairs_render_values_as_text() {
        let mut map = serde_json::Map::new();
        map.insert("n".into(), serde_json::json!(3));
        map.insert("s".into(), serde_json::json!("x"));
        let rendered = pairs(&map);
        assert!(rendered.contains(&("n".to_string(), "3".to_string())));
        assert!(rendered.contains(&("s".to_string(), "x".to_string())));
    }
}
