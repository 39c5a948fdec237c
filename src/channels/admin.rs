//! Administrative push surface.
//!
//! ## Endpoints
//!
//! - `POST /push` - send `message` to every destination in `channels`
//!
//! When a token is configured, requests must carry
//! `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::{Channel, ChatId, OutgoingContent, OutgoingMessage};
use crate::config::AdminConfig;
use crate::engine::broadcast::BroadcastFanout;
use crate::error::ChannelError;
use crate::requests::value_text;

/// Shared state for admin routes.
#[derive(Clone)]
pub struct AdminState {
    pub channel: Arc<dyn Channel>,
    pub config: Arc<AdminConfig>,
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub message: Option<String>,
    /// Destination chat ids; numbers are accepted.
    pub channels: Option<Vec<Value>>,
}

/// Outcome for one destination.
#[derive(Debug, Serialize)]
pub struct PushResult {
    pub destination: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub results: Vec<PushResult>,
}

/// Create the admin router.
pub fn admin_routes(state: AdminState) -> Router {
    Router::new()
        .route("/push", post(push_message))
        .with_state(state)
}

/// Bind and serve the admin router until the task is aborted.
pub async fn serve(config: AdminConfig, channel: Arc<dyn Channel>) -> Result<(), ChannelError> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "admin".to_string(),
            reason: format!("bind {addr}: {e}"),
        })?;
    if config.token.is_none() {
        tracing::warn!("Admin push surface has no token; anyone who can reach {} may push", addr);
    }
    tracing::info!("Admin push surface listening on {}", addr);

    let app = admin_routes(AdminState {
        channel,
        config: Arc::new(config),
    });
    axum::serve(listener, app)
        .await
        .map_err(|e| ChannelError::Http(e.to_string()))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// POST /push
async fn push_message(
    State(state): State<AdminState>,
    headers: HeaderMap,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Response {
    if !state.config.authorizes(bearer_token(&headers)) {
        return error_response(StatusCode::UNAUTHORIZED, "missing or invalid token");
    }

    let Json(request) = match body {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.body_text()),
    };
    let Some(message) = request.message.filter(|m| !m.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "'message' is required");
    };
    let destinations: Vec<ChatId> = request
        .channels
        .unwrap_or_default()
        .iter()
        .map(value_text)
        .filter(|c| !c.is_empty())
        .map(ChatId)
        .collect();
    if destinations.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "'channels' must list at least one destination");
    }

    tracing::info!(destinations = destinations.len(), "Admin push");
    let content = OutgoingContent::Text(OutgoingMessage::html(message));
    let reports = BroadcastFanout::fan_out(state.channel.as_ref(), &destinations, &content).await;

    let results = reports
        .into_iter()
        .map(|report| match report.result {
            Ok(sent) => PushResult {
                destination: report.destination.0,
                ok: true,
                message_id: Some(sent.message_id),
                error: None,
            },
            Err(e) => PushResult {
                destination: report.destination.0,
                ok: false,
                message_id: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    Json(PushResponse { results }).into_response()
}
