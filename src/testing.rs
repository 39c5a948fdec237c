//! Test doubles for driving the engine without a network or chat service.
//!
//! Provides:
//! - [`StubRunner`]: a [`RequestRunner`] with scripted responses per URL
//! - [`RecordingChannel`]: a [`Channel`] that records everything it is asked
//!   to send or edit
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use request_bot::testing::{RecordingChannel, StubRunner};
//! use request_bot::requests::HttpResponse;
//!
//! let runner = Arc::new(StubRunner::new().with_response("https://api/ping", HttpResponse::new(200)));
//! let channel = Arc::new(RecordingChannel::new());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};

use crate::channels::{
    Channel, ChatId, EventStream, ImageSource, MessageRef, OutgoingMessage,
};
use crate::error::{ChannelError, RequestError};
use crate::requests::{HttpResponse, RequestRunner, RequestTemplate};

/// A configurable request runner for tests.
///
/// Supports:
/// - Scripted responses by rendered URL (unscripted URLs answer `404`)
/// - Call counting via [`calls()`](Self::calls) and request capture via
///   [`requests()`](Self::requests)
/// - Runtime failure toggling via [`set_failing()`](Self::set_failing)
/// - Holding requests in flight until [`release()`](Self::release)
pub struct StubRunner {
    responses: HashMap<String, HttpResponse>,
    requests: StdMutex<Vec<RequestTemplate>>,
    call_count: AtomicUsize,
    should_fail: AtomicBool,
    gate: Option<Semaphore>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            requests: StdMutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            should_fail: AtomicBool::new(false),
            gate: None,
        }
    }

    /// Create a stub whose every call fails with a transport error.
    pub fn failing() -> Self {
        let stub = Self::new();
        stub.should_fail.store(true, Ordering::Relaxed);
        stub
    }

    /// Answer requests for `url` with `response`.
    pub fn with_response(mut self, url: impl Into<String>, response: HttpResponse) -> Self {
        self.responses.insert(url.into(), response);
        self
    }

    /// Hold every request until a matching [`release()`](Self::release).
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Let `n` held requests proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Number of requests started so far.
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests received, in order.
    pub fn requests(&self) -> Vec<RequestTemplate> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Toggle whether calls should fail at runtime.
    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Yield until at least `n` requests have started.
    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::task::yield_now().await;
        }
    }
}

impl Default for StubRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestRunner for StubRunner {
    async fn execute(&self, request: &RequestTemplate) -> Result<HttpResponse, RequestError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.call_count.fetch_add(1, Ordering::Relaxed);

        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        if self.should_fail.load(Ordering::Relaxed) {
            return Err(RequestError::Transport {
                url: request.url.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self
            .responses
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| HttpResponse::new(404)))
    }
}

/// One thing a [`RecordingChannel`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Sent {
        message_ref: MessageRef,
        message: OutgoingMessage,
    },
    Edited {
        target: MessageRef,
        message: OutgoingMessage,
    },
    Image {
        message_ref: MessageRef,
        source: ImageSource,
        caption: OutgoingMessage,
    },
}

impl Recorded {
    fn chat(&self) -> &ChatId {
        match self {
            Self::Sent { message_ref, .. } | Self::Image { message_ref, .. } => &message_ref.chat,
            Self::Edited { target, .. } => &target.chat,
        }
    }

    fn text(&self) -> &str {
        match self {
            Self::Sent { message, .. } | Self::Edited { message, .. } => &message.text,
            Self::Image { caption, .. } => &caption.text,
        }
    }
}

/// A channel that records outbound traffic in memory.
pub struct RecordingChannel {
    log: Mutex<Vec<Recorded>>,
    next_id: AtomicUsize,
    failing: HashSet<ChatId>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            failing: HashSet::new(),
        }
    }

    /// Make every send or edit to `chat` fail.
    pub fn failing_for(mut self, chat: impl Into<String>) -> Self {
        self.failing.insert(ChatId::new(chat));
        self
    }

    fn check(&self, chat: &ChatId) -> Result<(), ChannelError> {
        if self.failing.contains(chat) {
            return Err(ChannelError::SendFailed {
                name: "recording".to_string(),
                reason: format!("chat {chat} is unreachable"),
            });
        }
        Ok(())
    }

    fn next_ref(&self, chat: &ChatId) -> MessageRef {
        MessageRef {
            chat: chat.clone(),
            message_id: self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
        }
    }

    /// Everything recorded, in order.
    pub async fn log(&self) -> Vec<Recorded> {
        self.log.lock().await.clone()
    }

    /// New text messages, in order.
    pub async fn sent(&self) -> Vec<(MessageRef, OutgoingMessage)> {
        self.log
            .lock()
            .await
            .iter()
            .filter_map(|r| match r {
                Recorded::Sent {
                    message_ref,
                    message,
                } => Some((message_ref.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    /// Edits, in order.
    pub async fn edits(&self) -> Vec<(MessageRef, OutgoingMessage)> {
        self.log
            .lock()
            .await
            .iter()
            .filter_map(|r| match r {
                Recorded::Edited { target, message } => Some((target.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    /// Texts (and image captions) of new messages sent to `chat`.
    pub async fn texts_for(&self, chat: &str) -> Vec<String> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|r| !matches!(r, Recorded::Edited { .. }) && r.chat().as_str() == chat)
            .map(|r| r.text().to_string())
            .collect()
    }

    /// Text of the most recent send or edit in `chat`.
    pub async fn last_text(&self, chat: &str) -> Option<String> {
        self.log
            .lock()
            .await
            .iter()
            .rev()
            .find(|r| r.chat().as_str() == chat)
            .map(|r| r.text().to_string())
    }

    /// Current content of a message, with edits applied.
    pub async fn current(&self, target: &MessageRef) -> Option<OutgoingMessage> {
        self.log
            .lock()
            .await
            .iter()
            .rev()
            .find_map(|r| match r {
                Recorded::Sent {
                    message_ref,
                    message,
                } if message_ref == target => Some(message.clone()),
                Recorded::Edited { target: t, message } if t == target => Some(message.clone()),
                _ => None,
            })
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send(
        &self,
        chat: &ChatId,
        message: OutgoingMessage,
    ) -> Result<MessageRef, ChannelError> {
        self.check(chat)?;
        let message_ref = self.next_ref(chat);
        self.log.lock().await.push(Recorded::Sent {
            message_ref: message_ref.clone(),
            message,
        });
        Ok(message_ref)
    }

    async fn edit(&self, target: &MessageRef, message: OutgoingMessage) -> Result<(), ChannelError> {
        if self.failing.contains(&target.chat) {
            return Err(ChannelError::EditFailed {
                name: "recording".to_string(),
                message_id: target.message_id.clone(),
                reason: format!("chat {} is unreachable", target.chat),
            });
        }
        self.log.lock().await.push(Recorded::Edited {
            target: target.clone(),
            message,
        });
        Ok(())
    }

    async fn send_image(
        &self,
        chat: &ChatId,
        source: ImageSource,
        caption: OutgoingMessage,
    ) -> Result<MessageRef, ChannelError> {
        self.check(chat)?;
        let message_ref = self.next_ref(chat);
        self.log.lock().await.push(Recorded::Image {
            message_ref: message_ref.clone(),
            source,
            caption,
        });
        Ok(message_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_runner_scripted_and_default() {
        let runner = StubRunner::new().with_response("https://a", HttpResponse::new(201));
        assert_eq!(
            runner.execute(&RequestTemplate::get("https://a")).await.unwrap().status,
            201
        );
        assert_eq!(
            runner.execute(&RequestTemplate::get("https://b")).await.unwrap().status,
            404
        );
        assert_eq!(runner.calls(), 2);
        assert_eq!(runner.requests()[1].url, "https://b");
    }

    #[tokio::test]
    async fn test_stub_runner_failure_toggle() {
        let runner = StubRunner::new();
        runner.set_failing(true);
        assert!(runner.execute(&RequestTemplate::get("https://a")).await.is_err());
        runner.set_failing(false);
        assert!(runner.execute(&RequestTemplate::get("https://a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_recording_channel_tracks_edits() {
        let channel = RecordingChannel::new();
        let chat = ChatId::new("c");
        let first = channel.send(&chat, OutgoingMessage::html("a")).await.unwrap();
        channel.send(&chat, OutgoingMessage::html("b")).await.unwrap();
        channel.edit(&first, OutgoingMessage::html("a2")).await.unwrap();

        assert_eq!(channel.texts_for("c").await, vec!["a", "b"]);
        assert_eq!(channel.last_text("c").await.unwrap(), "a2");
        assert_eq!(channel.current(&first).await.unwrap().text, "a2");
    }

    #[tokio::test]
    async fn test_recording_channel_failing_chat() {
        let channel = RecordingChannel::new().failing_for("down");
        assert!(channel.send(&ChatId::new("down"), OutgoingMessage::html("x")).await.is_err());
        assert!(channel.log().await.is_empty());
    }
}
