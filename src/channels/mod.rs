//! Chat transport abstraction.
//!
//! A [`Channel`] delivers inbound updates as a stream of [`IncomingEvent`]s
//! and sends or edits messages on behalf of the engine. Transports for real
//! chat networks live outside this crate; the [`repl::ReplChannel`] drives
//! the engine from a terminal.

pub mod admin;
pub mod repl;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

pub use repl::ReplChannel;

/// Stream of inbound events from a channel.
pub type EventStream = Pin<Box<dyn Stream<Item = IncomingEvent> + Send>>;

/// Identifier of a conversation on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of a message that was sent, used to edit it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatId,
    pub message_id: String,
}

/// The user who produced an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl UserInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: Option<&str>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = last.map(str::to_string);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// `first last` when a first name is known, otherwise `@username`,
    /// falling back to the raw id.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name, &self.username) {
            (Some(first), Some(last), _) if !last.is_empty() => format!("{first} {last}"),
            (Some(first), _, _) if !first.is_empty() => first.clone(),
            (_, _, Some(username)) => format!("@{username}"),
            _ => self.id.clone(),
        }
    }
}

/// The conversation an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: ChatId,
    /// Title of group chats and channels.
    pub title: Option<String>,
    /// Public handle, present only for public chats.
    pub username: Option<String>,
}

impl ChatInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ChatId::new(id),
            title: None,
            username: None,
        }
    }
}

/// What kind of update arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A text message in a private or group chat.
    Message { text: String },
    /// A button press on an inline keyboard.
    Callback { id: String, data: String },
    /// A post in a broadcast channel.
    ChannelPost { text: String },
    /// Anything the engine does not handle.
    Unsupported(String),
}

/// An inbound update from a channel.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    /// Name of the channel that produced the event.
    pub channel: String,
    pub user: UserInfo,
    pub chat: ChatInfo,
    pub kind: EventKind,
    pub received_at: DateTime<Utc>,
}

impl IncomingEvent {
    fn new(channel: &str, user: UserInfo, chat: ChatInfo, kind: EventKind) -> Self {
        Self {
            channel: channel.to_string(),
            user,
            chat,
            kind,
            received_at: Utc::now(),
        }
    }

    /// A text message from `user_id` in `chat_id`.
    pub fn message(channel: &str, user_id: &str, chat_id: &str, text: &str) -> Self {
        Self::new(
            channel,
            UserInfo::new(user_id),
            ChatInfo::new(chat_id),
            EventKind::Message {
                text: text.to_string(),
            },
        )
    }

    /// A button press carrying `data`.
    pub fn callback(channel: &str, user_id: &str, chat_id: &str, data: &str) -> Self {
        Self::new(
            channel,
            UserInfo::new(user_id),
            ChatInfo::new(chat_id),
            EventKind::Callback {
                id: uuid::Uuid::new_v4().to_string(),
                data: data.to_string(),
            },
        )
    }

    /// A post in a broadcast channel.
    pub fn channel_post(channel: &str, chat: ChatInfo, text: &str) -> Self {
        Self::new(
            channel,
            UserInfo::default(),
            chat,
            EventKind::ChannelPost {
                text: text.to_string(),
            },
        )
    }

    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = user;
        self
    }
}

/// How message text should be interpreted by the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextFormat {
    #[default]
    Html,
    Plain,
}

/// A button on an inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Keyboard attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    /// Buttons that send callback data.
    Inline(Vec<Vec<Button>>),
    /// A reply keyboard whose buttons send their text.
    Keyboard(Vec<Vec<String>>),
}

/// A message to send or an edit to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub format: TextFormat,
    pub markup: Option<Markup>,
}

impl OutgoingMessage {
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Html,
            markup: None,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Plain,
            markup: None,
        }
    }

    pub fn with_buttons(mut self, rows: Vec<Vec<Button>>) -> Self {
        self.markup = Some(Markup::Inline(rows));
        self
    }

    pub fn with_keyboard(mut self, rows: Vec<Vec<String>>) -> Self {
        self.markup = Some(Markup::Keyboard(rows));
        self
    }

    /// Inline buttons in display order.
    pub fn buttons(&self) -> Vec<&Button> {
        match &self.markup {
            Some(Markup::Inline(rows)) => rows.iter().flatten().collect(),
            _ => Vec::new(),
        }
    }
}

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Bytes { data: Vec<u8>, content_type: String },
}

/// Rendered output for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingContent {
    Text(OutgoingMessage),
    Image {
        source: ImageSource,
        caption: OutgoingMessage,
    },
}

impl OutgoingContent {
    /// The text part (the caption for images).
    pub fn text(&self) -> &str {
        match self {
            Self::Text(msg) => &msg.text,
            Self::Image { caption, .. } => &caption.text,
        }
    }
}

/// A chat transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name used in logs and events.
    fn name(&self) -> &str;

    /// Start receiving updates.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Send a new message.
    async fn send(&self, chat: &ChatId, message: OutgoingMessage)
    -> Result<MessageRef, ChannelError>;

    /// Replace the text and keyboard of a message sent earlier.
    async fn edit(&self, target: &MessageRef, message: OutgoingMessage)
    -> Result<(), ChannelError>;

    /// Send an image with a caption.
    async fn send_image(
        &self,
        chat: &ChatId,
        source: ImageSource,
        caption: OutgoingMessage,
    ) -> Result<MessageRef, ChannelError>;

    /// Acknowledge a button press so the client stops its spinner.
    async fn answer_callback(&self, _callback_id: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Send rendered content, picking the text or image path.
    async fn deliver(
        &self,
        chat: &ChatId,
        content: OutgoingContent,
    ) -> Result<MessageRef, ChannelError> {
        match content {
            OutgoingContent::Text(message) => self.send(chat, message).await,
            OutgoingContent::Image { source, caption } => {
                self.send_image(chat, source, caption).await
            }
        }
    }
}
