//! Session and command instance model.
//!
//! A session is one conversation slot, keyed by user and chat. It holds at
//! most one active command instance plus a pointer to the question step that
//! is waiting for a free-text reply.
//!
//! ```text
//!  new ──► Resolving ──► AwaitingChoice{step} ──┐
//!             ▲  │                              │ option picked
//!             │  ├─────► AwaitingAnswer{step} ──┤ text received
//!             │  │                              │
//!             └──┼──────────────────────────────┘
//!                ├─────► AwaitingConfirmation ──► (confirmed) Resolving
//!                └─────► Executing (detached from the session)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::channels::{ChatId, IncomingEvent, MessageRef, UserInfo};
use crate::config::CommandDefinition;
use crate::requests::SubstitutionContext;

/// Identifies a conversation: one user in one chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub chat_id: ChatId,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, chat_id: ChatId) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id,
        }
    }

    pub fn from_event(event: &IncomingEvent) -> Self {
        Self::new(event.user.id.clone(), event.chat.id.clone())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.chat_id)
    }
}

/// One resolved parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEntry {
    pub name: String,
    /// Typed value used for substitution.
    pub value: Value,
    /// Text shown to users.
    pub label: String,
}

/// Resolved parameter values in resolution order. Entries are only ever
/// added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct View {
    entries: Vec<ViewEntry>,
}

impl View {
    /// Record a value. Returns `false` and leaves the view untouched if the
    /// name is already resolved.
    pub fn insert(&mut self, name: &str, value: Value, label: impl Into<String>) -> bool {
        if self.get(name).is_some() {
            return false;
        }
        self.entries.push(ViewEntry {
            name: name.to_string(),
            value,
            label: label.into(),
        });
        true
    }

    pub fn get(&self, name: &str) -> Option<&ViewEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, value)` pairs for substitution.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|e| (e.name.as_str(), &e.value))
    }
}

/// Where an instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Working out the next step; no input is expected.
    Resolving,
    /// A choice menu for `step` is shown.
    AwaitingChoice { step: usize },
    /// The question for `step` was asked.
    AwaitingAnswer { step: usize },
    /// The confirmation menu is shown.
    AwaitingConfirmation,
    /// The request is running; the instance has left its session.
    Executing,
}

/// The single evolving message of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuState {
    pub message: Option<MessageRef>,
}

impl MenuState {
    pub fn created(&self) -> bool {
        self.message.is_some()
    }
}

/// A question step waiting for a free-text reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwaitingAnswer {
    pub instance_id: Uuid,
    pub step: usize,
}

/// One in-flight execution of a command.
#[derive(Debug, Clone)]
pub struct CommandInstance {
    pub id: Uuid,
    pub session_key: SessionKey,
    /// Private copy of the definition. Choice sources are replaced by their
    /// resolved options as steps run.
    pub definition: CommandDefinition,
    pub view: View,
    /// Copy of the catalog defaults at creation time.
    pub defaults: Map<String, Value>,
    step_cursor: usize,
    pub confirmed: bool,
    pub state: InstanceState,
    pub menu: MenuState,
    pub invoked_by: UserInfo,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl CommandInstance {
    pub fn new(
        session_key: SessionKey,
        definition: CommandDefinition,
        defaults: Map<String, Value>,
        invoked_by: UserInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_key,
            definition,
            view: View::default(),
            defaults,
            step_cursor: 0,
            confirmed: false,
            state: InstanceState::Resolving,
            menu: MenuState::default(),
            invoked_by,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn command(&self) -> &str {
        &self.definition.name
    }

    pub fn chat(&self) -> &ChatId {
        &self.session_key.chat_id
    }

    /// Index of the next parameter to resolve.
    pub fn step_cursor(&self) -> usize {
        self.step_cursor
    }

    /// Move the cursor forward. Never moves it back.
    pub fn advance_to(&mut self, step: usize) {
        self.step_cursor = self.step_cursor.max(step);
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// View layered over the defaults.
    pub fn substitution_context(&self) -> SubstitutionContext {
        SubstitutionContext::layered(self.view.values(), &self.defaults)
    }
}

/// A conversation slot.
#[derive(Debug)]
pub struct Session {
    pub key: SessionKey,
    pub active: Option<CommandInstance>,
    pub awaiting: Option<AwaitingAnswer>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            active: None,
            awaiting: None,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn instance(&self, id: Uuid) -> Option<&CommandInstance> {
        self.active.as_ref().filter(|i| i.id == id)
    }

    pub fn instance_mut(&mut self, id: Uuid) -> Option<&mut CommandInstance> {
        self.active.as_mut().filter(|i| i.id == id)
    }

    /// Install a new instance, returning the one it displaces.
    pub fn replace(&mut self, instance: CommandInstance) -> Option<CommandInstance> {
        self.awaiting = None;
        self.touch();
        self.active.replace(instance)
    }

    /// Remove the active instance if it has `id`.
    pub fn take_instance(&mut self, id: Uuid) -> Option<CommandInstance> {
        if self.instance(id).is_none() {
            return None;
        }
        if self.awaiting.is_some_and(|a| a.instance_id == id) {
            self.awaiting = None;
        }
        self.active.take()
    }

    /// Remove whatever instance is active.
    pub fn take_active(&mut self) -> Option<CommandInstance> {
        self.awaiting = None;
        self.active.take()
    }

    /// Point free-text replies at `step` of instance `id`.
    pub fn await_answer(&mut self, instance_id: Uuid, step: usize) {
        self.awaiting = Some(AwaitingAnswer { instance_id, step });
    }
}
