//! Who may run commands.

use std::collections::HashSet;

use crate::channels::{OutgoingMessage, UserInfo};

/// Decides whether a user may interact with the engine.
pub trait AccessPolicy: Send + Sync {
    fn allows(&self, user: &UserInfo) -> bool;
}

/// Everyone is allowed.
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allows(&self, _user: &UserInfo) -> bool {
        true
    }
}

/// Only listed user ids are allowed.
pub struct AllowList {
    ids: HashSet<String>,
}

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccessPolicy for AllowList {
    fn allows(&self, user: &UserInfo) -> bool {
        self.ids.contains(&user.id)
    }
}

/// Id entry that opens the bot to everyone.
pub const ANY_USER: &str = "*";

/// Build the policy for an optional catalog access list.
///
/// A missing list admits nobody.
pub fn policy_for(access: Option<&[String]>) -> Box<dyn AccessPolicy> {
    match access {
        Some(ids) if ids.iter().any(|id| id == ANY_USER) => Box::new(AllowAll),
        Some(ids) => Box::new(AllowList::new(ids.iter().cloned())),
        None => Box::new(AllowList::new(Vec::<String>::new())),
    }
}

/// Reply for users outside the access list.
pub fn denied_message(user: &UserInfo) -> OutgoingMessage {
    OutgoingMessage::html(format!(
        "You are not allowed to run any request using this bot.\n\
         Contact the bot manager and ask them to include you using the id: <code>{}</code>",
        crate::engine::render::escape_html(&user.id)
    ))
}
