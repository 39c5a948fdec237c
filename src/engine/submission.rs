//! Parsing of inbound text and button payloads.
//!
//! Text starting with `/` is a command trigger of the form
//! `/<command>[@botname] args...`. Anything else is free text, which only
//! matters while a question step is waiting for an answer. Button payloads
//! have the form `<instance uuid>,<step>,<option>` where `step` is a
//! parameter index or `c` for the confirmation menu.

use std::fmt;

use uuid::Uuid;

use crate::error::ChannelError;

/// Parses user input into Submission types.
pub struct SubmissionParser;

impl SubmissionParser {
    /// Parse message text into a Submission.
    pub fn parse(content: &str) -> Submission {
        let trimmed = content.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Submission::Text(trimmed.to_string());
        };

        let (head, args) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim_start()),
            None => (rest, ""),
        };
        if head.is_empty() {
            return Submission::Text(trimmed.to_string());
        }

        let (name, bot) = match head.split_once('@') {
            Some((name, bot)) if !bot.is_empty() => (name, Some(bot.to_string())),
            Some((name, _)) => (name, None),
            None => (head, None),
        };
        if name.is_empty() {
            return Submission::Text(trimmed.to_string());
        }

        Submission::Command(CommandInvocation {
            name: name.to_string(),
            bot,
            args: args.split_whitespace().map(str::to_string).collect(),
        })
    }
}

/// A parsed text submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A command trigger.
    Command(CommandInvocation),
    /// Free text.
    Text(String),
}

/// `/<name>[@bot] args...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub name: String,
    /// Bot the command was addressed to, if any.
    pub bot: Option<String>,
    /// Whitespace-separated tokens after the command.
    pub args: Vec<String>,
}

impl CommandInvocation {
    /// Whether the command targets this bot. Unaddressed commands always do.
    pub fn addressed_to(&self, bot_name: Option<&str>) -> bool {
        match (&self.bot, bot_name) {
            (Some(target), Some(ours)) => target.eq_ignore_ascii_case(ours.trim_start_matches('@')),
            _ => true,
        }
    }
}

/// Which step a button belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRef {
    /// A choice or question parameter, by declared index.
    Param(usize),
    /// The confirmation menu.
    Confirm,
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Param(index) => write!(f, "{index}"),
            Self::Confirm => f.write_str("c"),
        }
    }
}

/// Decoded button payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackData {
    pub instance_id: Uuid,
    pub step: StepRef,
    /// Option index; negative means cancel.
    pub option: i64,
}

/// Option index carried by every cancel button.
pub const CANCEL_OPTION: i64 = -1;

impl CallbackData {
    pub fn new(instance_id: Uuid, step: StepRef, option: i64) -> Self {
        Self {
            instance_id,
            step,
            option,
        }
    }

    pub fn is_cancel(&self) -> bool {
        self.option < 0
    }

    /// Encode as `<uuid>,<step>,<option>`.
    pub fn encode(&self) -> String {
        format!("{},{},{}", self.instance_id, self.step, self.option)
    }

    /// Decode a button payload.
    pub fn parse(data: &str) -> Result<Self, ChannelError> {
        let invalid = |what: &str| ChannelError::InvalidMessage(format!("{what} in '{data}'"));

        let mut parts = data.split(',');
        let (Some(id), Some(step), Some(option), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected three comma-separated fields"));
        };

        let instance_id = Uuid::parse_str(id.trim()).map_err(|_| invalid("invalid instance id"))?;
        let step = match step.trim() {
            "c" => StepRef::Confirm,
            s => StepRef::Param(s.parse().map_err(|_| invalid("invalid step"))?),
        };
        let option = option
            .trim()
            .parse()
            .map_err(|_| invalid("invalid option index"))?;

        Ok(Self {
            instance_id,
            step,
            option,
        })
    }
}
