//! Command catalog loaded from the bot's JSON configuration file.
//!
//! ```json
//! {
//!   "bot_name": "opsbot",
//!   "start_message": "Welcome!",
//!   "help_message": "Run infrastructure requests from chat.",
//!   "defaults": {"api": "https://ci.example.org"},
//!   "channels": [-1001234567890, "@ops_feed"],
//!   "access": ["11111111"],
//!   "requests": [
//!     {
//!       "command": "deploy",
//!       "help": "Deploy a service",
//!       "params": [
//!         {"type": "inline", "name": "service", "help": "Service name"},
//!         {"type": "choice", "name": "env", "help": "Target environment",
//!          "options": ["staging", "prod"]},
//!         {"type": "question", "name": "reason", "prompt": "Why?"}
//!       ],
//!       "confirm": true,
//!       "request": {"method": "POST", "url": "{{api}}/deploy",
//!                   "json": {"service": "{{service}}", "env": "{{env}}"}},
//!       "response": ["http_code", "body"],
//!       "broadcast": ["username", "params"]
//!     }
//!   ]
//! }
//! ```
//!
//! The older split form (`params_inline` + `params_choice`, request under
//! `options`) is accepted too and converted to the ordered `params` list.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::channels::ChatId;
use crate::error::ConfigError;
use crate::requests::{RequestTemplate, ResultQuery, value_text};

/// Built-in commands that catalog entries may not shadow.
pub const RESERVED_COMMANDS: &[&str] = &["help", "start", "id"];

/// A normalized choice option.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceOption {
    /// Display label (unique within one menu).
    pub name: String,
    /// Value stored in the view when selected.
    pub value: Value,
}

/// A request whose JSON result provides choice options.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSource {
    pub request: RequestTemplate,
    pub query: Option<ResultQuery>,
}

/// Where a choice parameter's options come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawOptions")]
pub enum OptionsSource {
    /// Literal option values from the catalog.
    Static(Vec<Value>),
    /// Options fetched from a request at step time.
    Fetch(FetchSource),
    /// Options already resolved for a running instance.
    Resolved(Vec<ChoiceOption>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOptions {
    List(Vec<Value>),
    Fetch {
        request: RequestTemplate,
        #[serde(default, alias = "result")]
        query: Option<ResultQuery>,
    },
    Request(RequestTemplate),
}

impl From<RawOptions> for OptionsSource {
    fn from(raw: RawOptions) -> Self {
        match raw {
            RawOptions::List(values) => Self::Static(values),
            RawOptions::Fetch { request, query } => Self::Fetch(FetchSource { request, query }),
            RawOptions::Request(request) => Self::Fetch(FetchSource {
                request,
                query: None,
            }),
        }
    }
}

/// How a parameter gets its value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterKind {
    /// Positional token of the triggering message.
    Inline,
    /// One option picked from a button menu.
    Choice { options: OptionsSource },
    /// The next free-text message.
    Question {
        #[serde(default)]
        prompt: Option<String>,
    },
}

/// One declared command parameter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

impl ParameterSpec {
    pub fn inline(name: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: ParameterKind::Inline,
        }
    }

    pub fn choice(name: &str, help: &str, options: OptionsSource) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: ParameterKind::Choice { options },
        }
    }

    pub fn question(name: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            help: String::new(),
            kind: ParameterKind::Question {
                prompt: Some(prompt.to_string()),
            },
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.kind, ParameterKind::Inline)
    }

    /// Text shown above a choice menu or as a question.
    pub fn prompt(&self) -> String {
        match &self.kind {
            ParameterKind::Question {
                prompt: Some(prompt),
            } if !prompt.is_empty() => prompt.clone(),
            _ if !self.help.is_empty() => self.help.clone(),
            ParameterKind::Choice { .. } => format!("Choose {}", self.name),
            _ => format!("Enter {}", self.name),
        }
    }
}

/// A piece of a rendered reply or broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentField {
    Command,
    Username,
    Params,
    HttpCode,
    Headers,
    Body,
    Image,
    #[serde(other)]
    Unknown,
}

/// Which fields a reply or broadcast includes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawContent")]
pub struct ContentSpec {
    pub include: Vec<ContentField>,
    /// Query applied to a JSON body before rendering `body` or `image`.
    pub query: Option<ResultQuery>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    Fields(Vec<ContentField>),
    Full {
        #[serde(default)]
        include: Vec<ContentField>,
        #[serde(default)]
        query: Option<ResultQuery>,
    },
}

impl From<RawContent> for ContentSpec {
    fn from(raw: RawContent) -> Self {
        let (include, query) = match raw {
            RawContent::Fields(include) => (include, None),
            RawContent::Full { include, query } => (include, query),
        };
        let include = include
            .into_iter()
            .filter(|f| *f != ContentField::Unknown)
            .collect();
        Self { include, query }
    }
}

impl ContentSpec {
    pub fn new(include: Vec<ContentField>) -> Self {
        Self {
            include,
            query: None,
        }
    }

    pub fn includes(&self, field: ContentField) -> bool {
        self.include.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }
}

/// An immutable command definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawCommand")]
pub struct CommandDefinition {
    pub name: String,
    pub help: String,
    /// Parameters in resolution order.
    pub parameters: Vec<ParameterSpec>,
    pub confirm: bool,
    /// The action to perform; `None` completes without a request.
    pub request: Option<RequestTemplate>,
    pub response: Option<ContentSpec>,
    pub broadcast: Option<ContentSpec>,
}

#[derive(Deserialize)]
struct LegacyParam {
    name: String,
    #[serde(default)]
    help: String,
}

#[derive(Deserialize)]
struct LegacyChoice {
    name: String,
    #[serde(default)]
    help: String,
    options: OptionsSource,
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(alias = "name")]
    command: String,
    #[serde(default)]
    help: String,
    #[serde(default)]
    params: Option<Vec<ParameterSpec>>,
    #[serde(default)]
    params_inline: Vec<LegacyParam>,
    #[serde(default)]
    params_choice: Vec<LegacyChoice>,
    #[serde(default)]
    confirm: bool,
    #[serde(default, alias = "options")]
    request: Option<RequestTemplate>,
    #[serde(default)]
    response: Option<ContentSpec>,
    #[serde(default)]
    broadcast: Option<ContentSpec>,
}

impl TryFrom<RawCommand> for CommandDefinition {
    type Error = String;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let legacy = !raw.params_inline.is_empty() || !raw.params_choice.is_empty();
        let parameters = match raw.params {
            Some(_) if legacy => {
                return Err(format!(
                    "/{}: use either \"params\" or \"params_inline\"/\"params_choice\", not both",
                    raw.command
                ));
            }
            Some(params) => params,
            None => raw
                .params_inline
                .into_iter()
                .map(|p| ParameterSpec::inline(&p.name, &p.help))
                .chain(
                    raw.params_choice
                        .into_iter()
                        .map(|c| ParameterSpec::choice(&c.name, &c.help, c.options)),
                )
                .collect(),
        };

        Ok(Self {
            name: raw.command.trim_start_matches('/').to_string(),
            help: raw.help,
            parameters,
            confirm: raw.confirm,
            request: raw.request,
            response: raw.response,
            broadcast: raw.broadcast,
        })
    }
}

impl CommandDefinition {
    /// A command with no parameters and no request.
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            parameters: Vec::new(),
            confirm: false,
            request: None,
            response: None,
            broadcast: None,
        }
    }

    pub fn with_parameter(mut self, param: ParameterSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_confirm(mut self) -> Self {
        self.confirm = true;
        self
    }

    pub fn with_request(mut self, request: RequestTemplate) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, spec: ContentSpec) -> Self {
        self.response = Some(spec);
        self
    }

    pub fn with_broadcast(mut self, spec: ContentSpec) -> Self {
        self.broadcast = Some(spec);
        self
    }

    /// Inline parameters in declared order.
    pub fn inline_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|p| p.is_inline())
    }
}

#[derive(Deserialize)]
struct RawCatalog {
    #[serde(default)]
    bot_name: Option<String>,
    #[serde(default)]
    start_message: Option<String>,
    #[serde(default)]
    help_message: Option<String>,
    #[serde(default)]
    defaults: Map<String, Value>,
    #[serde(default)]
    channels: Vec<Value>,
    #[serde(default)]
    access: Option<Vec<Value>>,
    #[serde(default)]
    requests: Vec<CommandDefinition>,
}

/// All commands the bot serves plus the bot-wide settings from the catalog
/// file. Built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    /// Commands addressed to another bot (`/cmd@other`) are ignored.
    pub bot_name: Option<String>,
    pub start_message: Option<String>,
    pub help_message: Option<String>,
    /// Values available to every template, below the resolved view.
    pub defaults: Map<String, Value>,
    /// Broadcast destinations.
    pub channels: Vec<ChatId>,
    /// User ids allowed to run commands. `None` allows nobody; `"*"`
    /// allows everyone.
    pub access: Option<Vec<String>>,
    commands: Vec<CommandDefinition>,
}

impl CommandCatalog {
    /// Build a catalog from definitions, validating names.
    pub fn new(commands: Vec<CommandDefinition>) -> Result<Self, ConfigError> {
        let catalog = Self {
            commands,
            ..Self::default()
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse and validate catalog JSON.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawCatalog =
            serde_json::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let catalog = Self {
            bot_name: raw.bot_name.filter(|n| !n.is_empty()),
            start_message: raw.start_message,
            help_message: raw.help_message,
            defaults: raw.defaults,
            channels: raw
                .channels
                .iter()
                .map(value_text)
                .filter(|c| !c.is_empty())
                .map(ChatId)
                .collect(),
            access: raw
                .access
                .map(|ids| ids.iter().map(value_text).collect()),
            commands: raw.requests,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read and parse a catalog file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for command in &self.commands {
            let name = command.name.as_str();
            if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '@') {
                return Err(ConfigError::InvalidValue {
                    key: "requests.command".to_string(),
                    message: format!("invalid command name '{name}'"),
                });
            }
            if RESERVED_COMMANDS.contains(&name) {
                return Err(ConfigError::InvalidValue {
                    key: "requests.command".to_string(),
                    message: format!("/{name} is a built-in command"),
                });
            }
            if !names.insert(name) {
                return Err(ConfigError::InvalidValue {
                    key: "requests.command".to_string(),
                    message: format!("duplicate command /{name}"),
                });
            }

            let mut params = HashSet::new();
            for param in &command.parameters {
                if param.name.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: format!("/{name} params"),
                        message: "parameter names must not be empty".to_string(),
                    });
                }
                if !params.insert(param.name.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        key: format!("/{name} params"),
                        message: format!("duplicate parameter '{}'", param.name),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn commands(&self) -> &[CommandDefinition] {
        &self.commands
    }

    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_channels(mut self, channels: Vec<ChatId>) -> Self {
        self.channels = channels;
        self
    }

    /// `/help` text: the help message, then one line per command.
    pub fn help_text(&self) -> String {
        let mut text = String::new();
        if let Some(help) = self.help_message.as_deref().filter(|h| !h.is_empty()) {
            text.push_str(help);
            text.push_str("\n\n");
        }
        text.push_str("Commands:\n");
        for command in &self.commands {
            text.push_str(&format!("/{} {}\n", command.name, command.help));
        }
        text.push_str("/help Show this help message.\n");
        text
    }

    /// `/start` text.
    pub fn start_text(&self) -> String {
        let keyboard_note = "A keyboard with available commands has been enabled";
        match self.start_message.as_deref().filter(|m| !m.is_empty()) {
            Some(message) => format!("{message}\n{keyboard_note}"),
            None => keyboard_note.to_string(),
        }
    }

    /// Reply keyboard keys: `/help` followed by every command.
    pub fn keyboard(&self) -> Vec<String> {
        std::iter::once("/help".to_string())
            .chain(self.commands.iter().map(|c| format!("/{}", c.name)))
            .collect()
    }
}
