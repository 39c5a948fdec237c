//! Request Bot
//!
//! A config-driven command engine for chat bots. Each command in the catalog
//! collects its parameters step by step (inline arguments, button menus,
//! free-text questions), optionally asks for confirmation, performs an HTTP
//! request and reports the result to the requester and a broadcast list.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Channels                               │
//! │   ┌──────────┐  ┌──────────────────┐  ┌──────────────────────┐   │
//! │   │   REPL   │  │ chat transports  │  │ admin POST /push     │   │
//! │   └────┬─────┘  └────────┬─────────┘  └──────────┬───────────┘   │
//! │        └────────┬────────┘                       │               │
//! └─────────────────┼────────────────────────────────┼───────────────┘
//!                   ▼                                │
//! ┌─────────────────────────────────────────┐        │
//! │              CommandEngine              │        │
//! │  sessions ─► resolver ─► confirmation   │        │
//! │                 │             │         │        │
//! │            OptionProvider  Executor ────┼──► BroadcastFanout
//! └─────────────────┼─────────────┼─────────┘
//!                   ▼             ▼
//!             ┌──────────────────────────┐
//!             │  RequestRunner (reqwest) │
//!             └──────────────────────────┘
//! ```

pub mod bootstrap;
pub mod channels;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod requests;
pub mod testing;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::channels::{Channel, ChatId, IncomingEvent, OutgoingMessage};
    pub use crate::config::{CommandCatalog, CommandDefinition, Config};
    pub use crate::engine::CommandEngine;
    pub use crate::error::{Error, Result};
    pub use crate::requests::{RequestRunner, RequestTemplate, ReqwestRunner};
}
