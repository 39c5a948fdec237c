//! The conversational command engine.
//!
//! ```text
//!  IncomingEvent ──► CommandEngine ──► SessionStore (one Mutex per user+chat)
//!                         │
//!                         ▼
//!                 ParameterResolver ──► OptionProvider (static or fetched)
//!                         │
//!                         ▼
//!                 ConfirmationGate ──► RequestExecutor ──► BroadcastFanout
//!                         │                   │
//!                         └──── MenuPresenter ◄┘   (one evolving message)
//! ```

pub mod access;
pub mod broadcast;
pub mod confirm;
pub mod dispatcher;
pub mod executor;
pub mod lanes;
pub mod menu;
pub mod options;
pub mod render;
pub mod resolver;
pub mod session;
pub mod session_store;
pub mod submission;

pub use access::{AccessPolicy, AllowAll, AllowList};
pub use broadcast::{BroadcastFanout, DeliveryReport};
pub use confirm::ConfirmationGate;
pub use dispatcher::CommandEngine;
pub use executor::{ExecutionOutcome, RequestExecutor};
pub use lanes::EventLanes;
pub use menu::MenuPresenter;
pub use options::OptionProvider;
pub use resolver::{NextStep, ParameterResolver};
pub use session::{CommandInstance, InstanceState, Session, SessionKey, View};
pub use session_store::SessionStore;
pub use submission::{CallbackData, StepRef, Submission, SubmissionParser};
