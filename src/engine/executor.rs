//! Runs a fully resolved command instance.
//!
//! The instance has already left its session when it gets here, so a
//! command started in the meantime cannot interrupt the request. All
//! progress is shown on the instance's menu surface.

use std::sync::Arc;

use crate::channels::{Channel, ChatId};
use crate::engine::broadcast::BroadcastFanout;
use crate::engine::menu::MenuPresenter;
use crate::engine::render::{ContentRenderer, Status, status_message};
use crate::engine::session::{CommandInstance, InstanceState};
use crate::requests::RequestRunner;

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The request ran and answered with `status`.
    Completed { status: u16 },
    /// The command has no request; nothing was sent.
    NoRequest,
    /// Rendering or transport failed.
    Failed { reason: String },
}

/// Performs the configured action and distributes its result.
pub struct RequestExecutor {
    runner: Arc<dyn RequestRunner>,
    channel: Arc<dyn Channel>,
    destinations: Vec<ChatId>,
}

impl RequestExecutor {
    pub fn new(
        runner: Arc<dyn RequestRunner>,
        channel: Arc<dyn Channel>,
        destinations: Vec<ChatId>,
    ) -> Self {
        Self {
            runner,
            channel,
            destinations,
        }
    }

    pub async fn run(&self, mut instance: CommandInstance) -> ExecutionOutcome {
        instance.state = InstanceState::Executing;
        let command = instance.command().to_string();
        let chat = instance.chat().clone();
        tracing::info!(command = %command, instance = %instance.id, chat = %chat, "Executing command");

        self.show(&mut instance, Status::Running).await;

        let Some(template) = instance.definition.request.clone() else {
            self.show(&mut instance, Status::Done).await;
            return ExecutionOutcome::NoRequest;
        };

        let result = match template.render(&instance.substitution_context()) {
            Ok(request) => self.runner.execute(&request).await,
            Err(e) => Err(e),
        };
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(command = %command, instance = %instance.id, error = %e, "Command request failed");
                self.show(&mut instance, Status::Error).await;
                return ExecutionOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        tracing::debug!(command = %command, status = response.status, "Command request answered");

        let renderer = ContentRenderer {
            command: &command,
            user: &instance.invoked_by,
            view: &instance.view,
            response: &response,
        };

        if let Some(spec) = &instance.definition.response
            && let Some(content) = renderer.reply(spec)
            && let Err(e) = self.channel.deliver(&chat, content).await
        {
            tracing::warn!(command = %command, chat = %chat, error = %e, "Failed to send reply");
        }

        if !self.destinations.is_empty()
            && let Some(spec) = &instance.definition.broadcast
            && let Some(content) = renderer.broadcast(spec)
        {
            BroadcastFanout::fan_out(self.channel.as_ref(), &self.destinations, &content).await;
        }

        self.show(&mut instance, Status::Done).await;
        ExecutionOutcome::Completed {
            status: response.status,
        }
    }

    async fn show(&self, instance: &mut CommandInstance, status: Status) {
        let message = status_message(status, instance.command(), &instance.view);
        let chat = instance.chat().clone();
        if let Err(e) =
            MenuPresenter::present(self.channel.as_ref(), &mut instance.menu, &chat, message).await
        {
            tracing::warn!(instance = %instance.id, error = %e, "Failed to update command status");
        }
    }
}
