//! Optional confirmation before a command runs.

use crate::channels::{Button, OutgoingMessage};
use crate::engine::render::param_list;
use crate::engine::session::{CommandInstance, InstanceState};
use crate::engine::submission::{CANCEL_OPTION, CallbackData, StepRef};
use crate::error::CommandError;

/// Gates execution behind an explicit "Ok".
pub struct ConfirmationGate;

impl ConfirmationGate {
    /// Whether the instance still needs confirming.
    pub fn required(instance: &CommandInstance) -> bool {
        instance.definition.confirm && !instance.confirmed
    }

    /// Summary with Cancel / Ok buttons.
    pub fn prompt(instance: &CommandInstance) -> OutgoingMessage {
        let cancel = CallbackData::new(instance.id, StepRef::Confirm, CANCEL_OPTION);
        let ok = CallbackData::new(instance.id, StepRef::Confirm, 1);
        OutgoingMessage::html(format!(
            "Confirm /{}\n{}",
            instance.command(),
            param_list(&instance.view)
        ))
        .with_buttons(vec![vec![
            Button::new("❌ Cancel", cancel.encode()),
            Button::new("✅ Ok", ok.encode()),
        ]])
    }

    /// Record the confirmation.
    pub fn accept(instance: &mut CommandInstance) -> Result<(), CommandError> {
        if instance.state != InstanceState::AwaitingConfirmation {
            return Err(CommandError::StaleStep {
                id: instance.id,
                step: instance.step_cursor(),
            });
        }
        instance.confirmed = true;
        instance.state = InstanceState::Resolving;
        Ok(())
    }
}
