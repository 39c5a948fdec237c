//! Step-by-step parameter resolution.
//!
//! Inline parameters are bound together from the triggering message. The
//! remaining parameters are visited in declared order, one step per call to
//! [`ParameterResolver::next_step`], with the instance's cursor recording
//! progress between events.

use serde_json::Value;

use crate::channels::OutgoingMessage;
use crate::config::{ChoiceOption, CommandDefinition, OptionsSource, ParameterKind};
use crate::engine::confirm::ConfirmationGate;
use crate::engine::render::escape_html;
use crate::engine::session::{CommandInstance, InstanceState};
use crate::error::CommandError;

/// What the instance needs next.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Present a choice menu for parameter `step`.
    Choice {
        step: usize,
        name: String,
        prompt: String,
        source: OptionsSource,
    },
    /// Ask the question for parameter `step`.
    Question { step: usize, prompt: String },
    /// Every parameter is resolved but confirmation is pending.
    Confirm,
    /// Ready to run.
    Execute,
}

/// Drives an instance through its parameter list.
pub struct ParameterResolver;

impl ParameterResolver {
    /// Bind inline parameters from positional tokens. Extra tokens are
    /// ignored. With too few tokens nothing is recorded.
    pub fn bind_inline(instance: &mut CommandInstance, args: &[String]) -> Result<(), CommandError> {
        let names: Vec<String> = instance
            .definition
            .inline_parameters()
            .map(|p| p.name.clone())
            .collect();

        if args.len() < names.len() {
            return Err(CommandError::Usage {
                command: instance.definition.name.clone(),
                required: names.len(),
                given: args.len(),
            });
        }

        for (name, token) in names.iter().zip(args) {
            instance
                .view
                .insert(name, Value::String(token.clone()), token.clone());
        }
        Ok(())
    }

    /// The message explaining which positional arguments are required.
    pub fn usage_message(definition: &CommandDefinition) -> OutgoingMessage {
        let inline: Vec<_> = definition.inline_parameters().collect();
        let mut text = format!(
            "/{} requires <b>{}</b> positional argument{}",
            escape_html(&definition.name),
            inline.len(),
            if inline.len() > 1 { "s:" } else { ":" }
        );
        for param in inline {
            text.push_str(&format!(
                "\n<b>{}</b>: {}",
                escape_html(&param.name),
                escape_html(&param.help)
            ));
        }
        OutgoingMessage::html(text)
    }

    /// Move the cursor past resolved parameters and report the next step.
    pub fn next_step(instance: &mut CommandInstance) -> NextStep {
        let mut cursor = instance.step_cursor();
        loop {
            let Some(param) = instance.definition.parameters.get(cursor) else {
                break;
            };
            if instance.view.get(&param.name).is_some() {
                cursor += 1;
                continue;
            }

            let step = match &param.kind {
                ParameterKind::Inline => {
                    cursor += 1;
                    continue;
                }
                ParameterKind::Choice { options } => NextStep::Choice {
                    step: cursor,
                    name: param.name.clone(),
                    prompt: param.prompt(),
                    source: options.clone(),
                },
                ParameterKind::Question { .. } => NextStep::Question {
                    step: cursor,
                    prompt: param.prompt(),
                },
            };
            instance.advance_to(cursor);
            return step;
        }

        instance.advance_to(cursor);
        if ConfirmationGate::required(instance) {
            NextStep::Confirm
        } else {
            NextStep::Execute
        }
    }

    /// Store resolved options for `step` and wait for a selection.
    pub fn record_options(instance: &mut CommandInstance, step: usize, options: Vec<ChoiceOption>) {
        if let Some(param) = instance.definition.parameters.get_mut(step)
            && let ParameterKind::Choice { options: source } = &mut param.kind
        {
            *source = OptionsSource::Resolved(options);
        }
        instance.state = InstanceState::AwaitingChoice { step };
    }

    /// Apply a menu selection for `step`.
    pub fn select_option(
        instance: &mut CommandInstance,
        step: usize,
        option: i64,
    ) -> Result<(), CommandError> {
        if instance.state != (InstanceState::AwaitingChoice { step }) || instance.step_cursor() != step {
            return Err(CommandError::StaleStep {
                id: instance.id,
                step,
            });
        }

        let picked = match instance.definition.parameters.get(step).map(|p| (&p.name, &p.kind)) {
            Some((
                name,
                ParameterKind::Choice {
                    options: OptionsSource::Resolved(options),
                },
            )) => usize::try_from(option)
                .ok()
                .and_then(|i| options.get(i))
                .map(|o| (name.clone(), o.clone())),
            _ => None,
        };
        let Some((name, choice)) = picked else {
            return Err(CommandError::InvalidOption { step, option });
        };

        instance.view.insert(&name, choice.value, choice.name);
        instance.advance_to(step + 1);
        instance.state = InstanceState::Resolving;
        Ok(())
    }

    /// Apply a free-text answer for `step`.
    pub fn answer_question(
        instance: &mut CommandInstance,
        step: usize,
        text: &str,
    ) -> Result<(), CommandError> {
        if instance.state != (InstanceState::AwaitingAnswer { step }) || instance.step_cursor() != step {
            return Err(CommandError::StaleStep {
                id: instance.id,
                step,
            });
        }
        let Some(name) = instance.definition.parameters.get(step).map(|p| p.name.clone()) else {
            return Err(CommandError::StaleStep {
                id: instance.id,
                step,
            });
        };

        instance
            .view
            .insert(&name, Value::String(text.to_string()), text);
        instance.advance_to(step + 1);
        instance.state = InstanceState::Resolving;
        Ok(())
    }
}
