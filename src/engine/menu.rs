//! The single evolving message of a command instance.
//!
//! The first presentation sends a message and records its identity; every
//! later presentation (next choice, confirmation, status, cancellation)
//! edits that message in place.

use uuid::Uuid;

use crate::channels::{Button, Channel, ChatId, OutgoingMessage};
use crate::config::ChoiceOption;
use crate::engine::render::escape_html;
use crate::engine::session::MenuState;
use crate::engine::submission::{CANCEL_OPTION, CallbackData, StepRef};
use crate::error::ChannelError;

/// Buttons per row in a choice menu.
const BUTTONS_PER_ROW: usize = 2;

pub struct MenuPresenter;

impl MenuPresenter {
    /// Show `message`, creating the menu message or editing it.
    pub async fn present(
        channel: &dyn Channel,
        menu: &mut MenuState,
        chat: &ChatId,
        message: OutgoingMessage,
    ) -> Result<(), ChannelError> {
        match &menu.message {
            Some(target) => channel.edit(target, message).await,
            None => {
                let sent = channel.send(chat, message).await?;
                menu.message = Some(sent);
                Ok(())
            }
        }
    }

    /// Option buttons, two per row, with a cancel row last.
    pub fn choice_menu(
        instance_id: Uuid,
        step: usize,
        prompt: &str,
        options: &[ChoiceOption],
    ) -> OutgoingMessage {
        let buttons: Vec<Button> = options
            .iter()
            .enumerate()
            .map(|(i, option)| {
                let data = CallbackData::new(instance_id, StepRef::Param(step), i as i64);
                Button::new(option.name.clone(), data.encode())
            })
            .collect();

        let mut rows: Vec<Vec<Button>> = buttons
            .chunks(BUTTONS_PER_ROW)
            .map(<[Button]>::to_vec)
            .collect();
        rows.push(vec![Self::cancel_button(instance_id, step)]);

        OutgoingMessage::html(escape_html(prompt)).with_buttons(rows)
    }

    /// A question with a cancel button.
    pub fn question(instance_id: Uuid, step: usize, prompt: &str) -> OutgoingMessage {
        OutgoingMessage::html(escape_html(prompt))
            .with_buttons(vec![vec![Self::cancel_button(instance_id, step)]])
    }

    fn cancel_button(instance_id: Uuid, step: usize) -> Button {
        let data = CallbackData::new(instance_id, StepRef::Param(step), CANCEL_OPTION);
        Button::new("❌ Cancel Request", data.encode())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::channels::Markup;
    use crate::testing::RecordingChannel;

    fn options(labels: &[&str]) -> Vec<ChoiceOption> {
        labels
            .iter()
            .map(|l| ChoiceOption {
                name: l.to_string(),
                value: json!(l),
            })
            .collect()
    }

    #[test]
    fn test_choice_menu_layout() {
        let id = Uuid::new_v4();
        let menu = MenuPresenter::choice_menu(id, 2, "Pick <env>", &options(&["a", "b", "c"]));

        assert_eq!(menu.text, "Pick &lt;env&gt;");
        let Some(Markup::Inline(rows)) = &menu.markup else {
            panic!("expected inline keyboard");
        };
        let shape: Vec<usize> = rows.iter().map(Vec::len).collect();
        assert_eq!(shape, vec![2, 1, 1]);
        assert_eq!(rows[0][1].data, format!("{id},2,1"));
        assert_eq!(rows[2][0].text, "❌ Cancel Request");
        assert_eq!(rows[2][0].data, format!("{id},2,-1"));
    }

    #[test]
    fn test_cancel_index_distinct_from_options() {
        let id = Uuid::new_v4();
        let menu = MenuPresenter::choice_menu(id, 0, "?", &options(&["x", "y"]));
        let indexes: Vec<i64> = menu
            .buttons()
            .iter()
            .map(|b| CallbackData::parse(&b.data).unwrap().option)
            .collect();
        assert_eq!(indexes, vec![0, 1, -1]);
    }

    #[tokio::test]
    async fn test_present_sends_then_edits() {
        let channel = RecordingChannel::new();
        let chat = ChatId::new("c1");
        let mut menu = MenuState::default();

        MenuPresenter::present(&channel, &mut menu, &chat, OutgoingMessage::html("one"))
            .await
            .unwrap();
        assert!(menu.created());
        MenuPresenter::present(&channel, &mut menu, &chat, OutgoingMessage::html("two"))
            .await
            .unwrap();

        assert_eq!(channel.sent().await.len(), 1);
        let edits = channel.edits().await;
        assert_eq!(edits.len(), 1);
        assert_eq!(Some(&edits[0].0), menu.message.as_ref());
        assert_eq!(edits[0].1.text, "two");
    }
}
