//! Event routing for the command engine.
//!
//! Every inbound event is handled by [`CommandEngine::handle_event`]. The
//! session lock is held while an instance's state changes and released
//! around option fetches and request execution, so slow HTTP calls never
//! block other events for the same conversation. After a fetch the instance
//! is looked up again and the result is dropped if the instance is gone or
//! its cursor moved.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::channels::{Channel, EventKind, IncomingEvent, OutgoingMessage};
use crate::config::{ChoiceOption, CommandCatalog, CommandDefinition};
use crate::engine::access::{AccessPolicy, denied_message, policy_for};
use crate::engine::confirm::ConfirmationGate;
use crate::engine::executor::{ExecutionOutcome, RequestExecutor};
use crate::engine::menu::MenuPresenter;
use crate::engine::options::OptionProvider;
use crate::engine::render::{aborted_message, escape_html};
use crate::engine::resolver::{NextStep, ParameterResolver};
use crate::engine::session::{CommandInstance, InstanceState, Session, SessionKey};
use crate::engine::session_store::SessionStore;
use crate::engine::submission::{CallbackData, StepRef, Submission, SubmissionParser};
use crate::error::{CommandError, Error};
use crate::requests::RequestRunner;

/// Drives command instances from inbound events.
pub struct CommandEngine {
    catalog: Arc<CommandCatalog>,
    channel: Arc<dyn Channel>,
    sessions: Arc<SessionStore>,
    options: OptionProvider,
    executor: RequestExecutor,
    access: Box<dyn AccessPolicy>,
}

impl CommandEngine {
    pub fn new(
        catalog: Arc<CommandCatalog>,
        channel: Arc<dyn Channel>,
        runner: Arc<dyn RequestRunner>,
    ) -> Self {
        let executor = RequestExecutor::new(
            Arc::clone(&runner),
            Arc::clone(&channel),
            catalog.channels.clone(),
        );
        Self {
            access: policy_for(catalog.access.as_deref()),
            options: OptionProvider::new(runner),
            sessions: Arc::new(SessionStore::new()),
            catalog,
            channel,
            executor,
        }
    }

    /// Replace the access policy derived from the catalog.
    pub fn with_access(mut self, access: Box<dyn AccessPolicy>) -> Self {
        self.access = access;
        self
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one inbound event.
    pub async fn handle_event(&self, event: IncomingEvent) -> Result<(), Error> {
        match &event.kind {
            EventKind::ChannelPost { text } => self.on_channel_post(&event, text).await,
            EventKind::Unsupported(kind) => {
                tracing::debug!(channel = %event.channel, kind = %kind, "Ignoring unsupported update");
                Ok(())
            }
            EventKind::Message { .. } | EventKind::Callback { .. }
                if !self.access.allows(&event.user) =>
            {
                tracing::info!(user = %event.user.id, chat = %event.chat.id, "Rejected user outside the access list");
                self.channel
                    .send(&event.chat.id, denied_message(&event.user))
                    .await?;
                Ok(())
            }
            EventKind::Message { text } => self.on_message(&event, text).await,
            EventKind::Callback { id, data } => self.on_callback(&event, id, data).await,
        }
    }

    async fn on_message(&self, event: &IncomingEvent, text: &str) -> Result<(), Error> {
        let invocation = match SubmissionParser::parse(text) {
            Submission::Command(invocation) => invocation,
            Submission::Text(text) => return self.on_text(event, &text).await,
        };
        if !invocation.addressed_to(self.catalog.bot_name.as_deref()) {
            tracing::debug!(command = %invocation.name, bot = ?invocation.bot, "Command addressed to another bot");
            return self.on_text(event, text).await;
        }

        match invocation.name.as_str() {
            "help" => {
                let message = OutgoingMessage::plain(self.catalog.help_text())
                    .with_keyboard(self.keyboard());
                self.channel.send(&event.chat.id, message).await?;
                Ok(())
            }
            "start" => {
                let message = OutgoingMessage::plain(self.catalog.start_text())
                    .with_keyboard(self.keyboard());
                self.channel.send(&event.chat.id, message).await?;
                Ok(())
            }
            // Only a command in channel posts
            "id" => self.on_text(event, text).await,
            name => match self.catalog.get(name) {
                Some(definition) => {
                    self.start_command(event, definition.clone(), &invocation.args)
                        .await
                }
                None => {
                    let e = CommandError::Unknown(name.to_string());
                    tracing::debug!(chat = %event.chat.id, "{}", e);
                    // A pending question takes slash text as its answer
                    self.on_text(event, text).await
                }
            },
        }
    }

    fn keyboard(&self) -> Vec<Vec<String>> {
        self.catalog
            .keyboard()
            .into_iter()
            .map(|key| vec![key])
            .collect()
    }

    /// Supersede whatever is active in the session and start `definition`.
    async fn start_command(
        &self,
        event: &IncomingEvent,
        definition: CommandDefinition,
        args: &[String],
    ) -> Result<(), Error> {
        let key = SessionKey::from_event(event);
        let (session, mut sess) = self.sessions.lock_or_create(&key).await;
        let mut instance = CommandInstance::new(
            key,
            definition,
            self.catalog.defaults.clone(),
            event.user.clone(),
        );

        if let Some(previous) = sess.take_active() {
            self.cancel(previous, "another command was run").await;
        }

        if let Err(e) = ParameterResolver::bind_inline(&mut instance, args) {
            drop(sess);
            tracing::debug!(command = %instance.command(), error = %e, "Rejected command invocation");
            let usage = ParameterResolver::usage_message(&instance.definition);
            self.channel.send(instance.chat(), usage).await?;
            return Ok(());
        }

        let id = instance.id;
        tracing::info!(
            command = %instance.command(),
            instance = %id,
            chat = %instance.chat(),
            user = %event.user.id,
            "Command requested"
        );
        sess.replace(instance);
        drop(sess);

        self.advance(&session, id).await
    }

    async fn on_callback(
        &self,
        event: &IncomingEvent,
        callback_id: &str,
        data: &str,
    ) -> Result<(), Error> {
        if let Err(e) = self.channel.answer_callback(callback_id).await {
            tracing::debug!(error = %e, "Failed to acknowledge callback");
        }

        let payload = match CallbackData::parse(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed callback");
                return Ok(());
            }
        };
        let id = payload.instance_id;

        let key = SessionKey::from_event(event);
        let Some(session) = self.sessions.get(&key).await else {
            tracing::debug!(session = %key, instance = %id, "Callback for unknown session");
            return Ok(());
        };

        let mut sess = session.lock().await;
        let Some(instance) = sess.instance_mut(id) else {
            tracing::debug!(session = %key, "{}", CommandError::NotActive { id });
            return Ok(());
        };
        instance.touch();

        if payload.is_cancel() {
            if let Some(instance) = sess.take_instance(id) {
                drop(sess);
                self.cancel(instance, "cancel was pressed").await;
            }
            return Ok(());
        }

        let result = match payload.step {
            StepRef::Confirm => ConfirmationGate::accept(instance),
            StepRef::Param(step) => ParameterResolver::select_option(instance, step, payload.option),
        };
        drop(sess);

        match result {
            Ok(()) => self.advance(&session, id).await,
            Err(e) => {
                tracing::debug!(instance = %id, error = %e, "Ignoring stale callback");
                Ok(())
            }
        }
    }

    async fn on_text(&self, event: &IncomingEvent, text: &str) -> Result<(), Error> {
        let key = SessionKey::from_event(event);
        let Some(session) = self.sessions.get(&key).await else {
            return Ok(());
        };

        let mut sess = session.lock().await;
        let Some(awaiting) = sess.awaiting else {
            tracing::debug!(session = %key, "Ignoring free text, no question pending");
            return Ok(());
        };
        let Some(instance) = sess.instance_mut(awaiting.instance_id) else {
            sess.awaiting = None;
            return Ok(());
        };
        instance.touch();

        let result = ParameterResolver::answer_question(instance, awaiting.step, text);
        if result.is_ok() {
            sess.awaiting = None;
        }
        drop(sess);

        match result {
            Ok(()) => self.advance(&session, awaiting.instance_id).await,
            Err(e) => {
                tracing::debug!(instance = %awaiting.instance_id, error = %e, "Ignoring answer");
                Ok(())
            }
        }
    }

    /// Run the next step of instance `id`, suspending at the first step that
    /// needs user input.
    async fn advance(&self, session: &Arc<Mutex<Session>>, id: Uuid) -> Result<(), Error> {
        let mut sess = session.lock().await;
        let Some(instance) = sess.instance_mut(id) else {
            return Ok(());
        };

        match ParameterResolver::next_step(instance) {
            NextStep::Choice {
                step,
                name,
                prompt,
                source,
            } => {
                let options = match OptionProvider::literal(&source) {
                    Some(options) => options,
                    None => {
                        let ctx = instance.substitution_context();
                        drop(sess);
                        let fetched = self.options.resolve(&source, &ctx).await;
                        sess = session.lock().await;

                        let current = sess
                            .instance(id)
                            .is_some_and(|i| i.step_cursor() == step && i.state == InstanceState::Resolving);
                        if !current {
                            tracing::debug!(instance = %id, step, "Discarding options for a superseded step");
                            return Ok(());
                        }
                        match fetched {
                            Ok(options) => options,
                            Err(e) => {
                                let e = CommandError::OptionsUnavailable {
                                    parameter: name.clone(),
                                    reason: e.to_string(),
                                };
                                tracing::warn!(instance = %id, error = %e, "Option fetch failed");
                                if let Some(instance) = sess.take_instance(id) {
                                    drop(sess);
                                    self.cancel(instance, &format!("error requesting the \"{name}\" options"))
                                        .await;
                                }
                                return Ok(());
                            }
                        }
                    }
                };
                self.present_choice(&mut sess, id, step, &prompt, options).await
            }
            NextStep::Question { step, prompt } => {
                instance.state = InstanceState::AwaitingAnswer { step };
                let chat = instance.chat().clone();
                let message = MenuPresenter::question(id, step, &prompt);
                let shown =
                    MenuPresenter::present(self.channel.as_ref(), &mut instance.menu, &chat, message)
                        .await;
                if let Err(e) = shown {
                    sess.take_instance(id);
                    return Err(e.into());
                }
                sess.await_answer(id, step);
                Ok(())
            }
            NextStep::Confirm => {
                instance.state = InstanceState::AwaitingConfirmation;
                let chat = instance.chat().clone();
                let message = ConfirmationGate::prompt(instance);
                let shown =
                    MenuPresenter::present(self.channel.as_ref(), &mut instance.menu, &chat, message)
                        .await;
                if let Err(e) = shown {
                    sess.take_instance(id);
                    return Err(e.into());
                }
                Ok(())
            }
            NextStep::Execute => {
                let Some(instance) = sess.take_instance(id) else {
                    return Ok(());
                };
                drop(sess);

                let command = instance.command().to_string();
                match self.executor.run(instance).await {
                    ExecutionOutcome::Completed { status } => {
                        tracing::info!(command = %command, instance = %id, status, "Command completed");
                    }
                    ExecutionOutcome::NoRequest => {
                        tracing::info!(command = %command, instance = %id, "Command completed without a request");
                    }
                    ExecutionOutcome::Failed { reason } => {
                        tracing::warn!(command = %command, instance = %id, reason = %reason, "Command failed");
                    }
                }
                Ok(())
            }
        }
    }

    async fn present_choice(
        &self,
        sess: &mut Session,
        id: Uuid,
        step: usize,
        prompt: &str,
        options: Vec<ChoiceOption>,
    ) -> Result<(), Error> {
        if options.is_empty() {
            if let Some(instance) = sess.take_instance(id) {
                self.cancel(instance, "empty options").await;
            }
            return Ok(());
        }
        let Some(instance) = sess.instance_mut(id) else {
            return Ok(());
        };

        let message = MenuPresenter::choice_menu(id, step, prompt, &options);
        ParameterResolver::record_options(instance, step, options);
        let chat = instance.chat().clone();
        let shown =
            MenuPresenter::present(self.channel.as_ref(), &mut instance.menu, &chat, message).await;
        if let Err(e) = shown {
            sess.take_instance(id);
            return Err(e.into());
        }
        Ok(())
    }

    /// Dispose of an instance, telling the user why.
    async fn cancel(&self, mut instance: CommandInstance, reason: &str) {
        tracing::info!(
            command = %instance.command(),
            instance = %instance.id,
            reason,
            "Command cancelled"
        );
        let chat = instance.chat().clone();
        let message = aborted_message(instance.command(), reason);
        if let Err(e) =
            MenuPresenter::present(self.channel.as_ref(), &mut instance.menu, &chat, message).await
        {
            tracing::warn!(instance = %instance.id, error = %e, "Failed to show cancellation");
        }
    }

    /// Answer `/id` posted in a broadcast channel.
    async fn on_channel_post(&self, event: &IncomingEvent, text: &str) -> Result<(), Error> {
        let Submission::Command(invocation) = SubmissionParser::parse(text) else {
            return Ok(());
        };
        if invocation.name != "id" || !invocation.addressed_to(self.catalog.bot_name.as_deref()) {
            return Ok(());
        }

        let chat = &event.chat;
        let mut text = format!(
            "<i>{}</i> channel info:\n<b>id:</b> {}\n<b>type:</b> {}",
            escape_html(chat.title.as_deref().unwrap_or_default()),
            escape_html(chat.id.as_str()),
            if chat.username.is_some() { "public" } else { "private" }
        );
        if let Some(username) = &chat.username {
            text.push_str(&format!("\n<b>name:</b> @{}", escape_html(username)));
        }
        self.channel
            .send(&chat.id, OutgoingMessage::html(text))
            .await?;
        Ok(())
    }

    /// Cancel instances idle for longer than `max_idle`. Returns how many
    /// were cancelled.
    pub async fn prune_idle(&self, max_idle: Duration) -> usize {
        let expired = self.sessions.prune_idle(max_idle).await;
        let count = expired.len();
        for instance in expired {
            self.cancel(instance, "timed out").await;
        }
        count
    }

    /// Prune idle instances every `max_idle / 2` (at least once a second).
    pub fn spawn_idle_pruner(self: &Arc<Self>, max_idle: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = (max_idle / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                engine.prune_idle(max_idle).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::channels::{ChatInfo, Markup};
    use crate::config::{ContentField, ContentSpec, OptionsSource, ParameterSpec};
    use crate::engine::access::{AllowAll, AllowList};
    use crate::requests::{HttpResponse, RequestTemplate};
    use crate::testing::{RecordingChannel, StubRunner};

    fn catalog() -> CommandCatalog {
        CommandCatalog::new(vec![
            CommandDefinition::new("echo", "Echo text")
                .with_parameter(ParameterSpec::inline("text", "Text to echo")),
            CommandDefinition::new("env", "Pick env").with_parameter(ParameterSpec::choice(
                "env",
                "Which env?",
                OptionsSource::Static(vec![json!("staging"), json!("prod")]),
            )),
            CommandDefinition::new("ask", "Ask").with_parameter(ParameterSpec::question("why", "Why?")),
            CommandDefinition::new("empty", "").with_parameter(ParameterSpec::choice(
                "x",
                "",
                OptionsSource::Static(Vec::new()),
            )),
            CommandDefinition::new("ping", "")
                .with_request(RequestTemplate::get("https://api/ping"))
                .with_response(ContentSpec::new(vec![ContentField::HttpCode])),
        ])
        .unwrap()
    }

    fn engine(catalog: CommandCatalog) -> (CommandEngine, Arc<RecordingChannel>, Arc<StubRunner>) {
        let channel = Arc::new(RecordingChannel::new());
        let runner = Arc::new(StubRunner::new().with_response("https://api/ping", HttpResponse::new(200)));
        let engine = CommandEngine::new(Arc::new(catalog), channel.clone(), runner.clone())
            .with_access(Box::new(AllowAll));
        (engine, channel, runner)
    }

    fn msg(text: &str) -> IncomingEvent {
        IncomingEvent::message("test", "u1", "c1", text)
    }

    async fn active(engine: &CommandEngine) -> Option<CommandInstance> {
        let session = engine
            .sessions()
            .get(&SessionKey::new("u1", "c1".into()))
            .await?;
        let sess = session.lock().await;
        sess.active.clone()
    }

    #[tokio::test]
    async fn test_help_lists_commands_with_keyboard() {
        let (engine, channel, _) = engine(catalog());
        engine.handle_event(msg("/help")).await.unwrap();

        let sent = channel.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.text.starts_with("Commands:\n/echo Echo text\n"));
        assert!(sent[0].1.text.ends_with("/help Show this help message.\n"));
        let Some(Markup::Keyboard(rows)) = &sent[0].1.markup else {
            panic!("expected reply keyboard");
        };
        assert_eq!(rows[0], vec!["/help"]);
        assert_eq!(rows[1], vec!["/echo"]);
    }

    #[tokio::test]
    async fn test_unknown_and_foreign_commands_ignored() {
        let mut catalog = catalog();
        catalog.bot_name = Some("opsbot".to_string());
        let (engine, channel, _) = engine(catalog);

        engine.handle_event(msg("/nope")).await.unwrap();
        engine.handle_event(msg("/ping@otherbot")).await.unwrap();
        assert!(channel.log().await.is_empty());

        engine.handle_event(msg("/ping@opsbot")).await.unwrap();
        assert_eq!(channel.last_text("c1").await.unwrap(), "✅ /ping done.\n");
    }

    #[tokio::test]
    async fn test_usage_error_keeps_no_instance() {
        let (engine, channel, _) = engine(catalog());
        engine.handle_event(msg("/echo")).await.unwrap();

        assert!(
            channel
                .last_text("c1")
                .await
                .unwrap()
                .starts_with("/echo requires <b>1</b> positional argument:")
        );
        assert!(active(&engine).await.is_none());
    }

    #[tokio::test]
    async fn test_choice_selection_executes() {
        let (engine, channel, _) = engine(catalog());
        engine.handle_event(msg("/env")).await.unwrap();

        let inst = active(&engine).await.unwrap();
        assert_eq!(inst.state, InstanceState::AwaitingChoice { step: 0 });
        let data = CallbackData::new(inst.id, StepRef::Param(0), 1).encode();
        engine
            .handle_event(IncomingEvent::callback("test", "u1", "c1", &data))
            .await
            .unwrap();

        assert!(active(&engine).await.is_none());
        assert_eq!(channel.sent().await.len(), 1);
        assert_eq!(channel.last_text("c1").await.unwrap(), "✅ /env done.\n🏷 env: prod\n");
    }

    #[tokio::test]
    async fn test_stale_and_malformed_callbacks_ignored() {
        let (engine, channel, _) = engine(catalog());
        engine.handle_event(msg("/env")).await.unwrap();
        let inst = active(&engine).await.unwrap();

        for data in [
            "garbage".to_string(),
            CallbackData::new(inst.id, StepRef::Param(3), 0).encode(),
            CallbackData::new(Uuid::new_v4(), StepRef::Param(0), 0).encode(),
        ] {
            engine
                .handle_event(IncomingEvent::callback("test", "u1", "c1", &data))
                .await
                .unwrap();
        }
        // Another user pressing the button has no session
        let data = CallbackData::new(inst.id, StepRef::Param(0), 0).encode();
        engine
            .handle_event(IncomingEvent::callback("test", "u2", "c1", &data))
            .await
            .unwrap();

        assert_eq!(active(&engine).await.unwrap().id, inst.id);
        assert!(channel.edits().await.is_empty());
    }

    #[tokio::test]
    async fn test_question_takes_next_text() {
        let (engine, channel, _) = engine(catalog());
        engine.handle_event(msg("just chatting")).await.unwrap();
        engine.handle_event(msg("/ask")).await.unwrap();
        assert_eq!(channel.last_text("c1").await.unwrap(), "Why?");

        engine.handle_event(msg("because")).await.unwrap();
        assert_eq!(
            channel.last_text("c1").await.unwrap(),
            "✅ /ask done.\n🏷 why: because\n"
        );
    }

    #[tokio::test]
    async fn test_empty_options_cancel() {
        let (engine, channel, _) = engine(catalog());
        engine.handle_event(msg("/empty")).await.unwrap();
        assert_eq!(
            channel.last_text("c1").await.unwrap(),
            "❌ /empty aborted: empty options."
        );
        assert!(active(&engine).await.is_none());
    }

    #[tokio::test]
    async fn test_access_list_rejects_strangers() {
        let (engine, channel, runner) = engine(catalog());
        let engine = engine.with_access(Box::new(AllowList::new(["admin"])));

        engine.handle_event(msg("/ping")).await.unwrap();
        assert_eq!(runner.calls(), 0);
        assert!(
            channel
                .last_text("c1")
                .await
                .unwrap()
                .contains("<code>u1</code>")
        );
    }

    #[tokio::test]
    async fn test_catalog_without_access_list_denies_everyone() {
        let channel = Arc::new(RecordingChannel::new());
        let runner = Arc::new(StubRunner::new());
        let engine = CommandEngine::new(Arc::new(catalog()), channel.clone(), runner.clone());

        engine.handle_event(msg("/ping")).await.unwrap();
        assert_eq!(runner.calls(), 0);
        assert!(
            channel
                .last_text("c1")
                .await
                .unwrap()
                .starts_with("You are not allowed to run any request using this bot.")
        );
    }

    #[tokio::test]
    async fn test_catalog_wildcard_admits_everyone() {
        let mut catalog = catalog();
        catalog.access = Some(vec!["*".to_string()]);
        let channel = Arc::new(RecordingChannel::new());
        let runner = Arc::new(StubRunner::new().with_response("https://api/ping", HttpResponse::new(200)));
        let engine = CommandEngine::new(Arc::new(catalog), channel.clone(), runner.clone());

        engine.handle_event(msg("/ping")).await.unwrap();
        assert_eq!(runner.calls(), 1);
    }

    #[tokio::test]
    async fn test_id_in_channel_post() {
        let (engine, channel, _) = engine(catalog());
        let mut chat = ChatInfo::new("-1001");
        chat.title = Some("Ops feed".to_string());
        chat.username = Some("opsfeed".to_string());

        engine
            .handle_event(IncomingEvent::channel_post("test", chat, "/id"))
            .await
            .unwrap();

        assert_eq!(
            channel.last_text("-1001").await.unwrap(),
            "<i>Ops feed</i> channel info:\n<b>id:</b> -1001\n<b>type:</b> public\n<b>name:</b> @opsfeed"
        );
    }

    #[tokio::test]
    async fn test_prune_idle_cancels_with_timeout() {
        let (engine, channel, _) = engine(catalog());
        engine.handle_event(msg("/env")).await.unwrap();

        assert_eq!(engine.prune_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(engine.prune_idle(Duration::ZERO).await, 1);
        assert_eq!(
            channel.last_text("c1").await.unwrap(),
            "❌ /env aborted: timed out."
        );
        assert!(active(&engine).await.is_none());
    }
}
