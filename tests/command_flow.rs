//! End-to-end command flows through the engine with scripted channels.

use std::sync::Arc;

use serde_json::json;

use request_bot::channels::{IncomingEvent, MessageRef, OutgoingMessage};
use request_bot::config::CommandCatalog;
use request_bot::engine::{CommandEngine, SessionKey};
use request_bot::requests::HttpResponse;
use request_bot::testing::{RecordingChannel, StubRunner};

const CATALOG: &str = r#"{
    "channels": ["feed", "muted"],
    "access": ["*"],
    "defaults": {"api": "https://ci.local"},
    "requests": [
        {
            "command": "echo",
            "help": "Echo text back",
            "params": [{"type": "inline", "name": "text"}],
            "request": {"url": "{{api}}/echo/{{text}}"},
            "response": ["body"]
        },
        {
            "command": "deploy",
            "help": "Deploy a service",
            "params": [
                {"type": "inline", "name": "service"},
                {"type": "choice", "name": "env", "help": "Which env?", "options": ["staging", "prod"]},
                {"type": "question", "name": "reason", "prompt": "Why?"}
            ],
            "confirm": true,
            "request": {"method": "POST", "url": "{{api}}/deploy", "json": {"service": "{{service}}", "env": "{{env}}", "reason": "{{reason}}"}},
            "response": ["http_code"],
            "broadcast": ["username", "params"]
        },
        {
            "command": "rollback",
            "help": "Roll back a build",
            "params": [
                {"type": "choice", "name": "env", "options": ["staging", "prod"]},
                {"type": "choice", "name": "build", "options": {"url": "{{api}}/builds/{{env}}"}}
            ]
        },
        {
            "command": "note",
            "params": [{"type": "question", "name": "path", "prompt": "Which path?"}]
        },
        {
            "command": "builds",
            "params": [{"type": "choice", "name": "build", "options": {"url": "{{api}}/builds"}}]
        }
    ]
}"#;

struct Harness {
    engine: Arc<CommandEngine>,
    channel: Arc<RecordingChannel>,
    runner: Arc<StubRunner>,
}

impl Harness {
    fn new(runner: StubRunner) -> Self {
        Self::with_channel(runner, RecordingChannel::new())
    }

    fn with_channel(runner: StubRunner, channel: RecordingChannel) -> Self {
        let catalog = Arc::new(CommandCatalog::from_json(CATALOG).unwrap());
        let channel = Arc::new(channel);
        let runner = Arc::new(runner);
        let engine = Arc::new(CommandEngine::new(catalog, channel.clone(), runner.clone()));
        Self {
            engine,
            channel,
            runner,
        }
    }

    async fn say(&self, text: &str) {
        self.engine
            .handle_event(IncomingEvent::message("test", "u1", "c1", text))
            .await
            .unwrap();
    }

    /// Press the button labelled `label` on the newest message showing it.
    async fn press(&self, label: &str) {
        let data = self
            .button_data(label)
            .await
            .unwrap_or_else(|| panic!("no button labelled {label}"));
        self.engine
            .handle_event(IncomingEvent::callback("test", "u1", "c1", &data))
            .await
            .unwrap();
    }

    async fn button_data(&self, label: &str) -> Option<String> {
        for (message_ref, _) in self.channel.sent().await.into_iter().rev() {
            let Some(current) = self.channel.current(&message_ref).await else {
                continue;
            };
            if let Some(button) = current.buttons().into_iter().find(|b| b.text == label) {
                return Some(button.data.clone());
            }
        }
        None
    }

    async fn menus(&self) -> Vec<(MessageRef, OutgoingMessage)> {
        self.channel.sent().await
    }

    async fn view_names(&self) -> Vec<String> {
        let Some(session) = self
            .engine
            .sessions()
            .get(&SessionKey::new("u1", "c1".into()))
            .await
        else {
            return Vec::new();
        };
        let sess = session.lock().await;
        sess.active
            .as_ref()
            .map(|i| i.view.entries().iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }

    async fn active_command(&self) -> Option<String> {
        let session = self
            .engine
            .sessions()
            .get(&SessionKey::new("u1", "c1".into()))
            .await?;
        let sess = session.lock().await;
        sess.active.as_ref().map(|i| i.command().to_string())
    }
}

#[tokio::test]
async fn test_inline_command_runs_and_replies() {
    let h = Harness::new(
        StubRunner::new().with_response("https://ci.local/echo/hello", HttpResponse::new(200).with_body("hello")),
    );

    h.say("/echo hello world").await;

    assert_eq!(h.runner.calls(), 1);
    let texts = h.channel.texts_for("c1").await;
    assert!(texts.contains(&"📦 Response:\nhello\n".to_string()));
    assert_eq!(
        h.channel.last_text("c1").await.unwrap(),
        "✅ /echo done.\n🏷 text: hello\n"
    );
    assert!(h.active_command().await.is_none());
}

#[tokio::test]
async fn test_full_deploy_with_confirmation_and_broadcast() {
    let h = Harness::with_channel(
        StubRunner::new().with_response("https://ci.local/deploy", HttpResponse::new(201)),
        RecordingChannel::new().failing_for("muted"),
    );

    h.say("/deploy api").await;
    h.press("prod").await;
    assert_eq!(h.channel.last_text("c1").await.unwrap(), "Why?");

    h.say("hotfix").await;
    assert_eq!(
        h.channel.last_text("c1").await.unwrap(),
        "Confirm /deploy\n🏷 service: api\n🏷 env: prod\n🏷 reason: hotfix\n"
    );
    assert_eq!(h.runner.calls(), 0);

    h.press("✅ Ok").await;

    let requests = h.runner.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].json_body(),
        Some(&json!({"service": "api", "env": "prod", "reason": "hotfix"}))
    );

    // Every step lived on one evolving message
    let menus = h.menus().await;
    let menu = &menus[0].0;
    assert_eq!(
        h.channel.current(menu).await.unwrap().text,
        "✅ /deploy done.\n🏷 service: api\n🏷 env: prod\n🏷 reason: hotfix\n"
    );

    let feed = h.channel.texts_for("feed").await;
    assert_eq!(feed.len(), 1);
    assert!(feed[0].starts_with("📢 <b>/deploy</b> was called by <b>u1</b>.\n🏷 service: api\n"));
    assert!(h.channel.texts_for("muted").await.is_empty());
    assert!(h.active_command().await.is_none());
}

#[tokio::test]
async fn test_cancel_at_confirmation_skips_request() {
    let h = Harness::new(StubRunner::new());

    h.say("/deploy api").await;
    h.press("staging").await;
    h.say("testing").await;
    h.press("❌ Cancel").await;

    assert_eq!(h.runner.calls(), 0);
    assert_eq!(
        h.channel.last_text("c1").await.unwrap(),
        "❌ /deploy aborted: cancel was pressed."
    );
    assert!(h.active_command().await.is_none());
}

#[tokio::test]
async fn test_option_fetch_error_cancels_on_existing_menu() {
    let h = Harness::new(StubRunner::failing());

    h.say("/rollback").await;
    h.press("prod").await;

    let menus = h.menus().await;
    assert_eq!(menus.len(), 1);
    assert_eq!(
        h.channel.current(&menus[0].0).await.unwrap().text,
        "❌ /rollback aborted: error requesting the \"build\" options."
    );
    assert_eq!(h.runner.requests()[0].url, "https://ci.local/builds/prod");
    assert!(h.active_command().await.is_none());
}

#[tokio::test]
async fn test_fetched_options_become_buttons() {
    let h = Harness::new(StubRunner::new().with_response(
        "https://ci.local/builds/staging",
        HttpResponse::new(200).with_json(&json!(["b-41", "b-42"])),
    ));

    h.say("/rollback").await;
    h.press("staging").await;
    h.press("b-42").await;

    assert_eq!(
        h.channel.last_text("c1").await.unwrap(),
        "✅ /rollback done.\n🏷 env: staging\n🏷 build: b-42\n"
    );
}

#[tokio::test]
async fn test_new_command_supersedes_pending_one() {
    let h = Harness::new(StubRunner::new());

    h.say("/rollback").await;
    let first = h.menus().await[0].0.clone();
    let stale = h.button_data("prod").await.unwrap();

    h.say("/deploy api").await;

    assert_eq!(
        h.channel.current(&first).await.unwrap().text,
        "❌ /rollback aborted: another command was run."
    );
    assert_eq!(h.active_command().await.as_deref(), Some("deploy"));

    // A button from the superseded menu does nothing
    h.engine
        .handle_event(IncomingEvent::callback("test", "u1", "c1", &stale))
        .await
        .unwrap();
    assert_eq!(h.runner.calls(), 0);
    assert_eq!(h.active_command().await.as_deref(), Some("deploy"));
}

#[tokio::test]
async fn test_in_flight_options_discarded_after_supersede() {
    let h = Harness::new(
        StubRunner::new()
            .with_response(
                "https://ci.local/builds",
                HttpResponse::new(200).with_json(&json!(["b-1"])),
            )
            .gated(),
    );

    let engine = Arc::clone(&h.engine);
    let pending = tokio::spawn(async move {
        engine
            .handle_event(IncomingEvent::message("test", "u1", "c1", "/builds"))
            .await
    });
    h.runner.wait_for_calls(1).await;

    h.say("/rollback").await;
    h.runner.release(1);
    pending.await.unwrap().unwrap();

    assert_eq!(h.active_command().await.as_deref(), Some("rollback"));
    assert!(h.button_data("b-1").await.is_none());
    assert!(h.button_data("prod").await.is_some());
}

#[tokio::test]
async fn test_sessions_are_per_user() {
    let h = Harness::new(StubRunner::new());

    h.say("/rollback").await;
    h.engine
        .handle_event(IncomingEvent::message("test", "u2", "c1", "/deploy api"))
        .await
        .unwrap();

    assert_eq!(h.active_command().await.as_deref(), Some("rollback"));
    assert_eq!(h.menus().await.len(), 2);
}

#[tokio::test]
async fn test_slash_text_answers_pending_question() {
    let h = Harness::new(StubRunner::new());

    h.say("/note").await;
    assert_eq!(h.channel.last_text("c1").await.unwrap(), "Which path?");

    h.say("/var/log/app").await;

    assert!(h.active_command().await.is_none());
    assert_eq!(
        h.channel.last_text("c1").await.unwrap(),
        "✅ /note done.\n🏷 path: /var/log/app\n"
    );
}

#[tokio::test]
async fn test_cancel_from_choice_menu() {
    let h = Harness::new(StubRunner::new());

    h.say("/rollback").await;
    h.press("❌ Cancel Request").await;

    let menus = h.menus().await;
    assert_eq!(menus.len(), 1);
    assert_eq!(
        h.channel.current(&menus[0].0).await.unwrap().text,
        "❌ /rollback aborted: cancel was pressed."
    );
    assert_eq!(h.runner.calls(), 0);
    assert!(h.active_command().await.is_none());
}

#[tokio::test]
async fn test_cancel_from_question_prompt() {
    let h = Harness::new(StubRunner::new());

    h.say("/deploy api").await;
    h.press("prod").await;
    h.press("❌ Cancel Request").await;

    let menus = h.menus().await;
    assert_eq!(menus.len(), 1);
    assert_eq!(
        h.channel.current(&menus[0].0).await.unwrap().text,
        "❌ /deploy aborted: cancel was pressed."
    );
    assert_eq!(h.runner.calls(), 0);
    assert!(h.active_command().await.is_none());

    // The question no longer takes free text
    h.say("too late").await;
    assert_eq!(h.runner.calls(), 0);
    assert_eq!(
        h.channel.last_text("c1").await.unwrap(),
        "❌ /deploy aborted: cancel was pressed."
    );
}

#[tokio::test]
async fn test_view_grows_one_entry_per_step() {
    let h = Harness::new(StubRunner::new());

    h.say("/deploy api").await;
    assert_eq!(h.view_names().await, vec!["service"]);

    h.press("prod").await;
    assert_eq!(h.view_names().await, vec!["service", "env"]);

    h.say("hotfix").await;
    assert_eq!(h.view_names().await, vec!["service", "env", "reason"]);
    assert_eq!(h.active_command().await.as_deref(), Some("deploy"));
}
