//! Interactive REPL channel with line editing.
//!
//! Drives the engine from a terminal as a single user in a single chat.
//! Uses rustyline for line editing, history, and tab-completion of the
//! catalog's commands. Menus are printed with numbered buttons; typing `#N`
//! presses button N of the most recent menu.
//!
//! ## Local commands
//!
//! - `?` - Show REPL help
//! - `#N` - Press button N of the latest menu
//! - `/quit` or `/exit` - Exit the REPL

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustyline::completion::Completer;
use rustyline::config::Config;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Editor, Helper};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::bootstrap::bot_home;
use crate::channels::{
    Button, Channel, ChatId, EventStream, ImageSource, IncomingEvent, Markup, MessageRef,
    OutgoingMessage, TextFormat, UserInfo,
};
use crate::error::ChannelError;

/// Chat id of the terminal conversation.
pub const REPL_CHAT: &str = "repl";

/// User id of the person at the terminal.
pub const REPL_USER: &str = "local";

/// Separator width in the terminal.
const SEPARATOR_WIDTH: usize = 60;

/// Rustyline helper for command tab completion.
struct ReplHelper {
    commands: Vec<String>,
}

impl Completer for ReplHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if !line.starts_with('/') {
            return Ok((0, vec![]));
        }

        let prefix = &line[..pos];
        let matches: Vec<String> = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .cloned()
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if !line.starts_with('/') || pos < line.len() {
            return None;
        }

        self.commands
            .iter()
            .find(|cmd| cmd.starts_with(line) && cmd.as_str() != line)
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Highlighter for ReplHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[90m{hint}\x1b[0m"))
    }
}

impl Validator for ReplHelper {}
impl Helper for ReplHelper {}

/// Render HTML-formatted message text with ANSI styles.
fn render_terminal(message: &OutgoingMessage) -> String {
    if message.format == TextFormat::Plain {
        return message.text.clone();
    }
    [
        ("<b>", "\x1b[1m"),
        ("</b>", "\x1b[0m"),
        ("<i>", "\x1b[3m"),
        ("</i>", "\x1b[0m"),
        ("<code>", "\x1b[32m"),
        ("</code>", "\x1b[0m"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&amp;", "&"),
    ]
    .iter()
    .fold(message.text.clone(), |text, (from, to)| text.replace(from, to))
}

/// `#N` → button index N-1.
fn parse_button_press(line: &str) -> Option<usize> {
    line.strip_prefix('#')?
        .trim()
        .parse::<usize>()
        .ok()?
        .checked_sub(1)
}

fn print_help() {
    let h = "\x1b[1m"; // bold (section headers)
    let c = "\x1b[1;36m"; // bold cyan (commands)
    let d = "\x1b[90m"; // dim gray (descriptions)
    let r = "\x1b[0m"; // reset

    println!();
    println!("  {h}Request Bot REPL{r}");
    println!();
    println!("  {c}/help{r}              {d}list the bot's commands{r}");
    println!("  {c}#N{r}                 {d}press button N of the latest menu{r}");
    println!("  {c}?{r}                  {d}show this help{r}");
    println!("  {c}/quit{r} {c}/exit{r}        {d}exit the repl{r}");
    println!();
    println!("  {d}Any other text answers the pending question, if there is one.{r}");
    println!();
}

fn history_path() -> std::path::PathBuf {
    bot_home().join("history")
}

/// REPL channel.
pub struct ReplChannel {
    /// Completion candidates: the bot's commands.
    commands: Vec<String>,
    /// Buttons of the most recent menu, shared with the input thread.
    latest_buttons: Arc<Mutex<Vec<Button>>>,
    next_message_id: AtomicU64,
}

impl ReplChannel {
    /// Create a REPL that completes `commands` (e.g. `/deploy`).
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            commands,
            latest_buttons: Arc::new(Mutex::new(Vec::new())),
            next_message_id: AtomicU64::new(1),
        }
    }

    fn next_ref(&self, chat: &ChatId) -> MessageRef {
        MessageRef {
            chat: chat.clone(),
            message_id: self
                .next_message_id
                .fetch_add(1, Ordering::Relaxed)
                .to_string(),
        }
    }

    fn print(&self, header: &str, message: &OutgoingMessage) {
        eprintln!("\x1b[90m{}\x1b[0m", "\u{2500}".repeat(SEPARATOR_WIDTH));
        if !header.is_empty() {
            eprintln!("\x1b[90m{header}\x1b[0m");
        }
        println!("{}", render_terminal(message));

        match &message.markup {
            Some(Markup::Inline(_)) => {
                let buttons: Vec<Button> = message.buttons().into_iter().cloned().collect();
                for (i, button) in buttons.iter().enumerate() {
                    println!("  \x1b[1;36m#{}\x1b[0m {}", i + 1, button.text);
                }
                if let Ok(mut latest) = self.latest_buttons.lock() {
                    *latest = buttons;
                }
            }
            Some(Markup::Keyboard(rows)) => {
                let keys: Vec<&str> = rows.iter().flatten().map(String::as_str).collect();
                println!("  \x1b[90mkeys: {}\x1b[0m", keys.join("  "));
            }
            None => {}
        }
        println!();
    }
}

fn local_user() -> UserInfo {
    UserInfo::new(REPL_USER).with_name("You", None)
}

#[async_trait]
impl Channel for ReplChannel {
    fn name(&self) -> &str {
        "repl"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let mut completions = self.commands.clone();
        completions.extend(["/help".to_string(), "/start".to_string(), "/quit".to_string()]);
        let latest_buttons = Arc::clone(&self.latest_buttons);

        let config = Config::builder()
            .history_ignore_dups(true)
            .map_err(|e| ChannelError::StartupFailed {
                name: "repl".to_string(),
                reason: e.to_string(),
            })?
            .auto_add_history(true)
            .completion_type(CompletionType::List)
            .build();

        std::thread::spawn(move || {
            let mut rl = match Editor::with_config(config) {
                Ok(editor) => editor,
                Err(e) => {
                    eprintln!("Failed to initialize line editor: {e}");
                    return;
                }
            };

            rl.set_helper(Some(ReplHelper {
                commands: completions,
            }));

            // Load history
            let hist_path = history_path();
            if let Some(parent) = hist_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = rl.load_history(&hist_path);

            println!("\x1b[1mRequest Bot\x1b[0m  /help for commands, ? for repl help, /quit to exit");
            println!();

            loop {
                match rl.readline("\x1b[1;36m\u{203A}\x1b[0m ") {
                    Ok(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match line.to_lowercase().as_str() {
                            "/quit" | "/exit" => break,
                            "?" => {
                                print_help();
                                continue;
                            }
                            _ => {}
                        }

                        let event = if let Some(index) = parse_button_press(line) {
                            let button = latest_buttons
                                .lock()
                                .ok()
                                .and_then(|buttons| buttons.get(index).cloned());
                            let Some(button) = button else {
                                eprintln!("\x1b[31mNo button {line} on the latest menu\x1b[0m");
                                continue;
                            };
                            IncomingEvent::callback("repl", REPL_USER, REPL_CHAT, &button.data)
                        } else {
                            IncomingEvent::message("repl", REPL_USER, REPL_CHAT, line)
                        };

                        if tx.blocking_send(event.with_user(local_user())).is_err() {
                            break;
                        }
                    }
                    Err(ReadlineError::Interrupted) => continue,
                    Err(ReadlineError::Eof) => break,
                    Err(e) => {
                        eprintln!("Input error: {e}");
                        break;
                    }
                }
            }

            // Save history on exit
            let _ = rl.save_history(&history_path());
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn send(
        &self,
        chat: &ChatId,
        message: OutgoingMessage,
    ) -> Result<MessageRef, ChannelError> {
        let message_ref = self.next_ref(chat);
        let header = if chat.as_str() == REPL_CHAT {
            String::new()
        } else {
            format!("\u{2192} {chat}")
        };
        self.print(&header, &message);
        Ok(message_ref)
    }

    async fn edit(&self, target: &MessageRef, message: OutgoingMessage) -> Result<(), ChannelError> {
        self.print(&format!("(message {} updated)", target.message_id), &message);
        Ok(())
    }

    async fn send_image(
        &self,
        chat: &ChatId,
        source: ImageSource,
        caption: OutgoingMessage,
    ) -> Result<MessageRef, ChannelError> {
        let message_ref = self.next_ref(chat);
        let header = match source {
            ImageSource::Url(url) => format!("[image] {url}"),
            ImageSource::Bytes { data, content_type } => {
                format!("[image] {content_type}, {} bytes", data.len())
            }
        };
        let header = if chat.as_str() == REPL_CHAT {
            header
        } else {
            format!("\u{2192} {chat} {header}")
        };
        self.print(&header, &caption);
        Ok(message_ref)
    }
}
