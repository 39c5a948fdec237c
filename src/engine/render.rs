//! Text for status messages, replies and broadcasts.
//!
//! Everything is HTML formatted; values coming from users or remote
//! services are escaped.

use crate::channels::{ImageSource, OutgoingContent, OutgoingMessage, UserInfo};
use crate::config::{ContentField, ContentSpec};
use crate::engine::session::View;
use crate::requests::HttpResponse;

/// Max characters of response body placed in a message.
const BODY_PREVIEW_MAX: usize = 3000;

fn entity(c: char) -> Option<&'static str> {
    match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        _ => None,
    }
}

/// Escape text for HTML-formatted messages.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match entity(c) {
            Some(escaped) => out.push_str(escaped),
            None => out.push(c),
        }
    }
    out
}

/// Escape `text` so the escaped result has at most `max` characters,
/// appending "..." if cut. Entities are never split.
pub fn escape_preview(text: &str, max: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let width = entity(c).map_or(1, str::len);
        if used + width > max {
            out.push_str("...");
            return out;
        }
        match entity(c) {
            Some(escaped) => out.push_str(escaped),
            None => out.push(c),
        }
        used += width;
    }
    out
}

/// One `🏷 name: label` line per resolved parameter.
pub fn param_list(view: &View) -> String {
    view.entries()
        .iter()
        .map(|e| format!("🏷 {}: {}\n", escape_html(&e.name), escape_html(&e.label)))
        .collect()
}

/// Lifecycle states shown on the menu surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Done,
    Error,
}

/// `⏳ /cmd running...`, `✅ /cmd done.` or `❌ /cmd error.` plus the
/// parameter list.
pub fn status_message(status: Status, command: &str, view: &View) -> OutgoingMessage {
    let head = match status {
        Status::Running => format!("⏳ /{command} running..."),
        Status::Done => format!("✅ /{command} done."),
        Status::Error => format!("❌ /{command} error."),
    };
    OutgoingMessage::html(format!("{head}\n{}", param_list(view)))
}

/// `❌ /cmd aborted: reason.`
pub fn aborted_message(command: &str, reason: &str) -> OutgoingMessage {
    OutgoingMessage::html(format!("❌ /{command} aborted: {}.", escape_html(reason)))
}

/// Status code line with an emoji band.
pub fn http_code_line(response: &HttpResponse) -> String {
    let emoji = match response.status {
        500.. => "⛔️ ",
        400..=499 => "⚠️ ",
        300..=399 => "🔀 ",
        200..=299 => "✅ ",
        100..=199 => "ℹ️ ",
        _ => "",
    };
    format!(
        "{emoji}{} {}\n",
        response.status,
        escape_html(&response.reason)
    )
}

/// Builds reply and broadcast content for one completed request.
pub struct ContentRenderer<'a> {
    pub command: &'a str,
    pub user: &'a UserInfo,
    pub view: &'a View,
    pub response: &'a HttpResponse,
}

impl ContentRenderer<'_> {
    /// Content for the requester, or `None` when nothing is included.
    pub fn reply(&self, spec: &ContentSpec) -> Option<OutgoingContent> {
        self.render(spec, false)
    }

    /// Content for broadcast destinations.
    pub fn broadcast(&self, spec: &ContentSpec) -> Option<OutgoingContent> {
        self.render(spec, true)
    }

    fn render(&self, spec: &ContentSpec, broadcast: bool) -> Option<OutgoingContent> {
        if spec.is_empty() {
            return None;
        }

        let mut text = String::new();
        if broadcast {
            text.push_str(&format!("📢 <b>/{}</b> was called", escape_html(self.command)));
            if spec.includes(ContentField::Username) {
                text.push_str(&format!(
                    " by <b>{}</b>",
                    escape_html(&self.user.display_name())
                ));
            }
            text.push_str(".\n");
        } else {
            if spec.includes(ContentField::Command) {
                text.push_str(&format!("<b>/{}</b>\n", escape_html(self.command)));
            }
            if spec.includes(ContentField::Username) {
                text.push_str(&format!(
                    "👤 <b>{}</b>\n",
                    escape_html(&self.user.display_name())
                ));
            }
        }

        if spec.includes(ContentField::Params) {
            text.push_str(&param_list(self.view));
        }
        if spec.includes(ContentField::HttpCode) {
            text.push_str(&http_code_line(self.response));
        }
        if spec.includes(ContentField::Headers) {
            for (name, value) in &self.response.headers {
                text.push_str(&format!(
                    "📋 <i>{}</i>: {}\n",
                    escape_html(name),
                    escape_html(value)
                ));
            }
        }

        let mut image = None;
        let wants_image = spec.includes(ContentField::Image);
        if self.response.is_image() {
            if wants_image || spec.includes(ContentField::Body) {
                image = Some(ImageSource::Bytes {
                    data: self.response.body.clone(),
                    content_type: self.response.content_type().unwrap_or("image/png").to_string(),
                });
            }
        } else {
            let body = self.body_text(spec);
            if spec.includes(ContentField::Body) {
                text.push_str(&format!(
                    "📦 Response:\n{}\n",
                    escape_preview(&body, BODY_PREVIEW_MAX)
                ));
            }
            if wants_image {
                image = body
                    .lines()
                    .map(str::trim)
                    .find(|line| line.starts_with("http://") || line.starts_with("https://"))
                    .map(|url| ImageSource::Url(url.to_string()));
            }
        }

        match image {
            Some(source) => Some(OutgoingContent::Image {
                source,
                caption: OutgoingMessage::html(text),
            }),
            None if text.is_empty() => None,
            None => Some(OutgoingContent::Text(OutgoingMessage::html(text))),
        }
    }

    /// Body text, or the query result when a query is configured and the
    /// body is JSON.
    fn body_text(&self, spec: &ContentSpec) -> String {
        let raw = self.response.text();
        let Some(query) = &spec.query else {
            return raw;
        };
        match self.response.json().and_then(|data| query.render(&data)) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!(command = self.command, error = %e, "Response query failed, using raw body");
                raw
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::requests::ResultQuery;

    fn view() -> View {
        let mut view = View::default();
        view.insert("env", json!("prod"), "prod");
        view.insert("note", json!("a<b"), "a<b");
        view
    }

    fn user() -> UserInfo {
        UserInfo::new("7").with_name("Ada", Some("Lovelace"))
    }

    #[test]
    fn test_param_list_escapes_labels() {
        assert_eq!(param_list(&view()), "🏷 env: prod\n🏷 note: a&lt;b\n");
        assert_eq!(param_list(&View::default()), "");
    }

    #[test]
    fn test_status_messages() {
        let v = view();
        assert!(
            status_message(Status::Running, "deploy", &v)
                .text
                .starts_with("⏳ /deploy running...\n🏷 env: prod")
        );
        assert!(status_message(Status::Done, "deploy", &v).text.starts_with("✅ /deploy done.\n"));
        assert!(status_message(Status::Error, "deploy", &v).text.starts_with("❌ /deploy error.\n"));
        assert_eq!(
            aborted_message("deploy", "cancel was pressed").text,
            "❌ /deploy aborted: cancel was pressed."
        );
    }

    #[test]
    fn test_http_code_bands() {
        assert_eq!(http_code_line(&HttpResponse::new(503)), "⛔️ 503 Service Unavailable\n");
        assert_eq!(http_code_line(&HttpResponse::new(404)), "⚠️ 404 Not Found\n");
        assert_eq!(http_code_line(&HttpResponse::new(302)), "🔀 302 Found\n");
        assert_eq!(http_code_line(&HttpResponse::new(201)), "✅ 201 Created\n");
        assert_eq!(http_code_line(&HttpResponse::new(101)), "ℹ️ 101 Switching Protocols\n");
    }

    #[test]
    fn test_reply_and_broadcast_differ() {
        let response = HttpResponse::new(200)
            .with_header("x-id", "42")
            .with_body("ok");
        let (v, u) = (view(), user());
        let renderer = ContentRenderer {
            command: "deploy",
            user: &u,
            view: &v,
            response: &response,
        };

        let reply = renderer
            .reply(&ContentSpec::new(vec![ContentField::HttpCode, ContentField::Body]))
            .unwrap();
        assert_eq!(reply.text(), "✅ 200 OK\n📦 Response:\nok\n");

        let broadcast = renderer
            .broadcast(&ContentSpec::new(vec![ContentField::Username, ContentField::Headers]))
            .unwrap();
        assert_eq!(
            broadcast.text(),
            "📢 <b>/deploy</b> was called by <b>Ada Lovelace</b>.\n📋 <i>x-id</i>: 42\n"
        );
    }

    #[test]
    fn test_empty_spec_renders_nothing() {
        let response = HttpResponse::new(200);
        let (v, u) = (view(), user());
        let renderer = ContentRenderer {
            command: "deploy",
            user: &u,
            view: &v,
            response: &response,
        };
        assert!(renderer.reply(&ContentSpec::default()).is_none());
    }

    #[test]
    fn test_body_query_lines() {
        let response = HttpResponse::new(200).with_json(&json!({"items": [{"n": "a"}, {"n": "b"}]}));
        let (v, u) = (View::default(), user());
        let renderer = ContentRenderer {
            command: "list",
            user: &u,
            view: &v,
            response: &response,
        };
        let spec = ContentSpec {
            include: vec![ContentField::Body],
            query: Some(ResultQuery::list("$.items[*].n")),
        };
        assert_eq!(renderer.reply(&spec).unwrap().text(), "📦 Response:\na\nb\n");
    }

    #[test]
    fn test_image_response_becomes_image() {
        let response = HttpResponse::new(200)
            .with_header("Content-Type", "image/png")
            .with_body(vec![0x89, b'P', b'N', b'G']);
        let (v, u) = (View::default(), user());
        let renderer = ContentRenderer {
            command: "shot",
            user: &u,
            view: &v,
            response: &response,
        };

        let content = renderer
            .reply(&ContentSpec::new(vec![ContentField::HttpCode, ContentField::Body]))
            .unwrap();
        match content {
            OutgoingContent::Image { source, caption } => {
                assert!(matches!(source, ImageSource::Bytes { ref content_type, .. } if content_type == "image/png"));
                assert_eq!(caption.text, "✅ 200 OK\n");
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn test_image_url_from_body() {
        let response = HttpResponse::new(200).with_json(&json!({"url": "https://img/x.png"}));
        let (v, u) = (View::default(), user());
        let renderer = ContentRenderer {
            command: "chart",
            user: &u,
            view: &v,
            response: &response,
        };
        let spec = ContentSpec {
            include: vec![ContentField::Image],
            query: Some(ResultQuery::list("$.url")),
        };
        match renderer.broadcast(&spec).unwrap() {
            OutgoingContent::Image { source, caption } => {
                assert_eq!(source, ImageSource::Url("https://img/x.png".to_string()));
                assert_eq!(caption.text, "📢 <b>/chart</b> was called.\n");
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn test_escape_preview() {
        assert_eq!(escape_preview("hello", 10), "hello");
        assert_eq!(escape_preview("héllo world", 5), "héllo...");
        assert_eq!(escape_preview("a&b", 5), "a...");
        assert_eq!(escape_preview("a&b", 6), "a&amp;...");
        assert_eq!(escape_preview("a&b", 7), "a&amp;b");
    }

    #[test]
    fn test_body_preview_budget_counts_escapes() {
        let response = HttpResponse::new(200).with_body("&".repeat(BODY_PREVIEW_MAX));
        let spec = ContentSpec::new(vec![ContentField::Body]);
        let view = View::default();
        let user = user();
        let renderer = ContentRenderer {
            command: "dump",
            user: &user,
            view: &view,
            response: &response,
        };

        let Some(OutgoingContent::Text(message)) = renderer.reply(&spec) else {
            panic!("expected text reply");
        };
        let body = message
            .text
            .strip_prefix("📦 Response:\n")
            .and_then(|b| b.strip_suffix("...\n"))
            .unwrap();
        assert_eq!(body.chars().count(), BODY_PREVIEW_MAX);
        assert_eq!(body, "&amp;".repeat(BODY_PREVIEW_MAX / 5));
    }
}
