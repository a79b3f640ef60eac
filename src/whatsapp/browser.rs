use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::{ChatMessage, ChatSummary, WhatsAppError};

/// Chat list; its presence means the profile is logged in
pub const READY_SELECTORS: &[&str] = &[
    r#"div[data-testid="chatlist"]"#,
    r#"div[aria-label="Chat list"]"#,
    "#pane-side",
];

pub const QR_SELECTOR: &str = "canvas";

pub const SEND_BUTTON_SELECTORS: &[&str] = &[
    r#"button[data-testid="send"]"#,
    r#"span[data-icon="send"]"#,
    r#"button[aria-label*="Send"]"#,
];

/// Popup shown by the deep link when the number has no WhatsApp account
pub const INVALID_NUMBER_SELECTORS: &[&str] = &[
    r#"div[data-testid="popup-contents"]"#,
    r#"div[data-animate-modal-popup="true"]"#,
];

/// Header element whose title carries the logged-in number
pub const PROFILE_TITLE_SELECTORS: &[&str] = &[
    r#"header span[data-testid="default-user"]"#,
    "header img[title]",
];

/// Message pane of an open chat
pub const CONVERSATION_SELECTORS: &[&str] = &[
    r#"div[data-testid="conversation-panel-messages"]"#,
    "#main",
];

/// Rows of the side pane: chat id when the row carries one, title, preview, time label, unread badge
pub const CHAT_LIST_SCRIPT: &str = r#"
var rows = document.querySelectorAll('#pane-side div[role="listitem"]');
return Array.prototype.map.call(rows, function (row) {
  var text = function (selector) {
    var el = row.querySelector(selector);
    return el ? (el.getAttribute('title') || el.textContent || '').trim() : null;
  };
  var keyed = row.querySelector('[data-id]');
  var badge = row.querySelector('span[aria-label*="unread"]');
  return {
    id: keyed ? keyed.getAttribute('data-id') : null,
    title: text('span[dir="auto"][title]') || '',
    group: !!row.querySelector('span[data-icon="default-group"]'),
    last_message: text('div[role="gridcell"] + div span[title]'),
    time: text('div[role="gridcell"] > div:last-child'),
    unread: badge ? parseInt(badge.textContent, 10) || 0 : 0
  };
});
"#;

/// Bubbles of the open chat, oldest first: `data-id` is `<fromMe>_<chat>@<server>_<messageId>[_<author>]`
pub const MESSAGE_LIST_SCRIPT: &str = r#"
var rows = document.querySelectorAll('#main div[data-id]');
return Array.prototype.map.call(rows, function (row) {
  var meta = row.querySelector('[data-pre-plain-text]');
  var body = row.querySelector('span.selectable-text');
  return {
    id: row.getAttribute('data-id'),
    meta: meta ? meta.getAttribute('data-pre-plain-text') : null,
    body: body ? body.innerText : null
  };
});
"#;

/// Most recent messages returned per chat
pub const MESSAGE_LIMIT: usize = 100;

/// Starts a browser rooted at a persistent profile directory
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile_dir: &Path) -> Result<Box<dyn BrowserPage>, WhatsAppError>;
}

/// The single page a session drives
#[async_trait]
pub trait BrowserPage: Send {
    async fn goto(&mut self, url: &str) -> Result<(), WhatsAppError>;

    /// First of `selectors` present before `timeout`, `None` if none appeared
    async fn wait_for_any(&mut self, selectors: &[&str], timeout: Duration) -> Result<Option<String>, WhatsAppError>;

    /// PNG bytes of the first element matching `selector`
    async fn screenshot(&mut self, selector: &str) -> Result<Vec<u8>, WhatsAppError>;

    async fn click(&mut self, selector: &str) -> Result<(), WhatsAppError>;

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, WhatsAppError>;

    /// Run `script` as a function body in the page and return its result
    async fn evaluate(&mut self, script: &str) -> Result<Value, WhatsAppError>;

    /// Close the page and the browser behind it
    async fn close(self: Box<Self>) -> Result<(), WhatsAppError>;
}

#[derive(Debug, Deserialize)]
struct ChatRow {
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    group: bool,
    last_message: Option<String>,
    time: Option<String>,
    #[serde(default)]
    unread: u32,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    id: Option<String>,
    meta: Option<String>,
    body: Option<String>,
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// `(user, server)` from the first `user@server` segment of a WhatsApp id
fn jid(id: &str) -> Option<(&str, &str)> {
    id.split('_').find_map(|part| part.split_once('@'))
}

/// Direct chats without a resolvable number are skipped
pub fn parse_chat_rows(value: Value) -> Result<Vec<ChatSummary>, WhatsAppError> {
    let rows: Vec<ChatRow> =
        serde_json::from_value(value).map_err(|e| WhatsAppError::Browser(format!("unexpected chat list: {}", e)))?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let parsed = row.id.as_deref().and_then(jid);
            let is_group = row.group || matches!(parsed, Some((_, "g.us")));
            let phone = match parsed {
                Some((user, _)) if is_group => user.to_string(),
                Some((user, _)) => digits(user),
                None if is_group => row.title.clone(),
                None => digits(&row.title),
            };
            if phone.is_empty() {
                return None;
            }
            let name = if row.title.is_empty() { phone.clone() } else { row.title };
            Some(ChatSummary {
                phone,
                name,
                is_group,
                unread_count: row.unread,
                last_message: row.last_message.filter(|m| !m.is_empty()),
                last_activity: row.time.filter(|t| !t.is_empty()),
            })
        })
        .collect())
}

/// Time out of a `data-pre-plain-text` prefix such as `[10:32, 18/10/2026] Asha: `
fn parse_meta_time(meta: &str) -> Option<DateTime<Utc>> {
    let inner = meta.trim().strip_prefix('[')?.split(']').next()?.trim();
    ["%H:%M, %d/%m/%Y", "%I:%M %p, %d/%m/%Y", "%H:%M, %m/%d/%Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(inner, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// The last `MESSAGE_LIMIT` bubbles of the chat with `phone`
pub fn parse_message_rows(value: Value, phone: &str) -> Result<Vec<ChatMessage>, WhatsAppError> {
    let rows: Vec<MessageRow> =
        serde_json::from_value(value).map_err(|e| WhatsAppError::Browser(format!("unexpected message list: {}", e)))?;

    let mut messages: Vec<ChatMessage> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id?;
            let mut parts = id.split('_');
            let from_me = parts.next()? == "true";
            // group bubbles name their author after the message id
            let sender = parts
                .nth(2)
                .and_then(|author| author.split_once('@'))
                .map(|(user, _)| digits(user))
                .filter(|d| !d.is_empty() && !from_me)
                .unwrap_or_else(|| phone.to_string());
            Some(ChatMessage {
                phone: sender,
                body: row.body.unwrap_or_else(|| "[Media]".to_string()),
                from_me,
                timestamp: row.meta.as_deref().and_then(parse_meta_time),
                id,
            })
        })
        .collect();

    if messages.len() > MESSAGE_LIMIT {
        messages.drain(..messages.len() - MESSAGE_LIMIT);
    }
    Ok(messages)
}
