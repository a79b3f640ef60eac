//! Per-user WhatsApp Web sessions driven through a headless browser

mod browser;
mod client;
mod session;
mod webdriver;
pub mod worker;

pub use browser::{
    BrowserLauncher, BrowserPage, CHAT_LIST_SCRIPT, CONVERSATION_SELECTORS, INVALID_NUMBER_SELECTORS, MESSAGE_LIST_SCRIPT,
    PROFILE_TITLE_SELECTORS, QR_SELECTOR, READY_SELECTORS, SEND_BUTTON_SELECTORS,
};
pub use client::{connect, LocalWhatsApp, RemoteWhatsApp, WhatsAppClient};
pub use session::{SessionManager, SessionSettings};
pub use webdriver::WebDriverLauncher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    QrReady,
    Ready,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::QrReady => "qr_ready",
            SessionState::Ready => "ready",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by `status()`; the QR image is only present while `qr_ready`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn with_state(state: SessionState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: SessionState::Error,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
    #[serde(rename = "messageData", skip_serializing_if = "Option::is_none")]
    pub message_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn sent(chat: String, message_data: Value) -> Self {
        Self {
            success: true,
            chat: Some(chat),
            message_data: Some(message_data),
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            chat: None,
            message_data: None,
            error: Some(reason.into()),
        }
    }
}

pub const INVALID_PHONE: &str = "Invalid phone number";

/// Outcome of a command that returns nothing but success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// A message read from an open conversation, incoming or outgoing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    /// Sender digits for incoming messages, the chat's number for our own
    pub phone: String,
    pub body: String,
    pub from_me: bool,
    /// Absent when the page carried no parsable time (media bubbles)
    pub timestamp: Option<DateTime<Utc>>,
}

/// One row of the account's chat list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    /// Digits for a direct chat, the group id for a group
    pub phone: String,
    pub name: String,
    pub is_group: bool,
    pub unread_count: u32,
    pub last_message: Option<String>,
    /// The list's own time label ("10:32", "Yesterday", a date)
    pub last_activity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub state: SessionState,
    pub phone_number: Option<String>,
}

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("WhatsApp session is not ready (state: {0})")]
    NotReady(SessionState),

    #[error("Session capacity reached ({0})")]
    CapacityReached(usize),

    #[error("Invalid phone number")]
    InvalidPhone,

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Browser driver or remote worker cannot be reached
    #[error("WhatsApp unavailable: {0}")]
    Unavailable(String),

    /// Remote worker answered with a failure
    #[error("WhatsApp worker error: {0}")]
    Upstream(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Profile directory error: {0}")]
    Profile(#[from] std::io::Error),
}

/// Digits only; a WhatsApp number is 10 to 15 digits with country code
pub fn sanitize_phone(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    (10..=15).contains(&digits.len()).then_some(digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_state_in_snake_case_and_drops_empty_fields() {
        let status = SessionStatus {
            state: SessionState::QrReady,
            qr_code: Some("aGVsbG8=".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({ "state": "qr_ready", "qr_code": "aGVsbG8=" })
        );
    }

    #[test]
    fn send_result_uses_message_data_key() {
        let result = SendResult::sent("919876543210".into(), json!({ "id": "m1" }));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["messageData"]["id"], "m1");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn sanitize_phone_bounds() {
        assert_eq!(sanitize_phone("+91 98765-43210").as_deref(), Some("919876543210"));
        assert!(sanitize_phone("12345").is_none());
        assert!(sanitize_phone("1234567890123456").is_none());
    }
}
