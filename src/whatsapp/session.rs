use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::browser::{
    parse_chat_rows, parse_message_rows, BrowserLauncher, BrowserPage, CHAT_LIST_SCRIPT, CONVERSATION_SELECTORS,
    INVALID_NUMBER_SELECTORS, MESSAGE_LIST_SCRIPT, PROFILE_TITLE_SELECTORS, QR_SELECTOR, READY_SELECTORS,
    SEND_BUTTON_SELECTORS,
};
use super::{
    sanitize_phone, Ack, ChatMessage, ChatSummary, Profile, SendResult, SessionState, SessionStatus, WhatsAppError,
    INVALID_PHONE,
};
use crate::config::WhatsAppConfig;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub profile_root: PathBuf,
    pub web_url: String,
    pub max_sessions: usize,
    pub navigation_timeout: Duration,
    /// How long initialize waits for the chat list before falling back to QR
    pub ready_check: Duration,
    pub qr_timeout: Duration,
    /// How long a shown QR code waits to be scanned
    pub wait_ready: Duration,
    pub send_auto_wait: Duration,
    pub send_button_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &WhatsAppConfig) -> Self {
        Self {
            profile_root: config.profile_root.clone(),
            web_url: config.web_url.trim_end_matches('/').to_string(),
            max_sessions: config.max_sessions,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            ready_check: Duration::from_secs(config.ready_check_secs),
            qr_timeout: Duration::from_secs(config.qr_timeout_secs),
            wait_ready: Duration::from_secs(config.wait_ready_secs),
            send_auto_wait: Duration::from_secs(config.send_auto_wait_secs),
            send_button_timeout: Duration::from_secs(config.send_button_timeout_secs),
        }
    }

    pub fn profile_dir(&self, user_id: Uuid) -> PathBuf {
        self.profile_root.join(format!("user-{}", user_id))
    }

    /// Deep link that opens the chat with `text` prefilled
    pub fn send_url(&self, phone: &str, text: &str) -> Result<String, WhatsAppError> {
        let mut url = self.chat_link()?;
        url.query_pairs_mut().append_pair("phone", phone).append_pair("text", text);
        Ok(url.into())
    }

    /// Deep link that only opens the chat
    pub fn chat_url(&self, phone: &str) -> Result<String, WhatsAppError> {
        let mut url = self.chat_link()?;
        url.query_pairs_mut().append_pair("phone", phone);
        Ok(url.into())
    }

    fn chat_link(&self) -> Result<url::Url, WhatsAppError> {
        url::Url::parse(&format!("{}/send", self.web_url))
            .map_err(|e| WhatsAppError::Browser(format!("invalid WhatsApp web url: {}", e)))
    }
}

/// A live browser holds one unit of the global session capacity
struct LiveBrowser {
    page: Box<dyn BrowserPage>,
    _permit: OwnedSemaphorePermit,
}

struct Session {
    user_id: Uuid,
    status: watch::Sender<SessionStatus>,
    browser: tokio::sync::Mutex<Option<LiveBrowser>>,
}

impl Session {
    fn new(user_id: Uuid) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            user_id,
            status,
            browser: tokio::sync::Mutex::new(None),
        }
    }

    fn snapshot(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    fn publish(&self, status: SessionStatus) {
        info!("WhatsApp session {} -> {}", self.user_id, status.state);
        self.status.send_replace(status);
    }

    fn publish_error(&self, err: &WhatsAppError) {
        warn!("WhatsApp session {} failed: {}", self.user_id, err);
        self.status.send_replace(SessionStatus::failed(err.to_string()));
    }
}

/// Owns one browser-backed session per user
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    settings: SessionSettings,
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
    capacity: Arc<Semaphore>,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: SessionSettings) -> Self {
        let capacity = Arc::new(Semaphore::new(settings.max_sessions));
        Self {
            launcher,
            settings,
            sessions: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn session(&self, user_id: Uuid) -> Arc<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(user_id)
            .or_insert_with(|| Arc::new(Session::new(user_id)))
            .clone()
    }

    fn existing(&self, user_id: Uuid) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(&user_id).cloned()
    }

    /// Number of sessions currently holding a browser
    pub fn live_sessions(&self) -> usize {
        self.settings.max_sessions - self.capacity.available_permits()
    }

    pub fn status(&self, user_id: Uuid) -> SessionStatus {
        self.existing(user_id).map(|s| s.snapshot()).unwrap_or_default()
    }

    /// Start (or reattach) the user's browser; returns `ready` or `qr_ready`
    pub async fn initialize(&self, user_id: Uuid) -> Result<SessionStatus, WhatsAppError> {
        let session = self.session(user_id);
        let mut slot = session.browser.lock().await;

        if slot.is_some() {
            let current = session.snapshot();
            if matches!(current.state, SessionState::Ready | SessionState::QrReady) {
                return Ok(current);
            }
            if let Some(stale) = slot.take() {
                close_quietly(user_id, stale.page).await;
            }
        }

        let permit = self
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| WhatsAppError::CapacityReached(self.settings.max_sessions))?;
        session.publish(SessionStatus::with_state(SessionState::Connecting));

        let mut page = match self.open(user_id).await {
            Ok(page) => page,
            Err(e) => {
                session.publish_error(&e);
                return Err(e);
            }
        };

        match self.detect_login(&mut page).await {
            Ok(status) => {
                let waiting_for_scan = status.state == SessionState::QrReady;
                *slot = Some(LiveBrowser { page, _permit: permit });
                session.publish(status.clone());
                drop(slot);
                if waiting_for_scan {
                    tokio::spawn(watch_for_scan(session.clone(), self.settings.clone()));
                }
                Ok(status)
            }
            Err(e) => {
                session.publish_error(&e);
                close_quietly(user_id, page).await;
                Err(e)
            }
        }
    }

    async fn open(&self, user_id: Uuid) -> Result<Box<dyn BrowserPage>, WhatsAppError> {
        let profile = self.settings.profile_dir(user_id);
        tokio::fs::create_dir_all(&profile).await?;
        let mut page = self.launcher.launch(&profile).await?;

        let navigation = tokio::time::timeout(self.settings.navigation_timeout, page.goto(&self.settings.web_url)).await;
        let outcome = match navigation {
            Ok(result) => result,
            Err(_) => Err(WhatsAppError::Timeout("navigating to WhatsApp Web".to_string())),
        };
        if let Err(e) = outcome {
            close_quietly(user_id, page).await;
            return Err(e);
        }
        Ok(page)
    }

    async fn detect_login(&self, page: &mut Box<dyn BrowserPage>) -> Result<SessionStatus, WhatsAppError> {
        if page.wait_for_any(READY_SELECTORS, self.settings.ready_check).await?.is_some() {
            return Ok(ready_status(page).await);
        }

        if page.wait_for_any(&[QR_SELECTOR], self.settings.qr_timeout).await?.is_none() {
            return Err(WhatsAppError::Timeout("waiting for the QR code".to_string()));
        }
        let png = page.screenshot(QR_SELECTOR).await?;
        Ok(SessionStatus {
            state: SessionState::QrReady,
            qr_code: Some(STANDARD.encode(png)),
            ..Default::default()
        })
    }

    /// Block until the session leaves `connecting`/`qr_ready` or `timeout` passes
    pub async fn wait_ready(&self, user_id: Uuid, timeout: Duration) -> Result<SessionStatus, WhatsAppError> {
        let session = self
            .existing(user_id)
            .ok_or(WhatsAppError::NotReady(SessionState::Disconnected))?;
        let mut rx = session.status.subscribe();

        let waited = tokio::time::timeout(timeout, async {
            loop {
                let current = rx.borrow_and_update().clone();
                if !matches!(current.state, SessionState::Connecting | SessionState::QrReady) {
                    return current;
                }
                if rx.changed().await.is_err() {
                    return current;
                }
            }
        })
        .await;

        match waited {
            Ok(status) => Ok(status),
            Err(_) => Err(WhatsAppError::Timeout("waiting for WhatsApp login".to_string())),
        }
    }

    /// Open the chat through the deep link and press send.
    /// An unusable number is a rejected send, not an error.
    pub async fn send(&self, user_id: Uuid, phone: &str, text: &str) -> Result<SendResult, WhatsAppError> {
        let Some(digits) = sanitize_phone(phone) else {
            return Ok(SendResult::rejected(INVALID_PHONE));
        };

        let state = self.status(user_id).state;
        if state != SessionState::Ready {
            let status = match state {
                SessionState::Connecting | SessionState::QrReady => {
                    self.wait_ready(user_id, self.settings.send_auto_wait)
                        .await
                        .unwrap_or_else(|_| self.status(user_id))
                }
                _ => self.status(user_id),
            };
            if status.state != SessionState::Ready {
                return Err(WhatsAppError::NotReady(status.state));
            }
        }

        let session = self
            .existing(user_id)
            .ok_or(WhatsAppError::NotReady(SessionState::Disconnected))?;
        let mut slot = session.browser.lock().await;
        let browser = slot
            .as_mut()
            .ok_or(WhatsAppError::NotReady(SessionState::Disconnected))?;

        match self.deliver(&mut browser.page, &digits, text).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => {
                let data = json!({ "id": Uuid::new_v4(), "timestamp": Utc::now() });
                debug!("WhatsApp message sent by {} to {}", user_id, digits);
                Ok(SendResult::sent(digits, data))
            }
            Err(e) => {
                session.publish_error(&e);
                Err(e)
            }
        }
    }

    /// `Ok(None)` when the message went out, `Ok(Some(rejection))` when the page refused it
    async fn deliver(&self, page: &mut Box<dyn BrowserPage>, digits: &str, text: &str) -> Result<Option<SendResult>, WhatsAppError> {
        let url = self.settings.send_url(digits, text)?;
        match tokio::time::timeout(self.settings.navigation_timeout, page.goto(&url)).await {
            Ok(result) => result?,
            Err(_) => return Err(WhatsAppError::Timeout("opening chat".to_string())),
        }

        let watched: Vec<&str> = SEND_BUTTON_SELECTORS
            .iter()
            .chain(INVALID_NUMBER_SELECTORS.iter())
            .copied()
            .collect();
        let found = page.wait_for_any(&watched, self.settings.send_button_timeout).await?;
        match found {
            Some(selector) if INVALID_NUMBER_SELECTORS.contains(&selector.as_str()) => {
                Ok(Some(SendResult::rejected(INVALID_PHONE)))
            }
            Some(selector) => {
                page.click(&selector).await?;
                Ok(None)
            }
            None => Ok(Some(SendResult::rejected("Send button not found"))),
        }
    }

    /// Session that is ready right now; reads never wait for a login
    fn ready_session(&self, user_id: Uuid) -> Result<Arc<Session>, WhatsAppError> {
        let state = self.status(user_id).state;
        if state != SessionState::Ready {
            return Err(WhatsAppError::NotReady(state));
        }
        self.existing(user_id)
            .ok_or(WhatsAppError::NotReady(SessionState::Disconnected))
    }

    /// Every row of the account's chat list, direct chats and groups
    async fn scrape_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        let session = self.ready_session(user_id)?;
        let mut slot = session.browser.lock().await;
        let browser = slot
            .as_mut()
            .ok_or(WhatsAppError::NotReady(SessionState::Disconnected))?;

        if browser
            .page
            .wait_for_any(READY_SELECTORS, self.settings.navigation_timeout)
            .await?
            .is_none()
        {
            return Err(WhatsAppError::Browser("chat list is not visible".to_string()));
        }
        let rows = browser.page.evaluate(CHAT_LIST_SCRIPT).await?;
        parse_chat_rows(rows)
    }

    pub async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        Ok(self
            .scrape_chats(user_id)
            .await?
            .into_iter()
            .filter(|c| !c.is_group)
            .collect())
    }

    pub async fn list_groups(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        Ok(self
            .scrape_chats(user_id)
            .await?
            .into_iter()
            .filter(|c| c.is_group)
            .collect())
    }

    /// Open the chat and read its latest messages; an unregistered number has none
    pub async fn get_messages(&self, user_id: Uuid, phone: &str) -> Result<Vec<ChatMessage>, WhatsAppError> {
        let digits = sanitize_phone(phone).ok_or(WhatsAppError::InvalidPhone)?;
        let session = self.ready_session(user_id)?;
        let mut slot = session.browser.lock().await;
        let browser = slot
            .as_mut()
            .ok_or(WhatsAppError::NotReady(SessionState::Disconnected))?;
        let page = &mut browser.page;

        let url = self.settings.chat_url(&digits)?;
        match tokio::time::timeout(self.settings.navigation_timeout, page.goto(&url)).await {
            Ok(result) => result?,
            Err(_) => return Err(WhatsAppError::Timeout("opening chat".to_string())),
        }

        let watched: Vec<&str> = CONVERSATION_SELECTORS
            .iter()
            .chain(INVALID_NUMBER_SELECTORS.iter())
            .copied()
            .collect();
        match page.wait_for_any(&watched, self.settings.navigation_timeout).await? {
            Some(selector) if INVALID_NUMBER_SELECTORS.contains(&selector.as_str()) => Ok(Vec::new()),
            Some(_) => {
                let rows = page.evaluate(MESSAGE_LIST_SCRIPT).await?;
                parse_message_rows(rows, &digits)
            }
            None => Err(WhatsAppError::Timeout("opening chat".to_string())),
        }
    }

    pub fn profile(&self, user_id: Uuid) -> Profile {
        let status = self.status(user_id);
        Profile {
            state: status.state,
            phone_number: status.phone_number,
        }
    }

    /// Close the user's browser; the profile directory stays for the next login
    pub async fn disconnect(&self, user_id: Uuid) -> Ack {
        let Some(session) = self.existing(user_id) else {
            return Ack::refused("Already disconnected");
        };
        let mut slot = session.browser.lock().await;
        let Some(browser) = slot.take() else {
            if session.snapshot().state == SessionState::Disconnected {
                return Ack::refused("Already disconnected");
            }
            session.publish(SessionStatus::with_state(SessionState::Disconnected));
            return Ack::ok();
        };
        close_quietly(user_id, browser.page).await;
        session.publish(SessionStatus::with_state(SessionState::Disconnected));
        Ack::ok()
    }

    /// Close every live browser
    pub async fn shutdown(&self) {
        let users: Vec<Uuid> = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.keys().copied().collect()
        };
        for user_id in users {
            self.disconnect(user_id).await;
        }
    }
}

async fn ready_status(page: &mut Box<dyn BrowserPage>) -> SessionStatus {
    let mut phone_number = None;
    for selector in PROFILE_TITLE_SELECTORS {
        match page.attribute(selector, "title").await {
            Ok(Some(title)) => {
                let digits: String = title.chars().filter(|c| c.is_ascii_digit()).collect();
                if !digits.is_empty() {
                    phone_number = Some(format!("+{}", digits));
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Profile title lookup failed: {}", e),
        }
    }
    SessionStatus {
        state: SessionState::Ready,
        phone_number,
        ..Default::default()
    }
}

async fn close_quietly(user_id: Uuid, page: Box<dyn BrowserPage>) {
    if let Err(e) = page.close().await {
        warn!("Closing browser for {} failed: {}", user_id, e);
    }
}

/// Poll the page until the QR code is scanned or `wait_ready` expires
async fn watch_for_scan(session: Arc<Session>, settings: SessionSettings) {
    let deadline = tokio::time::Instant::now() + settings.wait_ready;
    let poll = settings.ready_check.max(Duration::from_millis(500));
    loop {
        let mut slot = session.browser.lock().await;
        if session.snapshot().state != SessionState::QrReady {
            return;
        }
        let Some(browser) = slot.as_mut() else {
            return;
        };

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            if let Some(stale) = slot.take() {
                close_quietly(session.user_id, stale.page).await;
            }
            session.publish_error(&WhatsAppError::Timeout("QR code was not scanned in time".to_string()));
            return;
        }

        match browser.page.wait_for_any(READY_SELECTORS, poll.min(remaining)).await {
            Ok(Some(_)) => {
                let status = ready_status(&mut browser.page).await;
                session.publish(status);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                if let Some(stale) = slot.take() {
                    close_quietly(session.user_id, stale.page).await;
                }
                session.publish_error(&e);
                return;
            }
        }
        drop(slot);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBrowser;

    fn settings(max_sessions: usize) -> SessionSettings {
        SessionSettings {
            profile_root: std::env::temp_dir().join(format!("wa-test-{}", Uuid::new_v4())),
            web_url: "https://web.whatsapp.com".to_string(),
            max_sessions,
            navigation_timeout: Duration::from_secs(5),
            ready_check: Duration::from_secs(1),
            qr_timeout: Duration::from_secs(1),
            wait_ready: Duration::from_secs(30),
            send_auto_wait: Duration::from_secs(1),
            send_button_timeout: Duration::from_secs(1),
        }
    }

    fn manager(browser: &FakeBrowser, max_sessions: usize) -> SessionManager {
        SessionManager::new(Arc::new(browser.clone()), settings(max_sessions))
    }

    #[test]
    fn send_url_encodes_the_text() {
        let url = settings(1).send_url("919876543210", "Hi Asha & co").unwrap();
        assert_eq!(url, "https://web.whatsapp.com/send?phone=919876543210&text=Hi+Asha+%26+co");
    }

    #[tokio::test]
    async fn fresh_profile_shows_qr_then_becomes_ready_after_scan() {
        let browser = FakeBrowser::default();
        let manager = manager(&browser, 2);
        let user = Uuid::new_v4();

        let status = manager.initialize(user).await.unwrap();
        assert_eq!(status.state, SessionState::QrReady);
        let png = STANDARD.decode(status.qr_code.unwrap()).unwrap();
        assert_eq!(png, FakeBrowser::QR_PNG);

        browser.scan("+91 98765 43210");
        let ready = manager.wait_ready(user, Duration::from_secs(10)).await.unwrap();
        assert_eq!(ready.state, SessionState::Ready);
        assert_eq!(ready.phone_number.as_deref(), Some("+919876543210"));
        assert!(ready.qr_code.is_none());
    }

    #[tokio::test]
    async fn persisted_profile_reattaches_without_qr() {
        let browser = FakeBrowser::logged_in("919000000001");
        let manager = manager(&browser, 2);
        let user = Uuid::new_v4();

        let status = manager.initialize(user).await.unwrap();
        assert_eq!(status.state, SessionState::Ready);
        assert!(status.qr_code.is_none());

        // a second initialize is a no-op on a live session
        manager.initialize(user).await.unwrap();
        assert_eq!(browser.launches(), 1);
    }

    #[tokio::test]
    async fn send_opens_the_deep_link_and_presses_send() {
        let browser = FakeBrowser::logged_in("919000000001");
        let manager = manager(&browser, 2);
        let user = Uuid::new_v4();
        manager.initialize(user).await.unwrap();

        let result = manager.send(user, "98765 43210", "Reminder").await.unwrap();
        assert!(result.success);
        assert_eq!(result.chat.as_deref(), Some("9876543210"));
        assert!(browser
            .visited()
            .iter()
            .any(|u| u.contains("/send?phone=9876543210&text=Reminder")));

    }

    #[tokio::test]
    async fn chat_list_is_read_from_the_page_and_split_by_kind() {
        let browser = FakeBrowser::logged_in("919000000001");
        browser.set_chat_rows(json!([
            { "id": "false_919876543210@c.us_A1", "title": "Asha", "group": false,
              "last_message": "Thanks doctor", "time": "10:32", "unread": 1 },
            { "id": "120363025@g.us", "title": "Front desk", "group": true,
              "last_message": "Lunch at 2", "time": "09:10", "unread": 0 }
        ]));
        let manager = manager(&browser, 2);
        let user = Uuid::new_v4();
        manager.initialize(user).await.unwrap();

        let chats = manager.list_chats(user).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].phone, "919876543210");
        assert_eq!(chats[0].last_message.as_deref(), Some("Thanks doctor"));
        assert_eq!(chats[0].unread_count, 1);

        let groups = manager.list_groups(user).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Front desk");
    }

    #[tokio::test]
    async fn messages_include_incoming_replies_from_the_open_chat() {
        let browser = FakeBrowser::logged_in("919000000001");
        browser.set_message_rows(
            "919876543210",
            json!([
                { "id": "true_919876543210@c.us_B1", "meta": "[09:00, 18/10/2026] Clinic: ", "body": "Reminder" },
                { "id": "false_919876543210@c.us_B2", "meta": "[09:05, 18/10/2026] Asha: ", "body": "Will be there" }
            ]),
        );
        let manager = manager(&browser, 2);
        let user = Uuid::new_v4();
        manager.initialize(user).await.unwrap();

        let messages = manager.get_messages(user, "+91 98765 43210").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].from_me);
        assert!(!messages[1].from_me);
        assert_eq!(messages[1].body, "Will be there");
        assert!(browser
            .visited()
            .iter()
            .any(|u| u.ends_with("/send?phone=919876543210")));

        browser.reject_numbers(true);
        assert!(manager.get_messages(user, "919999999999").await.unwrap().is_empty());
        assert!(matches!(
            manager.get_messages(user, "123").await,
            Err(WhatsAppError::InvalidPhone)
        ));
    }

    #[tokio::test]
    async fn reads_need_a_ready_session() {
        let manager = manager(&FakeBrowser::default(), 1);
        let user = Uuid::new_v4();
        assert!(matches!(
            manager.list_chats(user).await,
            Err(WhatsAppError::NotReady(SessionState::Disconnected))
        ));

        manager.initialize(user).await.unwrap();
        assert!(matches!(
            manager.get_messages(user, "9876543210").await,
            Err(WhatsAppError::NotReady(SessionState::QrReady))
        ));
    }

    #[tokio::test]
    async fn malformed_and_unregistered_numbers_are_rejected_not_errors() {
        let browser = FakeBrowser::logged_in("919000000001");
        let manager = manager(&browser, 2);
        let user = Uuid::new_v4();
        manager.initialize(user).await.unwrap();

        let short = manager.send(user, "12345", "hi").await.unwrap();
        assert!(!short.success);
        assert_eq!(short.error.as_deref(), Some(INVALID_PHONE));

        browser.reject_numbers(true);
        let unknown = manager.send(user, "919999999999", "hi").await.unwrap();
        assert_eq!(unknown.error.as_deref(), Some(INVALID_PHONE));
        assert_eq!(manager.status(user).state, SessionState::Ready);
    }

    #[tokio::test]
    async fn missing_send_button_keeps_session_ready() {
        let browser = FakeBrowser::logged_in("919000000001");
        let manager = manager(&browser, 2);
        let user = Uuid::new_v4();
        manager.initialize(user).await.unwrap();

        browser.hide_send_button(true);
        let result = manager.send(user, "9876543210", "hi").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Send button not found"));
        assert_eq!(manager.status(user).state, SessionState::Ready);
    }

    #[tokio::test]
    async fn send_without_session_is_not_ready() {
        let manager = manager(&FakeBrowser::default(), 1);
        let err = manager.send(Uuid::new_v4(), "9876543210", "hi").await.unwrap_err();
        assert!(matches!(err, WhatsAppError::NotReady(SessionState::Disconnected)));
    }

    #[tokio::test]
    async fn capacity_is_enforced_and_freed_by_disconnect() {
        let browser = FakeBrowser::logged_in("919000000001");
        let manager = manager(&browser, 1);
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        manager.initialize(first).await.unwrap();
        let err = manager.initialize(second).await.unwrap_err();
        assert!(matches!(err, WhatsAppError::CapacityReached(1)));

        assert!(manager.disconnect(first).await.success);
        assert_eq!(manager.live_sessions(), 0);
        assert!(manager.initialize(second).await.is_ok());
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn disconnect_twice_reports_already_disconnected() {
        let manager = manager(&FakeBrowser::logged_in("919000000001"), 1);
        let user = Uuid::new_v4();
        manager.initialize(user).await.unwrap();

        assert!(manager.disconnect(user).await.success);
        let again = manager.disconnect(user).await;
        assert!(!again.success);
        assert_eq!(again.error.as_deref(), Some("Already disconnected"));
        assert_eq!(manager.status(user).state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn missing_qr_moves_session_to_error_and_frees_capacity() {
        let browser = FakeBrowser::default();
        browser.hide_qr(true);
        let manager = manager(&browser, 1);
        let user = Uuid::new_v4();

        let err = manager.initialize(user).await.unwrap_err();
        assert!(matches!(err, WhatsAppError::Timeout(_)));
        let status = manager.status(user);
        assert_eq!(status.state, SessionState::Error);
        assert!(status.error.is_some());
        assert_eq!(manager.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unscanned_qr_expires_into_error() {
        let browser = FakeBrowser::default();
        let mut settings = settings(1);
        settings.wait_ready = Duration::from_secs(5);
        let manager = SessionManager::new(Arc::new(browser.clone()), settings);
        let user = Uuid::new_v4();

        manager.initialize(user).await.unwrap();
        let status = manager.wait_ready(user, Duration::from_secs(60)).await.unwrap();
        assert_eq!(status.state, SessionState::Error);
        assert_eq!(manager.live_sessions(), 0);
    }
}
