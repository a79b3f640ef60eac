//! In-memory stand-ins for the storage and transport seams, used by unit and integration tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{AuthError, IdentityVerifier, VerifiedIdentity};
use crate::authz::{PolicyError, PolicyKind, PolicyRule, PolicyStore};
use crate::database::models::{Role, ScheduledMessage, ScheduledStatus, User};
use crate::dispatcher::{DispatchError, DispatchStore, Recipient};
use crate::sync::{ApplyOutcome, ClinicLock, SyncError, SyncRow, SyncStore, SyncTable, SyncTransaction};
use crate::whatsapp::{
    sanitize_phone, Ack, BrowserLauncher, BrowserPage, ChatMessage, ChatSummary, Profile, SendResult, SessionState,
    SessionStatus, WhatsAppClient, WhatsAppError, CHAT_LIST_SCRIPT, CONVERSATION_SELECTORS, INVALID_NUMBER_SELECTORS,
    INVALID_PHONE, MESSAGE_LIST_SCRIPT, PROFILE_TITLE_SELECTORS, QR_SELECTOR, READY_SELECTORS, SEND_BUTTON_SELECTORS,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Fixtures

/// An active user row as the auth layer would load it
pub fn user(role: Role, clinic_id: Option<Uuid>) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        clinic_id,
        email: format!("{}@clinic.test", role.as_str()),
        first_name: "Test".to_string(),
        last_name: role.as_str().to_string(),
        name: format!("Test {}", role.as_str()),
        role: role.as_str().to_string(),
        permissions: json!({}),
        is_active: true,
        external_identity_id: None,
        avatar_url: None,
        password_hash: None,
        created_by: None,
        created_at: now,
        updated_at: now,
        synced_at: None,
        sync_status: "local".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Policy store

#[derive(Default)]
pub struct MemoryPolicyStore {
    rules: Mutex<Vec<PolicyRule>>,
    failing: AtomicBool,
}

impl MemoryPolicyStore {
    /// Make every subsequent write fail like a dropped connection
    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub fn rules(&self) -> Vec<PolicyRule> {
        locked(&self.rules).clone()
    }

    fn check_writable(&self) -> Result<(), PolicyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PolicyError::Store(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        Ok(self.rules())
    }

    async fn insert(&self, rules: &[PolicyRule]) -> Result<(), PolicyError> {
        self.check_writable()?;
        let mut stored = locked(&self.rules);
        for rule in rules {
            if !stored.contains(rule) {
                stored.push(rule.clone());
            }
        }
        Ok(())
    }

    async fn remove(&self, rule: &PolicyRule) -> Result<(), PolicyError> {
        self.check_writable()?;
        locked(&self.rules).retain(|r| r != rule);
        Ok(())
    }

    async fn replace_role(&self, user: &str, domain: &str, role: &str) -> Result<(), PolicyError> {
        self.check_writable()?;
        let mut stored = locked(&self.rules);
        stored.retain(|r| !(r.kind == PolicyKind::Role && r.v0 == user && r.v2 == domain));
        stored.push(PolicyRule::role(user, role, domain));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identity verifier

/// Accepts exactly one token and returns a fixed identity
pub struct StaticVerifier {
    pub token: String,
    pub identity: VerifiedIdentity,
}

impl StaticVerifier {
    pub fn new(token: &str, email: &str) -> Self {
        Self {
            token: token.to_string(),
            identity: VerifiedIdentity {
                uid: format!("uid-{}", token),
                email: email.to_string(),
                name: Some("Test User".to_string()),
                picture: None,
            },
        }
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AuthError> {
        if id_token == self.token {
            Ok(self.identity.clone())
        } else {
            Err(AuthError::IdentityRejected("Invalid ID token".to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Sync store

#[derive(Debug, Clone)]
struct MemoryRow {
    clinic_id: Uuid,
    row: SyncRow,
    synced_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct SyncState {
    tables: HashMap<String, BTreeMap<Uuid, MemoryRow>>,
    locked: HashSet<Uuid>,
    failing_commits: HashSet<String>,
}

/// One side of a replication pair; transactions work on a copy and write back on commit
#[derive(Clone, Default)]
pub struct MemorySyncStore {
    state: Arc<Mutex<SyncState>>,
}

impl MemorySyncStore {
    pub fn put(
        &self,
        table: &str,
        clinic_id: Uuid,
        id: Uuid,
        updated_at: DateTime<Utc>,
        name: &str,
        synced_at: Option<DateTime<Utc>>,
    ) {
        let mut fields = Map::new();
        fields.insert("id".into(), json!(id));
        fields.insert("clinic_id".into(), json!(clinic_id));
        fields.insert("name".into(), json!(name));
        fields.insert("updated_at".into(), json!(updated_at));
        let row = MemoryRow {
            clinic_id,
            row: SyncRow { id, updated_at, fields },
            synced_at,
        };
        locked(&self.state)
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn name(&self, table: &str, id: Uuid) -> Option<String> {
        let state = locked(&self.state);
        state
            .tables
            .get(table)?
            .get(&id)?
            .row
            .fields
            .get("name")?
            .as_str()
            .map(str::to_string)
    }

    pub fn synced_at(&self, table: &str, id: Uuid) -> Option<DateTime<Utc>> {
        let state = locked(&self.state);
        state.tables.get(table)?.get(&id)?.synced_at
    }

    pub fn fail_commits_for(&self, table: &str) {
        locked(&self.state).failing_commits.insert(table.to_string());
    }
}

struct MemoryClinicLock {
    state: Arc<Mutex<SyncState>>,
    clinic_id: Uuid,
}

#[async_trait]
impl ClinicLock for MemoryClinicLock {
    async fn release(self: Box<Self>) {
        locked(&self.state).locked.remove(&self.clinic_id);
    }
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn begin(&self, table: SyncTable) -> Result<Box<dyn SyncTransaction>, SyncError> {
        let rows = locked(&self.state)
            .tables
            .get(table.name)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(MemorySyncTransaction {
            state: self.state.clone(),
            table,
            rows,
            touched: HashSet::new(),
        }))
    }

    async fn lock_clinic(&self, clinic_id: Uuid) -> Result<Option<Box<dyn ClinicLock>>, SyncError> {
        let mut state = locked(&self.state);
        if !state.locked.insert(clinic_id) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryClinicLock {
            state: self.state.clone(),
            clinic_id,
        })))
    }

    async fn active_clinics(&self) -> Result<Vec<Uuid>, SyncError> {
        let state = locked(&self.state);
        Ok(state
            .tables
            .get("clinics")
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default())
    }
}

struct MemorySyncTransaction {
    state: Arc<Mutex<SyncState>>,
    table: SyncTable,
    rows: BTreeMap<Uuid, MemoryRow>,
    touched: HashSet<Uuid>,
}

impl MemorySyncTransaction {
    fn scoped(&self, clinic_id: Uuid) -> impl Iterator<Item = &MemoryRow> {
        self.rows.values().filter(move |r| r.clinic_id == clinic_id)
    }

    fn sorted(mut rows: Vec<SyncRow>) -> Vec<SyncRow> {
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        rows
    }
}

#[async_trait]
impl SyncTransaction for MemorySyncTransaction {
    async fn watermark(&mut self, clinic_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(self.scoped(clinic_id).filter_map(|r| r.synced_at).max())
    }

    async fn changed_since(&mut self, clinic_id: Uuid, since: Option<DateTime<Utc>>) -> Result<Vec<SyncRow>, SyncError> {
        let rows = self
            .scoped(clinic_id)
            .filter(|r| since.map_or(true, |s| r.row.updated_at > s))
            .map(|r| r.row.clone())
            .collect();
        Ok(Self::sorted(rows))
    }

    async fn pending_push(&mut self, clinic_id: Uuid) -> Result<Vec<SyncRow>, SyncError> {
        let rows = self
            .scoped(clinic_id)
            .filter(|r| r.synced_at.map_or(true, |s| r.row.updated_at > s))
            .map(|r| r.row.clone())
            .collect();
        Ok(Self::sorted(rows))
    }

    async fn find(&mut self, id: Uuid) -> Result<Option<SyncRow>, SyncError> {
        Ok(self.rows.get(&id).map(|r| r.row.clone()))
    }

    async fn apply(&mut self, row: &SyncRow, synced_at: DateTime<Utc>) -> Result<ApplyOutcome, SyncError> {
        let clinic_id = row
            .fields
            .get(self.table.scope_column)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| SyncError::MalformedRow(format!("{} has no {}", row.id, self.table.scope_column)))?;

        if let Some(existing) = self.rows.get(&row.id) {
            if existing.clinic_id != clinic_id {
                return Err(SyncError::ForeignRow(row.id));
            }
            if existing.row.clock() > row.clock() {
                return Ok(ApplyOutcome::Stale);
            }
        }
        self.rows.insert(
            row.id,
            MemoryRow {
                clinic_id,
                row: row.clone(),
                synced_at: Some(synced_at),
            },
        );
        self.touched.insert(row.id);
        Ok(ApplyOutcome::Applied)
    }

    async fn mark_synced(&mut self, ids: &[Uuid], synced_at: DateTime<Utc>) -> Result<(), SyncError> {
        for id in ids {
            if let Some(row) = self.rows.get_mut(id) {
                row.synced_at = Some(synced_at);
                self.touched.insert(*id);
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), SyncError> {
        let mut state = locked(&self.state);
        if state.failing_commits.contains(self.table.name) {
            return Err(SyncError::Unreachable(format!("commit of {} failed", self.table.name)));
        }
        let table = state.tables.entry(self.table.name.to_string()).or_default();
        for id in &self.touched {
            if let Some(row) = self.rows.get(id) {
                table.insert(*id, row.clone());
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SyncError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch store

#[derive(Default)]
struct DispatchState {
    messages: HashMap<Uuid, ScheduledMessage>,
    patients: HashMap<Uuid, (Uuid, String, String)>,
    deny_claims: bool,
}

#[derive(Clone, Default)]
pub struct MemoryDispatchStore {
    state: Arc<Mutex<DispatchState>>,
}

impl MemoryDispatchStore {
    pub fn add_patient(&self, clinic_id: Uuid, name: &str, phone: &str) -> Uuid {
        let id = Uuid::new_v4();
        locked(&self.state)
            .patients
            .insert(id, (clinic_id, name.to_string(), phone.to_string()));
        id
    }

    pub fn schedule(
        &self,
        clinic_id: Uuid,
        user_id: Uuid,
        text: &str,
        patient_ids: Vec<Uuid>,
        scheduled_at: DateTime<Utc>,
    ) -> Uuid {
        let now = Utc::now();
        let message = ScheduledMessage {
            id: Uuid::new_v4(),
            clinic_id,
            user_id,
            message: text.to_string(),
            scheduled_at,
            recipient_count: patient_ids.len() as i32,
            patient_ids,
            sent_count: 0,
            failed_count: 0,
            status: ScheduledStatus::Pending.as_str().to_string(),
            claimed_at: None,
            sent_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            synced_at: None,
            sync_status: "local".to_string(),
        };
        let id = message.id;
        locked(&self.state).messages.insert(id, message);
        id
    }

    /// Simulate a worker that died mid fan-out
    pub fn mark_processing(&self, id: Uuid, claimed_at: DateTime<Utc>, sent: i32, failed: i32) {
        if let Some(message) = locked(&self.state).messages.get_mut(&id) {
            message.status = ScheduledStatus::Processing.as_str().to_string();
            message.claimed_at = Some(claimed_at);
            message.sent_count = sent;
            message.failed_count = failed;
        }
    }

    pub fn deny_claims(&self, deny: bool) {
        locked(&self.state).deny_claims = deny;
    }

    /// Panics when the message does not exist
    pub fn message(&self, id: Uuid) -> ScheduledMessage {
        locked(&self.state).messages[&id].clone()
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut ScheduledMessage)) {
        if let Some(message) = locked(&self.state).messages.get_mut(&id) {
            f(message);
            message.updated_at = Utc::now();
        }
    }
}

#[async_trait]
impl DispatchStore for MemoryDispatchStore {
    async fn recover_stale(&self, grace: Duration) -> Result<u64, DispatchError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = locked(&self.state);
        let mut recovered = 0;
        for message in state.messages.values_mut() {
            let heartbeat = message.claimed_at.unwrap_or(message.updated_at);
            if message.status == "processing" && heartbeat < cutoff {
                message.status = ScheduledStatus::Pending.as_str().to_string();
                message.claimed_at = None;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, DispatchError> {
        let state = locked(&self.state);
        let mut due: Vec<_> = state
            .messages
            .values()
            .filter(|m| m.status == "pending" && m.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|m| (m.scheduled_at, m.created_at));
        Ok(due)
    }

    async fn claim(&self, id: Uuid) -> Result<bool, DispatchError> {
        let mut state = locked(&self.state);
        if state.deny_claims {
            return Ok(false);
        }
        match state.messages.get_mut(&id) {
            Some(message) if message.status == "pending" => {
                message.status = ScheduledStatus::Processing.as_str().to_string();
                message.claimed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn recipients(&self, message: &ScheduledMessage) -> Result<Vec<Recipient>, DispatchError> {
        let state = locked(&self.state);
        Ok(message
            .patient_ids
            .iter()
            .filter_map(|id| {
                let (clinic_id, name, phone) = state.patients.get(id)?;
                (*clinic_id == message.clinic_id && !phone.trim().is_empty()).then(|| Recipient {
                    patient_id: *id,
                    name: name.clone(),
                    phone: phone.clone(),
                })
            })
            .collect())
    }

    async fn set_recipient_count(&self, id: Uuid, count: usize) -> Result<(), DispatchError> {
        self.update(id, |m| m.recipient_count = count as i32);
        Ok(())
    }

    async fn record_progress(&self, id: Uuid, sent: usize, failed: usize, last_error: Option<&str>) -> Result<(), DispatchError> {
        self.update(id, |m| {
            m.sent_count = sent as i32;
            m.failed_count = failed as i32;
            m.claimed_at = Some(Utc::now());
            if let Some(err) = last_error {
                m.last_error = Some(err.to_string());
            }
        });
        Ok(())
    }

    async fn finish(&self, id: Uuid, status: ScheduledStatus, sent_at: DateTime<Utc>) -> Result<(), DispatchError> {
        self.update(id, |m| {
            m.status = status.as_str().to_string();
            m.sent_at = Some(sent_at);
            m.claimed_at = None;
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Browser

#[derive(Default)]
struct BrowserState {
    logged_in: bool,
    phone: String,
    hide_qr: bool,
    reject_numbers: bool,
    hide_send_button: bool,
    launches: usize,
    closed: usize,
    visited: Vec<String>,
    chat_rows: Option<Value>,
    message_rows: HashMap<String, Value>,
}

/// Scripted WhatsApp Web: logged in or showing a QR, with switchable send-page behavior
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl FakeBrowser {
    pub const QR_PNG: &'static [u8] = b"\x89PNG\r\n\x1a\nfake-qr";

    /// A profile that already holds credentials
    pub fn logged_in(phone: &str) -> Self {
        let browser = Self::default();
        browser.scan(phone);
        browser
    }

    /// The phone scans the QR code
    pub fn scan(&self, phone: &str) {
        let mut state = locked(&self.state);
        state.logged_in = true;
        state.phone = phone.to_string();
    }

    pub fn hide_qr(&self, hide: bool) {
        locked(&self.state).hide_qr = hide;
    }

    pub fn reject_numbers(&self, reject: bool) {
        locked(&self.state).reject_numbers = reject;
    }

    pub fn hide_send_button(&self, hide: bool) {
        locked(&self.state).hide_send_button = hide;
    }

    /// What the chat list script returns
    pub fn set_chat_rows(&self, rows: Value) {
        locked(&self.state).chat_rows = Some(rows);
    }

    /// What the message script returns once the chat with `phone` is open
    pub fn set_message_rows(&self, phone: &str, rows: Value) {
        locked(&self.state).message_rows.insert(phone.to_string(), rows);
    }

    pub fn launches(&self) -> usize {
        locked(&self.state).launches
    }

    pub fn closed(&self) -> usize {
        locked(&self.state).closed
    }

    pub fn visited(&self) -> Vec<String> {
        locked(&self.state).visited.clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self, _profile_dir: &Path) -> Result<Box<dyn BrowserPage>, WhatsAppError> {
        locked(&self.state).launches += 1;
        Ok(Box::new(FakePage {
            state: self.state.clone(),
            url: String::new(),
        }))
    }
}

struct FakePage {
    state: Arc<Mutex<BrowserState>>,
    url: String,
}

impl FakePage {
    fn present(&self, selector: &str) -> bool {
        let state = locked(&self.state);
        let on_send_page = self.url.contains("/send?");
        if READY_SELECTORS.contains(&selector) {
            state.logged_in
        } else if selector == QR_SELECTOR {
            !state.logged_in && !state.hide_qr
        } else if SEND_BUTTON_SELECTORS.contains(&selector) {
            on_send_page && !state.reject_numbers && !state.hide_send_button
        } else if INVALID_NUMBER_SELECTORS.contains(&selector) {
            on_send_page && state.reject_numbers
        } else if CONVERSATION_SELECTORS.contains(&selector) {
            on_send_page && state.logged_in && !state.reject_numbers
        } else {
            false
        }
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&mut self, url: &str) -> Result<(), WhatsAppError> {
        self.url = url.to_string();
        locked(&self.state).visited.push(url.to_string());
        Ok(())
    }

    async fn wait_for_any(&mut self, selectors: &[&str], timeout: Duration) -> Result<Option<String>, WhatsAppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = selectors.iter().find(|s| self.present(s)) {
                return Ok(Some(found.to_string()));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10).min(deadline - now)).await;
        }
    }

    async fn screenshot(&mut self, selector: &str) -> Result<Vec<u8>, WhatsAppError> {
        if self.present(selector) {
            Ok(Self::qr())
        } else {
            Err(WhatsAppError::Browser(format!("element not found: {}", selector)))
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), WhatsAppError> {
        if self.present(selector) {
            Ok(())
        } else {
            Err(WhatsAppError::Browser(format!("element not found: {}", selector)))
        }
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, WhatsAppError> {
        let state = locked(&self.state);
        if selector == PROFILE_TITLE_SELECTORS[0] && name == "title" && state.logged_in {
            return Ok(Some(state.phone.clone()));
        }
        Ok(None)
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, WhatsAppError> {
        let state = locked(&self.state);
        if script == CHAT_LIST_SCRIPT {
            return Ok(state.chat_rows.clone().unwrap_or_else(|| json!([])));
        }
        if script == MESSAGE_LIST_SCRIPT {
            let open = url::Url::parse(&self.url)
                .ok()
                .and_then(|u| u.query_pairs().find(|(k, _)| k == "phone").map(|(_, v)| v.into_owned()));
            return Ok(open
                .and_then(|phone| state.message_rows.get(&phone).cloned())
                .unwrap_or_else(|| json!([])));
        }
        Err(WhatsAppError::Browser("unexpected script".to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), WhatsAppError> {
        locked(&self.state).closed += 1;
        Ok(())
    }
}

impl FakePage {
    fn qr() -> Vec<u8> {
        FakeBrowser::QR_PNG.to_vec()
    }
}

// ---------------------------------------------------------------------------
// WhatsApp client

#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub at: tokio::time::Instant,
    pub user_id: Uuid,
    pub phone: String,
    pub text: String,
    pub delivered: bool,
}

#[derive(Default)]
struct ClientState {
    state: SessionState,
    sends: Vec<RecordedSend>,
    rejected: HashSet<String>,
    unavailable: bool,
}

/// Records every send attempt; numbers can be scripted to be rejected
#[derive(Clone, Default)]
pub struct FakeWhatsApp {
    inner: Arc<Mutex<ClientState>>,
}

impl FakeWhatsApp {
    pub const PHONE: &'static str = "+919000000001";

    pub fn ready() -> Self {
        let client = Self::default();
        locked(&client.inner).state = SessionState::Ready;
        client
    }

    pub fn reject_phone(&self, phone: &str) {
        locked(&self.inner).rejected.insert(phone.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        locked(&self.inner).unavailable = unavailable;
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        locked(&self.inner).sends.clone()
    }

    fn snapshot(state: SessionState) -> SessionStatus {
        match state {
            SessionState::Ready => SessionStatus {
                state,
                phone_number: Some(Self::PHONE.to_string()),
                ..Default::default()
            },
            SessionState::QrReady => SessionStatus {
                state,
                qr_code: Some("iVBORw0KGgo=".to_string()),
                ..Default::default()
            },
            other => SessionStatus::with_state(other),
        }
    }

    fn delivered(&self, user_id: Uuid) -> Vec<ChatMessage> {
        locked(&self.inner)
            .sends
            .iter()
            .filter(|s| s.delivered && s.user_id == user_id)
            .enumerate()
            .map(|(i, s)| ChatMessage {
                id: format!("fake-{}", i),
                phone: s.phone.clone(),
                body: s.text.clone(),
                from_me: true,
                timestamp: Some(Utc::now()),
            })
            .collect()
    }
}

#[async_trait]
impl WhatsAppClient for FakeWhatsApp {
    async fn initialize(&self, _user_id: Uuid) -> Result<SessionStatus, WhatsAppError> {
        let mut inner = locked(&self.inner);
        if inner.unavailable {
            return Err(WhatsAppError::Unavailable("webdriver unreachable".to_string()));
        }
        if inner.state != SessionState::Ready {
            inner.state = SessionState::QrReady;
        }
        Ok(Self::snapshot(inner.state))
    }

    async fn status(&self, _user_id: Uuid) -> Result<SessionStatus, WhatsAppError> {
        Ok(Self::snapshot(locked(&self.inner).state))
    }

    async fn wait_ready(&self, _user_id: Uuid, _timeout: Duration) -> Result<SessionStatus, WhatsAppError> {
        let state = locked(&self.inner).state;
        if state == SessionState::QrReady {
            return Err(WhatsAppError::Timeout("waiting for WhatsApp login".to_string()));
        }
        Ok(Self::snapshot(state))
    }

    async fn send(&self, user_id: Uuid, phone: &str, text: &str) -> Result<SendResult, WhatsAppError> {
        let mut inner = locked(&self.inner);
        if inner.unavailable {
            return Err(WhatsAppError::Unavailable("webdriver unreachable".to_string()));
        }
        if inner.state != SessionState::Ready {
            return Err(WhatsAppError::NotReady(inner.state));
        }
        let Some(digits) = sanitize_phone(phone) else {
            return Ok(SendResult::rejected(INVALID_PHONE));
        };
        let delivered = !inner.rejected.contains(&digits);
        inner.sends.push(RecordedSend {
            at: tokio::time::Instant::now(),
            user_id,
            phone: digits.clone(),
            text: text.to_string(),
            delivered,
        });
        if !delivered {
            return Ok(SendResult::rejected(INVALID_PHONE));
        }
        Ok(SendResult::sent(digits, json!({ "id": format!("fake-{}", inner.sends.len()) })))
    }

    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        let mut chats: Vec<ChatSummary> = Vec::new();
        for message in self.delivered(user_id) {
            match chats.iter_mut().find(|c| c.phone == message.phone) {
                Some(chat) => chat.last_message = Some(message.body),
                None => chats.push(ChatSummary {
                    name: message.phone.clone(),
                    phone: message.phone,
                    is_group: false,
                    unread_count: 0,
                    last_message: Some(message.body),
                    last_activity: None,
                }),
            }
        }
        Ok(chats)
    }

    async fn get_messages(&self, user_id: Uuid, phone: &str) -> Result<Vec<ChatMessage>, WhatsAppError> {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        Ok(self
            .delivered(user_id)
            .into_iter()
            .filter(|m| m.phone == digits)
            .collect())
    }

    async fn list_groups(&self, _user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        Ok(Vec::new())
    }

    async fn profile(&self, _user_id: Uuid) -> Result<Profile, WhatsAppError> {
        let status = Self::snapshot(locked(&self.inner).state);
        Ok(Profile {
            state: status.state,
            phone_number: status.phone_number,
        })
    }

    async fn disconnect(&self, _user_id: Uuid) -> Result<Ack, WhatsAppError> {
        let mut inner = locked(&self.inner);
        if inner.state == SessionState::Disconnected {
            return Ok(Ack::refused("Already disconnected"));
        }
        inner.state = SessionState::Disconnected;
        Ok(Ack::ok())
    }
}
