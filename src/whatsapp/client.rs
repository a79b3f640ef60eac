use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    Ack, ChatMessage, ChatSummary, Profile, SendResult, SessionManager, SessionSettings, SessionStatus, WebDriverLauncher,
    WhatsAppError,
};
use crate::config::WhatsAppConfig;

/// Command surface used by the HTTP handlers and the dispatcher
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
    async fn initialize(&self, user_id: Uuid) -> Result<SessionStatus, WhatsAppError>;
    async fn status(&self, user_id: Uuid) -> Result<SessionStatus, WhatsAppError>;
    async fn wait_ready(&self, user_id: Uuid, timeout: Duration) -> Result<SessionStatus, WhatsAppError>;
    async fn send(&self, user_id: Uuid, phone: &str, text: &str) -> Result<SendResult, WhatsAppError>;
    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError>;
    async fn get_messages(&self, user_id: Uuid, phone: &str) -> Result<Vec<ChatMessage>, WhatsAppError>;
    async fn list_groups(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError>;
    async fn profile(&self, user_id: Uuid) -> Result<Profile, WhatsAppError>;
    async fn disconnect(&self, user_id: Uuid) -> Result<Ack, WhatsAppError>;
}

/// Sessions hosted in this process
pub struct LocalWhatsApp {
    manager: Arc<SessionManager>,
}

impl LocalWhatsApp {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Chrome driven through the configured chromedriver endpoint
    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, WhatsAppError> {
        let launcher = WebDriverLauncher::from_config(config)?;
        let manager = SessionManager::new(Arc::new(launcher), SessionSettings::from_config(config));
        Ok(Self::new(Arc::new(manager)))
    }
}

/// The remote worker when `WHATSAPP_SERVICE_URL` is set, in-process sessions otherwise.
/// The session manager is returned too so the caller can shut it down.
pub fn connect(config: &WhatsAppConfig) -> Result<(Arc<dyn WhatsAppClient>, Option<Arc<SessionManager>>), WhatsAppError> {
    match RemoteWhatsApp::from_config(config)? {
        Some(remote) => {
            let client: Arc<dyn WhatsAppClient> = Arc::new(remote);
            Ok((client, None))
        }
        None => {
            let local = LocalWhatsApp::from_config(config)?;
            let manager = local.manager().clone();
            let client: Arc<dyn WhatsAppClient> = Arc::new(local);
            Ok((client, Some(manager)))
        }
    }
}

#[async_trait]
impl WhatsAppClient for LocalWhatsApp {
    async fn initialize(&self, user_id: Uuid) -> Result<SessionStatus, WhatsAppError> {
        self.manager.initialize(user_id).await
    }

    async fn status(&self, user_id: Uuid) -> Result<SessionStatus, WhatsAppError> {
        Ok(self.manager.status(user_id))
    }

    async fn wait_ready(&self, user_id: Uuid, timeout: Duration) -> Result<SessionStatus, WhatsAppError> {
        self.manager.wait_ready(user_id, timeout).await
    }

    async fn send(&self, user_id: Uuid, phone: &str, text: &str) -> Result<SendResult, WhatsAppError> {
        self.manager.send(user_id, phone, text).await
    }

    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        self.manager.list_chats(user_id).await
    }

    async fn get_messages(&self, user_id: Uuid, phone: &str) -> Result<Vec<ChatMessage>, WhatsAppError> {
        self.manager.get_messages(user_id, phone).await
    }

    async fn list_groups(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        self.manager.list_groups(user_id).await
    }

    async fn profile(&self, user_id: Uuid) -> Result<Profile, WhatsAppError> {
        Ok(self.manager.profile(user_id))
    }

    async fn disconnect(&self, user_id: Uuid) -> Result<Ack, WhatsAppError> {
        Ok(self.manager.disconnect(user_id).await)
    }
}

/// JSON-over-HTTP client for a `clinic worker` process
pub struct RemoteWhatsApp {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteWhatsApp {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, WhatsAppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WhatsAppError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &WhatsAppConfig) -> Result<Option<Self>, WhatsAppError> {
        config
            .service_url
            .as_deref()
            .map(|url| {
                Self::new(
                    url,
                    config.worker_token.clone(),
                    Duration::from_secs(config.request_timeout_secs),
                )
            })
            .transpose()
    }

    async fn call<T: DeserializeOwned>(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<T, WhatsAppError> {
        let mut request = self.client.request(method, format!("{}/api{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WhatsAppError::Timeout(format!("WhatsApp worker: {}", e))
            } else {
                WhatsAppError::Unavailable(format!("WhatsApp worker unreachable: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| WhatsAppError::Upstream(format!("invalid worker response: {}", e)));
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Err(remote_error(status, &body))
    }
}

/// Map a worker failure back onto the local error kinds
fn remote_error(status: StatusCode, body: &Value) -> WhatsAppError {
    let message = body["message"]
        .as_str()
        .or_else(|| body["error"].as_str())
        .unwrap_or("WhatsApp worker request failed")
        .to_string();
    match status {
        StatusCode::SERVICE_UNAVAILABLE => WhatsAppError::Unavailable(message),
        StatusCode::GATEWAY_TIMEOUT => WhatsAppError::Timeout(message),
        StatusCode::CONFLICT if body["code"] == "WHATSAPP_NOT_READY" => {
            let state = body["state"]
                .as_str()
                .and_then(|s| serde_json::from_value(json!(s)).ok())
                .unwrap_or_default();
            WhatsAppError::NotReady(state)
        }
        StatusCode::BAD_REQUEST if message == super::INVALID_PHONE => WhatsAppError::InvalidPhone,
        _ => WhatsAppError::Upstream(format!("{} ({})", message, status.as_u16())),
    }
}

#[async_trait]
impl WhatsAppClient for RemoteWhatsApp {
    async fn initialize(&self, user_id: Uuid) -> Result<SessionStatus, WhatsAppError> {
        self.call(reqwest::Method::POST, &format!("/initialize/{}", user_id), None)
            .await
    }

    async fn status(&self, user_id: Uuid) -> Result<SessionStatus, WhatsAppError> {
        self.call(reqwest::Method::GET, &format!("/status/{}", user_id), None)
            .await
    }

    async fn wait_ready(&self, user_id: Uuid, timeout: Duration) -> Result<SessionStatus, WhatsAppError> {
        self.call(
            reqwest::Method::POST,
            &format!("/wait-ready/{}", user_id),
            Some(json!({ "timeout_secs": timeout.as_secs() })),
        )
        .await
    }

    async fn send(&self, user_id: Uuid, phone: &str, text: &str) -> Result<SendResult, WhatsAppError> {
        self.call(
            reqwest::Method::POST,
            &format!("/send/{}", user_id),
            Some(json!({ "phone": phone, "message": text })),
        )
        .await
    }

    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        self.call(reqwest::Method::GET, &format!("/chats/{}", user_id), None)
            .await
    }

    async fn get_messages(&self, user_id: Uuid, phone: &str) -> Result<Vec<ChatMessage>, WhatsAppError> {
        let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        self.call(reqwest::Method::GET, &format!("/messages/{}/{}", user_id, digits), None)
            .await
    }

    async fn list_groups(&self, user_id: Uuid) -> Result<Vec<ChatSummary>, WhatsAppError> {
        self.call(reqwest::Method::GET, &format!("/groups/{}", user_id), None)
            .await
    }

    async fn profile(&self, user_id: Uuid) -> Result<Profile, WhatsAppError> {
        self.call(reqwest::Method::GET, &format!("/profile/{}", user_id), None)
            .await
    }

    async fn disconnect(&self, user_id: Uuid) -> Result<Ack, WhatsAppError> {
        self.call(reqwest::Method::POST, &format!("/disconnect/{}", user_id), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::SessionState;

    #[test]
    fn worker_failures_map_to_error_kinds() {
        let not_ready = json!({ "message": "not ready", "code": "WHATSAPP_NOT_READY", "state": "qr_ready" });
        assert!(matches!(
            remote_error(StatusCode::CONFLICT, &not_ready),
            WhatsAppError::NotReady(SessionState::QrReady)
        ));

        let down = json!({ "message": "webdriver unreachable" });
        assert!(matches!(remote_error(StatusCode::SERVICE_UNAVAILABLE, &down), WhatsAppError::Unavailable(_)));
        assert!(matches!(remote_error(StatusCode::GATEWAY_TIMEOUT, &down), WhatsAppError::Timeout(_)));

        let phone = json!({ "message": "Invalid phone number" });
        assert!(matches!(remote_error(StatusCode::BAD_REQUEST, &phone), WhatsAppError::InvalidPhone));

        let boom = json!({ "error": "boom" });
        match remote_error(StatusCode::INTERNAL_SERVER_ERROR, &boom) {
            WhatsAppError::Upstream(msg) => assert_eq!(msg, "boom (500)"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn remote_client_is_only_built_when_configured() {
        let mut config = crate::config::AppConfig::from_env().whatsapp;
        config.service_url = None;
        assert!(RemoteWhatsApp::from_config(&config).unwrap().is_none());

        config.service_url = Some("http://worker:3001/".into());
        let remote = RemoteWhatsApp::from_config(&config).unwrap().unwrap();
        assert_eq!(remote.base_url, "http://worker:3001");
    }
}
