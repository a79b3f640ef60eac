use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::browser::{BrowserLauncher, BrowserPage};
use super::WhatsAppError;
use crate::config::WhatsAppConfig;

/// W3C key under which element references are returned
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4a5fb5dc7c43";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Launches Chrome through a chromedriver speaking the W3C WebDriver protocol
pub struct WebDriverLauncher {
    client: reqwest::Client,
    endpoint: String,
    headless: bool,
    page_load_timeout: Duration,
}

impl WebDriverLauncher {
    pub fn new(endpoint: &str, headless: bool, page_load_timeout: Duration) -> Result<Self, WhatsAppError> {
        let client = reqwest::Client::builder()
            .timeout(page_load_timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| WhatsAppError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            headless,
            page_load_timeout,
        })
    }

    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, WhatsAppError> {
        Self::new(
            &config.webdriver_url,
            config.headless,
            Duration::from_secs(config.navigation_timeout_secs),
        )
    }

    fn capabilities(&self, profile_dir: &Path) -> Value {
        let mut args = vec![
            format!("--user-data-dir={}", profile_dir.display()),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1280,900".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                    "timeouts": { "pageLoad": self.page_load_timeout.as_millis() as u64 }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, profile_dir: &Path) -> Result<Box<dyn BrowserPage>, WhatsAppError> {
        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&self.capabilities(profile_dir))
            .send()
            .await
            .map_err(|e| WhatsAppError::Unavailable(format!("webdriver unreachable: {}", e)))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| WhatsAppError::Browser(format!("invalid webdriver response: {}", e)))?;
        if !status.is_success() {
            return Err(driver_error(status, &body));
        }

        let session_id = body["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| WhatsAppError::Browser("webdriver returned no session id".to_string()))?;
        debug!("Started webdriver session {} for {}", session_id, profile_dir.display());

        Ok(Box::new(WebDriverPage {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
        }))
    }
}

fn driver_error(status: StatusCode, body: &Value) -> WhatsAppError {
    let code = body["value"]["error"].as_str().unwrap_or("unknown error");
    let message = body["value"]["message"].as_str().unwrap_or("");
    match code {
        "timeout" | "script timeout" => WhatsAppError::Timeout(format!("webdriver: {}", message)),
        "session not created" | "invalid session id" => {
            WhatsAppError::Unavailable(format!("{}: {}", code, message))
        }
        _ => WhatsAppError::Browser(format!("{} ({}): {}", code, status.as_u16(), message)),
    }
}

struct WebDriverPage {
    client: reqwest::Client,
    base: String,
}

impl WebDriverPage {
    async fn raw(&self, method: Method, path: &str, body: Option<Value>) -> Result<(StatusCode, Value), WhatsAppError> {
        let mut request = self.client.request(method, format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| WhatsAppError::Unavailable(format!("webdriver unreachable: {}", e)))?;
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, WhatsAppError> {
        let (status, body) = self.raw(method, path, body).await?;
        if !status.is_success() {
            return Err(driver_error(status, &body));
        }
        Ok(body["value"].clone())
    }

    async fn find(&self, selector: &str) -> Result<Option<String>, WhatsAppError> {
        let (status, body) = self
            .raw(
                Method::POST,
                "/element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        if status == StatusCode::NOT_FOUND && body["value"]["error"] == "no such element" {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(driver_error(status, &body));
        }
        Ok(body["value"][ELEMENT_KEY].as_str().map(str::to_string))
    }

    async fn element(&self, selector: &str) -> Result<String, WhatsAppError> {
        self.find(selector)
            .await?
            .ok_or_else(|| WhatsAppError::Browser(format!("element not found: {}", selector)))
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&mut self, url: &str) -> Result<(), WhatsAppError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn wait_for_any(&mut self, selectors: &[&str], timeout: Duration) -> Result<Option<String>, WhatsAppError> {
        let deadline = Instant::now() + timeout;
        loop {
            for selector in selectors {
                if self.find(selector).await?.is_some() {
                    return Ok(Some(selector.to_string()));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn screenshot(&mut self, selector: &str) -> Result<Vec<u8>, WhatsAppError> {
        let element = self.element(selector).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/screenshot", element), None)
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| WhatsAppError::Browser("screenshot was not a string".to_string()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| WhatsAppError::Browser(format!("screenshot decode: {}", e)))
    }

    async fn click(&mut self, selector: &str) -> Result<(), WhatsAppError> {
        let element = self.element(selector).await?;
        self.command(Method::POST, &format!("/element/{}/click", element), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>, WhatsAppError> {
        let Some(element) = self.find(selector).await? else {
            return Ok(None);
        };
        let value = self
            .command(Method::GET, &format!("/element/{}/attribute/{}", element, name), None)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, WhatsAppError> {
        self.command(Method::POST, "/execute/sync", Some(json!({ "script": script, "args": [] })))
            .await
    }

    async fn close(self: Box<Self>) -> Result<(), WhatsAppError> {
        self.command(Method::DELETE, "", None).await?;
        Ok(())
    }
}
