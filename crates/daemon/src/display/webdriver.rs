//! Minimal W3C WebDriver client.
//!
//! Covers the handful of commands the browser displays and the page probe
//! need: session lifecycle, navigation, window placement, element lookup,
//! key input and synchronous script execution.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Key under which W3C WebDriver returns element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// WebDriver key code for the Space key.
pub const KEY_SPACE: char = '\u{E00D}';

const POLL_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("webdriver request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webdriver error {status} ({error}): {message}")]
    Command {
        status: u16,
        error: String,
        message: String,
    },

    #[error("unexpected webdriver response: {0}")]
    Malformed(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl WebDriverError {
    fn is_no_such_element(&self) -> bool {
        matches!(self, WebDriverError::Command { error, .. } if error == "no such element")
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct ErrorValue {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Opaque element reference returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

impl ElementId {
    fn from_value(value: &Value) -> Result<Self, WebDriverError> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| ElementId(id.to_string()))
            .ok_or_else(|| WebDriverError::Malformed(format!("not an element: {}", value)))
    }

    /// JSON form used when passing the element as a script argument.
    pub fn to_json(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

/// Window position and size in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// An open WebDriver session.
#[derive(Debug, Clone)]
pub struct WebDriverSession {
    client: reqwest::Client,
    base_url: String,
    id: String,
}

impl WebDriverSession {
    /// Open a session with the given `alwaysMatch` capabilities.
    pub async fn start(
        client: reqwest::Client,
        base_url: &str,
        capabilities: Value,
    ) -> Result<Self, WebDriverError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let response = client
            .post(format!("{}/session", base_url))
            .json(&body)
            .send()
            .await?;
        let session: NewSession = decode(response).await?;
        debug!(session = %session.session_id, "webdriver session started");

        Ok(Self {
            client,
            base_url,
            id: session.session_id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn navigate(&self, url: &str) -> Result<(), WebDriverError> {
        self.command::<Value>("url", json!({ "url": url })).await?;
        Ok(())
    }

    pub async fn set_window_rect(&self, rect: WindowRect) -> Result<(), WebDriverError> {
        let body = json!({
            "x": rect.x,
            "y": rect.y,
            "width": rect.width,
            "height": rect.height,
        });
        self.command::<Value>("window/rect", body).await?;
        Ok(())
    }

    /// First element matching `css`, or `None` when nothing matches.
    pub async fn find(&self, css: &str) -> Result<Option<ElementId>, WebDriverError> {
        match self.command::<Value>("element", locator(css)).await {
            Ok(value) => ElementId::from_value(&value).map(Some),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn find_all(&self, css: &str) -> Result<Vec<ElementId>, WebDriverError> {
        let values: Vec<Value> = self.command("elements", locator(css)).await?;
        values.iter().map(ElementId::from_value).collect()
    }

    /// Poll for an element matching `css` until `timeout` elapses.
    pub async fn wait_for(&self, css: &str, timeout: Duration) -> Result<ElementId, WebDriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find(css).await? {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(WebDriverError::Timeout(css.to_string()));
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    pub async fn send_keys(&self, element: &ElementId, text: &str) -> Result<(), WebDriverError> {
        let path = format!("element/{}/value", element.0);
        self.command::<Value>(&path, json!({ "text": text })).await?;
        Ok(())
    }

    /// Run `script` synchronously in the page and return its result.
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, WebDriverError> {
        self.command("execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    /// End the session and close its browser.
    pub async fn delete(&self) -> Result<(), WebDriverError> {
        let response = self
            .client
            .delete(format!("{}/session/{}", self.base_url, self.id))
            .send()
            .await?;
        decode::<Value>(response).await?;
        debug!(session = %self.id, "webdriver session closed");
        Ok(())
    }

    async fn command<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<T, WebDriverError> {
        let response = self
            .client
            .post(format!("{}/session/{}/{}", self.base_url, self.id, path))
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }
}

fn locator(css: &str) -> Value {
    json!({ "using": "css selector", "value": css })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, WebDriverError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let detail = serde_json::from_str::<Envelope<ErrorValue>>(&body)
            .map(|e| e.value)
            .unwrap_or(ErrorValue {
                error: "unknown error".to_string(),
                message: body,
            });
        return Err(WebDriverError::Command {
            status: status.as_u16(),
            error: detail.error,
            message: detail.message,
        });
    }

    serde_json::from_str::<Envelope<T>>(&body)
        .map(|e| e.value)
        .map_err(|e| WebDriverError::Malformed(e.to_string()))
}
