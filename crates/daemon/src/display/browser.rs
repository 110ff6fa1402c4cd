//! Browser-backed display driven through WebDriver.

use super::webdriver::{WebDriverSession, WindowRect, KEY_SPACE};
use super::{Backend, DisplayController, DisplayError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Player element on an embed page.
pub const PLAYER_SELECTOR: &str = "video.video-stream";

const CHROMIUM_EXCLUDED_SWITCHES: [&str; 4] = [
    "disable-sync",
    "disable-signin-promo",
    "enable-automation",
    "disable-infobars",
];

/// Session capabilities for a kiosk-mode window of `backend`.
pub fn capabilities(backend: Backend) -> Value {
    match backend {
        Backend::Chrome => json!({
            "browserName": "chrome",
            "goog:chromeOptions": {
                "args": ["--kiosk"],
                "excludeSwitches": CHROMIUM_EXCLUDED_SWITCHES,
                "useAutomationExtension": false,
            },
        }),
        Backend::Firefox => json!({
            "browserName": "firefox",
            "moz:firefoxOptions": {
                "args": ["--kiosk"],
                "prefs": {
                    "permissions.default.image": 2,
                    "permissions.default.stylesheet": 2,
                    "dom.disable_open_during_load": true,
                    "identity.fxaccounts.enabled": false,
                },
            },
        }),
        Backend::Edge => json!({
            "browserName": "MicrosoftEdge",
            "ms:edgeOptions": {
                "args": ["--kiosk"],
                "excludeSwitches": CHROMIUM_EXCLUDED_SWITCHES,
                "useAutomationExtension": false,
            },
        }),
    }
}

/// One browser window pinned to one screen.
pub struct BrowserDisplay {
    session: WebDriverSession,
    backend: Backend,
    wait: Duration,
    current: Mutex<Option<String>>,
}

impl BrowserDisplay {
    /// Open a browser window through the driver at `webdriver_url` and place it at `rect`.
    pub async fn open(
        backend: Backend,
        webdriver_url: &str,
        rect: WindowRect,
        wait: Duration,
    ) -> Result<Self, DisplayError> {
        let client = reqwest::Client::builder().build()?;
        let session = WebDriverSession::start(client, webdriver_url, capabilities(backend)).await?;

        if let Err(e) = session.set_window_rect(rect).await {
            // Do not leak the browser when placement fails.
            let _ = session.delete().await;
            return Err(e.into());
        }

        info!(
            backend = %backend,
            session = %session.id(),
            x = rect.x,
            y = rect.y,
            "browser window opened"
        );

        Ok(Self {
            session,
            backend,
            wait,
            current: Mutex::new(None),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_current(&self, url: &str) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(url.to_string());
    }
}

#[async_trait]
impl DisplayController for BrowserDisplay {
    async fn play(&self, url: &str) -> Result<(), DisplayError> {
        if self.current().as_deref() == Some(url) {
            return Ok(());
        }

        debug!(url = %url, session = %self.session.id(), "starting video");
        self.session.navigate(url).await?;
        let player = self.session.wait_for(PLAYER_SELECTOR, self.wait).await?;
        self.session
            .send_keys(&player, &format!("f{}", KEY_SPACE))
            .await?;
        self.set_current(url);
        Ok(())
    }

    async fn is_idle(&self) -> Result<bool, DisplayError> {
        let ready = self
            .session
            .execute("return document.readyState", vec![])
            .await?;
        if ready.as_str() != Some("complete") {
            return Ok(false);
        }

        match self.session.find(PLAYER_SELECTOR).await? {
            None => Ok(true),
            Some(player) => {
                let paused = self
                    .session
                    .execute("return arguments[0].paused", vec![player.to_json()])
                    .await?;
                Ok(paused.as_bool().unwrap_or(false))
            }
        }
    }

    async fn close(&self) -> Result<(), DisplayError> {
        self.session.delete().await?;
        Ok(())
    }
}
