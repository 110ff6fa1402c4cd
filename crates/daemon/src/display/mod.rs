//! Display control.
//!
//! A display is anything that can be told to play a URL and asked whether it
//! has gone idle. The scheduler side only sees [`DisplayController`]; the
//! concrete browser variants live in [`browser`] and are picked by
//! [`create_controller`] from the configured backend name.

pub mod browser;
pub mod webdriver;
pub mod worker;

use async_trait::async_trait;
use livewall_config::{DisplayConfig, ScreenConfig};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub use browser::BrowserDisplay;
pub use webdriver::{WebDriverError, WebDriverSession, WindowRect};
pub use worker::{DisplayId, DisplayWorker, SharedDisplays};

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("unsupported display backend: {0}")]
    UnsupportedBackend(String),

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    WebDriver(#[from] WebDriverError),
}

/// Capability to show a video on one physical display.
#[async_trait]
pub trait DisplayController: Send + Sync {
    /// Start playing `url`. Playing the URL already shown is a no-op.
    async fn play(&self, url: &str) -> Result<(), DisplayError>;

    /// Whether the display has finished or paused its content.
    async fn is_idle(&self) -> Result<bool, DisplayError>;

    /// Release the display's resources.
    async fn close(&self) -> Result<(), DisplayError>;
}

/// Browser family driven through WebDriver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Chrome,
    Firefox,
    Edge,
}

impl FromStr for Backend {
    type Err = DisplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" => Ok(Backend::Chrome),
            "firefox" => Ok(Backend::Firefox),
            "edge" => Ok(Backend::Edge),
            _ => Err(DisplayError::UnsupportedBackend(s.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Chrome => write!(f, "chrome"),
            Backend::Firefox => write!(f, "firefox"),
            Backend::Edge => write!(f, "edge"),
        }
    }
}

/// Window of `width` x `height` centred on `screen`.
///
/// Windows larger than the screen are pinned to the screen origin.
pub fn centred_rect(screen: &ScreenConfig, width: u32, height: u32) -> WindowRect {
    let dx = (i64::from(screen.width) - i64::from(width)).max(0) / 2;
    let dy = (i64::from(screen.height) - i64::from(height)).max(0) / 2;
    WindowRect {
        x: screen.x.saturating_add(dx as i32),
        y: screen.y.saturating_add(dy as i32),
        width,
        height,
    }
}

/// Create the controller for one screen.
///
/// # Arguments
/// * `display` - Backend name, WebDriver endpoint and window size
/// * `screen` - Screen the window is placed on
/// * `wait` - How long `play` waits for the video element
///
/// # Returns
/// * `Ok(Box<dyn DisplayController>)` with an open browser window
/// * `Err(DisplayError)` for an unknown backend or an unreachable driver
pub async fn create_controller(
    display: &DisplayConfig,
    screen: &ScreenConfig,
    wait: Duration,
) -> Result<Box<dyn DisplayController>, DisplayError> {
    let backend: Backend = display.backend.parse()?;
    let rect = centred_rect(screen, display.window_width, display.window_height);
    let browser = BrowserDisplay::open(backend, &display.webdriver_url, rect, wait).await?;
    Ok(Box::new(browser))
}
