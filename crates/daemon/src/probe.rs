//! Live-stream count probes.
//!
//! The poller only needs a number: how many streams the channel has live right
//! now. [`ApiLiveCounter`] asks the listing API; [`PageLiveCounter`] renders the
//! channel's streams page in a headless browser and counts its tiles.

use crate::display::browser::capabilities;
use crate::display::webdriver::{WebDriverError, WebDriverSession};
use crate::display::{Backend, DisplayError};
use crate::source::{parse_search_page, SourceError, YouTubeSource};
use crate::video::VideoKind;
use async_trait::async_trait;
use livewall_config::{ApiConfig, Config, LiveProbeSource};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Page size used when counting through the API.
pub const API_PROBE_RESULTS: u32 = 50;

/// Tile element on a channel's streams page.
pub const STREAM_TILE_SELECTOR: &str = "ytd-rich-grid-media";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    WebDriver(#[from] WebDriverError),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[async_trait]
pub trait LiveCounter: Send + Sync {
    async fn count_live_streams(&self) -> Result<usize, ProbeError>;
}

/// Counts live streams with a live-only API search.
pub struct ApiLiveCounter {
    source: YouTubeSource,
    embed_base: String,
}

impl ApiLiveCounter {
    pub fn new(api: ApiConfig) -> Result<Self, ProbeError> {
        let embed_base = api.embed_base.clone();
        Ok(Self {
            source: YouTubeSource::new(api)?,
            embed_base,
        })
    }
}

#[async_trait]
impl LiveCounter for ApiLiveCounter {
    async fn count_live_streams(&self) -> Result<usize, ProbeError> {
        let body = self
            .source
            .search(VideoKind::Live, API_PROBE_RESULTS, None)
            .await?;
        let page = parse_search_page(&body, &self.embed_base)?;
        Ok(page.urls.len())
    }
}

/// Streams page of a channel handle.
pub fn streams_url(channel: &str) -> String {
    format!(
        "https://www.youtube.com/@{}/streams",
        channel.trim_start_matches('@')
    )
}

/// Browser capabilities for a throwaway headless session.
pub fn headless_capabilities(backend: Backend) -> Value {
    let mut caps = capabilities(backend);
    let options_key = match backend {
        Backend::Chrome => "goog:chromeOptions",
        Backend::Firefox => "moz:firefoxOptions",
        Backend::Edge => "ms:edgeOptions",
    };
    caps[options_key]["args"] = serde_json::json!(["--headless"]);
    caps
}

/// Counts stream tiles on the channel's streams page.
pub struct PageLiveCounter {
    client: reqwest::Client,
    webdriver_url: String,
    backend: Backend,
    page_url: String,
    offset: usize,
    wait: Duration,
}

impl PageLiveCounter {
    pub fn new(
        webdriver_url: &str,
        backend: Backend,
        page_url: String,
        offset: u32,
        wait: Duration,
    ) -> Result<Self, ProbeError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            webdriver_url: webdriver_url.to_string(),
            backend,
            page_url,
            offset: offset as usize,
            wait,
        })
    }

    async fn count_tiles(&self, session: &WebDriverSession) -> Result<usize, WebDriverError> {
        session.navigate(&self.page_url).await?;
        session.wait_for(STREAM_TILE_SELECTOR, self.wait).await?;
        Ok(session.find_all(STREAM_TILE_SELECTOR).await?.len())
    }
}

/// Closes the headless session even when the count is dropped mid-flight,
/// e.g. by the poller's timeout.
struct SessionGuard(Option<WebDriverSession>);

impl SessionGuard {
    async fn close(mut self) {
        if let Some(session) = self.0.take() {
            if let Err(e) = session.delete().await {
                warn!(error = %e, "failed to close counting session");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.delete().await {
                        warn!(error = %e, "failed to close abandoned counting session");
                    }
                });
            }
            Err(_) => warn!("no runtime left to close abandoned counting session"),
        }
    }
}

#[async_trait]
impl LiveCounter for PageLiveCounter {
    async fn count_live_streams(&self) -> Result<usize, ProbeError> {
        let session = WebDriverSession::start(
            self.client.clone(),
            &self.webdriver_url,
            headless_capabilities(self.backend),
        )
        .await?;
        let guard = SessionGuard(Some(session.clone()));

        let counted = self.count_tiles(&session).await;
        guard.close().await;

        let tiles = counted?;
        debug!(tiles, offset = self.offset, "counted stream tiles");
        Ok(tiles.saturating_sub(self.offset))
    }
}

/// Build the probe selected by `live_probe.source`.
pub fn create_counter(config: &Config) -> Result<Arc<dyn LiveCounter>, ProbeError> {
    match config.live_probe.source {
        LiveProbeSource::Api => Ok(Arc::new(ApiLiveCounter::new(config.api.clone())?)),
        LiveProbeSource::Page => {
            let backend: Backend = config.display.backend.parse()?;
            Ok(Arc::new(PageLiveCounter::new(
                &config.display.webdriver_url,
                backend,
                streams_url(&config.api.channel),
                config.live_probe.offset,
                config.live_probe.wait(),
            )?))
        }
    }
}
