//! Video source adapter.
//!
//! [`VideoSource`] is the capability the scheduler side consumes: list video
//! URLs of one kind, one page at a time. [`YouTubeSource`] implements it on
//! top of the YouTube Data API search endpoint.

use crate::cache::PageToken;
use crate::video::VideoKind;
use async_trait::async_trait;
use livewall_config::ApiConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors from the upstream listing API.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("listing API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed listing response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One page of listing results.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPage {
    pub urls: Vec<String>,
    pub next_page_token: PageToken,
}

/// Capability to list playable video URLs.
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn fetch(
        &self,
        kind: VideoKind,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<VideoPage, SourceError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

/// Build the search query for one listing request.
pub fn search_params(
    api: &ApiConfig,
    kind: VideoKind,
    max_results: u32,
    page_token: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("part", "id".to_string()),
        ("channelId", api.channel_id.clone()),
        ("type", "video".to_string()),
        ("key", api.api_key.clone()),
    ];

    if kind == VideoKind::Live {
        params.push(("eventType", "live".to_string()));
    }
    params.push(("order", "viewCount".to_string()));

    if max_results > 0 {
        params.push(("maxResults", max_results.to_string()));
    }
    if let Some(token) = page_token.filter(|t| !t.is_empty()) {
        params.push(("pageToken", token.to_string()));
    }

    params
}

/// Turn a search response body into embed URLs and the next cursor.
pub fn parse_search_page(body: &str, embed_base: &str) -> Result<VideoPage, SourceError> {
    let response: SearchResponse = serde_json::from_str(body)?;

    let urls = response
        .items
        .into_iter()
        .filter_map(|item| item.id.video_id)
        .map(|id| format!("{}{}", embed_base, id))
        .collect();

    let next_page_token = match response.next_page_token {
        Some(token) if !token.is_empty() => PageToken::Next(token),
        _ => PageToken::Exhausted,
    };

    Ok(VideoPage {
        urls,
        next_page_token,
    })
}

/// YouTube Data API listing client.
#[derive(Debug, Clone)]
pub struct YouTubeSource {
    client: reqwest::Client,
    api: ApiConfig,
}

impl YouTubeSource {
    pub fn new(api: ApiConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .build()?;
        Ok(Self { client, api })
    }

    pub(crate) async fn search(
        &self,
        kind: VideoKind,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<String, SourceError> {
        let params = search_params(&self.api, kind, max_results, page_token);
        let response = self
            .client
            .get(&self.api.base_url)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl VideoSource for YouTubeSource {
    async fn fetch(
        &self,
        kind: VideoKind,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<VideoPage, SourceError> {
        info!(kind = %kind, max_results, "making API call to fetch {} videos", kind);
        let body = self.search(kind, max_results, page_token).await?;
        parse_search_page(&body, &self.api.embed_base)
    }
}
