//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// No API key in the file or the environment
    MissingApiKey,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::MissingApiKey => write!(
                f,
                "API key not provided in config or environment (API_KEY / LIVEWALL_API_KEY)"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Upstream video-listing API settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// API key sent with every listing request
    #[serde(default)]
    pub api_key: String,
    /// Search endpoint of the listing API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Channel whose videos are listed
    #[serde(default)]
    pub channel_id: String,
    /// Channel handle (without `@`), used by the streams-page probe
    #[serde(default)]
    pub channel: String,
    /// Prefix joined with a video id to build the playable URL
    #[serde(default = "default_embed_base")]
    pub embed_base: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://www.googleapis.com/youtube/v3/search".to_string()
}

fn default_embed_base() -> String {
    "https://www.youtube.com/embed/".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            channel_id: String::new(),
            channel: String::new(),
            embed_base: default_embed_base(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Result limits per listing request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_live_results")]
    pub live_results: u32,
    #[serde(default = "default_popular_results")]
    pub popular_results: u32,
}

fn default_live_results() -> u32 {
    10
}

fn default_popular_results() -> u32 {
    100
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            live_results: default_live_results(),
            popular_results: default_popular_results(),
        }
    }
}

/// Cache store location and validity windows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// JSON file holding the persisted cache
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Validity window of the live listing (default 1 day)
    #[serde(default = "default_live_ttl_secs")]
    pub live_ttl_secs: u64,
    /// Validity window of the popular listing (default 60 days)
    #[serde(default = "default_popular_ttl_secs")]
    pub popular_ttl_secs: u64,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("video_cache.json")
}

fn default_live_ttl_secs() -> u64 {
    86_400
}

fn default_popular_ttl_secs() -> u64 {
    60 * 86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            live_ttl_secs: default_live_ttl_secs(),
            popular_ttl_secs: default_popular_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn live_ttl(&self) -> Duration {
        Duration::from_secs(self.live_ttl_secs)
    }

    pub fn popular_ttl(&self) -> Duration {
        Duration::from_secs(self.popular_ttl_secs)
    }
}

/// Polling cadence for the poller and the display workers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    /// Live-stream poller interval
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-display idle check interval
    #[serde(default = "default_display_interval_secs")]
    pub display_interval_secs: u64,
    /// Upper bound on a single idle check, play or live probe
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Shuffle each batch of popular videos before queueing it
    #[serde(default = "default_shuffle_popular")]
    pub shuffle_popular: bool,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_display_interval_secs() -> u64 {
    5
}

fn default_probe_timeout_secs() -> u64 {
    4
}

fn default_shuffle_popular() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            display_interval_secs: default_display_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            shuffle_popular: default_shuffle_popular(),
        }
    }
}

impl ScheduleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_secs(self.display_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Geometry of one physical screen in desktop coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenConfig {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }
}

/// Display controller settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    /// Controller backend name: chrome, firefox or edge
    #[serde(default = "default_backend")]
    pub backend: String,
    /// WebDriver server endpoint
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// One display worker is started per screen
    #[serde(default = "default_screens")]
    pub screens: Vec<ScreenConfig>,
}

fn default_backend() -> String {
    "firefox".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_screens() -> Vec<ScreenConfig> {
    vec![ScreenConfig::default()]
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            webdriver_url: default_webdriver_url(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            screens: default_screens(),
        }
    }
}

/// Where the live-stream count comes from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LiveProbeSource {
    /// Listing API search restricted to live events
    #[default]
    Api,
    /// Channel streams page scraped through WebDriver
    Page,
}

/// Live-count probe settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveProbeConfig {
    #[serde(default)]
    pub source: LiveProbeSource,
    /// Entries subtracted from the scraped count (pinned non-live tiles)
    #[serde(default = "default_probe_offset")]
    pub offset: u32,
    /// How long the page probe waits for the stream grid to render
    #[serde(default = "default_probe_wait_secs")]
    pub wait_secs: u64,
    /// Upper bound on one probe, whatever the source
    #[serde(default = "default_live_probe_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_probe_offset() -> u32 {
    1
}

fn default_probe_wait_secs() -> u64 {
    10
}

fn default_live_probe_timeout_secs() -> u64 {
    30
}

impl LiveProbeConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LiveProbeConfig {
    fn default() -> Self {
        Self {
            source: LiveProbeSource::default(),
            offset: default_probe_offset(),
            wait_secs: default_probe_wait_secs(),
            timeout_secs: default_live_probe_timeout_secs(),
        }
    }
}

/// Status endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,
    #[serde(default = "default_status_bind")]
    pub bind: String,
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            bind: default_status_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub live_probe: LiveProbeConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - API_KEY, LIVEWALL_API_KEY -> api.api_key (LIVEWALL_API_KEY wins)
    /// - LIVEWALL_CHANNEL_ID -> api.channel_id
    /// - LIVEWALL_DISPLAY_BACKEND -> display.backend
    /// - LIVEWALL_POLL_INTERVAL_SECS -> schedule.poll_interval_secs
    /// - LIVEWALL_LIVE_TTL_SECS -> cache.live_ttl_secs
    /// - LIVEWALL_POPULAR_TTL_SECS -> cache.popular_ttl_secs
    pub fn apply_env_overrides(&mut self) {
        for var in ["API_KEY", "LIVEWALL_API_KEY"] {
            if let Ok(val) = env::var(var) {
                if !val.trim().is_empty() {
                    self.api.api_key = val;
                }
            }
        }

        if let Ok(val) = env::var("LIVEWALL_CHANNEL_ID") {
            if !val.is_empty() {
                self.api.channel_id = val;
            }
        }

        if let Ok(val) = env::var("LIVEWALL_DISPLAY_BACKEND") {
            if !val.is_empty() {
                self.display.backend = val;
            }
        }

        if let Ok(val) = env::var("LIVEWALL_POLL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.schedule.poll_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("LIVEWALL_LIVE_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.cache.live_ttl_secs = secs;
            }
        }

        if let Ok(val) = env::var("LIVEWALL_POPULAR_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.cache.popular_ttl_secs = secs;
            }
        }
    }

    /// Check values that make startup impossible
    ///
    /// A missing API key is fatal: the daemon refuses to start rather than retry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
