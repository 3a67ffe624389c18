//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP and paging behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// CSS selectors used to extract listings
    #[serde(default)]
    pub selectors: ListingSelectors,

    /// Orchestrator knobs
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// On-demand description lookup
    #[serde(default)]
    pub descriptions: DescriptionConfig,

    /// Duplicate store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Query parameters shared by every channel
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Destination definitions, processed in order
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(AppError::config("crawler.user_agents is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::config("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.page_size == 0 {
            return Err(AppError::config("crawler.page_size must be > 0"));
        }
        if self.crawler.max_consecutive_failures == 0 {
            return Err(AppError::config(
                "crawler.max_consecutive_failures must be > 0",
            ));
        }
        url::Url::parse(&self.crawler.search_url)
            .map_err(|e| AppError::config(format!("crawler.search_url: {e}")))?;
        url::Url::parse(&self.crawler.origin)
            .map_err(|e| AppError::config(format!("crawler.origin: {e}")))?;
        self.selectors.validate()?;
        if self.descriptions.chunk_chars == 0 || self.descriptions.chunk_chars > 2000 {
            return Err(AppError::config(
                "descriptions.chunk_chars must be between 1 and 2000",
            ));
        }
        if self.descriptions.cache_capacity == 0 {
            return Err(AppError::config("descriptions.cache_capacity must be > 0"));
        }
        Ok(())
    }
}

/// HTTP client and paging behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Search endpoint receiving the query parameters
    #[serde(default = "defaults::search_url")]
    pub search_url: String,

    /// Origin used to resolve relative posting links
    #[serde(default = "defaults::origin")]
    pub origin: String,

    /// Pool of User-Agent strings, one picked at random per request
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    /// Accept-Language header value
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Offset increment per page
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    /// Base delay between successful page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Upper bound of the random jitter added to the base delay
    #[serde(default = "defaults::request_jitter")]
    pub request_jitter_ms: u64,

    /// Pause after a failed page request in milliseconds
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_ms: u64,

    /// Failed attempts tolerated at one offset before the fetch is abandoned
    #[serde(default = "defaults::max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            search_url: defaults::search_url(),
            origin: defaults::origin(),
            user_agents: defaults::user_agents(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::timeout(),
            page_size: defaults::page_size(),
            request_delay_ms: defaults::request_delay(),
            request_jitter_ms: defaults::request_jitter(),
            retry_delay_ms: defaults::retry_delay(),
            max_consecutive_failures: defaults::max_consecutive_failures(),
        }
    }
}

/// CSS selectors for extracting listings from a search result page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// Selector for each listing item
    #[serde(default = "defaults::item_selector")]
    pub item: String,

    /// Title element within an item
    #[serde(default = "defaults::title_selector")]
    pub title: String,

    /// Company/byline element within an item
    #[serde(default = "defaults::company_selector")]
    pub company: String,

    /// Link element within an item
    #[serde(default = "defaults::link_selector")]
    pub link: String,

    /// HTML attribute holding the link target
    #[serde(default = "defaults::link_attr")]
    pub link_attr: String,

    /// Recency text element within an item
    #[serde(default = "defaults::time_selector")]
    pub time: String,

    /// Location element within an item
    #[serde(default = "defaults::location_selector")]
    pub location: String,

    /// Description container on a posting's own page
    #[serde(default = "defaults::description_selector")]
    pub description: String,
}

impl ListingSelectors {
    fn validate(&self) -> Result<()> {
        for selector in [
            &self.item,
            &self.title,
            &self.company,
            &self.link,
            &self.time,
            &self.location,
            &self.description,
        ] {
            Selector::parse(selector).map_err(|e| AppError::selector(selector, format!("{e:?}")))?;
        }
        Ok(())
    }
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            item: defaults::item_selector(),
            title: defaults::title_selector(),
            company: defaults::company_selector(),
            link: defaults::link_selector(),
            link_attr: defaults::link_attr(),
            time: defaults::time_selector(),
            location: defaults::location_selector(),
            description: defaults::description_selector(),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Freshness window for the recency classifier
    #[serde(default = "defaults::recency_window")]
    pub recency_window_minutes: u64,

    /// Send a count of new postings after each destination that delivered
    /// at least one. A destination interrupted by cancellation gets none.
    #[serde(default)]
    pub send_summary: bool,

    /// Attach full descriptions unless a channel says otherwise
    #[serde(default)]
    pub attach_descriptions: bool,

    /// Environment variable naming an operator channel for failure reports
    #[serde(default)]
    pub admin_channel_env: Option<String>,

    /// Embed color for posting messages
    #[serde(default = "defaults::embed_color")]
    pub embed_color: u32,

    /// Seconds before the invoker's deadline at which the run is cancelled
    #[serde(default = "defaults::deadline_margin")]
    pub deadline_margin_secs: u64,
}

impl PipelineConfig {
    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.recency_window_minutes.saturating_mul(60))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recency_window_minutes: defaults::recency_window(),
            send_summary: false,
            attach_descriptions: false,
            admin_channel_env: None,
            embed_color: defaults::embed_color(),
            deadline_margin_secs: defaults::deadline_margin(),
        }
    }
}

/// Description lookup and cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionConfig {
    #[serde(default = "defaults::cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "defaults::cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Descriptions longer than this are truncated
    #[serde(default = "defaults::max_description_chars")]
    pub max_chars: usize,

    /// Attachment chunk size, capped by the chat platform at 2000
    #[serde(default = "defaults::chunk_chars")]
    pub chunk_chars: usize,
}

impl Default for DescriptionConfig {
    fn default() -> Self {
        Self {
            cache_capacity: defaults::cache_capacity(),
            cache_ttl_secs: defaults::cache_ttl(),
            max_chars: defaults::max_description_chars(),
            chunk_chars: defaults::chunk_chars(),
        }
    }
}

/// Duplicate store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local backend
    #[serde(default = "defaults::storage_dir")]
    pub dir: String,

    /// Drop delivery records older than this many days (0 keeps everything)
    #[serde(default)]
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: defaults::storage_dir(),
            retention_days: 0,
        }
    }
}

/// Values shared by every channel.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,
}

/// One `[[channels]]` entry as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelEntry {
    /// Destination id given inline
    #[serde(default)]
    pub channel_id: Option<String>,

    /// Environment variable holding the destination id
    #[serde(default)]
    pub channel_env: Option<String>,

    #[serde(default)]
    pub include: KeywordList,

    #[serde(default)]
    pub exclude: KeywordList,

    /// Per-channel override of `pipeline.attach_descriptions`
    #[serde(default)]
    pub attach_description: Option<bool>,

    /// Query parameter overrides, merged over the defaults
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,
}

/// Keywords written either as one comma-delimited string or as a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum KeywordList {
    Delimited(String),
    List(Vec<String>),
}

impl KeywordList {
    /// Trimmed, non-empty entries in declaration order.
    pub fn entries(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            KeywordList::Delimited(s) => s.split(',').collect(),
            KeywordList::List(items) => items.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for KeywordList {
    fn default() -> Self {
        KeywordList::List(Vec::new())
    }
}

mod defaults {
    // Crawler defaults
    pub fn search_url() -> String {
        "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search".into()
    }
    pub fn origin() -> String {
        "https://www.linkedin.com".into()
    }
    pub fn user_agents() -> Vec<String> {
        vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".into(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into(),
            "Mozilla/5.0 (X11; Linux x86_64; rv:123.0) Gecko/20100101 Firefox/123.0".into(),
        ]
    }
    pub fn accept_language() -> String {
        "en-US,en;q=0.9".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn page_size() -> usize {
        10
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn request_jitter() -> u64 {
        1000
    }
    pub fn retry_delay() -> u64 {
        2000
    }
    pub fn max_consecutive_failures() -> u32 {
        5
    }

    // Selector defaults
    pub fn item_selector() -> String {
        "li".into()
    }
    pub fn title_selector() -> String {
        "h3".into()
    }
    pub fn company_selector() -> String {
        "h4".into()
    }
    pub fn link_selector() -> String {
        "a".into()
    }
    pub fn link_attr() -> String {
        "href".into()
    }
    pub fn time_selector() -> String {
        "time".into()
    }
    pub fn location_selector() -> String {
        ".job-search-card__location".into()
    }
    pub fn description_selector() -> String {
        "div.show-more-less-html__markup, div.description__text, div.jobs-description__container"
            .into()
    }

    // Pipeline defaults
    pub fn recency_window() -> u64 {
        5
    }
    pub fn embed_color() -> u32 {
        0x0099ff
    }
    pub fn deadline_margin() -> u64 {
        10
    }

    // Description defaults
    pub fn cache_capacity() -> usize {
        256
    }
    pub fn cache_ttl() -> u64 {
        900
    }
    pub fn max_description_chars() -> usize {
        4000
    }
    pub fn chunk_chars() -> usize {
        2000
    }

    // Storage defaults
    pub fn storage_dir() -> String {
        "storage".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agents() {
        let mut config = Config::default();
        config.crawler.user_agents = vec!["  ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_chunks() {
        let mut config = Config::default();
        config.descriptions.chunk_chars = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_selector() {
        let mut config = Config::default();
        config.selectors.title = "[[h3".to_string();
        assert!(matches!(
            config.validate(),
            Err(AppError::Selector { .. })
        ));
    }

    #[test]
    fn default_recency_window_is_five_minutes() {
        let config = Config::default();
        assert_eq!(config.pipeline.recency_window(), Duration::from_secs(300));
    }

    #[test]
    fn parses_channels_with_both_keyword_forms() {
        let config = Config::from_toml_str(
            r#"
            [pipeline]
            recency_window_minutes = 50

            [defaults.params]
            keywords = "student"
            distance = 25

            [[channels]]
            channel_env = "JOBS_CHANNEL"
            include = "student, intern ,"
            exclude = ["Senior", " lead "]
            params = { keywords = "data" }
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.recency_window_minutes, 50);
        assert_eq!(config.channels.len(), 1);
        let channel = &config.channels[0];
        assert_eq!(channel.include.entries(), vec!["student", "intern"]);
        assert_eq!(channel.exclude.entries(), vec!["Senior", "lead"]);
        assert_eq!(channel.params["keywords"].as_str(), Some("data"));
        assert_eq!(config.defaults.params["distance"].as_integer(), Some(25));
    }

    #[test]
    fn missing_keywords_mean_no_constraint() {
        let config = Config::from_toml_str(
            r#"
            [[channels]]
            channel_id = "1"
            "#,
        )
        .unwrap();
        assert!(config.channels[0].include.entries().is_empty());
        assert!(config.channels[0].exclude.entries().is_empty());
    }
}
