//! On-demand posting descriptions.
//!
//! The pipeline only hands out [`PostingSummary`] values. Full descriptions
//! are fetched when someone asks for them by posting id, and kept in a
//! bounded cache whose entries expire after a fixed time.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{DescriptionConfig, PostingSummary};
use crate::services::{ListingExtractor, PageSource};
use crate::utils::http::pick_user_agent;
use crate::utils::truncate_chars;

struct CachedDescription {
    text: String,
    fetched_at: Instant,
}

/// Lazily fetches and caches description text keyed by posting id.
pub struct DescriptionService {
    source: Arc<dyn PageSource>,
    extractor: Arc<dyn ListingExtractor>,
    user_agents: Vec<String>,
    ttl: Duration,
    max_chars: usize,
    known: Mutex<LruCache<String, String>>,
    cache: Mutex<LruCache<String, CachedDescription>>,
}

impl DescriptionService {
    pub fn new(
        source: Arc<dyn PageSource>,
        extractor: Arc<dyn ListingExtractor>,
        user_agents: Vec<String>,
        config: &DescriptionConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            extractor,
            user_agents,
            ttl: Duration::from_secs(config.cache_ttl_secs),
            max_chars: config.max_chars,
            known: Mutex::new(LruCache::new(capacity)),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Remember where a posting lives so it can be described later.
    pub async fn register(&self, summary: &PostingSummary) {
        self.known
            .lock()
            .await
            .put(summary.id.clone(), summary.url.clone());
    }

    /// Description for a registered posting id; `None` if the id is unknown.
    pub async fn describe(&self, posting_id: &str) -> Result<Option<String>> {
        let url = self.known.lock().await.get(posting_id).cloned();
        match url {
            Some(url) => self.fetch_cached(posting_id, &url).await.map(Some),
            None => Ok(None),
        }
    }

    /// Description for an arbitrary posting URL.
    pub async fn describe_url(&self, url: &str) -> Result<String> {
        let canonical = crate::utils::canonical_url(url)
            .ok_or_else(|| AppError::parse(format!("not a posting URL: {url}")))?;
        let id = crate::models::posting_id(&canonical);
        self.fetch_cached(&id, &canonical).await
    }

    async fn fetch_cached(&self, posting_id: &str, url: &str) -> Result<String> {
        {
            let mut cache = self.cache.lock().await;
            match cache.get(posting_id) {
                Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                    return Ok(entry.text.clone());
                }
                Some(_) => {
                    cache.pop(posting_id);
                }
                None => {}
            }
        }

        let text = self.fetch(url).await?;
        self.cache.lock().await.put(
            posting_id.to_string(),
            CachedDescription {
                text: text.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(text)
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        log::debug!("Fetching description from {}", url);
        let response = self
            .source
            .document(url, pick_user_agent(&self.user_agents))
            .await?;
        if !response.is_success() {
            return Err(AppError::Status(response.status));
        }
        let text = self
            .extractor
            .extract_description(&response.body)
            .ok_or_else(|| AppError::parse(format!("no description found at {url}")))?;
        Ok(truncate_chars(&text, self.max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingSelectors;
    use crate::services::HtmlListingExtractor;
    use crate::services::fetcher::testing::ScriptedSource;

    const DETAIL: &str =
        r#"<html><body><div class="description__text"><p>Analyse data.</p></div></body></html>"#;

    fn service(source: Arc<ScriptedSource>, config: DescriptionConfig) -> DescriptionService {
        let extractor =
            HtmlListingExtractor::new(&ListingSelectors::default(), "https://www.linkedin.com")
                .unwrap();
        DescriptionService::new(source, Arc::new(extractor), vec!["ua".to_string()], &config)
    }

    fn summary(id: &str) -> PostingSummary {
        PostingSummary {
            id: id.to_string(),
            title: "Student Data Analyst".to_string(),
            company: None,
            url: format!("https://www.linkedin.com/jobs/view/{id}"),
            time_posted: None,
        }
    }

    fn source_with_detail() -> Arc<ScriptedSource> {
        let mut source = ScriptedSource::new(Vec::new());
        source.document_body = Some(DETAIL.to_string());
        Arc::new(source)
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let svc = service(source_with_detail(), DescriptionConfig::default());
        assert!(svc.describe("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetches_once_then_serves_from_cache() {
        let source = source_with_detail();
        let svc = service(Arc::clone(&source), DescriptionConfig::default());
        svc.register(&summary("1")).await;

        assert_eq!(svc.describe("1").await.unwrap().as_deref(), Some("Analyse data."));
        assert_eq!(svc.describe("1").await.unwrap().as_deref(), Some("Analyse data."));
        assert_eq!(source.documents.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let source = source_with_detail();
        let config = DescriptionConfig {
            cache_ttl_secs: 0,
            ..DescriptionConfig::default()
        };
        let svc = service(Arc::clone(&source), config);
        svc.register(&summary("1")).await;

        svc.describe("1").await.unwrap();
        svc.describe("1").await.unwrap();
        assert_eq!(source.documents.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cache_is_bounded() {
        let source = source_with_detail();
        let config = DescriptionConfig {
            cache_capacity: 1,
            ..DescriptionConfig::default()
        };
        let svc = service(Arc::clone(&source), config);
        svc.register(&summary("1")).await;
        svc.register(&summary("2")).await;

        // Capacity one: registering "2" evicted "1".
        assert!(svc.describe("1").await.unwrap().is_none());
        assert!(svc.describe("2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_page_is_an_error() {
        let source = Arc::new(ScriptedSource::new(Vec::new()));
        let svc = service(source, DescriptionConfig::default());
        svc.register(&summary("1")).await;
        assert!(matches!(svc.describe("1").await, Err(AppError::Status(404))));
    }

    #[tokio::test]
    async fn describe_url_uses_canonical_id() {
        let source = source_with_detail();
        let svc = service(Arc::clone(&source), DescriptionConfig::default());

        svc.describe_url("https://www.linkedin.com/jobs/view/9?refId=a").await.unwrap();
        svc.describe_url("https://www.linkedin.com/jobs/view/9?refId=b").await.unwrap();

        let documents = source.documents.lock().unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0], "https://www.linkedin.com/jobs/view/9");
    }
}
