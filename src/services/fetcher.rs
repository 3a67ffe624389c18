// src/services/fetcher.rs

//! Paginated retrieval of search result pages.
//!
//! Pages are requested on demand at `start = 0, page_size, 2 * page_size, ...`
//! until a successful response yields no listing items. A non-success
//! response is retried at the same offset after a short pause; too many
//! consecutive failures abandon the fetch with [`AppError::DestinationFetch`].
//! Successful requests are spaced by a jittered delay.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use reqwest::header::{ACCEPT_LANGUAGE, USER_AGENT};

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, QueryParams, RawPosting};
use crate::services::ListingExtractor;
use crate::utils::http::{jittered_delay, pick_user_agent};

/// A raw HTTP answer from the source.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where documents come from. The HTTP implementation is [`HttpPageSource`];
/// tests script their own.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// GET the search endpoint with the given query.
    async fn search(&self, query: &[(String, String)], user_agent: &str) -> Result<PageResponse>;

    /// GET an arbitrary document, e.g. a posting's own page.
    async fn document(&self, url: &str, user_agent: &str) -> Result<PageResponse>;
}

/// Page source backed by `reqwest`.
pub struct HttpPageSource {
    client: reqwest::Client,
    search_url: String,
    accept_language: String,
}

impl HttpPageSource {
    pub fn new(client: reqwest::Client, config: &CrawlerConfig) -> Self {
        Self {
            client,
            search_url: config.search_url.clone(),
            accept_language: config.accept_language.clone(),
        }
    }

    async fn get(&self, request: reqwest::RequestBuilder, user_agent: &str) -> Result<PageResponse> {
        let response = request
            .header(USER_AGENT, user_agent)
            .header(ACCEPT_LANGUAGE, &self.accept_language)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(PageResponse { status, body })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn search(&self, query: &[(String, String)], user_agent: &str) -> Result<PageResponse> {
        let request = self.client.get(&self.search_url).query(query);
        self.get(request, user_agent).await
    }

    async fn document(&self, url: &str, user_agent: &str) -> Result<PageResponse> {
        self.get(self.client.get(url), user_agent).await
    }
}

/// Builds page cursors over a source with the configured paging policy.
pub struct PaginatedFetcher<'a> {
    source: &'a dyn PageSource,
    extractor: &'a dyn ListingExtractor,
    config: &'a CrawlerConfig,
}

impl<'a> PaginatedFetcher<'a> {
    pub fn new(
        source: &'a dyn PageSource,
        extractor: &'a dyn ListingExtractor,
        config: &'a CrawlerConfig,
    ) -> Self {
        Self {
            source,
            extractor,
            config,
        }
    }

    /// Start a fresh, lazy page sequence for one destination.
    pub fn pages(&self, destination: &str, params: &QueryParams) -> Pages<'a> {
        Pages {
            source: self.source,
            extractor: self.extractor,
            config: self.config,
            destination: destination.to_string(),
            params: params
                .iter()
                .filter(|(key, _)| key.as_str() != "start")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            offset: 0,
            exhausted: false,
            stats: FetchStats::default(),
        }
    }
}

/// Counters for one page sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Page requests sent, including failed ones
    pub requests: usize,
    /// Successful pages that contained items
    pub pages: usize,
    /// Failed page requests that were retried
    pub retries: usize,
    /// Listing items skipped because they failed to parse
    pub parse_failures: usize,
}

/// A finite, non-restartable sequence of result pages.
pub struct Pages<'a> {
    source: &'a dyn PageSource,
    extractor: &'a dyn ListingExtractor,
    config: &'a CrawlerConfig,
    destination: String,
    params: Vec<(String, String)>,
    offset: usize,
    exhausted: bool,
    stats: FetchStats,
}

impl<'a> Pages<'a> {
    /// Retrieve the next page of listings.
    ///
    /// `Ok(None)` once the source is exhausted; every later call returns
    /// `Ok(None)` as well. After an error the sequence is also finished.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawPosting>>> {
        if self.exhausted {
            return Ok(None);
        }

        if self.stats.pages > 0 {
            let delay = jittered_delay(self.config.request_delay(), self.config.request_jitter_ms);
            tokio::time::sleep(delay).await;
        }

        let body = match self.request_with_retry().await {
            Ok(body) => body,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };

        let items = self.extractor.extract(&body);
        if items.is_empty() {
            log::debug!(
                "[{}] Empty page at offset {}, source exhausted",
                self.destination,
                self.offset
            );
            self.exhausted = true;
            return Ok(None);
        }

        let postings = items
            .into_iter()
            .fold(Vec::new(), |mut acc, item| {
                match item {
                    Ok(raw) => acc.push(raw),
                    Err(e) => {
                        self.stats.parse_failures += 1;
                        log::warn!(
                            "[{}] Skipping listing at offset {}: {}",
                            self.destination,
                            self.offset,
                            e
                        );
                    }
                }
                acc
            });

        self.stats.pages += 1;
        self.offset += self.config.page_size;
        Ok(Some(postings))
    }

    /// Request the current offset until it succeeds or the cap is hit.
    async fn request_with_retry(&mut self) -> Result<String> {
        let mut failures: u32 = 0;

        loop {
            let mut query = self.params.clone();
            query.push(("start".to_string(), self.offset.to_string()));
            let user_agent = pick_user_agent(&self.config.user_agents);

            self.stats.requests += 1;
            let cause = match self.source.search(&query, user_agent).await {
                Ok(response) if response.is_success() => return Ok(response.body),
                Ok(response) => AppError::Status(response.status),
                Err(e) if e.is_transient() => e,
                Err(e) => {
                    return Err(AppError::DestinationFetch {
                        destination: self.destination.clone(),
                        offset: self.offset,
                        attempts: failures + 1,
                        cause: e.to_string(),
                    });
                }
            };

            failures += 1;
            if failures >= self.config.max_consecutive_failures {
                return Err(AppError::DestinationFetch {
                    destination: self.destination.clone(),
                    offset: self.offset,
                    attempts: failures,
                    cause: cause.to_string(),
                });
            }

            self.stats.retries += 1;
            log::warn!(
                "[{}] Page request at offset {} failed ({}), retry {}/{}",
                self.destination,
                self.offset,
                cause,
                failures,
                self.config.max_consecutive_failures - 1
            );
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    /// Offset of the next page to be requested.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn stats(&self) -> FetchStats {
        self.stats
    }

    /// View the remaining sequence as a stream of pages; the stream ends
    /// after the first error. Counters stay readable afterwards.
    pub fn stream(&mut self) -> impl Stream<Item = Result<Vec<RawPosting>>> + '_ {
        stream::unfold(Some(self), |pages| async move {
            let pages = pages?;
            match pages.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(pages))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
