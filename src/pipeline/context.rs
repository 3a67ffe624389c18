// src/pipeline/context.rs

//! Run-scoped collaborators, passed explicitly through the pipeline.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::Config;
use crate::notify::Notifier;
use crate::services::{
    DescriptionService, HtmlListingExtractor, HttpPageSource, ListingExtractor, PageSource,
};
use crate::storage::DuplicateStore;
use crate::utils::http::create_async_client;

/// Everything a run needs. Nothing here outlives the run.
pub struct RunContext {
    pub config: Arc<Config>,
    pub source: Arc<dyn PageSource>,
    pub extractor: Arc<dyn ListingExtractor>,
    pub store: Arc<dyn DuplicateStore>,
    pub notifier: Arc<dyn Notifier>,
    pub descriptions: Option<Arc<DescriptionService>>,
    /// Operator channel for failure notices
    pub admin_channel: Option<String>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn PageSource>,
        extractor: Arc<dyn ListingExtractor>,
        store: Arc<dyn DuplicateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            source,
            extractor,
            store,
            notifier,
            descriptions: None,
            admin_channel: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Wire the HTTP source, the configured extractor and a description
    /// service from configuration.
    pub fn from_config(
        config: Arc<Config>,
        store: Arc<dyn DuplicateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let client = create_async_client(&config.crawler)?;
        let source: Arc<dyn PageSource> = Arc::new(HttpPageSource::new(client, &config.crawler));
        let extractor: Arc<dyn ListingExtractor> = Arc::new(HtmlListingExtractor::new(
            &config.selectors,
            &config.crawler.origin,
        )?);
        let descriptions = DescriptionService::new(
            Arc::clone(&source),
            Arc::clone(&extractor),
            config.crawler.user_agents.clone(),
            &config.descriptions,
        );

        Ok(Self::new(config, source, extractor, store, notifier)
            .with_descriptions(Arc::new(descriptions)))
    }

    pub fn with_descriptions(mut self, descriptions: Arc<DescriptionService>) -> Self {
        self.descriptions = Some(descriptions);
        self
    }

    pub fn with_admin_channel(mut self, channel: Option<String>) -> Self {
        self.admin_channel = channel;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
