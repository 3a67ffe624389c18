// src/models/mod.rs

//! Domain models for the job relay.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod destination;
mod posting;

// Re-export all public types
pub use config::{
    ChannelEntry, Config, CrawlerConfig, DefaultsConfig, DescriptionConfig, KeywordList,
    ListingSelectors, PipelineConfig, StorageConfig,
};
pub use destination::{DeliveryRecord, Destination, QueryParams};
pub use posting::{Posting, PostingSummary, RawPosting, posting_id};
