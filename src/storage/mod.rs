//! Duplicate store: which postings each destination has already received.
//!
//! Storage is partitioned per destination and grows append-only:
//!
//! ```text
//! storage/
//! └── delivered/
//!     ├── 1203948172635.jsonl    # one DeliveryRecord per line
//!     └── 9981726354401.jsonl
//! ```
//!
//! Ordering contract used by the pipeline: `contains` strictly before a
//! delivery attempt, `record` strictly after a successful delivery.

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

// Re-export for convenience
pub use local::LocalStorage;

/// Persistent set of `(destination, posting)` pairs.
#[async_trait]
pub trait DuplicateStore: Send + Sync {
    /// Whether the posting was already delivered to the destination.
    async fn contains(&self, destination_id: &str, posting_id: &str) -> Result<bool>;

    /// Mark the posting as delivered. Recording twice has no further effect.
    async fn record(&self, destination_id: &str, posting_id: &str) -> Result<()>;

    /// Drop records delivered before `cutoff`. Returns how many were removed.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
