//! Job posting data structures.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::utils::canonical_url;

/// One listing item as extracted from a result page, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPosting {
    pub title: Option<String>,
    pub company: Option<String>,
    /// Absolute link, already resolved against the source origin
    pub url: Option<String>,
    pub time_posted: Option<String>,
    pub location: Option<String>,
}

/// A validated job posting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Posting {
    /// Stable identifier derived from the canonical URL
    pub id: String,
    pub title: String,
    pub company: Option<String>,
    /// Canonical absolute URL
    pub url: String,
    pub time_posted_raw: Option<String>,
    pub location: Option<String>,
    /// Long-form text, only filled when a destination asks for it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Posting {
    /// Validate a raw listing. Items without a title or link are discarded.
    pub fn from_raw(raw: RawPosting) -> Option<Self> {
        let title = raw.title.filter(|t| !t.is_empty())?;
        let url = canonical_url(raw.url.as_deref().filter(|u| !u.is_empty())?)?;

        Some(Self {
            id: posting_id(&url),
            title,
            company: raw.company.filter(|c| !c.is_empty()),
            url,
            time_posted_raw: raw.time_posted.filter(|t| !t.is_empty()),
            location: raw.location.filter(|l| !l.is_empty()),
            description: None,
        })
    }

    /// Lightweight view handed out after delivery.
    pub fn summary(&self) -> PostingSummary {
        PostingSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            company: self.company.clone(),
            url: self.url.clone(),
            time_posted: self.time_posted_raw.clone(),
        }
    }
}

/// What the pipeline reports for each delivered posting. The full
/// description is looked up separately by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostingSummary {
    pub id: String,
    pub title: String,
    pub company: Option<String>,
    pub url: String,
    pub time_posted: Option<String>,
}

/// Hex SHA-256 digest of a canonical URL.
pub fn posting_id(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
