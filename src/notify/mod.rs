//! Outbound delivery of postings to destinations.

pub mod discord;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Posting;
use crate::utils::chunk_text;

pub use discord::DiscordNotifier;

/// A rendered message for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub url: Option<String>,
    pub body: String,
    pub color: Option<u32>,
    /// Follow-up text chunks, e.g. the job description
    pub attachments: Vec<String>,
}

impl Message {
    /// Render a posting. The description, if present, is split into
    /// attachments of at most `chunk_chars` characters.
    pub fn for_posting(posting: &Posting, color: u32, chunk_chars: usize) -> Self {
        let mut body = format!(
            "**Company:** {}\n**Posted:** {}",
            posting.company.as_deref().unwrap_or("Unknown"),
            posting.time_posted_raw.as_deref().unwrap_or("Unknown"),
        );
        if let Some(location) = &posting.location {
            body.push_str(&format!("\n**Location:** {location}"));
        }

        let attachments = posting
            .description
            .as_deref()
            .map(|text| chunk_text(text, chunk_chars))
            .unwrap_or_default();

        Self {
            title: posting.title.clone(),
            url: Some(posting.url.clone()),
            body,
            color: Some(color),
            attachments,
        }
    }

    /// Per-destination tally sent after a run's deliveries.
    pub fn summary(delivered: usize, color: u32) -> Self {
        Self {
            title: "Run summary".to_string(),
            url: None,
            body: format!("Found {delivered} new job(s)"),
            color: Some(color),
            attachments: Vec::new(),
        }
    }

    /// Plain notice for the operator channel.
    pub fn operator(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            body: body.into(),
            color: None,
            attachments: Vec::new(),
        }
    }
}

/// Sends messages to a destination by id.
///
/// `Ok(())` means the primary message was accepted. Attachment failures do
/// not turn a delivered message into a failure.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination_id: &str, message: &Message) -> Result<()>;
}

/// Writes messages to the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination_id: &str, message: &Message) -> Result<()> {
        log::info!(
            "[dry-run -> {}] {} {}",
            destination_id,
            message.title,
            message.url.as_deref().unwrap_or_default()
        );
        Ok(())
    }
}
