//! Discord bot delivery over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::notify::{Message, Notifier};
use crate::utils::truncate_chars;

const API_BASE: &str = "https://discord.com/api/v10";
const MAX_TITLE_CHARS: usize = 250;

#[derive(Clone)]
pub struct DiscordNotifier {
    token: String,
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client: reqwest::Client::new(),
            api_base: API_BASE.to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn endpoint(&self, channel_id: &str) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel_id)
    }

    /// POST one payload, retrying rate limits, server errors and transport
    /// failures with exponential backoff.
    async fn post(&self, channel_id: &str, payload: &MessagePayload) -> Result<()> {
        let url = self.endpoint(channel_id);
        let mut attempt: u8 = 0;

        loop {
            attempt += 1;
            let backoff = Duration::from_millis(500u64 << (attempt - 1));

            let res = self
                .client
                .post(&url)
                .header(AUTHORIZATION, format!("Bot {}", self.token))
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let failure = match res {
                Ok(rsp) if rsp.status().is_success() => return Ok(()),
                Ok(rsp) if rsp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let wait = rsp
                        .json::<RateLimited>()
                        .await
                        .map(|r| Duration::from_secs_f64(r.retry_after.max(0.0)))
                        .unwrap_or(backoff);
                    if attempt < self.max_retries {
                        log::warn!("Discord rate limited, retrying in {:?}", wait);
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    "rate limited".to_string()
                }
                Ok(rsp) if rsp.status().is_server_error() => {
                    format!("HTTP {}", rsp.status().as_u16())
                }
                Ok(rsp) => {
                    // Client errors (bad channel, missing permission) do not heal.
                    let status = rsp.status().as_u16();
                    let body = rsp.text().await.unwrap_or_default();
                    return Err(AppError::delivery(
                        channel_id,
                        format!("HTTP {status}: {}", truncate_chars(&body, 200)),
                    ));
                }
                Err(e) => format!("request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(AppError::delivery(channel_id, failure));
            }
            log::debug!(
                "Discord delivery to {} failed ({}), attempt {}/{}",
                channel_id,
                failure,
                attempt,
                self.max_retries
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, destination_id: &str, message: &Message) -> Result<()> {
        self.post(destination_id, &MessagePayload::primary(message))
            .await?;

        let total = message.attachments.len();
        for (index, chunk) in message.attachments.iter().enumerate() {
            let payload = MessagePayload::attachment(message, chunk, index + 1, total);
            if let Err(e) = self.post(destination_id, &payload).await {
                log::warn!(
                    "Attachment {}/{} for '{}' not delivered: {}",
                    index + 1,
                    total,
                    message.title,
                    e
                );
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RateLimited {
    retry_after: f64,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    embeds: Vec<Embed>,
}

impl MessagePayload {
    fn primary(message: &Message) -> Self {
        Self {
            embeds: vec![Embed {
                title: truncate_chars(&message.title, MAX_TITLE_CHARS),
                url: message.url.clone(),
                description: message.body.clone(),
                color: message.color,
            }],
        }
    }

    fn attachment(message: &Message, chunk: &str, index: usize, total: usize) -> Self {
        Self {
            embeds: vec![Embed {
                title: format!("Job Description ({index}/{total})"),
                url: None,
                description: chunk.to_string(),
                color: message.color,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message {
            title: "Student Data Analyst".to_string(),
            url: Some("https://www.linkedin.com/jobs/view/1".to_string()),
            body: "**Company:** Acme\n**Posted:** 1 minute ago".to_string(),
            color: Some(0x0099ff),
            attachments: vec!["part one".to_string(), "part two".to_string()],
        }
    }

    #[test]
    fn primary_payload_is_a_single_embed() {
        let json = serde_json::to_value(MessagePayload::primary(&message())).unwrap();
        let embed = &json["embeds"][0];
        assert_eq!(embed["title"], "Student Data Analyst");
        assert_eq!(embed["url"], "https://www.linkedin.com/jobs/view/1");
        assert_eq!(embed["color"], 0x0099ff);
        assert_eq!(json["embeds"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn attachment_payload_is_numbered() {
        let json = serde_json::to_value(MessagePayload::attachment(&message(), "part two", 2, 2))
            .unwrap();
        let embed = &json["embeds"][0];
        assert_eq!(embed["title"], "Job Description (2/2)");
        assert_eq!(embed["description"], "part two");
        assert!(embed.get("url").is_none());
    }

    #[test]
    fn long_titles_are_truncated() {
        let mut long = message();
        long.title = "t".repeat(400);
        let payload = MessagePayload::primary(&long);
        assert!(payload.embeds[0].title.chars().count() <= 256);

        long.title = "e\u{301}".repeat(300);
        let payload = MessagePayload::primary(&long);
        assert!(payload.embeds[0].title.chars().count() <= 256);
    }

    #[test]
    fn endpoint_targets_channel_messages() {
        let notifier = DiscordNotifier::new("token");
        assert_eq!(
            notifier.endpoint("123"),
            "https://discord.com/api/v10/channels/123/messages"
        );
    }
}
