//! Delivery targets resolved from configuration.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{ChannelEntry, Config};

/// Source query parameters after merging defaults and overrides.
pub type QueryParams = BTreeMap<String, String>;

/// One delivery target, immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Opaque channel identifier
    pub id: String,

    /// Name of the configuration entry, for logs
    pub label: String,

    pub query_params: QueryParams,

    /// Lower-cased include keywords; empty means no include constraint
    pub include_keywords: BTreeSet<String>,

    /// Lower-cased exclude keywords
    pub exclude_keywords: BTreeSet<String>,

    /// Fetch and attach the full description before delivery
    pub attach_description: bool,
}

impl Destination {
    /// Resolve every configured channel, in order.
    ///
    /// `lookup` reads environment variables; any unresolvable channel is a
    /// configuration error that aborts the run.
    pub fn resolve_all<F>(config: &Config, lookup: F) -> Result<Vec<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        if config.channels.is_empty() {
            return Err(AppError::config("No channels configured"));
        }

        let defaults = normalize_params(&config.defaults.params, "defaults.params")?;
        config
            .channels
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                Self::resolve(entry, index, &defaults, config.pipeline.attach_descriptions, &lookup)
            })
            .collect()
    }

    fn resolve<F>(
        entry: &ChannelEntry,
        index: usize,
        defaults: &QueryParams,
        attach_default: bool,
        lookup: &F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (id, label) = match (&entry.channel_id, &entry.channel_env) {
            (Some(id), _) => (id.trim().to_string(), format!("channels[{index}]")),
            (None, Some(var)) => {
                let value = lookup(var).ok_or_else(|| {
                    AppError::config(format!("Channel env var not set: {var}"))
                })?;
                (value.trim().to_string(), var.clone())
            }
            (None, None) => {
                return Err(AppError::config(format!(
                    "channels[{index}] has neither channel_id nor channel_env"
                )));
            }
        };

        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::config(format!(
                "Invalid channel id for {label}: {id:?}"
            )));
        }

        let mut query_params = defaults.clone();
        query_params.extend(normalize_params(
            &entry.params,
            &format!("{label}.params"),
        )?);

        Ok(Self {
            id,
            label,
            query_params,
            include_keywords: keyword_set(&entry.include.entries()),
            exclude_keywords: keyword_set(&entry.exclude.entries()),
            attach_description: entry.attach_description.unwrap_or(attach_default),
        })
    }
}

/// Append-only fact that a posting reached a destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub posting_id: String,
    pub destination_id: String,
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn now(destination_id: &str, posting_id: &str) -> Self {
        Self {
            posting_id: posting_id.to_string(),
            destination_id: destination_id.to_string(),
            delivered_at: Utc::now(),
        }
    }
}

fn keyword_set(entries: &[String]) -> BTreeSet<String> {
    entries.iter().map(|k| k.to_lowercase()).collect()
}

/// Render scalar TOML values as query strings.
fn normalize_params(
    raw: &BTreeMap<String, toml::Value>,
    context: &str,
) -> Result<QueryParams> {
    raw.iter()
        .map(|(key, value)| {
            let rendered = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(AppError::config(format!(
                        "{context}.{key} must be a scalar, got {}",
                        other.type_str()
                    )));
                }
            };
            Ok((key.clone(), rendered))
        })
        .collect()
}
