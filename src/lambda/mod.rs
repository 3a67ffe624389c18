// src/lambda/mod.rs

//! AWS Lambda handler for the relay.
//!
//! One invocation is one run:
//! 1. Loads configuration from S3 (or the bundle)
//! 2. Resolves destinations and credentials
//! 3. Runs the pipeline against the S3 duplicate store
//! 4. Cancels itself shortly before the invocation deadline

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{Credentials, LambdaConfigLoader, admin_channel};
use crate::error::Result;
use crate::models::Destination;
use crate::notify::DiscordNotifier;
use crate::pipeline::{RunContext, RunSummary, run_pipeline};
use crate::storage::s3::S3Storage;

/// Lambda invocation payload.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Restrict the run to these destination ids (all if empty)
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Lambda response payload.
#[derive(Debug, Default, Serialize)]
pub struct RunResponse {
    /// The run completed, possibly with failed destinations
    pub success: bool,

    /// Destinations processed in this run
    pub destinations: usize,

    /// Postings delivered across all destinations
    pub delivered: usize,

    pub failed_destinations: Vec<String>,

    /// The run stopped at the deadline before finishing
    pub cancelled: bool,

    /// Error message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl RunResponse {
    fn from_summary(summary: &RunSummary) -> Self {
        Self {
            success: true,
            destinations: summary.reports.len(),
            delivered: summary.delivered(),
            failed_destinations: summary.failed_destinations(),
            cancelled: summary.cancelled,
            error: None,
            execution_time_ms: 0,
        }
    }
}

/// Main Lambda handler function.
///
/// Fatal configuration and credential errors fail the invocation;
/// destination failures are reported in a successful response.
#[instrument(skip(event))]
pub async fn handler(event: LambdaEvent<RunRequest>) -> std::result::Result<RunResponse, LambdaError> {
    let start = std::time::Instant::now();
    let (request, context) = event.into_parts();

    info!("Starting run: channels={:?}", request.channels);

    match run(&request, context.deadline).await {
        Ok(mut response) => {
            response.execution_time_ms = start.elapsed().as_millis() as u64;
            info!(
                "Run completed: {} delivered across {} destinations in {}ms",
                response.delivered, response.destinations, response.execution_time_ms
            );
            Ok(response)
        }
        Err(e) => {
            error!("Run failed: {}", e);
            Err(e.into())
        }
    }
}

async fn run(request: &RunRequest, deadline_ms: u64) -> Result<RunResponse> {
    let storage = Arc::new(S3Storage::from_env().await?);
    let config = LambdaConfigLoader::new(&storage).load_config().await?;
    let credentials = Credentials::from_env()?;

    let env = |key: &str| std::env::var(key).ok();
    let destinations = select_destinations(Destination::resolve_all(&config, env)?, &request.channels);
    let admin = admin_channel(&config, env)?;

    let notifier = DiscordNotifier::new(&credentials.bot_token)
        .with_timeout(config.crawler.timeout_secs);
    let margin = Duration::from_secs(config.pipeline.deadline_margin_secs);

    let cancel = CancellationToken::new();
    let _stop_timer = cancel.clone().drop_guard();
    spawn_deadline_timer(cancel.clone(), run_budget(deadline_ms, now_ms(), margin));

    let ctx = RunContext::from_config(Arc::new(config), storage, Arc::new(notifier))?
        .with_admin_channel(admin)
        .with_cancel(cancel);

    let summary = run_pipeline(&ctx, &destinations).await;
    summary.log();
    if summary.cancelled {
        warn!("Deadline reached, run stopped early");
    }
    Ok(RunResponse::from_summary(&summary))
}

/// Keep the requested destinations, in configured order.
fn select_destinations(all: Vec<Destination>, requested: &[String]) -> Vec<Destination> {
    if requested.is_empty() {
        return all;
    }
    for id in requested {
        if !all.iter().any(|d| &d.id == id) {
            warn!("Requested channel {} is not configured", id);
        }
    }
    all.into_iter()
        .filter(|d| requested.contains(&d.id))
        .collect()
}

/// Time left before cancelling: until the deadline, minus the margin.
fn run_budget(deadline_ms: u64, now_ms: u64, margin: Duration) -> Duration {
    Duration::from_millis(deadline_ms.saturating_sub(now_ms)).saturating_sub(margin)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn spawn_deadline_timer(cancel: CancellationToken, budget: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(budget) => {
                warn!("Cancelling run {}ms before the deadline", budget.as_millis());
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;

    #[test]
    fn test_run_request_defaults() {
        let req: RunRequest = serde_json::from_str("{}").unwrap();
        assert!(req.channels.is_empty());
    }

    #[test]
    fn test_run_budget_leaves_margin() {
        let margin = Duration::from_secs(10);
        assert_eq!(run_budget(70_000, 10_000, margin), Duration::from_secs(50));
        assert_eq!(run_budget(5_000, 10_000, margin), Duration::ZERO);
        assert_eq!(run_budget(15_000, 10_000, margin), Duration::ZERO);
    }

    #[test]
    fn test_select_destinations_keeps_order() {
        let config = Config::from_toml_str(
            r#"
            [[channels]]
            channel_id = "1"
            [[channels]]
            channel_id = "2"
            [[channels]]
            channel_id = "3"
            "#,
        )
        .unwrap();
        let all = Destination::resolve_all(&config, |_| None).unwrap();

        let picked = select_destinations(all.clone(), &["3".to_string(), "1".to_string()]);
        let ids: Vec<_> = picked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);

        assert_eq!(select_destinations(all, &[]).len(), 3);
    }

    #[test]
    fn test_response_serialization() {
        let response = RunResponse {
            success: true,
            destinations: 2,
            delivered: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["delivered"], 3);
        assert!(json.get("error").is_none());
    }
}
