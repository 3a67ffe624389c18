// src/pipeline/run.rs

//! Sequential run over all destinations: fetch, classify, filter, dedupe,
//! deliver.

use std::collections::HashSet;

use chrono::Utc;
use futures::StreamExt;

use crate::error::AppError;
use crate::models::{Destination, Posting, RawPosting};
use crate::notify::Message;
use crate::services::{PaginatedFetcher, destination_matches, is_recent};

use super::context::RunContext;
use super::report::{DestinationReport, DestinationState, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Deliver,
    /// Classify and dedupe only; nothing is sent or recorded
    Preview,
}

/// Run the full pipeline for every destination, in order.
///
/// Per-destination failures end up in that destination's report. The run
/// stops early, with `cancelled` set, once the context's token fires.
pub async fn run_pipeline(ctx: &RunContext, destinations: &[Destination]) -> RunSummary {
    if ctx.config.storage.retention_days > 0 {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(ctx.config.storage.retention_days));
        match ctx.store.prune(cutoff).await {
            Ok(0) => {}
            Ok(removed) => log::info!("Pruned {} expired delivery records", removed),
            Err(e) => log::warn!("Retention prune failed: {}", e),
        }
    }
    run(ctx, destinations, Mode::Deliver).await
}

/// Report what a run would deliver without delivering or recording.
pub async fn preview(ctx: &RunContext, destinations: &[Destination]) -> RunSummary {
    run(ctx, destinations, Mode::Preview).await
}

async fn run(ctx: &RunContext, destinations: &[Destination], mode: Mode) -> RunSummary {
    let started_at = Utc::now();
    let mut reports: Vec<DestinationReport> =
        destinations.iter().map(DestinationReport::new).collect();
    let mut cancelled = false;

    log::info!("Processing {} destinations", destinations.len());

    for (destination, report) in destinations.iter().zip(reports.iter_mut()) {
        if ctx.cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        if process_destination(ctx, destination, report, mode).await.is_err() {
            cancelled = true;
            break;
        }

        if mode == Mode::Deliver && ctx.config.pipeline.send_summary && report.delivered > 0 {
            let message = Message::summary(report.delivered, ctx.config.pipeline.embed_color);
            if let Err(e) = ctx.notifier.send(&destination.id, &message).await {
                log::debug!("[{}] Summary not sent: {}", report.label, e);
            }
        }
    }

    if cancelled {
        log::warn!("Run cancelled, remaining destinations skipped");
    }

    RunSummary {
        reports,
        cancelled,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Drive one destination through its states. `Err` only on cancellation.
async fn process_destination(
    ctx: &RunContext,
    destination: &Destination,
    report: &mut DestinationReport,
    mode: Mode,
) -> Result<(), AppError> {
    report.transition(DestinationState::Fetching);
    let raw = match fetch_all(ctx, destination, report).await {
        Ok(raw) => raw,
        Err(AppError::Cancelled) => return Err(AppError::Cancelled),
        Err(e) => {
            log::error!("[{}] Fetch failed, skipping destination: {}", report.label, e);
            report.error = Some(e.to_string());
            report.transition(DestinationState::FetchFailed);
            notify_operator(
                ctx,
                "Destination fetch failed",
                &format!("{} ({}): {}", report.label, destination.id, e),
            )
            .await;
            return Ok(());
        }
    };
    report.transition(DestinationState::Fetched);

    report.transition(DestinationState::Filtering);
    let candidates = filter_postings(ctx, destination, report, raw);

    report.transition(DestinationState::Delivering);
    for posting in candidates {
        if ctx.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        match ctx.store.contains(&destination.id, &posting.id).await {
            Ok(true) => {
                report.duplicates += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                // Fail closed: never deliver without a successful check.
                log::error!(
                    "[{}] Duplicate store unreadable, stopping destination: {}",
                    report.label,
                    e
                );
                report.error = Some(e.to_string());
                notify_operator(
                    ctx,
                    "Duplicate store unreadable",
                    &format!("{} ({}): {}", report.label, destination.id, e),
                )
                .await;
                return Ok(());
            }
        }

        match mode {
            Mode::Preview => {
                log::info!("[{}] Would deliver: {} ({})", report.label, posting.title, posting.url);
                report.postings.push(posting.summary());
            }
            Mode::Deliver => deliver(ctx, destination, report, posting).await,
        }
    }

    report.transition(DestinationState::Done);
    Ok(())
}

/// All pages for one destination. The pages are requested strictly in
/// sequence; cancellation interrupts a pending request or pause, and then
/// nothing from this destination is delivered.
async fn fetch_all(
    ctx: &RunContext,
    destination: &Destination,
    report: &mut DestinationReport,
) -> Result<Vec<RawPosting>, AppError> {
    let fetcher = PaginatedFetcher::new(
        ctx.source.as_ref(),
        ctx.extractor.as_ref(),
        &ctx.config.crawler,
    );
    let mut pages = fetcher.pages(&report.label, &destination.query_params);
    let mut raw = Vec::new();

    let outcome = {
        let stream = pages.stream().take_until(ctx.cancel.cancelled());
        tokio::pin!(stream);

        let mut outcome = Ok(());
        while let Some(page) = stream.next().await {
            match page {
                Ok(page) => raw.extend(page),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        match outcome {
            Ok(()) if ctx.cancel.is_cancelled() => Err(AppError::Cancelled),
            other => other,
        }
    };

    let stats = pages.stats();
    report.parse_failures = stats.parse_failures;
    log::debug!(
        "[{}] {} requests, {} pages, {} retries",
        report.label,
        stats.requests,
        stats.pages,
        stats.retries
    );

    outcome.map(|()| raw)
}

/// Validate, classify recency, apply keywords and drop repeats within the
/// fetch. Order is preserved.
fn filter_postings(
    ctx: &RunContext,
    destination: &Destination,
    report: &mut DestinationReport,
    raw: Vec<RawPosting>,
) -> Vec<Posting> {
    let window = ctx.config.pipeline.recency_window();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    report.fetched = raw.len();

    for posting in raw.into_iter().filter_map(Posting::from_raw) {
        report.valid += 1;
        if !is_recent(posting.time_posted_raw.as_deref(), window) {
            continue;
        }
        report.recent += 1;
        if !destination_matches(destination, &posting.title) {
            continue;
        }
        report.matched += 1;
        if !seen.insert(posting.id.clone()) {
            report.duplicates += 1;
            continue;
        }
        candidates.push(posting);
    }

    log::debug!(
        "[{}] {} of {} postings are delivery candidates",
        report.label,
        candidates.len(),
        report.fetched
    );
    candidates
}

async fn deliver(
    ctx: &RunContext,
    destination: &Destination,
    report: &mut DestinationReport,
    mut posting: Posting,
) {
    let summary = posting.summary();

    if let Some(descriptions) = &ctx.descriptions {
        descriptions.register(&summary).await;
        if destination.attach_description {
            match descriptions.describe(&posting.id).await {
                Ok(text) => posting.description = text,
                Err(e) => log::warn!(
                    "[{}] Description unavailable for '{}': {}",
                    report.label,
                    posting.title,
                    e
                ),
            }
        }
    }

    let message = Message::for_posting(
        &posting,
        ctx.config.pipeline.embed_color,
        ctx.config.descriptions.chunk_chars,
    );
    if let Err(e) = ctx.notifier.send(&destination.id, &message).await {
        // Not recorded: retried on the next run.
        report.delivery_failures += 1;
        log::warn!("[{}] Delivery of '{}' failed: {}", report.label, posting.title, e);
        return;
    }

    report.delivered += 1;
    if let Err(e) = ctx.store.record(&destination.id, &posting.id).await {
        report.record_failures += 1;
        log::error!(
            "[{}] DELIVERED BUT NOT RECORDED, '{}' may be sent again next run: {}",
            report.label,
            posting.title,
            e
        );
    }

    log::info!("[{}] Delivered: {}", report.label, posting.title);
    report.postings.push(summary);
}

/// Best-effort notice to the operator channel, if one is configured.
async fn notify_operator(ctx: &RunContext, title: &str, body: &str) {
    let Some(channel) = &ctx.admin_channel else {
        return;
    };
    if let Err(e) = ctx.notifier.send(channel, &Message::operator(title, body)).await {
        log::warn!("Operator notice not sent: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::error::Result;
    use crate::models::Config;
    use crate::notify::Notifier;
    use crate::services::fetcher::testing::{ScriptedSource, fast_config};
    use crate::services::{HtmlListingExtractor, PageSource};
    use crate::storage::{DuplicateStore, LocalStorage};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Message)>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, destination_id: &str, message: &Message) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((destination_id.to_string(), message.clone()));
            Ok(())
        }
    }

    fn item(id: u32, title: &str, posted: &str) -> String {
        format!(r#"<li><a href="/jobs/view/{id}?trk=x"></a><h3>{title}</h3><time>{posted}</time></li>"#)
    }

    fn config(extra: &str) -> Arc<Config> {
        let mut config = Config::from_toml_str(&format!(
            "{extra}\n[[channels]]\nchannel_id = \"1\"\ninclude = \"student\"\nexclude = \"senior\""
        ))
        .unwrap();
        config.crawler = fast_config();
        Arc::new(config)
    }

    fn context(
        config: Arc<Config>,
        source: ScriptedSource,
        store: Arc<dyn DuplicateStore>,
        notifier: Arc<Recorder>,
    ) -> RunContext {
        let extractor = HtmlListingExtractor::new(&config.selectors, &config.crawler.origin).unwrap();
        let source: Arc<dyn PageSource> = Arc::new(source);
        RunContext::new(config, source, Arc::new(extractor), store, notifier)
    }

    fn destinations(config: &Config) -> Vec<Destination> {
        Destination::resolve_all(config, |_| None).unwrap()
    }

    #[tokio::test]
    async fn counts_each_filter_stage() {
        let body = [
            item(1, "Student Data Analyst", "3 minutes ago"),
            item(2, "Student Helper", "2 hours ago"),
            item(3, "Senior Student Advisor", "1 minute ago"),
            "<li><h3>No link</h3></li>".to_string(),
            item(1, "Student Data Analyst", "3 minutes ago"),
        ]
        .concat();
        let source = ScriptedSource::new(vec![ScriptedSource::ok(&body), ScriptedSource::ok("")]);
        let tmp = TempDir::new().unwrap();
        let notifier = Arc::new(Recorder::default());
        let config = config("");
        let ctx = context(
            Arc::clone(&config),
            source,
            Arc::new(LocalStorage::new(tmp.path())),
            Arc::clone(&notifier),
        );

        let summary = run_pipeline(&ctx, &destinations(&config)).await;
        let report = &summary.reports[0];

        assert_eq!(report.state, DestinationState::Done);
        assert_eq!(report.fetched, 5);
        assert_eq!(report.valid, 4);
        assert_eq!(report.recent, 3);
        assert_eq!(report.matched, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn preview_neither_sends_nor_records() {
        let body = item(1, "Student Data Analyst", "3 minutes ago");
        let source = ScriptedSource::new(vec![ScriptedSource::ok(&body), ScriptedSource::ok("")]);
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStorage::new(tmp.path()));
        let notifier = Arc::new(Recorder::default());
        let config = config("");
        let ctx = context(Arc::clone(&config), source, store.clone(), Arc::clone(&notifier));

        let summary = preview(&ctx, &destinations(&config)).await;

        assert_eq!(summary.reports[0].postings.len(), 1);
        assert_eq!(summary.delivered(), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
        let id = &summary.reports[0].postings[0].id;
        assert!(!store.contains("1", id).await.unwrap());
    }

    #[tokio::test]
    async fn summary_message_follows_deliveries() {
        let body = item(1, "Student Data Analyst", "3 minutes ago");
        let source = ScriptedSource::new(vec![ScriptedSource::ok(&body), ScriptedSource::ok("")]);
        let tmp = TempDir::new().unwrap();
        let notifier = Arc::new(Recorder::default());
        let config = config("[pipeline]\nsend_summary = true");
        let ctx = context(
            Arc::clone(&config),
            source,
            Arc::new(LocalStorage::new(tmp.path())),
            Arc::clone(&notifier),
        );

        run_pipeline(&ctx, &destinations(&config)).await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1.body, "Found 1 new job(s)");
    }

    #[tokio::test]
    async fn fetch_failure_reaches_operator_channel() {
        let source = ScriptedSource::new((0..5).map(|_| ScriptedSource::status(503)).collect());
        let tmp = TempDir::new().unwrap();
        let notifier = Arc::new(Recorder::default());
        let config = config("");
        let ctx = context(
            Arc::clone(&config),
            source,
            Arc::new(LocalStorage::new(tmp.path())),
            Arc::clone(&notifier),
        )
        .with_admin_channel(Some("999".to_string()));

        let summary = run_pipeline(&ctx, &destinations(&config)).await;

        assert_eq!(summary.reports[0].state, DestinationState::FetchFailed);
        assert_eq!(summary.failed_destinations(), vec!["1".to_string()]);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "999");
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let source = ScriptedSource::new(vec![ScriptedSource::ok(&item(1, "Student", "1 minute ago"))]);
        let tmp = TempDir::new().unwrap();
        let notifier = Arc::new(Recorder::default());
        let config = config("");
        let ctx = context(
            Arc::clone(&config),
            source,
            Arc::new(LocalStorage::new(tmp.path())),
            Arc::clone(&notifier),
        );
        ctx.cancel.cancel();

        let summary = run_pipeline(&ctx, &destinations(&config)).await;

        assert!(summary.cancelled);
        assert_eq!(summary.reports[0].state, DestinationState::Pending);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
