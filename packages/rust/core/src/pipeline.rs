//! End-to-end digest run: search → filter → enrich → render → dispatch.
//!
//! [`Pipeline::run`] is gated by the run scheduler and returns the next
//! [`RunState`] alongside the outcome. Only a completed dispatch advances
//! `last_run`, so a failed delivery is retried on the next invocation.

use std::sync::Arc;
use std::time::Instant;

use bulletin_shared::{
    AppConfig, CategoryBucket, CategoryConfig, CategoryGroup, CompletionService,
    DeliveryReceipt, Digest, EnrichedArticle, FeedSource, Mailer, RunState,
};
use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::enrichment::{self, EnrichmentEngine, EnrichmentSettings};
use crate::filter::{self, FilterPolicy, RawCategory};
use crate::render::{RenderSettings, RenderSource, TemplateRenderer};
use crate::schedule;

// ---------------------------------------------------------------------------
// Stages and outcomes
// ---------------------------------------------------------------------------

/// Position of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Filtering,
    Enriching,
    Rendering,
    Dispatching,
    Done,
    Aborted,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Filtering => "filtering",
            Self::Enriching => "enriching",
            Self::Rendering => "rendering",
            Self::Dispatching => "dispatching",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that stopped before dispatch because a stage produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} produced nothing: {reason}")]
pub struct Abort {
    pub stage: Stage,
    pub reason: String,
}

impl Abort {
    fn new(stage: Stage, reason: &str) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// A rendered digest that has not been sent.
#[derive(Debug, Clone)]
pub struct Composed {
    pub digest: Digest,
    pub render_source: RenderSource,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The gate was closed.
    Skipped {
        next_run_at: Option<DateTime<Utc>>,
    },
    Done {
        digest: Digest,
        receipt: DeliveryReceipt,
        render_source: RenderSource,
    },
    Aborted {
        stage: Stage,
        reason: String,
    },
    /// The digest was built but could not be delivered.
    Failed {
        stage: Stage,
        reason: String,
        article_count: usize,
        render_source: RenderSource,
    },
}

impl RunOutcome {
    /// The terminal stage this outcome corresponds to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Skipped { .. } => Stage::Idle,
            Self::Done { .. } => Stage::Done,
            Self::Aborted { .. } => Stage::Aborted,
            Self::Failed { .. } => Stage::Failed,
        }
    }

    /// Aborted and failed runs make the process exit non-zero.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Failed { .. })
    }

    pub fn article_count(&self) -> usize {
        match self {
            Self::Done { digest, .. } => digest.article_count(),
            Self::Failed { article_count, .. } => *article_count,
            Self::Skipped { .. } | Self::Aborted { .. } => 0,
        }
    }
}

/// Result of [`Pipeline::run`]: the state to persist and what happened.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub outcome: RunOutcome,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn stage(&self, stage: Stage);
    /// Called after each category search, successful or not.
    fn category_fetched(&self, name: &str, entries: usize);
    /// Called after each article has been through enrichment.
    fn article_enriched(&self, title: &str, current: usize, total: usize);
    /// Called once with the final outcome.
    fn finished(&self, outcome: &RunOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn category_fetched(&self, _name: &str, _entries: usize) {}
    fn article_enriched(&self, _title: &str, _current: usize, _total: usize) {}
    fn finished(&self, _outcome: &RunOutcome) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<F, C, M> {
    feed: F,
    mailer: M,
    engine: EnrichmentEngine<C>,
    renderer: TemplateRenderer<C>,
    categories: Vec<CategoryConfig>,
    policy: FilterPolicy,
}

impl<F, C, M> Pipeline<F, C, M>
where
    F: FeedSource,
    C: CompletionService,
    M: Mailer,
{
    pub fn new(feed: F, completion: C, mailer: M, config: &AppConfig) -> Self {
        Self::from_parts(
            feed,
            Arc::new(completion),
            mailer,
            EnrichmentSettings::from_config(config),
            RenderSettings::from_config(config),
            config.categories.clone(),
            FilterPolicy::new(
                config.feed.recency_days,
                config.limits.max_per_category,
                config.limits.min_per_category,
            ),
        )
    }

    pub fn from_parts(
        feed: F,
        completion: Arc<C>,
        mailer: M,
        enrichment: EnrichmentSettings,
        render: RenderSettings,
        categories: Vec<CategoryConfig>,
        policy: FilterPolicy,
    ) -> Self {
        Self {
            feed,
            mailer,
            engine: EnrichmentEngine::new(Arc::clone(&completion), enrichment),
            renderer: TemplateRenderer::new(completion, render),
            categories,
            policy,
        }
    }

    /// Run once if the gate allows it (or `force` is set) and report the
    /// outcome with the state to persist.
    #[instrument(skip_all, fields(force = force))]
    pub async fn run(
        &self,
        state: RunState,
        now: DateTime<Utc>,
        force: bool,
        progress: &dyn ProgressReporter,
    ) -> RunReport {
        if !force && !schedule::should_run(&state, now) {
            let hours = schedule::hours_remaining(&state, now);
            info!(
                frequency_hours = state.frequency_hours,
                "skipping run, next run in {hours:.1} hours"
            );
            return finish(
                state,
                RunOutcome::Skipped {
                    next_run_at: schedule::next_run_at(&state, now),
                },
                progress,
            );
        }

        let start = Instant::now();
        let composed = match self.compose(now, progress).await {
            Ok(composed) => composed,
            Err(abort) => {
                error!(stage = %abort.stage, reason = %abort.reason, "run aborted");
                progress.stage(Stage::Aborted);
                return finish(
                    state,
                    RunOutcome::Aborted {
                        stage: abort.stage,
                        reason: abort.reason,
                    },
                    progress,
                );
            }
        };

        progress.stage(Stage::Dispatching);
        let (state, outcome) = match self.mailer.send(&composed.digest.html).await {
            Ok(receipt) => {
                info!(
                    articles = composed.digest.article_count(),
                    rendered_by = %composed.render_source,
                    status = receipt.status,
                    recipients = receipt.recipients,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "digest dispatched"
                );
                progress.stage(Stage::Done);
                let outcome = RunOutcome::Done {
                    digest: composed.digest,
                    receipt,
                    render_source: composed.render_source,
                };
                (state.completed_at(now), outcome)
            }
            Err(e) => {
                error!(stage = %Stage::Dispatching, reason = %e, "dispatch failed");
                progress.stage(Stage::Failed);
                let outcome = RunOutcome::Failed {
                    stage: Stage::Dispatching,
                    reason: e.to_string(),
                    article_count: composed.digest.article_count(),
                    render_source: composed.render_source,
                };
                (state, outcome)
            }
        };
        finish(state, outcome, progress)
    }

    /// Filter, enrich and render without dispatching. The run gate and
    /// [`RunState`] are not consulted.
    pub async fn compose(
        &self,
        now: DateTime<Utc>,
        progress: &dyn ProgressReporter,
    ) -> Result<Composed, Abort> {
        progress.stage(Stage::Filtering);
        let bucket = self.collect(now, progress).await;
        if bucket.is_empty() {
            return Err(Abort::new(Stage::Filtering, "no articles collected"));
        }

        progress.stage(Stage::Enriching);
        let sections = self.enrich(bucket, progress).await?;

        progress.stage(Stage::Rendering);
        let rendered = self.renderer.render(&sections, now).await;

        Ok(Composed {
            digest: Digest {
                sections,
                html: rendered.html,
                generated_at: now,
            },
            render_source: rendered.source,
        })
    }

    /// Search every configured category, one at a time, and filter the
    /// results. A failed search leaves its category out.
    #[instrument(skip_all, fields(categories = self.categories.len()))]
    pub async fn collect(
        &self,
        now: DateTime<Utc>,
        progress: &dyn ProgressReporter,
    ) -> CategoryBucket {
        let mut raw = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            match self.feed.search(&category.query).await {
                Ok(entries) => {
                    progress.category_fetched(&category.name, entries.len());
                    raw.push(RawCategory {
                        name: category.name.clone(),
                        entries,
                        excluded_domains: category.excluded_domains.clone(),
                        max_articles: category.max_articles,
                        min_articles: category.min_articles,
                    });
                }
                Err(e) => {
                    warn!(category = %category.name, error = %e, "search failed, category skipped");
                    progress.category_fetched(&category.name, 0);
                }
            }
        }

        let bucket = filter::filter(raw, &self.policy, now);
        for group in &bucket.categories {
            info!(category = %group.name, articles = group.articles.len(), "category collected");
        }
        info!(
            categories = bucket.categories.len(),
            articles = bucket.article_count(),
            "filtering complete"
        );
        bucket
    }

    async fn enrich(
        &self,
        bucket: CategoryBucket,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<CategoryGroup<EnrichedArticle>>, Abort> {
        let enriched = self
            .engine
            .enrich_articles(bucket.into_articles(), progress)
            .await;
        if enriched.is_empty() {
            return Err(Abort::new(
                Stage::Enriching,
                "no articles were successfully enriched",
            ));
        }
        Ok(enrichment::group_by_category(enriched))
    }
}

fn finish(state: RunState, outcome: RunOutcome, progress: &dyn ProgressReporter) -> RunReport {
    progress.finished(&outcome);
    RunReport { state, outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFeed, RecordingMailer, Reply, ScriptedCompletion};
    use bulletin_shared::{Article, FeedEntry, RelevanceScore};
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
    }

    fn entry(title: &str, age_hours: i64) -> FeedEntry {
        FeedEntry {
            title: Some(title.into()),
            link: Some(format!("https://news.example.com/{}", title.replace(' ', "-"))),
            source_name: Some("Star Journal".into()),
            source_url: Some("https://news.example.com".into()),
            published_at: Some(now() - Duration::hours(age_hours)),
            media: Vec::new(),
        }
    }

    fn category(name: &str, query: &str) -> CategoryConfig {
        CategoryConfig {
            name: name.into(),
            query: query.into(),
            excluded_domains: Vec::new(),
            max_articles: None,
            min_articles: None,
        }
    }

    fn enrichment_settings() -> EnrichmentSettings {
        EnrichmentSettings {
            locality: "Greater Dandenong Council".into(),
            max_tokens: 500,
            temperature: 0.7,
            timeout: Some(std::time::Duration::from_secs(5)),
        }
    }

    fn render_settings() -> RenderSettings {
        RenderSettings {
            title: "Council Weekly".into(),
            organisation: "Greater Dandenong Council".into(),
            locality: "Greater Dandenong Council".into(),
            max_tokens: 4000,
            temperature: 0.3,
            timeout: std::time::Duration::from_secs(5),
        }
    }

    /// Local has four fresh entries, State only one.
    fn feed() -> FakeFeed {
        FakeFeed::new()
            .with(
                "dandenong",
                vec![
                    entry("Budget adopted", 2),
                    entry("Market returns", 5),
                    entry("Library opens", 20),
                    entry("Road closure", 30),
                ],
            )
            .with("victoria", vec![entry("Rail upgrade", 1)])
    }

    /// Enrichment replies are JSON; render replies are rejected so the
    /// fallback template is used.
    fn completion() -> Arc<ScriptedCompletion> {
        Arc::new(ScriptedCompletion::new(|request| {
            if request.prompt.contains("article_title") {
                Reply::text(r#"{"summary": "Short.", "relevance_score": 75, "relevance": "Local."}"#)
            } else {
                Reply::text("Here is your newsletter!")
            }
        }))
    }

    fn pipeline<F: FeedSource, M: Mailer>(
        feed: F,
        completion: &Arc<ScriptedCompletion>,
        mailer: M,
    ) -> Pipeline<F, ScriptedCompletion, M> {
        Pipeline::from_parts(
            feed,
            Arc::clone(completion),
            mailer,
            enrichment_settings(),
            render_settings(),
            vec![category("Local", "dandenong"), category("State", "victoria")],
            FilterPolicy::new(3, 5, 3),
        )
    }

    #[derive(Default)]
    struct StageLog(Mutex<Vec<Stage>>);

    impl ProgressReporter for StageLog {
        fn stage(&self, stage: Stage) {
            self.0.lock().unwrap().push(stage);
        }
        fn category_fetched(&self, _name: &str, _entries: usize) {}
        fn article_enriched(&self, _title: &str, _current: usize, _total: usize) {}
        fn finished(&self, _outcome: &RunOutcome) {}
    }

    #[tokio::test]
    async fn full_run_dispatches_and_advances_state() {
        let pipeline = pipeline(feed(), &completion(), RecordingMailer::new());
        let progress = StageLog::default();

        let report = pipeline.run(RunState::new(24), now(), false, &progress).await;

        let RunOutcome::Done {
            digest,
            receipt,
            render_source,
        } = &report.outcome
        else {
            panic!("expected Done, got {:?}", report.outcome);
        };
        assert_eq!(report.state.last_run, Some(now()));
        assert_eq!(receipt.message_id.as_deref(), Some("test-message"));
        assert_eq!(*render_source, RenderSource::Fallback);

        // State had one entry, below the minimum of three.
        assert_eq!(digest.sections.len(), 1);
        assert_eq!(digest.sections[0].name, "Local");
        assert_eq!(digest.article_count(), 4);
        assert!(digest.html.contains("Budget adopted"));
        assert!(!digest.html.contains("Rail upgrade"));
        assert!(digest.sections[0]
            .articles
            .iter()
            .all(|a| a.relevance_score == RelevanceScore::Scored(75)));

        assert_eq!(pipeline.mailer.sent_count(), 1);
        assert_eq!(
            *progress.0.lock().unwrap(),
            [
                Stage::Filtering,
                Stage::Enriching,
                Stage::Rendering,
                Stage::Dispatching,
                Stage::Done
            ]
        );
        assert!(!report.outcome.is_failure());
    }

    #[tokio::test]
    async fn closed_gate_skips_everything() {
        let pipeline = pipeline(feed(), &completion(), RecordingMailer::new());
        let state = RunState::new(24).with_last_run(Some(now() - Duration::hours(3)));

        let report = pipeline.run(state, now(), false, &SilentProgress).await;

        match report.outcome {
            RunOutcome::Skipped { next_run_at } => {
                assert_eq!(next_run_at, Some(now() + Duration::hours(21)));
            }
            other => panic!("expected Skipped, got {other:?}"),
        }
        assert_eq!(report.state, state);
        assert!(pipeline.feed.searches().is_empty());
        assert_eq!(pipeline.mailer.sent_count(), 0);
    }

    #[tokio::test]
    async fn force_bypasses_gate() {
        let pipeline = pipeline(feed(), &completion(), RecordingMailer::new());
        let state = RunState::new(24).with_last_run(Some(now() - Duration::hours(3)));

        let report = pipeline.run(state, now(), true, &SilentProgress).await;
        assert_eq!(report.outcome.stage(), Stage::Done);
        assert_eq!(report.state.last_run, Some(now()));
    }

    #[tokio::test]
    async fn empty_filter_aborts_before_enrichment() {
        let stale = FakeFeed::new().with("dandenong", vec![entry("Old news", 24 * 10)]);
        let completion = completion();
        let pipeline = pipeline(stale, &completion, RecordingMailer::new());

        let report = pipeline.run(RunState::new(24), now(), false, &SilentProgress).await;

        match &report.outcome {
            RunOutcome::Aborted { stage, reason } => {
                assert_eq!(*stage, Stage::Filtering);
                assert_eq!(reason, "no articles collected");
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
        assert!(report.outcome.is_failure());
        assert_eq!(report.state.last_run, None);
        assert_eq!(completion.calls(), 0);
        assert_eq!(pipeline.mailer.sent_count(), 0);
    }

    #[tokio::test]
    async fn empty_enrichment_aborts() {
        let pipeline = pipeline(FakeFeed::new(), &completion(), RecordingMailer::new());
        let bucket = CategoryBucket {
            categories: vec![CategoryGroup {
                name: "Local".into(),
                articles: vec![Article {
                    category: "Local".into(),
                    title: "No link".into(),
                    url: String::new(),
                    source: "Star Journal".into(),
                    image_url: None,
                    published_at: None,
                }],
            }],
        };

        let abort = pipeline.enrich(bucket, &SilentProgress).await.unwrap_err();
        assert_eq!(abort.stage, Stage::Enriching);
        assert_eq!(abort.reason, "no articles were successfully enriched");
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_last_run() {
        let pipeline = pipeline(feed(), &completion(), RecordingMailer::failing());
        let previous = now() - Duration::hours(30);
        let state = RunState::new(24).with_last_run(Some(previous));

        let report = pipeline.run(state, now(), false, &SilentProgress).await;

        match &report.outcome {
            RunOutcome::Failed {
                stage,
                reason,
                article_count,
                ..
            } => {
                assert_eq!(*stage, Stage::Dispatching);
                assert!(reason.contains("sender not verified"));
                assert_eq!(*article_count, 4);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(report.state.last_run, Some(previous));
        assert!(report.outcome.is_failure());
    }

    #[tokio::test]
    async fn failed_search_is_isolated() {
        let feed = FakeFeed::new()
            .failing("victoria")
            .with("dandenong", feed_entries(3));
        let pipeline = pipeline(feed, &completion(), RecordingMailer::new());

        let bucket = pipeline.collect(now(), &SilentProgress).await;
        assert_eq!(bucket.categories.len(), 1);
        assert!(bucket.get("Local").is_some());
        assert_eq!(pipeline.feed.searches(), ["dandenong", "victoria"]);
    }

    #[tokio::test]
    async fn missing_credential_still_delivers() {
        let completion = Arc::new(ScriptedCompletion::unconfigured());
        let pipeline = pipeline(feed(), &completion, RecordingMailer::new());

        let report = pipeline.run(RunState::new(24), now(), false, &SilentProgress).await;

        let RunOutcome::Done {
            digest,
            render_source,
            ..
        } = &report.outcome
        else {
            panic!("expected Done, got {:?}", report.outcome);
        };
        assert_eq!(*render_source, RenderSource::Fallback);
        assert!(digest.html.contains("<strong>Relevance Score:</strong> N/A"));
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn ai_render_is_used_when_valid() {
        let completion = Arc::new(ScriptedCompletion::new(|request| {
            if request.prompt.contains("article_title") {
                Reply::text(r#"{"summary": "s", "relevance_score": 10, "relevance": "r"}"#)
            } else {
                Reply::text("<!DOCTYPE html><html><body>AI digest</body></html>")
            }
        }));
        let pipeline = pipeline(feed(), &completion, RecordingMailer::new());

        let composed = pipeline.compose(now(), &SilentProgress).await.unwrap();
        assert_eq!(composed.render_source, RenderSource::Ai);
        assert!(composed.digest.html.contains("AI digest"));
        assert_eq!(pipeline.mailer.sent_count(), 0);
    }

    fn feed_entries(n: usize) -> Vec<FeedEntry> {
        (0..n).map(|i| entry(&format!("Story {i}"), 1)).collect()
    }
}
