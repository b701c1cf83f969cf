//! AI enrichment of filtered articles.
//!
//! Each article gets one completion request asking for a two-sentence
//! summary, a 0-100 relevance score with explanation, and a main image URL.
//! The reply goes through [`recovery::parse`] and [`score::normalize`].
//!
//! Per-article failures degrade instead of propagating: a missing credential,
//! a failed request and an unparseable reply each produce an
//! [`EnrichedArticle`] whose text fields describe what went wrong.

use std::sync::Arc;
use std::time::Duration;

use bulletin_shared::{
    AppConfig, Article, BulletinError, CategoryGroup, CompletionRequest, CompletionService,
    EnrichedArticle, RelevanceScore, ResponseFormat, Result,
};
use tracing::{debug, info, instrument, warn};

use crate::pipeline::ProgressReporter;
use crate::{recovery, score};

// ---------------------------------------------------------------------------
// Degraded field values
// ---------------------------------------------------------------------------

pub const NO_KEY_SUMMARY: &str = "Summary unavailable.";
pub const NO_KEY_RELEVANCE: &str = "No API key provided.";

pub const REQUEST_FAILED_SUMMARY: &str = "Error: Failed to contact AI service";
pub const REQUEST_FAILED_RELEVANCE: &str = "Error: API request failed";

pub const UNEXPECTED_SUMMARY: &str = "Error: Unexpected error during enrichment";

pub const PARSE_FAILED_SUMMARY: &str = "Error: Could not parse summary";
pub const PARSE_FAILED_RELEVANCE: &str = "Error: Could not parse relevance";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Request parameters for enrichment calls.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentSettings {
    /// Relevance is judged against this place.
    pub locality: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Option<Duration>,
}

impl EnrichmentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            locality: config.newsletter.locality.clone(),
            max_tokens: config.openrouter.enrich_max_tokens,
            temperature: config.openrouter.enrich_temperature,
            timeout: Some(Duration::from_secs(config.openrouter.enrich_timeout_secs)),
        }
    }
}

// ---------------------------------------------------------------------------
// EnrichmentEngine
// ---------------------------------------------------------------------------

/// Turns [`Article`]s into [`EnrichedArticle`]s, one completion call each.
pub struct EnrichmentEngine<C> {
    completion: Arc<C>,
    settings: EnrichmentSettings,
}

impl<C: CompletionService> EnrichmentEngine<C> {
    pub fn new(completion: Arc<C>, settings: EnrichmentSettings) -> Self {
        Self {
            completion,
            settings,
        }
    }

    /// The JSON document sent as the user message.
    pub fn build_prompt(&self, article: &Article) -> String {
        let locality = &self.settings.locality;
        serde_json::json!({
            "article_title": article.title,
            "article_url": article.url,
            "instruction": format!(
                "Generate a concise two-sentence summary of this article, then evaluate its \
                 relevance to {locality}. Provide a numerical relevance score between 0 and 100 \
                 and a brief explanation of the relevance. Find the url for the main image in \
                 the article and return it as the key \"main_image_url\". Return your response \
                 as a JSON object with the keys \"summary\", \"relevance_score\", and \"relevance\"."
            ),
        })
        .to_string()
    }

    /// Enrich one article.
    ///
    /// Only an article missing its title or URL is an error. Every other
    /// failure yields a degraded article.
    #[instrument(skip_all, fields(category = %article.category, title = %article.title))]
    pub async fn enrich(&self, article: Article) -> Result<EnrichedArticle> {
        validate(&article)?;

        if !self.completion.is_configured() {
            debug!("no completion credential, skipping request");
            return Ok(degraded(
                article,
                NO_KEY_SUMMARY,
                RelevanceScore::Unavailable,
                NO_KEY_RELEVANCE.to_string(),
            ));
        }

        let request = CompletionRequest {
            prompt: self.build_prompt(&article),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            response_format: ResponseFormat::JsonObject,
            timeout: self.settings.timeout,
        };

        let raw = match self.call(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "enrichment request failed");
                return Ok(degrade_for_error(article, &e));
            }
        };

        let parsed = recovery::parse(&raw);
        let Some(layer) = parsed.layer else {
            warn!(reply_len = raw.len(), "could not recover any field from reply");
            return Ok(degraded(
                article,
                PARSE_FAILED_SUMMARY,
                RelevanceScore::Scored(0),
                PARSE_FAILED_RELEVANCE.to_string(),
            ));
        };

        let normalized = score::normalize(parsed.relevance_score.as_ref());
        if normalized.is_warning() {
            warn!(issue = ?normalized.issue, "relevance score unusable, using 0");
        }
        debug!(?layer, score = normalized.value, "article enriched");

        Ok(EnrichedArticle {
            article,
            summary: parsed.summary,
            relevance_score: RelevanceScore::Scored(normalized.value),
            relevance_explanation: parsed.relevance,
            main_image_url: parsed.main_image_url,
        })
    }

    /// Enrich articles one at a time, in order. Articles that fail outright
    /// are logged and left out.
    #[instrument(skip_all, fields(articles = articles.len()))]
    pub async fn enrich_articles(
        &self,
        articles: Vec<Article>,
        progress: &dyn ProgressReporter,
    ) -> Vec<EnrichedArticle> {
        let total = articles.len();
        let mut enriched = Vec::with_capacity(total);

        for (i, article) in articles.into_iter().enumerate() {
            let title = article.title.clone();
            match self.enrich(article).await {
                Ok(item) => enriched.push(item),
                Err(e) => warn!(%title, error = %e, "article dropped from batch"),
            }
            progress.article_enriched(&title, i + 1, total);
        }

        info!(
            enriched = enriched.len(),
            dropped = total - enriched.len(),
            "enrichment complete"
        );
        enriched
    }

    async fn call(&self, request: &CompletionRequest) -> Result<String> {
        match request.timeout {
            Some(limit) => tokio::time::timeout(limit, self.completion.complete(request))
                .await
                .map_err(|_| {
                    BulletinError::Timeout(format!(
                        "enrichment request exceeded {}s",
                        limit.as_secs()
                    ))
                })?,
            None => self.completion.complete(request).await,
        }
    }
}

/// Regroup enriched articles by category, keeping first-seen category order
/// and article order within each category.
pub fn group_by_category(articles: Vec<EnrichedArticle>) -> Vec<CategoryGroup<EnrichedArticle>> {
    let mut groups: Vec<CategoryGroup<EnrichedArticle>> = Vec::new();
    for article in articles {
        match groups
            .iter_mut()
            .find(|g| g.name == article.article.category)
        {
            Some(group) => group.articles.push(article),
            None => groups.push(CategoryGroup {
                name: article.article.category.clone(),
                articles: vec![article],
            }),
        }
    }
    groups
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate(article: &Article) -> Result<()> {
    if article.title.trim().is_empty() {
        return Err(BulletinError::validation("article has no title"));
    }
    if article.url.trim().is_empty() {
        return Err(BulletinError::validation(format!(
            "article {:?} has no url",
            article.title
        )));
    }
    Ok(())
}

fn degrade_for_error(article: Article, error: &BulletinError) -> EnrichedArticle {
    match error {
        BulletinError::Config { .. } => degraded(
            article,
            NO_KEY_SUMMARY,
            RelevanceScore::Unavailable,
            NO_KEY_RELEVANCE.to_string(),
        ),
        e if e.is_transport() => degraded(
            article,
            REQUEST_FAILED_SUMMARY,
            RelevanceScore::Unavailable,
            REQUEST_FAILED_RELEVANCE.to_string(),
        ),
        e => degraded(
            article,
            UNEXPECTED_SUMMARY,
            RelevanceScore::Unavailable,
            format!("Error: {e}"),
        ),
    }
}

fn degraded(
    article: Article,
    summary: &str,
    relevance_score: RelevanceScore,
    relevance_explanation: String,
) -> EnrichedArticle {
    EnrichedArticle {
        article,
        summary: summary.to_string(),
        relevance_score,
        relevance_explanation,
        main_image_url: None,
    }
}
