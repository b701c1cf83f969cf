//! Core domain types for the newsletter pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw feed entries
// ---------------------------------------------------------------------------

/// A media attachment advertised by a feed item (`media:content` or `<enclosure>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One item as returned by a feed search, before any policy is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Publisher name from `<source>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Publisher home page from `<source url="..">`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
}

impl FeedEntry {
    /// URL of the first attachment whose MIME type is an image.
    pub fn image_url(&self) -> Option<&str> {
        self.media
            .iter()
            .find(|m| {
                m.mime_type
                    .as_deref()
                    .is_some_and(|t| t.starts_with("image/"))
            })
            .map(|m| m.url.as_str())
    }
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// A news item accepted into exactly one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub category: String,
    pub title: String,
    pub url: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Relevance score
// ---------------------------------------------------------------------------

/// Relevance of an article to the target locality.
///
/// `Unavailable` marks articles that were never scored (no credential, or the
/// completion service could not be reached). It reads as 0 and displays as
/// `N/A`, so every enriched article still carries a value in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelevanceScore {
    Scored(u8),
    Unavailable,
}

impl RelevanceScore {
    /// Numeric value in `[0, 100]`.
    pub fn value(self) -> u8 {
        match self {
            Self::Scored(v) => v.min(100),
            Self::Unavailable => 0,
        }
    }

    pub fn is_scored(self) -> bool {
        matches!(self, Self::Scored(_))
    }
}

impl fmt::Display for RelevanceScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scored(v) => write!(f, "{}", (*v).min(100)),
            Self::Unavailable => f.write_str("N/A"),
        }
    }
}

// ---------------------------------------------------------------------------
// EnrichedArticle
// ---------------------------------------------------------------------------

/// An [`Article`] plus the fields produced by AI enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedArticle {
    #[serde(flatten)]
    pub article: Article,
    pub summary: String,
    pub relevance_score: RelevanceScore,
    pub relevance_explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_image_url: Option<String>,
}

impl EnrichedArticle {
    /// Image to show for this article: the AI-found image first, then the feed's.
    pub fn display_image(&self) -> Option<&str> {
        self.main_image_url
            .as_deref()
            .or(self.article.image_url.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Category grouping
// ---------------------------------------------------------------------------

/// A named category and its articles, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroup<T> {
    pub name: String,
    pub articles: Vec<T>,
}

/// Filtered articles keyed by category, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryBucket {
    pub categories: Vec<CategoryGroup<Article>>,
}

impl CategoryBucket {
    pub fn is_empty(&self) -> bool {
        self.categories.iter().all(|c| c.articles.is_empty())
    }

    /// Total number of articles across all categories.
    pub fn article_count(&self) -> usize {
        self.categories.iter().map(|c| c.articles.len()).sum()
    }

    /// Look up a category by name.
    pub fn get(&self, name: &str) -> Option<&CategoryGroup<Article>> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Flatten into a single list, category by category.
    pub fn into_articles(self) -> Vec<Article> {
        self.categories
            .into_iter()
            .flat_map(|c| c.articles)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// The rendered newsletter for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub sections: Vec<CategoryGroup<EnrichedArticle>>,
    pub html: String,
    pub generated_at: DateTime<Utc>,
}

impl Digest {
    pub fn article_count(&self) -> usize {
        self.sections.iter().map(|s| s.articles.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Last successful run and the required spacing between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    pub frequency_hours: u32,
}

impl RunState {
    /// A state that has never completed a run.
    pub fn new(frequency_hours: u32) -> Self {
        Self {
            last_run: None,
            frequency_hours,
        }
    }

    pub fn with_last_run(mut self, last_run: Option<DateTime<Utc>>) -> Self {
        self.last_run = last_run;
        self
    }

    /// The state after a run completed at `at`.
    pub fn completed_at(self, at: DateTime<Utc>) -> Self {
        Self {
            last_run: Some(at),
            ..self
        }
    }
}
