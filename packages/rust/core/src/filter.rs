//! Time-window, domain-exclusion and quota policy over raw feed entries.

use bulletin_shared::{Article, CategoryBucket, CategoryGroup, FeedEntry};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use url::Url;

/// Attribution for entries whose feed item names no publisher.
pub const DEFAULT_SOURCE: &str = "Google News";

/// One category's raw search results plus its own rules.
#[derive(Debug, Clone, Default)]
pub struct RawCategory {
    pub name: String,
    /// Entries in feed order.
    pub entries: Vec<FeedEntry>,
    pub excluded_domains: Vec<String>,
    /// Overrides [`FilterPolicy::max_per_category`].
    pub max_articles: Option<usize>,
    /// Overrides [`FilterPolicy::min_per_category`].
    pub min_articles: Option<usize>,
}

/// Limits shared by every category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPolicy {
    /// Entries published before `now - cutoff_age` are dropped.
    pub cutoff_age: Duration,
    pub max_per_category: usize,
    pub min_per_category: usize,
}

impl FilterPolicy {
    pub fn new(recency_days: u32, max_per_category: usize, min_per_category: usize) -> Self {
        Self {
            cutoff_age: Duration::days(i64::from(recency_days)),
            max_per_category,
            min_per_category,
        }
    }
}

/// Why an entry was left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    NoTimestamp,
    TooOld,
    MissingField,
    ExcludedDomain,
}

/// Apply the policy to each category, in order, and keep the categories that
/// reach their minimum.
///
/// Per category: drop entries without a timestamp, then entries older than
/// the cutoff, then entries without a title or link, then entries from
/// excluded domains; keep the first `max` survivors in feed order; drop the
/// whole category if fewer than `min` remain. An empty result is not an error.
pub fn filter(
    categories: Vec<RawCategory>,
    policy: &FilterPolicy,
    now: DateTime<Utc>,
) -> CategoryBucket {
    let cutoff = now - policy.cutoff_age;
    let mut bucket = CategoryBucket::default();

    for category in categories {
        let max = category.max_articles.unwrap_or(policy.max_per_category);
        let min = category.min_articles.unwrap_or(policy.min_per_category);
        let excluded: Vec<String> = category
            .excluded_domains
            .iter()
            .filter_map(|d| normalize_domain(d))
            .collect();

        let fetched = category.entries.len();
        let mut articles = Vec::new();
        for entry in category.entries {
            if articles.len() >= max {
                break;
            }
            match accept(entry, &category.name, cutoff, &excluded) {
                Ok(article) => articles.push(article),
                Err((rejection, link)) => {
                    debug!(
                        category = %category.name,
                        ?rejection,
                        link = link.as_deref().unwrap_or("-"),
                        "entry dropped"
                    );
                }
            }
        }

        if articles.len() < min {
            debug!(
                category = %category.name,
                kept = articles.len(),
                min,
                fetched,
                "category below minimum, dropped"
            );
            continue;
        }

        bucket.categories.push(CategoryGroup {
            name: category.name,
            articles,
        });
    }

    bucket
}

fn accept(
    entry: FeedEntry,
    category: &str,
    cutoff: DateTime<Utc>,
    excluded: &[String],
) -> Result<Article, (Rejection, Option<String>)> {
    let Some(published_at) = entry.published_at else {
        return Err((Rejection::NoTimestamp, entry.link));
    };
    if published_at < cutoff {
        return Err((Rejection::TooOld, entry.link));
    }

    let image_url = entry.image_url().map(String::from);
    let (Some(title), Some(url)) = (non_blank(entry.title), non_blank(entry.link.clone())) else {
        return Err((Rejection::MissingField, entry.link));
    };

    let hosts = [Some(url.as_str()), entry.source_url.as_deref()];
    if excluded
        .iter()
        .any(|domain| hosts.iter().flatten().any(|u| belongs_to(u, domain)))
    {
        return Err((Rejection::ExcludedDomain, Some(url)));
    }

    Ok(Article {
        category: category.to_string(),
        title,
        url,
        source: non_blank(entry.source_name).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        image_url,
        published_at: Some(published_at),
    })
}

/// True if `url`'s host is `domain` or a subdomain of it. Unparseable URLs
/// fall back to a substring check.
fn belongs_to(url: &str, domain: &str) -> bool {
    match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) {
        Some(host) => host == domain || host.ends_with(&format!(".{domain}")),
        None => url.to_ascii_lowercase().contains(domain),
    }
}

/// Lower-case a configured domain and drop any scheme, `www.` or path.
fn normalize_domain(raw: &str) -> Option<String> {
    let mut d = raw.trim().to_ascii_lowercase();
    if let Some(rest) = d.split_once("://").map(|(_, rest)| rest.to_string()) {
        d = rest;
    }
    let d = d.split('/').next().unwrap_or_default();
    let d = d.strip_prefix("www.").unwrap_or(d).trim_matches('.');
    (!d.is_empty()).then(|| d.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulletin_shared::MediaAttachment;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn entry(title: &str, age_hours: i64) -> FeedEntry {
        FeedEntry {
            title: Some(title.into()),
            link: Some(format!(
                "https://news.example.com/{}",
                title.to_lowercase().replace(' ', "-")
            )),
            source_name: Some("Star Journal".into()),
            source_url: Some("https://www.starcommunity.com.au".into()),
            published_at: Some(now() - Duration::hours(age_hours)),
            media: Vec::new(),
        }
    }

    fn category(name: &str, entries: Vec<FeedEntry>) -> RawCategory {
        RawCategory {
            name: name.into(),
            entries,
            ..RawCategory::default()
        }
    }

    fn policy() -> FilterPolicy {
        FilterPolicy::new(3, 5, 3)
    }

    fn titles(bucket: &CategoryBucket, name: &str) -> Vec<String> {
        bucket
            .get(name)
            .map(|c| c.articles.iter().map(|a| a.title.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn missing_timestamp_always_excluded() {
        let mut undated = entry("Undated", 1);
        undated.published_at = None;
        let entries = vec![undated, entry("A", 1), entry("B", 2), entry("C", 3)];

        let bucket = filter(vec![category("Local", entries)], &policy(), now());
        assert_eq!(titles(&bucket, "Local"), ["A", "B", "C"]);
    }

    #[test]
    fn cutoff_window() {
        let entries = vec![
            entry("Four days old", 96),
            entry("Two days old", 48),
            entry("Exactly three days", 72),
            entry("Fresh", 0),
        ];
        let bucket = filter(vec![category("Local", entries)], &policy(), now());
        assert_eq!(
            titles(&bucket, "Local"),
            ["Two days old", "Exactly three days", "Fresh"]
        );
    }

    #[test]
    fn below_minimum_drops_whole_category() {
        let two = vec![entry("A", 1), entry("B", 1)];
        let three = vec![entry("X", 1), entry("Y", 1), entry("Z", 1)];

        let bucket = filter(
            vec![category("Thin", two), category("Enough", three)],
            &policy(),
            now(),
        );
        assert!(bucket.get("Thin").is_none());
        assert_eq!(titles(&bucket, "Enough"), ["X", "Y", "Z"]);
    }

    #[test]
    fn cap_keeps_feed_order() {
        let entries: Vec<FeedEntry> = (1..=8).map(|i| entry(&format!("N{i}"), i)).collect();
        let bucket = filter(vec![category("Busy", entries)], &policy(), now());
        assert_eq!(titles(&bucket, "Busy"), ["N1", "N2", "N3", "N4", "N5"]);
    }

    #[test]
    fn excluded_domain_matches_link_and_source_hosts() {
        let mut own_site = entry("Council media release", 1);
        own_site.source_url = Some("https://www.greaterdandenong.vic.gov.au".into());
        let mut direct = entry("Direct link", 1);
        direct.link = Some("https://greaterdandenong.vic.gov.au/news/budget".into());
        let lookalike = {
            let mut e = entry("Lookalike", 1);
            e.source_url = Some("https://notgreaterdandenong.vic.gov.au".into());
            e
        };

        let raw = RawCategory {
            excluded_domains: vec!["greaterdandenong.vic.gov.au".into()],
            min_articles: Some(1),
            ..category("Local", vec![own_site, direct, lookalike, entry("Other", 2)])
        };
        let bucket = filter(vec![raw], &policy(), now());
        assert_eq!(titles(&bucket, "Local"), ["Lookalike", "Other"]);
    }

    #[test]
    fn unparseable_url_falls_back_to_substring() {
        assert!(belongs_to("greaterdandenong.vic.gov.au/page", "greaterdandenong.vic.gov.au"));
        assert!(!belongs_to("news.example.com/page", "greaterdandenong.vic.gov.au"));
    }

    #[test]
    fn configured_domains_are_normalized() {
        assert_eq!(
            normalize_domain(" https://WWW.Casey.vic.gov.au/news "),
            Some("casey.vic.gov.au".into())
        );
        assert_eq!(normalize_domain("   "), None);
    }

    #[test]
    fn entries_without_title_or_link_rejected() {
        let mut untitled = entry("x", 1);
        untitled.title = Some("   ".into());
        let mut unlinked = entry("y", 1);
        unlinked.link = None;

        let raw = RawCategory {
            min_articles: Some(1),
            ..category("Local", vec![untitled, unlinked, entry("Kept", 1)])
        };
        let bucket = filter(vec![raw], &policy(), now());
        assert_eq!(titles(&bucket, "Local"), ["Kept"]);
    }

    #[test]
    fn article_fields_and_defaults() {
        let mut e = entry("Budget", 5);
        e.source_name = None;
        e.media = vec![
            MediaAttachment {
                url: "https://cdn.example.com/clip.mp4".into(),
                mime_type: Some("video/mp4".into()),
            },
            MediaAttachment {
                url: "https://cdn.example.com/budget.jpg".into(),
                mime_type: Some("image/jpeg".into()),
            },
        ];
        let raw = RawCategory {
            min_articles: Some(1),
            ..category("Local", vec![e])
        };

        let bucket = filter(vec![raw], &policy(), now());
        let article = &bucket.get("Local").unwrap().articles[0];
        assert_eq!(article.category, "Local");
        assert_eq!(article.source, DEFAULT_SOURCE);
        assert_eq!(
            article.image_url.as_deref(),
            Some("https://cdn.example.com/budget.jpg")
        );
        assert_eq!(article.published_at, Some(now() - Duration::hours(5)));
    }

    #[test]
    fn per_category_overrides() {
        let raw = RawCategory {
            max_articles: Some(2),
            min_articles: Some(2),
            ..category("Tight", vec![entry("A", 1), entry("B", 1), entry("C", 1)])
        };
        let bucket = filter(vec![raw], &policy(), now());
        assert_eq!(titles(&bucket, "Tight"), ["A", "B"]);
    }

    #[test]
    fn empty_input_is_empty_bucket() {
        let bucket = filter(Vec::new(), &policy(), now());
        assert!(bucket.is_empty());
        let bucket = filter(vec![category("Nothing", Vec::new())], &policy(), now());
        assert!(bucket.is_empty());
        assert!(bucket.categories.is_empty());
    }

    #[test]
    fn four_and_one_keeps_only_first_category() {
        let four: Vec<FeedEntry> = (1..=4).map(|i| entry(&format!("L{i}"), i)).collect();
        let bucket = filter(
            vec![category("Local", four), category("State", vec![entry("S1", 1)])],
            &policy(),
            now(),
        );
        assert_eq!(bucket.categories.len(), 1);
        assert_eq!(bucket.article_count(), 4);
    }
}
