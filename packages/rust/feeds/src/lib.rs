//! Google News RSS search client.
//!
//! Each category query becomes one
//! `GET <base_url>?q=...&hl=...&gl=...&ceid=...&output=rss&sort=date` request.
//! The response is parsed with the `rss` crate into [`FeedEntry`] values in
//! feed order; filtering happens later, in `bulletin-core`.

mod parser;

use std::time::Duration;

use bulletin_shared::{BulletinError, FeedConfig, FeedEntry, FeedSource, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

/// Maximum number of redirects to follow for a search request.
const MAX_REDIRECTS: usize = 5;

/// User-Agent string for feed requests.
const USER_AGENT: &str = concat!("bulletin/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// GoogleNewsFeed
// ---------------------------------------------------------------------------

/// A [`FeedSource`] backed by the Google News RSS search endpoint.
#[derive(Debug, Clone)]
pub struct GoogleNewsFeed {
    client: Client,
    base_url: Url,
    language: String,
    region: String,
    edition: String,
}

impl GoogleNewsFeed {
    /// Build a feed client from the `[feed]` config section.
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            BulletinError::config(format!("invalid feed base_url {}: {e}", config.base_url))
        })?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url,
            language: config.language.clone(),
            region: config.region.clone(),
            edition: config.edition.clone(),
        })
    }

    /// The full search URL for a query.
    pub fn search_url(&self, query: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("hl", &self.language)
            .append_pair("gl", &self.region)
            .append_pair("ceid", &self.edition)
            .append_pair("output", "rss")
            .append_pair("sort", "date");
        url
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BulletinError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, e))?;

        Ok(body.to_vec())
    }
}

impl FeedSource for GoogleNewsFeed {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<FeedEntry>> {
        let url = self.search_url(query);
        debug!(%url, "fetching news feed");

        let body = self.fetch(&url).await?;
        let entries = parser::parse_feed(&body)?;

        info!(entries = entries.len(), "feed fetched");
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BulletinError::Network(format!("failed to build HTTP client: {e}")))
}

fn transport_error(url: &Url, e: reqwest::Error) -> BulletinError {
    if e.is_timeout() {
        BulletinError::Timeout(format!("{url}: {e}"))
    } else {
        BulletinError::Network(format!("{url}: {e}"))
    }
}
