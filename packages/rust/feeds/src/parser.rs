//! RSS 2.0 → [`FeedEntry`] conversion.
//!
//! Handles the shape Google News search feeds use:
//! - `<title>`, `<link>`, `<pubDate>` (RFC 2822)
//! - `<source url="...">Publisher</source>`
//! - `media:content` (optionally inside `media:group`) and `<enclosure>`

use bulletin_shared::{BulletinError, FeedEntry, MediaAttachment, Result};
use chrono::{DateTime, Utc};
use rss::extension::Extension;

/// Parse an RSS document into entries, in feed order.
pub(crate) fn parse_feed(body: &[u8]) -> Result<Vec<FeedEntry>> {
    let channel = rss::Channel::read_from(body)
        .map_err(|e| BulletinError::Feed(format!("invalid RSS document: {e}")))?;

    Ok(channel.items().iter().map(entry_from_item).collect())
}

fn entry_from_item(item: &rss::Item) -> FeedEntry {
    FeedEntry {
        title: non_blank(item.title()),
        link: non_blank(item.link()),
        source_name: item.source().and_then(|s| non_blank(s.title())),
        source_url: item.source().and_then(|s| non_blank(Some(s.url()))),
        published_at: item.pub_date().and_then(parse_timestamp),
        media: media_attachments(item),
    }
}

/// Parse a feed timestamp. Unparseable values count as absent.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn media_attachments(item: &rss::Item) -> Vec<MediaAttachment> {
    let mut media = Vec::new();

    if let Some(ns) = item.extensions().get("media") {
        for ext in ns.get("content").into_iter().flatten() {
            media.extend(attachment_from_extension(ext));
        }
        for group in ns.get("group").into_iter().flatten() {
            for ext in group.children().get("content").into_iter().flatten() {
                media.extend(attachment_from_extension(ext));
            }
        }
    }

    if let Some(enclosure) = item.enclosure() {
        media.push(MediaAttachment {
            url: enclosure.url().to_string(),
            mime_type: non_blank(Some(enclosure.mime_type())),
        });
    }

    media
}

fn attachment_from_extension(ext: &Extension) -> Option<MediaAttachment> {
    let url = ext.attrs().get("url")?;
    // `medium="image"` is accepted when `type` is missing.
    let mime_type = ext.attrs().get("type").cloned().or_else(|| {
        ext.attrs()
            .get("medium")
            .filter(|m| m.as_str() == "image")
            .map(|_| "image/*".to_string())
    });
    Some(MediaAttachment {
        url: url.clone(),
        mime_type,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn load_fixture() -> Vec<u8> {
        std::fs::read("../../../fixtures/rss/google-news.xml").expect("read rss fixture")
    }

    #[test]
    fn parse_google_news_fixture() {
        let entries = parse_feed(&load_fixture()).expect("parse fixture");
        assert_eq!(entries.len(), 4);

        let first = &entries[0];
        assert_eq!(
            first.title.as_deref(),
            Some("Soil mound clean-up goes to VCAT - Dandenong Star Journal")
        );
        assert_eq!(
            first.link.as_deref(),
            Some("https://news.google.com/rss/articles/CBMiSoilMound?oc=5")
        );
        assert_eq!(first.source_name.as_deref(), Some("Dandenong Star Journal"));
        assert_eq!(
            first.source_url.as_deref(),
            Some("https://dandenong.starcommunity.com.au")
        );
        assert_eq!(
            first.published_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 16, 3, 15, 0).unwrap())
        );
        assert_eq!(
            first.image_url(),
            Some("https://cdn.starcommunity.com.au/soil-mound.jpg")
        );
    }

    #[test]
    fn enclosure_becomes_attachment() {
        let entries = parse_feed(&load_fixture()).unwrap();
        assert_eq!(
            entries[1].image_url(),
            Some("https://www.greaterdandenong.vic.gov.au/budget.png")
        );
    }

    #[test]
    fn missing_fields_stay_absent() {
        let entries = parse_feed(&load_fixture()).unwrap();
        assert!(entries[2].published_at.is_none());
        assert!(entries[2].source_name.is_none());
        assert!(entries[3].title.is_none());
    }

    #[test]
    fn media_group_and_medium_attribute() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>t</title><link>https://example.com</link><description>d</description>
    <item>
      <title>Grouped</title>
      <media:group>
        <media:content url="https://cdn.example.com/a.jpg" medium="image"/>
      </media:group>
    </item>
  </channel>
</rss>"#;
        let entries = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(entries[0].image_url(), Some("https://cdn.example.com/a.jpg"));
    }

    #[test]
    fn invalid_document_is_feed_error() {
        let err = parse_feed(b"<html><body>not a feed</body></html>").unwrap_err();
        assert!(matches!(err, BulletinError::Feed(_)));
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("Fri, 16 Oct 2026 03:15:00 GMT").is_some());
        assert!(parse_timestamp("2026-10-16T03:15:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
