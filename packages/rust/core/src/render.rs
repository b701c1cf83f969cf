//! HTML rendering of the digest.
//!
//! The completion service is asked for a complete HTML document first. A
//! reply is accepted only if it starts with a document-type declaration;
//! anything else, including a missing credential, an error or a timeout,
//! falls back to [`fallback`], which cannot fail.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use bulletin_shared::{
    AppConfig, BulletinError, CategoryGroup, CompletionRequest, CompletionService,
    EnrichedArticle, ResponseFormat, Result,
};
use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info, instrument, warn};

/// Shown when an article has neither a page image nor a feed image.
pub const PLACEHOLDER_IMAGE: &str = "https://via.placeholder.com/300x200";

const DOCTYPE: &str = "<!doctype html";

/// Where the final HTML came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderSource {
    Ai,
    Fallback,
}

impl RenderSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for RenderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub html: String,
    pub source: RenderSource,
}

/// Newsletter branding and render request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub title: String,
    pub organisation: String,
    pub locality: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl RenderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            title: config.newsletter.title.clone(),
            organisation: config.newsletter.organisation.clone(),
            locality: config.newsletter.locality.clone(),
            max_tokens: config.openrouter.render_max_tokens,
            temperature: config.openrouter.render_temperature,
            timeout: Duration::from_secs(config.openrouter.render_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateRenderer
// ---------------------------------------------------------------------------

pub struct TemplateRenderer<C> {
    completion: Arc<C>,
    settings: RenderSettings,
}

impl<C: CompletionService> TemplateRenderer<C> {
    pub fn new(completion: Arc<C>, settings: RenderSettings) -> Self {
        Self {
            completion,
            settings,
        }
    }

    /// Render the digest. Never fails.
    #[instrument(skip_all, fields(sections = sections.len()))]
    pub async fn render(
        &self,
        sections: &[CategoryGroup<EnrichedArticle>],
        now: DateTime<Utc>,
    ) -> Rendered {
        if !self.completion.is_configured() {
            debug!("no completion credential, using fallback template");
            return self.fallback_rendered(sections, now);
        }

        match self.request_document(sections, now).await {
            Ok(html) => {
                info!(bytes = html.len(), "rendered with completion service");
                Rendered {
                    html,
                    source: RenderSource::Ai,
                }
            }
            Err(e) => {
                warn!(error = %e, "AI rendering rejected, using fallback template");
                self.fallback_rendered(sections, now)
            }
        }
    }

    /// The JSON document sent as the user message.
    pub fn build_prompt(
        &self,
        sections: &[CategoryGroup<EnrichedArticle>],
        now: DateTime<Utc>,
    ) -> String {
        let categories: Vec<serde_json::Value> = sections
            .iter()
            .map(|group| {
                let articles: Vec<serde_json::Value> = group
                    .articles
                    .iter()
                    .map(|a| {
                        serde_json::json!({
                            "title": a.article.title,
                            "source": a.article.source,
                            "url": a.article.url,
                            "image_url": a.display_image().unwrap_or(PLACEHOLDER_IMAGE),
                            "summary": a.summary,
                            "relevance_score": a.relevance_score.to_string(),
                            "relevance": a.relevance_explanation,
                        })
                    })
                    .collect();
                serde_json::json!({ "name": group.name, "articles": articles })
            })
            .collect();

        serde_json::json!({
            "task": format!(
                "Create a complete HTML email newsletter for {} presenting the articles below, \
                 grouped under their category headings in the given order.",
                self.settings.locality
            ),
            "requirements": [
                "Return only the HTML document, starting with <!DOCTYPE html>.",
                "Use inline CSS only; email clients strip <style> blocks.",
                "Make the layout responsive and readable on mobile.",
                "For each article show the title, source, image, summary, relevance score, relevance explanation and a link to the article.",
                "Finish with a footer carrying the copyright year and organisation.",
            ],
            "newsletter": {
                "title": self.settings.title,
                "organisation": self.settings.organisation,
                "year": now.year(),
            },
            "categories": categories,
        })
        .to_string()
    }

    async fn request_document(
        &self,
        sections: &[CategoryGroup<EnrichedArticle>],
        now: DateTime<Utc>,
    ) -> Result<String> {
        let request = CompletionRequest {
            prompt: self.build_prompt(sections, now),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            response_format: ResponseFormat::Text,
            timeout: Some(self.settings.timeout),
        };

        let reply = tokio::time::timeout(self.settings.timeout, self.completion.complete(&request))
            .await
            .map_err(|_| {
                BulletinError::Timeout(format!(
                    "render request exceeded {}s",
                    self.settings.timeout.as_secs()
                ))
            })??;

        let html = reply.trim();
        if !starts_with_doctype(html) {
            let preview: String = html.chars().take(40).collect();
            return Err(BulletinError::validation(format!(
                "reply does not start with a doctype: {preview:?}"
            )));
        }
        Ok(html.to_string())
    }

    fn fallback_rendered(
        &self,
        sections: &[CategoryGroup<EnrichedArticle>],
        now: DateTime<Utc>,
    ) -> Rendered {
        Rendered {
            html: fallback(&self.settings, sections, now),
            source: RenderSource::Fallback,
        }
    }
}

fn starts_with_doctype(html: &str) -> bool {
    html.get(..DOCTYPE.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(DOCTYPE))
}

// ---------------------------------------------------------------------------
// Fallback template
// ---------------------------------------------------------------------------

/// Build the digest from a fixed inline-styled template.
///
/// Categories and articles appear in the order given. Every interpolated
/// value is HTML-escaped.
pub fn fallback(
    settings: &RenderSettings,
    sections: &[CategoryGroup<EnrichedArticle>],
    now: DateTime<Utc>,
) -> String {
    let mut html = String::with_capacity(4096);
    let title = escape(&settings.title);

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str(
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
    );
    let _ = writeln!(html, "<title>{title}</title>");
    html.push_str("</head>\n");
    html.push_str(
        "<body style=\"margin:0;padding:0;background:#f4f4f4;font-family:Arial,Helvetica,sans-serif;color:#333;\">\n",
    );
    html.push_str("<div style=\"max-width:640px;margin:0 auto;background:#ffffff;\">\n");
    let _ = writeln!(
        html,
        "<div style=\"background:#0c5390;padding:24px;text-align:center;\">\
         <h1 style=\"margin:0;color:#ffffff;font-size:26px;\">{title}</h1></div>"
    );

    for group in sections {
        let _ = writeln!(
            html,
            "<h2 style=\"margin:24px 20px 8px;color:#0c5390;font-size:20px;border-bottom:2px solid #0c5390;padding-bottom:4px;\">{}</h2>",
            escape(&group.name)
        );
        for item in &group.articles {
            write_article(&mut html, item);
        }
    }

    let _ = writeln!(
        html,
        "<div style=\"background:#eeeeee;padding:16px;text-align:center;font-size:12px;color:#666;\">\
         &copy; {} {}. All rights reserved.</div>",
        now.year(),
        escape(&settings.organisation)
    );
    html.push_str("</div>\n</body>\n</html>\n");
    html
}

fn write_article(html: &mut String, item: &EnrichedArticle) {
    let article = &item.article;
    let image = item.display_image().unwrap_or(PLACEHOLDER_IMAGE);
    let url = escape(&article.url);

    html.push_str("<div style=\"margin:0 20px 20px;padding:16px;border:1px solid #dddddd;border-radius:6px;\">\n");
    let _ = writeln!(
        html,
        "<h3 style=\"margin:0 0 4px;font-size:18px;\">{}</h3>",
        escape(&article.title)
    );
    let _ = writeln!(
        html,
        "<p style=\"margin:0 0 12px;color:#777;\"><em>{}</em></p>",
        escape(&article.source)
    );
    let _ = writeln!(
        html,
        "<img src=\"{}\" alt=\"Article Image\" style=\"max-width:100%;height:auto;border-radius:4px;\">",
        escape(image)
    );
    let _ = writeln!(html, "<p>{}</p>", escape(&item.summary));
    let _ = writeln!(
        html,
        "<p><strong>Relevance Score:</strong> {}</p>",
        item.relevance_score
    );
    let _ = writeln!(html, "<p>{}</p>", escape(&item.relevance_explanation));
    let _ = writeln!(
        html,
        "<p><a href=\"{url}\" style=\"color:#0c5390;font-weight:bold;\">Read More</a></p>"
    );
    html.push_str("</div>\n");
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
