//! SendGrid v3 mail transport.
//!
//! One `POST <base_url>/v3/mail/send` per newsletter, with a separate
//! personalization per recipient so addresses are not disclosed to each other.

use std::time::Duration;

use bulletin_shared::{
    BulletinError, DeliveryReceipt, MailConfig, Mailer, Result, read_secret,
};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument, warn};

/// User-Agent string for mail requests.
const USER_AGENT: &str = concat!("bulletin/", env!("CARGO_PKG_VERSION"));

/// Deadline for a single send.
const SEND_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

// ---------------------------------------------------------------------------
// SendGridMailer
// ---------------------------------------------------------------------------

/// A [`Mailer`] backed by the SendGrid v3 API.
#[derive(Debug, Clone)]
pub struct SendGridMailer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    sender: String,
    subject: String,
    recipients: Vec<String>,
}

impl SendGridMailer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        recipients: Vec<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .map_err(|e| BulletinError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            sender: sender.into(),
            subject: subject.into(),
            recipients,
        })
    }

    /// Build from the `[mail]` section. The key and the recipient override are
    /// read from the environment variables the section names.
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            read_secret(&config.api_key_env),
            &config.sender,
            &config.subject,
            config.resolve_recipients(),
        )
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }
}

impl Mailer for SendGridMailer {
    #[instrument(skip_all, fields(recipients = self.recipients.len(), bytes = html_body.len()))]
    async fn send(&self, html_body: &str) -> Result<DeliveryReceipt> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BulletinError::config("SendGrid API key is missing"))?;
        if self.recipients.is_empty() {
            return Err(BulletinError::config("no recipients configured"));
        }

        let request = SendRequest {
            personalizations: self
                .recipients
                .iter()
                .map(|email| Personalization {
                    to: [Address {
                        email: email.as_str(),
                    }],
                })
                .collect(),
            from: Address {
                email: &self.sender,
            },
            subject: &self.subject,
            content: [Content {
                kind: "text/html",
                value: html_body,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BulletinError::Mail(format!("send failed: {e}")))?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, %detail, "mail service rejected the message");
            return Err(BulletinError::Mail(format!("HTTP {status}: {detail}")));
        }

        info!(
            status = status.as_u16(),
            message_id = message_id.as_deref().unwrap_or("N/A"),
            "newsletter handed to mail service"
        );

        Ok(DeliveryReceipt {
            status: status.as_u16(),
            message_id,
            recipients: self.recipients.len(),
        })
    }
}
