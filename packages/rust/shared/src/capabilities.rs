//! Interfaces to the outside world: news search, AI completion, and mail.
//!
//! The pipeline is generic over these traits so the network-facing crates
//! (`bulletin-feeds`, `bulletin-openrouter`, `bulletin-mailer`) stay thin and
//! tests can substitute in-memory doubles.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::FeedEntry;

// ---------------------------------------------------------------------------
// FeedSource
// ---------------------------------------------------------------------------

/// A searchable news feed. Called once per category per run.
pub trait FeedSource: Send + Sync {
    fn search(&self, query: &str) -> impl Future<Output = Result<Vec<FeedEntry>>> + Send;
}

// ---------------------------------------------------------------------------
// CompletionService
// ---------------------------------------------------------------------------

/// Hint asking the completion service for a particular reply shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
    Text,
}

/// A single prompt sent to the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// The user message (often a serialized JSON document).
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub response_format: ResponseFormat,
    /// Deadline for the whole request, if any.
    pub timeout: Option<Duration>,
}

/// An AI text-completion capability.
pub trait CompletionService: Send + Sync {
    /// Whether a credential is available. When false, callers must not call
    /// [`complete`](Self::complete).
    fn is_configured(&self) -> bool;

    /// Send the prompt and return the raw reply text, untouched.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

/// Outcome of a successful delivery hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// HTTP status returned by the mail service.
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub recipients: usize,
}

/// Outbound email transport. Used once per run.
pub trait Mailer: Send + Sync {
    fn send(&self, html_body: &str) -> impl Future<Output = Result<DeliveryReceipt>> + Send;
}
