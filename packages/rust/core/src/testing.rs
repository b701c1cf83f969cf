//! In-memory capability doubles for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bulletin_shared::{
    BulletinError, CompletionRequest, CompletionService, DeliveryReceipt, FeedEntry, FeedSource,
    Mailer, Result,
};

// ---------------------------------------------------------------------------
// FakeFeed
// ---------------------------------------------------------------------------

/// Canned search results keyed by query. Unknown queries return nothing.
#[derive(Default)]
pub struct FakeFeed {
    results: HashMap<String, Vec<FeedEntry>>,
    failing: Vec<String>,
    pub searched: Mutex<Vec<String>>,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, entries: Vec<FeedEntry>) -> Self {
        self.results.insert(query.to_string(), entries);
        self
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.failing.push(query.to_string());
        self
    }

    pub fn searches(&self) -> Vec<String> {
        self.searched.lock().unwrap().clone()
    }
}

impl FeedSource for FakeFeed {
    async fn search(&self, query: &str) -> Result<Vec<FeedEntry>> {
        self.searched.lock().unwrap().push(query.to_string());
        if self.failing.iter().any(|q| q == query) {
            return Err(BulletinError::Network(format!("{query}: HTTP 503")));
        }
        Ok(self.results.get(query).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// ScriptedCompletion
// ---------------------------------------------------------------------------

/// What a [`ScriptedCompletion`] does for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    NetworkError,
    CompletionError,
    /// Sleep far longer than any test timeout.
    Hang,
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

type Responder = Box<dyn Fn(&CompletionRequest) -> Reply + Send + Sync>;

/// A completion service whose replies come from a closure.
pub struct ScriptedCompletion {
    configured: bool,
    responder: Responder,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(responder: impl Fn(&CompletionRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            configured: true,
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same reply.
    pub fn always(reply: Reply) -> Self {
        Self::new(move |_| reply.clone())
    }

    /// No credential: `complete` must never be called.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::always(Reply::NetworkError)
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl CompletionService for ScriptedCompletion {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = (self.responder)(request);
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::NetworkError => Err(BulletinError::Network("connection refused".into())),
            Reply::CompletionError => Err(BulletinError::Completion("no choices in response".into())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(String::new())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingMailer
// ---------------------------------------------------------------------------

/// Keeps every body it is asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    fail: bool,
    pub sent: Mutex<Vec<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Mailer for RecordingMailer {
    async fn send(&self, html_body: &str) -> Result<DeliveryReceipt> {
        self.sent.lock().unwrap().push(html_body.to_string());
        if self.fail {
            return Err(BulletinError::Mail("HTTP 403 Forbidden: sender not verified".into()));
        }
        Ok(DeliveryReceipt {
            status: 202,
            message_id: Some("test-message".into()),
            recipients: 1,
        })
    }
}
