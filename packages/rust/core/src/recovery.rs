//! Field recovery from untrusted completion text.
//!
//! Replies arrive as plain JSON, JSON inside a markdown fence (with or without
//! a language tag), JSON whose `content` field is itself JSON-encoded, or
//! prose that merely looks like JSON. [`parse`] tries an ordered list of
//! strategies and keeps the first that recovers anything:
//!
//! 1. [`structured_json`]: strip the fence, parse the object.
//! 2. [`double_encoded_json`]: decode a JSON string found under a
//!    content-like field a second time.
//! 3. [`line_scan`]: pick `"field": value` pairs out line by line.
//!
//! Missing fields are filled with placeholders. Parsing never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use url::Url;

pub const SUMMARY_PLACEHOLDER: &str = "Summary not provided";
pub const RELEVANCE_PLACEHOLDER: &str = "Relevance explanation not provided";

/// A complete fenced block anywhere in the text: ```` ```lang\n...\n``` ````.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid regex")
});

/// An opening fence with no closing one (truncated replies).
static OPEN_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*)$").expect("valid regex")
});

const SUMMARY_KEYS: &[&str] = &["summary"];
const RELEVANCE_KEYS: &[&str] = &["relevance", "relevance_explanation"];
const SCORE_KEYS: &[&str] = &["relevance_score", "score"];
const IMAGE_KEYS: &[&str] = &["main_image_url", "image_url"];

const ALL_KEYS: [&[&str]; 4] = [SUMMARY_KEYS, RELEVANCE_KEYS, SCORE_KEYS, IMAGE_KEYS];

/// Keys under which a wrapped reply may hide the real payload.
const CONTENT_KEYS: &[&str] = &["content", "text", "response", "output"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which strategy recovered the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLayer {
    StructuredJson,
    DoubleEncodedJson,
    LineScan,
}

/// Fields as found by a single strategy. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveredFields {
    pub summary: Option<String>,
    pub relevance: Option<String>,
    /// Left raw for the score normalizer.
    pub relevance_score: Option<Value>,
    pub main_image_url: Option<String>,
}

impl RecoveredFields {
    fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.relevance.is_none()
            && self.relevance_score.is_none()
            && self.main_image_url.is_none()
    }
}

/// Output of [`parse`], with placeholders filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub summary: String,
    pub relevance: String,
    pub relevance_score: Option<Value>,
    pub main_image_url: Option<String>,
    /// `None` when no strategy recovered anything.
    pub layer: Option<RecoveryLayer>,
}

impl ParsedResponse {
    pub fn is_recovered(&self) -> bool {
        self.layer.is_some()
    }
}

/// A recovery strategy. Returns `None` to hand over to the next one.
pub type Strategy = fn(&str) -> Option<RecoveredFields>;

/// The recovery chain, in the order it is tried.
pub const STRATEGIES: [(RecoveryLayer, Strategy); 3] = [
    (RecoveryLayer::StructuredJson, structured_json),
    (RecoveryLayer::DoubleEncodedJson, double_encoded_json),
    (RecoveryLayer::LineScan, line_scan),
];

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Recover `summary`, `relevance`, `relevance_score` and `main_image_url`.
pub fn parse(raw: &str) -> ParsedResponse {
    let found = STRATEGIES
        .iter()
        .find_map(|(layer, strategy)| strategy(raw).map(|fields| (*layer, fields)));

    let (layer, fields) = match found {
        Some((layer, fields)) => (Some(layer), fields),
        None => (None, RecoveredFields::default()),
    };

    ParsedResponse {
        summary: fields
            .summary
            .unwrap_or_else(|| SUMMARY_PLACEHOLDER.to_string()),
        relevance: fields
            .relevance
            .unwrap_or_else(|| RELEVANCE_PLACEHOLDER.to_string()),
        relevance_score: fields.relevance_score,
        main_image_url: fields.main_image_url,
        layer,
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Layer 1: the (possibly fenced) reply is a JSON object carrying the fields.
///
/// An object with none of the known keys still counts as recovered (every
/// field missing), unless it wraps a payload that layer 2 can reach.
pub fn structured_json(raw: &str) -> Option<RecoveredFields> {
    let value = decode(raw)?;
    let obj = value.as_object()?;
    from_object(obj).or_else(|| {
        unwrap_nested(&value, 0)
            .is_none()
            .then(RecoveredFields::default)
    })
}

/// Layer 2: the real object is JSON-encoded inside another JSON value.
///
/// Handles a bare JSON string, `{"content": "..."}`-style wrappers, and full
/// chat-completion envelopes (`choices[0].message.content`).
pub fn double_encoded_json(raw: &str) -> Option<RecoveredFields> {
    let outer = decode(raw)?;
    unwrap_nested(&outer, 0)
}

/// Layer 3: best-effort `"field": value` extraction, one line at a time.
///
/// Never fails on malformed lines; fields without a marker stay empty.
pub fn line_scan(raw: &str) -> Option<RecoveredFields> {
    let mut fields = RecoveredFields::default();

    for line in raw.lines() {
        if let Some(v) = scan_marker(line, SUMMARY_KEYS) {
            fields.summary.get_or_insert(v);
        }
        if let Some(v) = scan_marker(line, RELEVANCE_KEYS) {
            fields.relevance.get_or_insert(v);
        }
        if let Some(v) = scan_marker(line, SCORE_KEYS) {
            fields.relevance_score.get_or_insert(Value::String(v));
        }
        if let Some(v) = scan_marker(line, IMAGE_KEYS) {
            if fields.main_image_url.is_none() {
                fields.main_image_url = absolute_http_url(&v);
            }
        }
    }

    (!fields.is_empty()).then_some(fields)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Remove a markdown fence and its optional language tag.
///
/// Unfenced text is returned trimmed and otherwise untouched.
pub fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(inner) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    if let Some(inner) = OPEN_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    trimmed
}

/// Parse text as JSON, retrying without a fence and then on the outermost
/// `{ ... }` span.
fn decode(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    parse_json(trimmed).or_else(|| {
        let body = strip_fence(trimmed);
        parse_json(body).or_else(|| parse_json(outer_object(body)?))
    })
}

fn parse_json(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn unwrap_nested(value: &Value, depth: usize) -> Option<RecoveredFields> {
    if depth > 3 {
        return None;
    }

    match value {
        Value::String(inner) => {
            let decoded = decode(inner)?;
            match decoded.as_object() {
                Some(obj) => from_object(obj).or_else(|| unwrap_nested(&decoded, depth + 1)),
                None => unwrap_nested(&decoded, depth + 1),
            }
        }
        Value::Object(obj) => {
            if let Some(content) = obj
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
            {
                return nested_payload(content, depth);
            }
            if let Some(content) = obj.get("message").and_then(|m| m.get("content")) {
                return nested_payload(content, depth);
            }
            CONTENT_KEYS
                .iter()
                .filter_map(|key| obj.get(*key))
                .find_map(|content| nested_payload(content, depth))
        }
        _ => None,
    }
}

fn nested_payload(content: &Value, depth: usize) -> Option<RecoveredFields> {
    match content {
        Value::Object(obj) => from_object(obj).or_else(|| unwrap_nested(content, depth + 1)),
        other => unwrap_nested(other, depth + 1),
    }
}

fn from_object(obj: &Map<String, Value>) -> Option<RecoveredFields> {
    let fields = RecoveredFields {
        summary: first_text(obj, SUMMARY_KEYS),
        relevance: first_text(obj, RELEVANCE_KEYS),
        relevance_score: SCORE_KEYS
            .iter()
            .find_map(|k| obj.get(*k))
            .filter(|v| !v.is_null())
            .cloned(),
        main_image_url: first_text(obj, IMAGE_KEYS).and_then(|u| absolute_http_url(&u)),
    };
    (!fields.is_empty()).then_some(fields)
}

fn first_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Value after the first `"key":` marker on the line, up to the next known
/// marker. One pair of surrounding quotes and a trailing comma are removed,
/// then `\"` is unescaped.
fn scan_marker(line: &str, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let marker = format!("\"{key}\":");
        let idx = line.find(&marker)?;
        let rest = &line[idx + marker.len()..];
        let rest = &rest[..next_marker(rest).unwrap_or(rest.len())];

        let trimmed = rest.trim().trim_end_matches(',').trim_end();
        let unquoted = trimmed.strip_prefix('"').unwrap_or(trimmed);
        let unquoted = unquoted
            .strip_suffix('"')
            .filter(|t| !t.ends_with('\\'))
            .unwrap_or(unquoted);
        let value = unquoted.replace("\\\"", "\"");
        (!value.is_empty() && value != "null").then_some(value)
    })
}

/// Byte offset of the earliest known `"key":` marker in `text`.
fn next_marker(text: &str) -> Option<usize> {
    ALL_KEYS
        .iter()
        .flat_map(|keys| keys.iter())
        .filter_map(|key| text.find(&format!("\"{key}\":")))
        .min()
}

/// Keep a URL only if it is absolute `http`/`https`.
pub fn absolute_http_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    (matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .then(|| url.to_string())
}
