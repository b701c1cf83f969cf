//! Shared types, error model, capability traits, and configuration for bulletin.
//!
//! This crate is the foundation depended on by all other bulletin crates.
//! It provides:
//! - [`BulletinError`]: the unified error type
//! - Domain types ([`Article`], [`EnrichedArticle`], [`CategoryBucket`], [`Digest`], [`RunState`])
//! - Capability traits ([`FeedSource`], [`CompletionService`], [`Mailer`])
//! - Configuration ([`AppConfig`], config loading)

pub mod capabilities;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use capabilities::{
    CompletionRequest, CompletionService, DeliveryReceipt, FeedSource, Mailer, ResponseFormat,
};
pub use config::{
    AppConfig, CategoryConfig, FeedConfig, LimitsConfig, MailConfig, NewsletterConfig,
    OpenRouterConfig, ScheduleConfig, StorageConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, parse_recipient_list, read_secret, validate_completion_key,
    validate_mail_key,
};
pub use error::{BulletinError, Result};
pub use types::{
    Article, CategoryBucket, CategoryGroup, Digest, EnrichedArticle, FeedEntry, MediaAttachment,
    RelevanceScore, RunState,
};
