//! Application configuration for bulletin.
//!
//! User config lives at `~/.bulletin/bulletin.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored here; sections name the env var that holds them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BulletinError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bulletin.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bulletin";

// ---------------------------------------------------------------------------
// Config structs (matching bulletin.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub newsletter: NewsletterConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// News categories, in newsletter order.
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            newsletter: NewsletterConfig::default(),
            feed: FeedConfig::default(),
            limits: LimitsConfig::default(),
            openrouter: OpenRouterConfig::default(),
            mail: MailConfig::default(),
            storage: StorageConfig::default(),
            categories: default_categories(),
        }
    }
}

/// `[schedule]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Minimum hours between two successful runs.
    #[serde(default = "default_frequency_hours")]
    pub frequency_hours: u32,

    /// How often `bulletin watch` re-checks the gate.
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency_hours: default_frequency_hours(),
            check_interval_minutes: default_check_interval(),
        }
    }
}

fn default_frequency_hours() -> u32 {
    24
}
fn default_check_interval() -> u64 {
    60
}

/// `[newsletter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterConfig {
    /// Locality that relevance is judged against.
    #[serde(default = "default_locality")]
    pub locality: String,

    /// Heading of the rendered newsletter.
    #[serde(default = "default_title")]
    pub title: String,

    /// Copyright holder in the footer.
    #[serde(default = "default_locality")]
    pub organisation: String,
}

impl Default for NewsletterConfig {
    fn default() -> Self {
        Self {
            locality: default_locality(),
            title: default_title(),
            organisation: default_locality(),
        }
    }
}

fn default_locality() -> String {
    "Greater Dandenong Council".into()
}
fn default_title() -> String {
    "Greater Dandenong Council Newsletter".into()
}

/// `[feed]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// RSS search endpoint.
    #[serde(default = "default_feed_url")]
    pub base_url: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Google News edition id (`ceid`).
    #[serde(default = "default_edition")]
    pub edition: String,

    /// Entries older than this many days are dropped.
    #[serde(default = "default_recency_days")]
    pub recency_days: u32,

    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_url(),
            language: default_language(),
            region: default_region(),
            edition: default_edition(),
            recency_days: default_recency_days(),
            timeout_secs: default_feed_timeout(),
        }
    }
}

fn default_feed_url() -> String {
    "https://news.google.com/rss/search".into()
}
fn default_language() -> String {
    "en-AU".into()
}
fn default_region() -> String {
    "AU".into()
}
fn default_edition() -> String {
    "AU:en".into()
}
fn default_recency_days() -> u32 {
    3
}
fn default_feed_timeout() -> u64 {
    30
}

/// `[limits]` section: per-category size bounds unless a category overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_per_category")]
    pub max_per_category: usize,

    #[serde(default = "default_min_per_category")]
    pub min_per_category: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_per_category: default_max_per_category(),
            min_per_category: default_min_per_category(),
        }
    }
}

fn default_max_per_category() -> usize {
    5
}
fn default_min_per_category() -> usize {
    3
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openrouter_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openrouter_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_enrich_max_tokens")]
    pub enrich_max_tokens: u32,

    #[serde(default = "default_enrich_temperature")]
    pub enrich_temperature: f32,

    #[serde(default = "default_enrich_timeout")]
    pub enrich_timeout_secs: u64,

    #[serde(default = "default_render_max_tokens")]
    pub render_max_tokens: u32,

    #[serde(default = "default_render_temperature")]
    pub render_temperature: f32,

    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openrouter_key_env(),
            base_url: default_openrouter_url(),
            model: default_model(),
            enrich_max_tokens: default_enrich_max_tokens(),
            enrich_temperature: default_enrich_temperature(),
            enrich_timeout_secs: default_enrich_timeout(),
            render_max_tokens: default_render_max_tokens(),
            render_temperature: default_render_temperature(),
            render_timeout_secs: default_render_timeout(),
        }
    }
}

fn default_openrouter_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "perplexity/llama-3.1-sonar-huge-128k-online".into()
}
fn default_enrich_max_tokens() -> u32 {
    500
}
fn default_enrich_temperature() -> f32 {
    0.7
}
fn default_enrich_timeout() -> u64 {
    60
}
fn default_render_max_tokens() -> u32 {
    4000
}
fn default_render_temperature() -> f32 {
    0.3
}
fn default_render_timeout() -> u64 {
    120
}

/// `[mail]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Name of the env var holding the SendGrid API key.
    #[serde(default = "default_sendgrid_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_sendgrid_url")]
    pub base_url: String,

    #[serde(default = "default_sender")]
    pub sender: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    #[serde(default)]
    pub recipients: Vec<String>,

    /// Env var holding a comma-separated recipient list; overrides `recipients` when set.
    #[serde(default = "default_recipients_env")]
    pub recipients_env: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_sendgrid_key_env(),
            base_url: default_sendgrid_url(),
            sender: default_sender(),
            subject: default_subject(),
            recipients: Vec::new(),
            recipients_env: default_recipients_env(),
        }
    }
}

fn default_sendgrid_key_env() -> String {
    "SENDGRID_API_KEY".into()
}
fn default_sendgrid_url() -> String {
    "https://api.sendgrid.com".into()
}
fn default_sender() -> String {
    "no-reply@example.com".into()
}
fn default_subject() -> String {
    "Greater Dandenong Council Newsletter".into()
}
fn default_recipients_env() -> String {
    "RECIPIENTS".into()
}

impl MailConfig {
    /// Recipients from the env override if set, else from the file.
    pub fn resolve_recipients(&self) -> Vec<String> {
        match std::env::var(&self.recipients_env) {
            Ok(val) if !val.trim().is_empty() => parse_recipient_list(&val),
            _ => self
                .recipients
                .iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }
}

/// Split a comma-separated recipient list, dropping blanks.
pub fn parse_recipient_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Run-history database path. A leading `~/` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.bulletin/bulletin.db".into()
}

impl StorageConfig {
    /// The database path with `~/` expanded.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

/// `[[categories]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    /// Search query sent to the feed.
    pub query: String,
    /// Domains whose articles never appear in this category.
    #[serde(default)]
    pub excluded_domains: Vec<String>,
    /// Overrides `[limits] max_per_category`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_articles: Option<usize>,
    /// Overrides `[limits] min_per_category`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_articles: Option<usize>,
}

impl CategoryConfig {
    fn new(name: &str, query: &str, excluded_domains: &[&str]) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            excluded_domains: excluded_domains.iter().map(|d| (*d).to_string()).collect(),
            max_articles: None,
            min_articles: None,
        }
    }
}

fn default_categories() -> Vec<CategoryConfig> {
    vec![
        CategoryConfig::new(
            "Greater Dandenong News",
            r#""Greater Dandenong" OR "City of Greater Dandenong" -weather -forecast -temperature when:3d"#,
            &["greaterdandenong.vic.gov.au"],
        ),
        CategoryConfig::new(
            "Surrounding Councils",
            "(casey OR kingston OR monash OR frankston) -weather -forecast when:3d",
            &[],
        ),
        CategoryConfig::new(
            "State & Federal Announcements",
            r#""Victorian Government" "local council" OR "Victorian Premier" "Greater Dandenong" -weather -temperature when:3d"#,
            &[],
        ),
        CategoryConfig::new(
            "Industry News",
            r#""local government" "Victoria" OR "council innovation" OR "municipal development" -weather -forecast when:3d"#,
            &[],
        ),
    ]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bulletin/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BulletinError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bulletin/bulletin.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BulletinError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        BulletinError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BulletinError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BulletinError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BulletinError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the env var named by `var_name`, treating empty values as unset.
pub fn read_secret(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_completion_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openrouter.api_key_env;
    match read_secret(var_name) {
        Some(_) => Ok(()),
        None => Err(BulletinError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

/// Check that the SendGrid API key env var is set and non-empty.
pub fn validate_mail_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.mail.api_key_env;
    match read_secret(var_name) {
        Some(_) => Ok(()),
        None => Err(BulletinError::config(format!(
            "SendGrid API key not found. Set the {var_name} environment variable."
        ))),
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| BulletinError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("frequency_hours"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("Surrounding Councils"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.schedule.frequency_hours, 24);
        assert_eq!(parsed.limits.max_per_category, 5);
        assert_eq!(parsed.limits.min_per_category, 3);
        assert_eq!(parsed.feed.recency_days, 3);
        assert_eq!(parsed.categories.len(), 4);
        assert_eq!(
            parsed.categories[0].excluded_domains,
            ["greaterdandenong.vic.gov.au"]
        );
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: AppConfig = toml::from_str("").expect("parse");
        assert_eq!(config.openrouter.enrich_max_tokens, 500);
        assert_eq!(config.categories.len(), 4);
    }

    #[test]
    fn config_with_custom_categories() {
        let toml_str = r#"
[schedule]
frequency_hours = 12

[newsletter]
locality = "City of Casey"

[[categories]]
name = "Casey News"
query = "casey council"
excluded_domains = ["casey.vic.gov.au"]
min_articles = 1
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.schedule.frequency_hours, 12);
        assert_eq!(config.newsletter.locality, "City of Casey");
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].min_articles, Some(1));
        assert_eq!(config.categories[0].max_articles, None);
    }

    #[test]
    fn recipient_list_parsing() {
        assert_eq!(
            parse_recipient_list(" a@example.com, ,b@example.com ,"),
            ["a@example.com", "b@example.com"]
        );
        assert!(parse_recipient_list("").is_empty());
    }

    #[test]
    fn file_recipients_used_without_env_override() {
        let mail = MailConfig {
            recipients: vec!["a@example.com".into(), "  ".into()],
            recipients_env: "BULLETIN_TEST_NONEXISTENT_RECIPIENTS_98765".into(),
            ..MailConfig::default()
        };
        assert_eq!(mail.resolve_recipients(), ["a@example.com"]);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use unique env var names to avoid interfering with other tests
        config.openrouter.api_key_env = "BULLETIN_TEST_NONEXISTENT_KEY_12345".into();
        config.mail.api_key_env = "BULLETIN_TEST_NONEXISTENT_KEY_67890".into();
        let result = validate_completion_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
        assert!(validate_mail_key(&config).is_err());
    }

    #[test]
    fn storage_path_expansion() {
        let absolute = StorageConfig {
            path: "/var/lib/bulletin/runs.db".into(),
        };
        assert_eq!(
            absolute.resolved_path().unwrap(),
            PathBuf::from("/var/lib/bulletin/runs.db")
        );
        let home = StorageConfig::default().resolved_path().unwrap();
        assert!(home.ends_with(".bulletin/bulletin.db"));
    }
}
