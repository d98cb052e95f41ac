//! Configuration types for document translation.
//!
//! All run behaviour is controlled through [`TranslationConfig`], built via
//! its [`TranslationConfigBuilder`]. Transport and storage settings live in
//! their own structs ([`TransportConfig`], [`StorageConfig`]) which are
//! constructed once at startup, usually from the environment, and passed
//! in explicitly.

use crate::error::TranslateError;
use crate::pipeline::merge::ArtifactFetcher;
use crate::pipeline::transport::Transport;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for a translation run.
///
/// # Example
/// ```rust
/// use edgequake_translate::{Language, TranslationConfig};
///
/// let config = TranslationConfig::builder()
///     .source_language(Language::English)
///     .target_language(Language::French)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct TranslationConfig {
    /// Language of the submitted text. Default: Chinese.
    pub source_language: Language,

    /// Language to translate into. Default: English.
    pub target_language: Language,

    /// Maximum pages in flight to the transport at once. Default: 2.
    ///
    /// Workflow endpoints are rate limited per token; two concurrent streams
    /// keep throughput up without tripping `429`s on the default plan.
    pub concurrency: usize,

    /// Retries per page after the first failed attempt. Default: 2.
    pub max_retries: u32,

    /// Fixed delay between attempts of the same page, in milliseconds. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Character budget per page produced by the segmenter. Default: 2000.
    ///
    /// Counted in Unicode scalar values, not bytes, so CJK text gets the same
    /// number of characters per request as Latin text.
    pub page_chars: usize,

    /// Separator placed between pages in merged output. Default: page marker.
    pub page_separator: PageSeparator,

    /// How a decoded payload is turned into an event. Default: URL sniffing.
    pub extraction_rule: ExtractionRule,

    /// Custom prompt template; see [`crate::prompts::render_prompt`].
    pub prompt_template: Option<String>,

    /// Upload the source file and translate it in a single whole-file
    /// request instead of segmenting it. Default: false.
    pub relay_whole_file: bool,

    /// Transport endpoint settings. If `None` and no `transport` is set,
    /// resolved from the environment at run start.
    pub transport_config: Option<TransportConfig>,

    /// Pre-constructed transport. Takes precedence over `transport_config`.
    pub transport: Option<Arc<dyn Transport>>,

    /// Object storage settings for uploads and artifact downloads.
    pub storage: Option<StorageConfig>,

    /// Pre-constructed artifact fetcher. Takes precedence over `storage`.
    pub fetcher: Option<Arc<dyn ArtifactFetcher>>,

    /// Progress events sink.
    pub progress_callback: Option<ProgressCallback>,

    /// Download timeout for URL inputs and artifacts in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-request transport timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            source_language: Language::Chinese,
            target_language: Language::English,
            concurrency: 2,
            max_retries: 2,
            retry_backoff_ms: 1000,
            page_chars: 2000,
            page_separator: PageSeparator::default(),
            extraction_rule: ExtractionRule::default(),
            prompt_template: None,
            relay_whole_file: false,
            transport_config: None,
            transport: None,
            storage: None,
            fetcher: None,
            progress_callback: None,
            download_timeout_secs: 120,
            api_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for TranslationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationConfig")
            .field("source_language", &self.source_language)
            .field("target_language", &self.target_language)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("page_chars", &self.page_chars)
            .field("page_separator", &self.page_separator)
            .field("extraction_rule", &self.extraction_rule)
            .field("relay_whole_file", &self.relay_whole_file)
            .field("transport_config", &self.transport_config)
            .field("transport", &self.transport.as_ref().map(|_| "<dyn Transport>"))
            .field("storage", &self.storage)
            .field("fetcher", &self.fetcher.as_ref().map(|_| "<dyn ArtifactFetcher>"))
            .finish()
    }
}

impl TranslationConfig {
    /// Create a new builder for `TranslationConfig`.
    pub fn builder() -> TranslationConfigBuilder {
        TranslationConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`TranslationConfig`].
pub struct TranslationConfigBuilder {
    config: TranslationConfig,
}

impl TranslationConfigBuilder {
    pub fn source_language(mut self, lang: Language) -> Self {
        self.config.source_language = lang;
        self
    }

    pub fn target_language(mut self, lang: Language) -> Self {
        self.config.target_language = lang;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn page_chars(mut self, n: usize) -> Self {
        self.config.page_chars = n;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn extraction_rule(mut self, rule: ExtractionRule) -> Self {
        self.config.extraction_rule = rule;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn relay_whole_file(mut self, v: bool) -> Self {
        self.config.relay_whole_file = v;
        self
    }

    pub fn transport_config(mut self, tc: TransportConfig) -> Self {
        self.config.transport_config = Some(tc);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.config.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = Some(storage);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.config.fetcher = Some(fetcher);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranslationConfig, TranslateError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(TranslateError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.page_chars == 0 {
            return Err(TranslateError::InvalidConfig(
                "Page character budget must be ≥ 1".into(),
            ));
        }
        if let Some(ref t) = c.prompt_template {
            if !t.contains("{text}") {
                return Err(TranslateError::InvalidConfig(
                    "Prompt template must contain the {text} placeholder".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Transport / storage settings ─────────────────────────────────────────

/// Endpoint settings for the HTTP translation workflow.
#[derive(Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Workflow run URL.
    pub endpoint: String,
    /// Bearer credential.
    pub token: String,
    /// Workflow identifier sent in every request body.
    pub workflow_id: String,
    /// Caller identity sent in every request body.
    pub user_id: String,
    /// Ask the endpoint for a chunked `data:` stream instead of one JSON body.
    pub stream: bool,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("workflow_id", &self.workflow_id)
            .field("user_id", &self.user_id)
            .field("stream", &self.stream)
            .finish()
    }
}

impl TransportConfig {
    pub const ENV_ENDPOINT: &'static str = "TRANSLATE_API_URL";
    pub const ENV_TOKEN: &'static str = "TRANSLATE_API_TOKEN";
    pub const ENV_WORKFLOW_ID: &'static str = "TRANSLATE_WORKFLOW_ID";
    pub const ENV_USER_ID: &'static str = "TRANSLATE_USER_ID";
    pub const ENV_NO_STREAM: &'static str = "TRANSLATE_NO_STREAM";

    /// Read transport settings from the environment.
    ///
    /// `TRANSLATE_API_URL`, `TRANSLATE_API_TOKEN` and `TRANSLATE_WORKFLOW_ID`
    /// are required; `TRANSLATE_USER_ID` defaults to `"edgequake"`. A truthy
    /// `TRANSLATE_NO_STREAM` asks for single JSON answers.
    pub fn from_env() -> Result<Self, TranslateError> {
        let required = |key: &str| -> Result<String, TranslateError> {
            match std::env::var(key) {
                Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
                _ => Err(TranslateError::TransportNotConfigured {
                    hint: format!(
                        "Set {key} (and {}, {}, {}).",
                        Self::ENV_ENDPOINT,
                        Self::ENV_TOKEN,
                        Self::ENV_WORKFLOW_ID
                    ),
                }),
            }
        };

        Ok(Self {
            endpoint: required(Self::ENV_ENDPOINT)?,
            token: required(Self::ENV_TOKEN)?,
            workflow_id: required(Self::ENV_WORKFLOW_ID)?,
            user_id: std::env::var(Self::ENV_USER_ID)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "edgequake".to_string()),
            stream: !is_truthy(std::env::var(Self::ENV_NO_STREAM).ok().as_deref()),
        })
    }
}

/// Boolean env flag the way clap reads one: set and not `0`/`false`/`no`/`off`.
fn is_truthy(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => false,
        Some(v) => !matches!(v.as_str(), "" | "0" | "false" | "no" | "off" | "n" | "f"),
    }
}

/// Object storage bucket used as a transient relay for binary files.
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    pub api_key: String,
    pub bucket: String,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl StorageConfig {
    /// Read storage settings from `STORAGE_URL`, `STORAGE_API_KEY` and
    /// `STORAGE_BUCKET`. Returns `None` unless all three are set.
    pub fn from_env() -> Option<Self> {
        let get = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Some(Self {
            base_url: get("STORAGE_URL")?.trim_end_matches('/').to_string(),
            api_key: get("STORAGE_API_KEY")?,
            bucket: get("STORAGE_BUCKET")?,
        })
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// The fixed set of languages offered for source and target selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Language {
    Chinese,
    English,
    French,
    German,
    Spanish,
    Italian,
    Japanese,
    Korean,
    Portuguese,
    Russian,
}

impl Language {
    pub const ALL: [Language; 10] = [
        Language::Chinese,
        Language::English,
        Language::French,
        Language::German,
        Language::Spanish,
        Language::Italian,
        Language::Japanese,
        Language::Korean,
        Language::Portuguese,
        Language::Russian,
    ];

    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            Language::Chinese => "zh",
            Language::English => "en",
            Language::French => "fr",
            Language::German => "de",
            Language::Spanish => "es",
            Language::Italian => "it",
            Language::Japanese => "ja",
            Language::Korean => "ko",
            Language::Portuguese => "pt",
            Language::Russian => "ru",
        }
    }

    /// Native display name; this is what the prompt names.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Chinese => "中文",
            Language::English => "English",
            Language::French => "Français",
            Language::German => "Deutsch",
            Language::Spanish => "Español",
            Language::Italian => "Italiano",
            Language::Japanese => "日本語",
            Language::Korean => "한국어",
            Language::Portuguese => "Português",
            Language::Russian => "Русский",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Language::ALL
            .into_iter()
            .find(|l| l.code() == needle || l.name().to_lowercase() == needle)
            .ok_or_else(|| {
                TranslateError::InvalidConfig(format!(
                    "Unknown language '{s}'. Expected one of: {}",
                    Language::ALL.map(|l| l.code()).join(", ")
                ))
            })
    }
}

impl From<Language> for String {
    fn from(l: Language) -> Self {
        l.code().to_string()
    }
}

impl TryFrom<String> for Language {
    type Error = TranslateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Which rule turns a decoded payload into a [`crate::output::TranslationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtractionRule {
    /// Emit the first embedded URL as an artifact reference, else the payload as text. (default)
    #[default]
    UrlSniffing,
    /// Emit only the text following the literal `译文：` marker.
    TranslationMarker,
}

/// How to separate pages in merged output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// "--- Page N ---" marker line. (default)
    #[default]
    PageMarker,
    /// Blank line only: "\n\n"
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before page `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::PageMarker => format!("\n\n--- Page {} ---\n\n", page_num),
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = TranslationConfig::default();
        assert_eq!(c.concurrency, 2);
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.retry_backoff_ms, 1000);
        assert_eq!(c.page_chars, 2000);
        assert_eq!(c.source_language, Language::Chinese);
        assert_eq!(c.target_language, Language::English);
        assert_eq!(c.extraction_rule, ExtractionRule::UrlSniffing);
    }

    #[test]
    fn builder_clamps_concurrency() {
        let c = TranslationConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn builder_rejects_zero_page_budget() {
        let err = TranslationConfig::builder().page_chars(0).build().unwrap_err();
        assert!(matches!(err, TranslateError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_template_without_text() {
        let err = TranslationConfig::builder()
            .prompt_template("translate to {target_language}")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("{text}"));
    }

    #[test]
    fn language_parses_code_and_name() {
        assert_eq!("fr".parse::<Language>().unwrap(), Language::French);
        assert_eq!("EN".parse::<Language>().unwrap(), Language::English);
        assert_eq!("日本語".parse::<Language>().unwrap(), Language::Japanese);
        assert!("xx".parse::<Language>().is_err());
    }

    #[test]
    fn language_serde_uses_code() {
        let json = serde_json::to_string(&Language::German).unwrap();
        assert_eq!(json, "\"de\"");
        let back: Language = serde_json::from_str("\"ko\"").unwrap();
        assert_eq!(back, Language::Korean);
    }

    #[test]
    fn page_marker_separator_names_page() {
        assert_eq!(
            PageSeparator::PageMarker.render(3),
            "\n\n--- Page 3 ---\n\n"
        );
        assert_eq!(PageSeparator::None.render(3), "\n\n");
    }

    #[test]
    fn no_stream_flag_values() {
        assert!(!is_truthy(None));
        for off in ["", "0", "false", "No", " off "] {
            assert!(!is_truthy(Some(off)), "{off:?}");
        }
        for on in ["1", "true", "YES", "on"] {
            assert!(is_truthy(Some(on)), "{on:?}");
        }
    }

    #[test]
    fn from_env_honours_no_stream() {
        std::env::set_var(TransportConfig::ENV_ENDPOINT, "https://api.example.com/v1/workflow/run");
        std::env::set_var(TransportConfig::ENV_TOKEN, "pat_test");
        std::env::set_var(TransportConfig::ENV_WORKFLOW_ID, "wf-1");

        std::env::set_var(TransportConfig::ENV_NO_STREAM, "1");
        assert!(!TransportConfig::from_env().unwrap().stream);
        std::env::set_var(TransportConfig::ENV_NO_STREAM, "false");
        assert!(TransportConfig::from_env().unwrap().stream);
        std::env::remove_var(TransportConfig::ENV_NO_STREAM);
        assert!(TransportConfig::from_env().unwrap().stream);
    }

    #[test]
    fn transport_config_debug_redacts_token() {
        let tc = TransportConfig {
            endpoint: "https://api.example.com/v1/workflow/run".into(),
            token: "pat_secret".into(),
            workflow_id: "42".into(),
            user_id: "u".into(),
            stream: true,
        };
        let dbg = format!("{tc:?}");
        assert!(!dbg.contains("pat_secret"));
    }
}
