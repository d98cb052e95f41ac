//! # edgequake-translate
//!
//! Translate free text and large documents through a streaming translation
//! workflow endpoint.
//!
//! A workflow answers one request at a time and caps the length of what it
//! accepts, so long documents are cut into bounded pages, translated
//! concurrently with per-page retry, and merged back into one artifact. The
//! workflow may answer with translated text or with a link to a translated
//! binary file; both are handled.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document (.txt / .doc / .docx / .pdf, path or URL)
//!  │
//!  ├─ 1. Input     read or download, extract text (spawn_blocking)
//!  ├─ 2. Segment   paragraph-first packing into ≤N-char pages
//!  ├─ 3. Dispatch  concurrent transport calls, capped, with retry
//!  ├─ 4. Decode    chunked `data:` lines → text / artifact events
//!  └─ 5. Merge     joined text, single file, or zip of per-page files
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_translate::{translate_document, Language, TranslationConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Endpoint from TRANSLATE_API_URL / TRANSLATE_API_TOKEN / TRANSLATE_WORKFLOW_ID
//!     let config = TranslationConfig::builder()
//!         .target_language(Language::English)
//!         .build()?;
//!     let output = translate_document("report.docx", &config).await?;
//!     std::fs::write(output.artifact.file_name(), output.artifact.as_bytes())?;
//!     eprintln!("{}/{} pages", output.stats.translated_pages, output.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `translate` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-translate = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod storage;
pub mod stream;
pub mod translate;

#[cfg(test)]
mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractionRule, Language, PageSeparator, StorageConfig, TransportConfig, TranslationConfig,
    TranslationConfigBuilder,
};
pub use error::{PageError, TranslateError};
pub use output::{
    Artifact, DocumentInfo, EventKind, Page, PageFailure, PageOutput, PageResult, PipelineResult,
    RunOutcome, TranslationEvent, TranslationOutput, TranslationStats, TranslationUnit,
};
pub use pipeline::decode::EventStream;
pub use pipeline::merge::ArtifactFetcher;
pub use pipeline::transport::{HttpTransport, Transport};
pub use progress::{NoopProgressCallback, ProgressCallback, TranslationProgressCallback};
pub use stream::{translate_bytes_stream, translate_stream, translate_text_stream, PageStream};
pub use translate::{
    inspect, translate_bytes, translate_document, translate_sync, translate_text,
    translate_to_file,
};
