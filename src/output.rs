//! Data model shared by every pipeline stage.
//!
//! ```text
//! Page ──▶ TranslationUnit ──▶ TranslationEvent* ──▶ PageResult ──▶ PipelineResult ──▶ Artifact
//! (segment)  (dispatch)          (decode)              (dispatch)     (dispatch)          (merge)
//! ```
//!
//! Ordering by `page_num` is the only meaningful order. Results arrive in
//! completion order when pages run concurrently, so every consumer re-sorts
//! before producing output.

use crate::config::Language;
use crate::error::{PageError, TranslateError};
use serde::{Deserialize, Serialize};

/// A bounded-size unit of source text; the atomic unit of translation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed, contiguous page number assigned in emission order.
    pub page_num: usize,
    pub text: String,
}

/// The request payload submitted to the transport for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub page_num: usize,
    pub source_language: Language,
    pub target_language: Language,
    pub source_text: String,
}

impl TranslationUnit {
    pub fn new(page: &Page, source_language: Language, target_language: Language) -> Self {
        Self {
            page_num: page.page_num,
            source_language,
            target_language,
            source_text: page.text.clone(),
        }
    }
}

/// What a decoded event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A translated text fragment.
    Text,
    /// A reference (URL) to a binary artifact produced out-of-band.
    ArtifactReference,
}

/// One decoded unit of a transport response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationEvent {
    pub kind: EventKind,
    pub payload: String,
}

impl TranslationEvent {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Text,
            payload: payload.into(),
        }
    }

    pub fn artifact(url: impl Into<String>) -> Self {
        Self {
            kind: EventKind::ArtifactReference,
            payload: url.into(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == EventKind::Text
    }
}

/// The cumulative output of one page, as reported to progress callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum PageOutput {
    /// All `text` events concatenated in arrival order.
    Text(String),
    /// The first artifact reference the page produced.
    Url(String),
}

impl PageOutput {
    pub fn len(&self) -> usize {
        match self {
            PageOutput::Text(s) | PageOutput::Url(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The finished events of one page.
///
/// Immutable once the page's transport call completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_num: usize,
    pub events: Vec<TranslationEvent>,
    /// Number of retries consumed before the successful attempt.
    pub retries: u32,
    pub duration_ms: u64,
}

impl PageResult {
    /// First artifact reference, if the transport produced one.
    pub fn artifact_url(&self) -> Option<&str> {
        self.events
            .iter()
            .find(|e| e.kind == EventKind::ArtifactReference)
            .map(|e| e.payload.as_str())
    }

    /// All text fragments concatenated in arrival order.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter(|e| e.is_text())
            .map(|e| e.payload.as_str())
            .collect()
    }

    /// A page is an artifact page as soon as one event references an artifact.
    pub fn output(&self) -> PageOutput {
        match self.artifact_url() {
            Some(url) => PageOutput::Url(url.to_string()),
            None => PageOutput::Text(self.text()),
        }
    }
}

/// Terminal failure record for a page that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFailure {
    pub page_num: usize,
    pub error: PageError,
}

/// Aggregate of one dispatcher run.
///
/// Complete only when every dispatched page has either a [`PageResult`] or a
/// [`PageFailure`]; nothing is dropped silently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Number of pages handed to the dispatcher.
    pub total_pages: usize,
    /// Successful pages in completion order.
    pub pages: Vec<PageResult>,
    pub failures: Vec<PageFailure>,
}

impl PipelineResult {
    pub fn is_complete(&self) -> bool {
        self.pages.len() + self.failures.len() == self.total_pages
    }

    pub fn has_artifacts(&self) -> bool {
        self.pages.iter().any(|p| p.artifact_url().is_some())
    }

    /// Split successful pages into `(text pages, artifact pages)`, each
    /// sorted by page number.
    pub fn partition(&self) -> (Vec<&PageResult>, Vec<&PageResult>) {
        let (mut artifacts, mut texts): (Vec<&PageResult>, Vec<&PageResult>) = self
            .pages
            .iter()
            .partition(|p| p.artifact_url().is_some());
        texts.sort_by_key(|p| p.page_num);
        artifacts.sort_by_key(|p| p.page_num);
        (texts, artifacts)
    }
}

/// The downloadable result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Artifact {
    /// Merged UTF-8 text.
    Text { file_name: String, content: String },
    /// A single downloaded output, passed through unchanged.
    Binary { file_name: String, bytes: Vec<u8> },
    /// Zip archive of per-page binary outputs.
    Archive { file_name: String, bytes: Vec<u8> },
}

impl Artifact {
    pub fn file_name(&self) -> &str {
        match self {
            Artifact::Text { file_name, .. }
            | Artifact::Binary { file_name, .. }
            | Artifact::Archive { file_name, .. } => file_name,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Artifact::Text { content, .. } => content.as_bytes(),
            Artifact::Binary { bytes, .. } | Artifact::Archive { bytes, .. } => bytes,
        }
    }
}

/// What segmentation would do with a document, without translating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    /// `text`, `doc`, `docx` or `pdf`.
    pub kind: String,
    pub size_bytes: usize,
    pub page_count: usize,
    pub char_count: usize,
    /// File name the translated artifact will be derived from.
    pub translated_name: String,
}

/// Final state of a run that got as far as dispatching pages.
///
/// Runs that fail before any page is attempted return `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    FullySucceeded,
    PartiallySucceeded { failed_pages: usize },
}

/// Summary statistics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationStats {
    pub total_pages: usize,
    pub translated_pages: usize,
    pub failed_pages: usize,
    pub total_retries: u32,
    pub total_duration_ms: u64,
    pub segment_duration_ms: u64,
    pub translate_duration_ms: u64,
    pub merge_duration_ms: u64,
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationOutput {
    pub artifact: Artifact,
    pub source_language: Language,
    pub target_language: Language,
    pub result: PipelineResult,
    pub outcome: RunOutcome,
    pub stats: TranslationStats,
}

impl TranslationOutput {
    /// Treat any page failure as an error.
    pub fn into_result(self) -> Result<Self, TranslateError> {
        match self.outcome {
            RunOutcome::FullySucceeded => Ok(self),
            RunOutcome::PartiallySucceeded { failed_pages } => Err(TranslateError::PartialFailure {
                success: self.stats.translated_pages,
                failed: failed_pages,
                total: self.stats.total_pages,
            }),
        }
    }
}
