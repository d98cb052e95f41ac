//! Error types for the edgequake-translate library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`TranslateError`] — **Fatal**: the run cannot proceed at all
//!   (unsupported file, empty document, transport not configured) or its
//!   final artifact cannot be produced. Returned as `Err(TranslateError)`
//!   from the top-level `translate*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed after its retries
//!   were exhausted, but sibling pages are fine. Stored inside
//!   [`crate::output::PageFailure`] so callers can inspect partial success
//!   rather than losing the whole document to one bad page.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-translate library.
///
/// Page-level failures use [`PageError`] and are reported individually
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum TranslateError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Segmentation errors ───────────────────────────────────────────────
    /// File type could not be determined or is not `.txt`, `.doc`, `.docx` or `.pdf`.
    #[error("Unsupported document format for '{name}'\nSupported: .txt, .doc, .docx, .pdf")]
    UnsupportedFormat { name: String },

    /// The format is supported but its content could not be extracted.
    #[error("Failed to extract text from '{name}': {detail}")]
    ExtractionFailed { name: String, detail: String },

    /// Extraction succeeded but produced no non-blank paragraph.
    #[error("Document '{name}' contains no translatable text")]
    EmptyDocument { name: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// No endpoint / credential available for the translation transport.
    #[error("Translation transport is not configured.\n{hint}")]
    TransportNotConfigured { hint: String },

    /// The transport answered with a non-success status, never opened its
    /// body, or broke mid-stream.
    #[error("Translation transport failed: {detail}")]
    TransportFailed {
        status: Option<u16>,
        detail: String,
    },

    /// Every page failed after all retries; output would be empty.
    #[error("All {total} pages failed after {retries} retries each.\nFirst error: {first_error}")]
    AllPagesFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    /// Some pages succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::TranslationOutput::into_result`] when
    /// the caller wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed during translation")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── Merge errors ──────────────────────────────────────────────────────
    /// Every referenced artifact failed to download.
    #[error("None of the {attempted} translated artifacts could be downloaded")]
    NoArtifactsDownloaded { attempted: usize },

    /// Packaging downloaded artifacts into a zip archive failed.
    #[error("Failed to build archive '{name}': {detail}")]
    ArchiveFailed { name: String, detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Uploading a file to object storage failed.
    #[error("Failed to upload '{name}' to storage: {reason}")]
    UploadFailed { name: String, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TranslateError {
    /// Build a [`TranslateError::TransportFailed`] from a reqwest error.
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        TranslateError::TransportFailed {
            status: err.status().map(|s| s.as_u16()),
            detail: err.to_string(),
        }
    }
}

/// A non-fatal error for a single page.
///
/// Produced by one translation attempt. Once the retry bound is exhausted
/// it is recorded in [`crate::output::PageFailure`] and the run continues
/// with sibling pages.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The transport call or its stream failed.
    #[error("Page {page}: transport failed: {detail}")]
    TransportFailed { page: usize, detail: String },

    /// The transport closed the stream without a single usable event.
    #[error("Page {page}: transport returned no translated content")]
    EmptyResponse { page: usize },

    /// Every attempt failed.
    #[error("Page {page}: translation failed after {retries} retries: {detail}")]
    RetriesExhausted {
        page: usize,
        retries: u32,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = TranslateError::PartialFailure {
            success: 9,
            failed: 1,
            total: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/10"), "got: {msg}");
    }

    #[test]
    fn unsupported_format_lists_known_kinds() {
        let e = TranslateError::UnsupportedFormat {
            name: "slides.pptx".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("slides.pptx"));
        assert!(msg.contains(".docx"));
    }

    #[test]
    fn no_artifacts_display() {
        let e = TranslateError::NoArtifactsDownloaded { attempted: 3 };
        assert!(e.to_string().contains('3'));
    }

    #[test]
    fn page_error_retries_display() {
        let e = PageError::RetriesExhausted {
            page: 4,
            retries: 2,
            detail: "HTTP 502".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 4"));
        assert!(msg.contains("2 retries"));
        assert!(msg.contains("HTTP 502"));
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::EmptyResponse { page: 2 };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("EmptyResponse"));
    }
}
