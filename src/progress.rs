//! Progress-callback trait for per-page translation events.
//!
//! Inject an [`Arc<dyn TranslationProgressCallback>`] via
//! [`crate::config::TranslationConfigBuilder::progress_callback`] to receive
//! events as the dispatcher drives each page and the merger builds the
//! final artifact.
//!
//! Page events are emitted when a page's transport call *completes*, not as
//! each streamed fragment arrives. For fragment-level output use
//! [`crate::stream::translate_text_stream`].
//!
//! # Example
//!
//! ```rust
//! use edgequake_translate::{PageOutput, TranslationConfig, TranslationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl TranslationProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, output: &PageOutput) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, output.len());
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = TranslationConfig::builder()
//!     .progress_callback(counter as Arc<dyn TranslationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PageOutput;
use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`: the
/// streaming API drives the dispatcher from a spawned task.
pub trait TranslationProgressCallback: Send + Sync {
    /// Called once after segmentation, before any page is dispatched.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page is claimed from the cursor and its first attempt starts.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called before a failed page is retried.
    ///
    /// # Arguments
    /// * `attempt` — 1-indexed number of the retry about to run
    /// * `error`   — why the previous attempt failed
    fn on_page_retry(&self, page_num: usize, attempt: u32, error: &str) {
        let _ = (page_num, attempt, error);
    }

    /// Called once per page when its transport call completes successfully.
    ///
    /// `output` carries the page's accumulated text, or its artifact reference.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, output: &PageOutput) {
        let _ = (page_num, total_pages, output);
    }

    /// Called once per page when all retries are exhausted.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called exactly once, after every page reached a terminal state.
    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }

    /// Merge progress as a 0–100 scalar. Downloads cover 0–50, merging or
    /// archiving covers 50–100.
    fn on_merge_progress(&self, percent: u8) {
        let _ = percent;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TranslationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TranslationConfig`].
pub type ProgressCallback = Arc<dyn TranslationProgressCallback>;
