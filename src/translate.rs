//! Eager (whole-run) translation entry points.
//!
//! These wait for every page, merge the results and return one
//! [`TranslationOutput`]. Use [`crate::stream`] to see pages or fragments
//! as they arrive.
//!
//! ## Final states
//!
//! * `Err(_)`: failed before any page could be attempted (unsupported
//!   format, empty document, transport not configured), every page failed,
//!   or the artifact could not be produced.
//! * `Ok(output)` with [`RunOutcome::FullySucceeded`].
//! * `Ok(output)` with [`RunOutcome::PartiallySucceeded`]; call
//!   [`TranslationOutput::into_result`] to treat that as an error.

use crate::config::{StorageConfig, TransportConfig, TranslationConfig};
use crate::error::{PageError, TranslateError};
use crate::output::{
    DocumentInfo, Page, PipelineResult, RunOutcome, TranslationEvent, TranslationOutput,
    TranslationStats, TranslationUnit,
};
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::input::{self, InputDocument};
use crate::pipeline::merge::{self, ArtifactFetcher};
use crate::pipeline::payload;
use crate::pipeline::segment;
use crate::pipeline::transport::{drain, HttpTransport, Transport};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::storage::{HttpFetcher, StorageClient, StoredObject};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Translate a document given as a local path or HTTP(S) URL.
///
/// # Example
/// ```rust,no_run
/// use edgequake_translate::{translate_document, Language, TranslationConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// // Transport settings come from TRANSLATE_API_URL / TRANSLATE_API_TOKEN / TRANSLATE_WORKFLOW_ID
/// let config = TranslationConfig::builder()
///     .source_language(Language::Chinese)
///     .target_language(Language::French)
///     .build()?;
/// let output = translate_document("contract.docx", &config).await?;
/// std::fs::write(output.artifact.file_name(), output.artifact.as_bytes())?;
/// # Ok(())
/// # }
/// ```
pub async fn translate_document(
    input: impl AsRef<str>,
    config: &TranslationConfig,
) -> Result<TranslationOutput, TranslateError> {
    let input = input.as_ref();
    info!("Starting translation: {}", input);
    let doc = input::resolve_input(input, config.download_timeout_secs).await?;
    translate_input(doc, config).await
}

/// Translate an in-memory document. `name` must carry the extension.
pub async fn translate_bytes(
    name: &str,
    bytes: &[u8],
    config: &TranslationConfig,
) -> Result<TranslationOutput, TranslateError> {
    translate_input(InputDocument::new(name, bytes.to_vec()), config).await
}

/// Translate free text. The text goes through the same pipeline as a `.txt`
/// upload, so long input is paged.
pub async fn translate_text(
    text: &str,
    config: &TranslationConfig,
) -> Result<TranslationOutput, TranslateError> {
    translate_input(InputDocument::from_text(text), config).await
}

/// Translate a document and write the artifact to `output_path`.
///
/// The file is written to a temporary file in the same directory and renamed
/// into place, so readers never see a partial artifact.
pub async fn translate_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &TranslationConfig,
) -> Result<TranslationOutput, TranslateError> {
    let output = translate_document(input, config).await?;
    write_atomic(output_path.as_ref(), output.artifact.as_bytes().to_vec()).await?;
    Ok(output)
}

/// Synchronous wrapper around [`translate_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn translate_sync(
    input: impl AsRef<str>,
    config: &TranslationConfig,
) -> Result<TranslationOutput, TranslateError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TranslateError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(translate_document(input, config))
}

/// Resolve and segment a document without translating it.
///
/// Does not need a transport; useful to preview how a file will be paged.
pub async fn inspect(
    input: impl AsRef<str>,
    config: &TranslationConfig,
) -> Result<DocumentInfo, TranslateError> {
    let doc = input::resolve_input(input.as_ref(), config.download_timeout_secs).await?;
    let kind = doc.kind()?;
    let pages = segment::segment(&doc, config.page_chars).await?;
    Ok(DocumentInfo {
        name: doc.name.clone(),
        kind: format!("{:?}", kind).to_lowercase(),
        size_bytes: doc.bytes.len(),
        page_count: pages.len(),
        char_count: pages.iter().map(|p| p.text.chars().count()).sum(),
        translated_name: input::translated_file_name(&doc.name),
    })
}

// ── Run orchestration ────────────────────────────────────────────────────

/// Pages ready for dispatch plus everything the merge step needs.
pub(crate) struct PreparedRun {
    pub pages: Vec<Page>,
    pub target_name: String,
    pub relay: Option<(StorageClient, StoredObject)>,
    pub segment_duration_ms: u64,
}

/// Validate the document and turn it into pages.
///
/// In whole-file relay mode the document is uploaded and the single page's
/// text is its public URL.
pub(crate) async fn prepare(
    doc: &InputDocument,
    config: &TranslationConfig,
) -> Result<PreparedRun, TranslateError> {
    let start = Instant::now();
    let kind = doc.kind()?;
    debug!("{} detected as {:?}", doc.name, kind);

    let (pages, relay) = if config.relay_whole_file {
        let storage = resolve_storage(config)?.ok_or_else(|| {
            TranslateError::InvalidConfig(
                "Whole-file relay needs object storage: set STORAGE_URL, STORAGE_API_KEY and STORAGE_BUCKET."
                    .into(),
            )
        })?;
        let stored = storage.upload(&doc.name, doc.bytes.clone()).await?;
        let page = Page {
            page_num: 1,
            text: stored.public_url.clone(),
        };
        (vec![page], Some((storage, stored)))
    } else {
        (segment::segment(doc, config.page_chars).await?, None)
    };

    if pages.is_empty() {
        return Err(TranslateError::EmptyDocument {
            name: doc.name.clone(),
        });
    }

    Ok(PreparedRun {
        pages,
        target_name: input::translated_file_name(&doc.name),
        relay,
        segment_duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// One attempt for one unit: open the response and drain its events.
pub(crate) async fn translate_once(
    transport: &dyn Transport,
    unit: TranslationUnit,
) -> Result<Vec<TranslationEvent>, PageError> {
    let page = unit.page_num;
    let events = transport
        .translate(&unit)
        .await
        .map_err(|e| PageError::TransportFailed {
            page,
            detail: e.to_string(),
        })?;
    drain(events).await.map_err(|e| PageError::TransportFailed {
        page,
        detail: e.to_string(),
    })
}

pub(crate) fn progress_of(config: &TranslationConfig) -> ProgressCallback {
    config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback))
}

async fn translate_input(
    doc: InputDocument,
    config: &TranslationConfig,
) -> Result<TranslationOutput, TranslateError> {
    let total_start = Instant::now();

    // ── Step 1: Transport ────────────────────────────────────────────────
    let transport = resolve_transport(config)?;

    // ── Step 2: Segment ──────────────────────────────────────────────────
    let prepared = prepare(&doc, config).await?;
    info!(
        "{}: {} page(s), {} → {}",
        doc.name,
        prepared.pages.len(),
        config.source_language,
        config.target_language
    );

    // ── Steps 3-4: Dispatch + merge ──────────────────────────────────────
    let output = dispatch_and_merge(&prepared, transport.as_ref(), config, total_start).await;

    // ── Step 5: Release the relay object, whatever the outcome ──────────
    if let Some((storage, stored)) = &prepared.relay {
        storage.remove(&stored.path).await;
    }

    output
}

async fn dispatch_and_merge(
    prepared: &PreparedRun,
    transport: &dyn Transport,
    config: &TranslationConfig,
    total_start: Instant,
) -> Result<TranslationOutput, TranslateError> {
    let total_pages = prepared.pages.len();
    let progress = progress_of(config);
    progress.on_run_start(total_pages);

    let translate_start = Instant::now();
    let dispatcher = Dispatcher::from_config(config);
    let result = dispatcher
        .translate_all(
            &prepared.pages,
            move |unit| translate_once(transport, unit),
            progress.as_ref(),
        )
        .await;
    let translate_duration_ms = translate_start.elapsed().as_millis() as u64;

    if result.pages.is_empty() {
        return Err(all_pages_failed(&result, config));
    }

    let merge_start = Instant::now();
    let fetcher = resolve_fetcher(config)?;
    let artifact = merge::merge(
        &result,
        &prepared.target_name,
        &config.page_separator,
        fetcher.as_ref(),
        progress.as_ref(),
    )
    .await?;
    let merge_duration_ms = merge_start.elapsed().as_millis() as u64;

    let failed = result.failures.len();
    let stats = TranslationStats {
        total_pages,
        translated_pages: result.pages.len(),
        failed_pages: failed,
        total_retries: result.pages.iter().map(|p| p.retries).sum::<u32>()
            + failed as u32 * config.max_retries,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        segment_duration_ms: prepared.segment_duration_ms,
        translate_duration_ms,
        merge_duration_ms,
    };
    let outcome = if failed == 0 {
        RunOutcome::FullySucceeded
    } else {
        RunOutcome::PartiallySucceeded {
            failed_pages: failed,
        }
    };

    info!(
        "Translation complete: {}/{} pages → {} ({}ms total)",
        stats.translated_pages,
        total_pages,
        artifact.file_name(),
        stats.total_duration_ms
    );

    Ok(TranslationOutput {
        artifact,
        source_language: config.source_language,
        target_language: config.target_language,
        result,
        outcome,
        stats,
    })
}

fn all_pages_failed(result: &PipelineResult, config: &TranslationConfig) -> TranslateError {
    let mut failures: Vec<_> = result.failures.iter().collect();
    failures.sort_by_key(|f| f.page_num);
    TranslateError::AllPagesFailed {
        total: result.total_pages,
        retries: config.max_retries,
        first_error: failures
            .first()
            .map(|f| f.error.to_string())
            .unwrap_or_else(|| "Unknown error".to_string()),
    }
}

// ── Collaborator resolution ──────────────────────────────────────────────

/// Resolve the transport, from most-specific to least-specific:
///
/// 1. **Pre-built transport** (`config.transport`), used as-is. This is how
///    tests and custom middleware plug in.
/// 2. **Explicit settings** (`config.transport_config`).
/// 3. **Environment** via [`TransportConfig::from_env`]; fails with
///    [`TranslateError::TransportNotConfigured`] when variables are missing.
pub fn resolve_transport(config: &TranslationConfig) -> Result<Arc<dyn Transport>, TranslateError> {
    if let Some(ref transport) = config.transport {
        return Ok(Arc::clone(transport));
    }

    let settings = match config.transport_config {
        Some(ref tc) => tc.clone(),
        None => TransportConfig::from_env()?,
    };
    debug!("Using HTTP transport: {:?}", settings);

    let transport = HttpTransport::new(settings, config.api_timeout_secs)?
        .with_extractor(payload::for_rule(config.extraction_rule))
        .with_prompt_template(config.prompt_template.clone());
    Ok(Arc::new(transport))
}

/// Resolve the artifact downloader: pre-built fetcher, then storage client,
/// then a plain HTTP fetcher.
pub fn resolve_fetcher(config: &TranslationConfig) -> Result<Arc<dyn ArtifactFetcher>, TranslateError> {
    if let Some(ref fetcher) = config.fetcher {
        return Ok(Arc::clone(fetcher));
    }
    if let Some(storage) = resolve_storage(config)? {
        return Ok(Arc::new(storage));
    }
    Ok(Arc::new(HttpFetcher::new(config.download_timeout_secs)?))
}

fn resolve_storage(config: &TranslationConfig) -> Result<Option<StorageClient>, TranslateError> {
    let settings = config.storage.clone().or_else(StorageConfig::from_env);
    settings
        .map(|s| StorageClient::new(s, config.download_timeout_secs))
        .transpose()
}

async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), TranslateError> {
    let target = path.to_path_buf();
    let write_err = |source: std::io::Error| TranslateError::OutputWriteFailed {
        path: target.clone(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await.map_err(write_err)?;

    let dest = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".translate-")
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| TranslateError::Internal(format!("write task panicked: {e}")))?
    .map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Language;
    use crate::pipeline::decode::EventStream;
    use async_trait::async_trait;
    use futures::stream;
    use crate::test_support::{serve_sequence, Canned};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes the source text back, upper-cased.
    struct Upper {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Upper {
        async fn translate(&self, unit: &TranslationUnit) -> Result<EventStream, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let ev = TranslationEvent::text(unit.source_text.to_uppercase());
            Ok(Box::pin(stream::iter(vec![Ok(ev)])))
        }
    }

    struct Down;

    #[async_trait]
    impl Transport for Down {
        async fn translate(&self, _unit: &TranslationUnit) -> Result<EventStream, TranslateError> {
            Err(TranslateError::TransportFailed {
                status: Some(503),
                detail: "HTTP 503".into(),
            })
        }
    }

    /// Answers every unit with a link to a translated file.
    struct Linker;

    #[async_trait]
    impl Transport for Linker {
        async fn translate(&self, unit: &TranslationUnit) -> Result<EventStream, TranslateError> {
            let ev = TranslationEvent::artifact(format!("https://cdn.test/out/page_{}.docx", unit.page_num));
            Ok(Box::pin(stream::iter(vec![Ok(ev)])))
        }
    }

    struct Gone;

    #[async_trait]
    impl ArtifactFetcher for Gone {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, TranslateError> {
            Err(TranslateError::DownloadFailed {
                url: url.to_string(),
                reason: "HTTP 404".into(),
            })
        }
    }

    fn relay_config(transport: Arc<dyn Transport>, base_url: String) -> TranslationConfig {
        TranslationConfig::builder()
            .transport(transport)
            .fetcher(Arc::new(Gone) as Arc<dyn ArtifactFetcher>)
            .relay_whole_file(true)
            .max_retries(0)
            .retry_backoff_ms(0)
            .storage(StorageConfig {
                base_url,
                api_key: "anon-key".into(),
                bucket: "relay".into(),
            })
            .build()
            .unwrap()
    }

    fn relay_answers() -> Vec<Canned> {
        vec![
            Canned::ok("application/json", r#"{"Key":"relay/report"}"#),
            Canned::ok("application/json", "[]"),
        ]
    }

    fn config(transport: Arc<dyn Transport>) -> TranslationConfig {
        TranslationConfig::builder()
            .transport(transport)
            .retry_backoff_ms(0)
            .source_language(Language::English)
            .target_language(Language::German)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn free_text_round_trip() {
        let upper = Arc::new(Upper {
            calls: AtomicUsize::new(0),
        });
        let out = translate_text("hello\n\nworld", &config(upper.clone())).await.unwrap();
        assert_eq!(out.outcome, RunOutcome::FullySucceeded);
        assert_eq!(out.artifact.file_name(), "text_translated.txt");
        assert_eq!(out.artifact.as_bytes(), b"HELLO\n\nWORLD\n");
        assert_eq!(upper.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.stats.total_pages, 1);
    }

    #[tokio::test]
    async fn blank_text_is_empty_document_without_dispatch() {
        let upper = Arc::new(Upper {
            calls: AtomicUsize::new(0),
        });
        let err = translate_text(" \n\n\t ", &config(upper.clone())).await.unwrap_err();
        assert!(matches!(err, TranslateError::EmptyDocument { .. }));
        assert_eq!(upper.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_extension_fails_before_dispatch() {
        let err = translate_bytes("slides.pptx", b"PK", &config(Arc::new(Down)))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn all_pages_failing_is_fatal() {
        let err = translate_text("one", &config(Arc::new(Down))).await.unwrap_err();
        match err {
            TranslateError::AllPagesFailed { total, retries, first_error } => {
                assert_eq!(total, 1);
                assert_eq!(retries, 2);
                assert!(first_error.contains("HTTP 503"), "got: {first_error}");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn to_file_writes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("note.txt");
        std::fs::write(&src, "guten tag").unwrap();
        let dest = dir.path().join("out").join("note_translated.txt");

        let upper = Arc::new(Upper {
            calls: AtomicUsize::new(0),
        });
        translate_to_file(src.to_string_lossy(), &dest, &config(upper))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "GUTEN TAG\n");
        let leftovers: Vec<_> = std::fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn inspect_pages_without_transport() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("long.txt");
        std::fs::write(&src, ["a".repeat(30), "b".repeat(30), "c".repeat(30)].join("\n\n")).unwrap();

        let cfg = TranslationConfig::builder().page_chars(40).build().unwrap();
        let info = inspect(src.to_string_lossy(), &cfg).await.unwrap();
        assert_eq!(info.page_count, 3);
        assert_eq!(info.kind, "text");
        assert_eq!(info.translated_name, "long_translated.txt");
    }

    #[test]
    fn sync_wrapper_owns_its_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("hi.txt");
        std::fs::write(&src, "hallo").unwrap();

        let upper = Arc::new(Upper {
            calls: AtomicUsize::new(0),
        });
        let out = translate_sync(src.to_string_lossy(), &config(upper)).unwrap();
        assert_eq!(out.artifact.as_bytes(), b"HALLO\n");
    }

    #[test]
    fn relay_without_storage_is_invalid_config() {
        if StorageConfig::from_env().is_some() {
            return;
        }
        let cfg = TranslationConfig::builder()
            .transport(Arc::new(Down))
            .relay_whole_file(true)
            .build()
            .unwrap();
        let doc = InputDocument::from_text("hello");
        let err = tokio_test::block_on(prepare(&doc, &cfg)).err().unwrap();
        assert!(matches!(err, TranslateError::InvalidConfig(_)));
    }

    #[test]
    fn explicit_transport_wins() {
        let t: Arc<dyn Transport> = Arc::new(Down);
        let cfg = config(t.clone());
        let resolved = resolve_transport(&cfg).unwrap();
        assert!(Arc::ptr_eq(&resolved, &t));
    }

    #[tokio::test]
    async fn relay_object_is_removed_when_every_page_fails() {
        let (base, server) = serve_sequence(relay_answers()).await;
        let err = translate_bytes("report.docx", b"PK\x03\x04", &relay_config(Arc::new(Down), base))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::AllPagesFailed { .. }));

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("POST /storage/v1/object/relay/report-"));
        assert!(requests[1].starts_with("DELETE /storage/v1/object/relay"));
        assert!(requests[1].contains("report-"));
    }

    #[tokio::test]
    async fn relay_object_is_removed_when_merge_fails() {
        let (base, server) = serve_sequence(relay_answers()).await;
        let err = translate_bytes("report.docx", b"PK\x03\x04", &relay_config(Arc::new(Linker), base))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::NoArtifactsDownloaded { .. }), "got: {err}");

        let requests = server.await.unwrap();
        assert!(requests[1].starts_with("DELETE /storage/v1/object/relay"));
    }
}
