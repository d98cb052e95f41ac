//! Streaming translation API: emit results as they arrive.
//!
//! Two granularities are offered:
//!
//! * [`translate_text_stream`] forwards the decoded fragments of a single
//!   request live, for interactive free-text translation.
//! * [`translate_stream`] / [`translate_bytes_stream`] yield one item per
//!   page as soon as the page settles (success or exhausted retries). Pages
//!   arrive in completion order; sort by `page_num` if order matters.
//!
//! Nothing is merged here. Callers that want the final artifact use
//! [`crate::translate::translate_document`] instead.

use crate::config::TranslationConfig;
use crate::error::TranslateError;
use crate::output::{Page, PageFailure, PageResult, TranslationUnit};
use crate::pipeline::decode::EventStream;
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::input::{self, InputDocument};
use crate::translate::{prepare, progress_of, resolve_transport, translate_once};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info};

/// A boxed stream of settled pages.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageResult, PageFailure>> + Send>>;

/// Translate free text as one request and stream its fragments live.
///
/// The text is not paged and not retried: the first transport error ends
/// the stream with that error.
///
/// # Example
/// ```rust,no_run
/// use edgequake_translate::{translate_text_stream, TranslationConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TranslationConfig::default();
/// let mut events = translate_text_stream("你好，世界", &config).await?;
/// while let Some(event) = events.next().await {
///     print!("{}", event?.payload);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn translate_text_stream(
    text: &str,
    config: &TranslationConfig,
) -> Result<EventStream, TranslateError> {
    if text.trim().is_empty() {
        return Err(TranslateError::EmptyDocument {
            name: "text".to_string(),
        });
    }
    let transport = resolve_transport(config)?;
    let page = Page {
        page_num: 1,
        text: text.to_string(),
    };
    let unit = TranslationUnit::new(&page, config.source_language, config.target_language);
    debug!("Streaming free text ({} chars)", text.chars().count());
    transport.translate(&unit).await
}

/// Translate a document given as a path or URL, streaming settled pages.
///
/// # Returns
/// - `Ok(PageStream)`: one item per page, ending after the last page
/// - `Err(TranslateError)`: fatal error before dispatch (unsupported
///   format, empty document, transport not configured)
pub async fn translate_stream(
    input: impl AsRef<str>,
    config: &TranslationConfig,
) -> Result<PageStream, TranslateError> {
    let input = input.as_ref();
    info!("Starting streaming translation: {}", input);
    let doc = input::resolve_input(input, config.download_timeout_secs).await?;
    stream_input(doc, config).await
}

/// In-memory equivalent of [`translate_stream`]. `name` must carry the extension.
pub async fn translate_bytes_stream(
    name: &str,
    bytes: &[u8],
    config: &TranslationConfig,
) -> Result<PageStream, TranslateError> {
    stream_input(InputDocument::new(name, bytes.to_vec()), config).await
}

async fn stream_input(
    doc: InputDocument,
    config: &TranslationConfig,
) -> Result<PageStream, TranslateError> {
    let transport = resolve_transport(config)?;
    let prepared = prepare(&doc, config).await?;
    let progress = progress_of(config);
    let dispatcher = Dispatcher::from_config(config);
    progress.on_run_start(prepared.pages.len());

    let (tx, rx) = mpsc::unbounded_channel();
    let pages = prepared.pages;
    let relay = prepared.relay;

    tokio::spawn(async move {
        let transport_ref = transport.as_ref();
        dispatcher
            .translate_all_with(
                &pages,
                move |unit| translate_once(transport_ref, unit),
                progress.as_ref(),
                |settled| {
                    // Receiver dropped: keep draining so every page still settles.
                    let _ = tx.send(settled.clone());
                },
            )
            .await;
        if let Some((storage, stored)) = relay {
            storage.remove(&stored.path).await;
        }
    });

    Ok(Box::pin(UnboundedReceiverStream::new(rx)))
}
