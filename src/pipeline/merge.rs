//! Result merging: finished [`PipelineResult`] → one downloadable [`Artifact`].
//!
//! Two disjoint paths:
//!
//! * **Text path**: no page produced an artifact reference. Pages are
//!   sorted, cleaned and joined with the configured [`PageSeparator`].
//! * **Artifact path**: at least one page points at a file the transport
//!   rendered itself. Every reference is downloaded (failures are logged and
//!   skipped) and the target file name's extension decides what happens
//!   next: plain-text formats are concatenated as UTF-8, everything else is
//!   packed into a deflated zip with one `page_<N>.<ext>` entry per page.
//!   Binary formats are never concatenated byte-wise.
//!
//! Merge progress is reported as 0–100: downloads cover 0–50, staging archive
//! entries 50–75, and writing the archive 75–100.

use crate::config::PageSeparator;
use crate::error::TranslateError;
use crate::output::{Artifact, PageResult, PipelineResult};
use crate::pipeline::input::extension_of;
use crate::pipeline::postprocess::clean_translation;
use crate::progress::TranslationProgressCallback;
use async_trait::async_trait;
use std::io::{Cursor, Write};
use tracing::{debug, info, warn};

/// Formats packed into an archive instead of being concatenated.
pub const ARCHIVE_FORMATS: &[&str] = &[
    "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "jpg", "jpeg", "png", "gif",
];

/// Formats whose downloads are joined as UTF-8 text.
pub const TEXT_FORMATS: &[&str] = &["txt", "text", "md"];

/// Downloads a referenced artifact.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TranslateError>;
}

/// How downloaded artifacts are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Concatenate,
    Archive,
}

impl MergeStrategy {
    /// Text formats concatenate; the allow-list and unknown formats archive.
    pub fn for_extension(ext: Option<&str>) -> Self {
        match ext {
            Some(e) if TEXT_FORMATS.contains(&e) => MergeStrategy::Concatenate,
            _ => MergeStrategy::Archive,
        }
    }
}

/// Merge a finished run into its artifact.
///
/// `target_file_name` is the translated name of the source document, e.g.
/// `report_translated.docx`; its extension selects the artifact strategy.
pub async fn merge(
    result: &PipelineResult,
    target_file_name: &str,
    separator: &PageSeparator,
    fetcher: &dyn ArtifactFetcher,
    progress: &dyn TranslationProgressCallback,
) -> Result<Artifact, TranslateError> {
    let (texts, artifacts) = result.partition();

    if artifacts.is_empty() {
        progress.on_merge_progress(50);
        let artifact = merge_text(&texts, target_file_name, separator);
        progress.on_merge_progress(100);
        return Ok(artifact);
    }

    merge_artifacts(&texts, &artifacts, target_file_name, separator, fetcher, progress).await
}

/// Join text pages in page order.
pub fn merge_text(pages: &[&PageResult], target_file_name: &str, separator: &PageSeparator) -> Artifact {
    let mut sorted = pages.to_vec();
    sorted.sort_by_key(|p| p.page_num);

    let parts: Vec<(usize, String)> = sorted
        .iter()
        .map(|p| (p.page_num, clean_translation(&p.text())))
        .collect();

    Artifact::Text {
        file_name: with_extension(target_file_name, "txt"),
        content: join_pages(&parts, separator),
    }
}

fn join_pages(parts: &[(usize, String)], separator: &PageSeparator) -> String {
    let mut out = String::new();
    for (i, (page_num, text)) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(&separator.render(*page_num));
        }
        out.push_str(text);
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

struct Downloaded {
    page_num: usize,
    ext: Option<String>,
    bytes: Vec<u8>,
}

async fn merge_artifacts(
    texts: &[&PageResult],
    artifacts: &[&PageResult],
    target_file_name: &str,
    separator: &PageSeparator,
    fetcher: &dyn ArtifactFetcher,
    progress: &dyn TranslationProgressCallback,
) -> Result<Artifact, TranslateError> {
    let total = artifacts.len();
    info!("Downloading {} translated artifact(s)", total);
    progress.on_merge_progress(0);

    let mut downloaded = Vec::with_capacity(total);
    for (i, page) in artifacts.iter().enumerate() {
        if let Some(url) = page.artifact_url() {
            match fetcher.fetch(url).await {
                Ok(bytes) => {
                    debug!("Page {}: downloaded {} bytes from {}", page.page_num, bytes.len(), url);
                    downloaded.push(Downloaded {
                        page_num: page.page_num,
                        ext: url_extension(url),
                        bytes,
                    });
                }
                Err(e) => warn!("Page {}: skipping artifact {}: {}", page.page_num, url, e),
            }
        }
        progress.on_merge_progress(percent(i + 1, total, 0, 50));
    }

    if downloaded.is_empty() {
        return Err(TranslateError::NoArtifactsDownloaded { attempted: total });
    }
    progress.on_merge_progress(50);

    let target_ext = extension_of(target_file_name);
    let strategy = MergeStrategy::for_extension(target_ext.as_deref());
    debug!("Merging {} artifact(s) with {:?}", downloaded.len(), strategy);

    let artifact = match strategy {
        MergeStrategy::Concatenate => {
            let mut parts: Vec<(usize, String)> = downloaded
                .into_iter()
                .map(|d| (d.page_num, String::from_utf8_lossy(&d.bytes).into_owned()))
                .chain(texts.iter().map(|p| (p.page_num, clean_translation(&p.text()))))
                .collect();
            parts.sort_by_key(|(n, _)| *n);
            progress.on_merge_progress(75);
            Artifact::Text {
                file_name: target_file_name.to_string(),
                content: join_pages(&parts, separator),
            }
        }
        MergeStrategy::Archive if total == 1 && texts.is_empty() => {
            let only = downloaded.remove(0);
            let ext = only.ext.or(target_ext).unwrap_or_else(|| "bin".into());
            Artifact::Binary {
                file_name: with_extension(target_file_name, &ext),
                bytes: only.bytes,
            }
        }
        MergeStrategy::Archive => {
            let fallback = target_ext.unwrap_or_else(|| "bin".into());
            let mut entries: Vec<(usize, String, Vec<u8>)> = downloaded
                .into_iter()
                .map(|d| {
                    let ext = d.ext.unwrap_or_else(|| fallback.clone());
                    (d.page_num, ext, d.bytes)
                })
                .chain(texts.iter().map(|p| {
                    (p.page_num, "txt".to_string(), clean_translation(&p.text()).into_bytes())
                }))
                .collect();
            entries.sort_by_key(|(n, _, _)| *n);

            let count = entries.len();
            let named: Vec<(String, Vec<u8>)> = entries
                .into_iter()
                .enumerate()
                .map(|(i, (page_num, ext, bytes))| {
                    progress.on_merge_progress(percent(i + 1, count, 50, 75));
                    (format!("page_{page_num}.{ext}"), bytes)
                })
                .collect();

            let name = with_extension(target_file_name, "zip");
            let bytes = tokio::task::spawn_blocking(move || build_archive(named))
                .await
                .map_err(|e| TranslateError::Internal(format!("archive task panicked: {e}")))?
                .map_err(|e| TranslateError::ArchiveFailed {
                    name: name.clone(),
                    detail: e.to_string(),
                })?;
            info!("Packed {} entries into {} ({} bytes)", count, name, bytes.len());
            Artifact::Archive { file_name: name, bytes }
        }
    };

    progress.on_merge_progress(100);
    Ok(artifact)
}

/// Write `(entry name, bytes)` pairs into an in-memory deflated zip.
pub fn build_archive(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, zip::result::ZipError> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, bytes) in entries {
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn percent(done: usize, total: usize, from: u8, to: u8) -> u8 {
    if total == 0 {
        return to;
    }
    let span = (to - from) as usize;
    from + (done.min(total) * span / total) as u8
}

/// Extension of the last path segment of `url`, ignoring query and fragment.
fn url_extension(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?.to_string();
    extension_of(&last)
}

/// `a_translated.docx` + `zip` → `a_translated.zip`.
fn with_extension(file_name: &str, ext: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.{ext}"),
        _ => format!("{file_name}.{ext}"),
    }
}
