//! Input resolution and raw text extraction.
//!
//! A user submits either a local path or an HTTP(S) URL. Both are read into
//! an in-memory [`InputDocument`]; the document kind is decided from the
//! file name's extension and a kind-specific extractor turns the bytes into
//! raw text units — one unit per physical page for paginated formats, one
//! blob for flat formats. Re-chunking into bounded pages happens later in
//! [`crate::pipeline::segment`].

use crate::error::TranslateError;
use crate::pipeline::legacy_doc;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Supported document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Plain UTF-8 text.
    Text,
    /// Legacy binary Word document (Word 97-2003).
    Doc,
    /// Office Open XML word-processing document.
    Docx,
    /// PDF with an embedded text layer.
    Pdf,
}

impl DocumentKind {
    /// Detect the kind from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        match extension_of(name)?.as_str() {
            "txt" => Some(DocumentKind::Text),
            "doc" => Some(DocumentKind::Doc),
            "docx" => Some(DocumentKind::Docx),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }

    /// Paginated formats yield one text unit per physical page.
    pub fn is_paginated(&self) -> bool {
        matches!(self, DocumentKind::Pdf)
    }
}

/// Lower-cased extension after the last `.`, if any.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// `report.docx` → `report_translated.docx`; `notes` → `notes_translated`.
pub fn translated_file_name(original: &str) -> String {
    match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_translated.{ext}"),
        _ => format!("{original}_translated"),
    }
}

/// A submitted document held in memory.
#[derive(Debug, Clone)]
pub struct InputDocument {
    /// File name including extension; drives kind detection and output naming.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Wrap free text as a flat `.txt` document.
    pub fn from_text(text: &str) -> Self {
        Self::new("text.txt", text.as_bytes().to_vec())
    }

    pub fn kind(&self) -> Result<DocumentKind, TranslateError> {
        DocumentKind::from_file_name(&self.name).ok_or_else(|| TranslateError::UnsupportedFormat {
            name: self.name.clone(),
        })
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an in-memory document.
///
/// URLs are downloaded; local files are validated and read.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<InputDocument, TranslateError> {
    if input.trim().is_empty() {
        return Err(TranslateError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<InputDocument, TranslateError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => TranslateError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => TranslateError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TranslateError::InvalidInput {
            input: path.display().to_string(),
        })?;

    debug!("Read local document: {} ({} bytes)", path.display(), bytes.len());
    Ok(InputDocument::new(name, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<InputDocument, TranslateError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TranslateError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TranslateError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            TranslateError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(TranslateError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| TranslateError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(InputDocument::new(file_name_from_url(url), bytes.to_vec()))
}

/// Extract a reasonable filename from the URL path.
pub fn file_name_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return urlencoding::decode(last)
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| last.to_string());
                }
            }
        }
    }

    "downloaded.txt".to_string()
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Extract raw text units from a document.
///
/// PDF and DOCX parsing are CPU-bound and run inside `spawn_blocking`.
/// `is_paginated` kinds return one unit per physical page.
pub async fn extract_text(doc: &InputDocument) -> Result<Vec<String>, TranslateError> {
    let kind = doc.kind()?;
    let name = doc.name.clone();
    let bytes = doc.bytes.clone();

    // Malformed PDFs can panic inside the parser; treat that as corrupt input.
    let units = tokio::task::spawn_blocking(move || extract_blocking(kind, &name, &bytes))
        .await
        .map_err(|e| TranslateError::ExtractionFailed {
            name: doc.name.clone(),
            detail: format!("extractor panicked: {}", e),
        })??;

    debug!("Extracted {} text unit(s) from {}", units.len(), doc.name);
    Ok(units)
}

fn extract_blocking(
    kind: DocumentKind,
    name: &str,
    bytes: &[u8],
) -> Result<Vec<String>, TranslateError> {
    let failed = |detail: String| TranslateError::ExtractionFailed {
        name: name.to_string(),
        detail,
    };

    match kind {
        DocumentKind::Text => decode_text(bytes).map(|t| vec![t]).map_err(failed),
        DocumentKind::Doc => Ok(vec![legacy_doc::extract(bytes)]),
        DocumentKind::Docx => extract_docx(bytes).map(|t| vec![t]).map_err(failed),
        DocumentKind::Pdf => pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| failed(e.to_string())),
    }
}

/// Strict UTF-8 decode with BOM stripping.
fn decode_text(bytes: &[u8]) -> Result<String, String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|e| format!("not valid UTF-8: {e}"))
}

/// Walk the DOCX body collecting paragraph text; paragraphs are separated by
/// a blank line so the segmenter sees them as paragraph boundaries.
fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild};

    let docx = docx_rs::read_docx(bytes).map_err(|e| format!("{e:?}"))?;

    let mut paragraphs: Vec<String> = Vec::new();
    for child in &docx.document.children {
        if let DocumentChild::Paragraph(para) = child {
            let mut text = String::new();
            for pc in &para.children {
                if let ParagraphChild::Run(run) = pc {
                    for rc in &run.children {
                        match rc {
                            RunChild::Text(t) => text.push_str(&t.text),
                            RunChild::Tab(_) => text.push('\t'),
                            RunChild::Break(_) => text.push('\n'),
                            _ => {}
                        }
                    }
                }
            }
            if !text.trim().is_empty() {
                paragraphs.push(text);
            }
        }
    }

    Ok(paragraphs.join("\n\n"))
}

/// Where to write an artifact when the caller gave no output path.
pub fn default_output_path(input: &str, artifact_name: &str) -> PathBuf {
    if is_url(input) {
        return PathBuf::from(artifact_name);
    }
    Path::new(input)
        .parent()
        .map(|p| p.join(artifact_name))
        .unwrap_or_else(|| PathBuf::from(artifact_name))
}
