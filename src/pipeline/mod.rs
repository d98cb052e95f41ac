//! Pipeline stages for document translation.
//!
//! Each submodule implements exactly one transformation step and can be
//! tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ segment ──▶ dispatch ──▶ transport ──▶ decode ──▶ payload
//! (path/URL)  (pages)    (cap+retry)   (HTTP)       (frames)    (events)
//!                           │
//!                           └──▶ merge ──▶ postprocess
//!                               (text / zip)  (cleanup)
//! ```
//!
//! 1. [`input`]     — resolve a path or URL to an in-memory document and
//!    extract its text (PDF and DOCX parsing run in `spawn_blocking`);
//!    [`legacy_doc`] reads Word 97-2003 files
//! 2. [`segment`]   — pack paragraphs, then sentences, into bounded pages
//! 3. [`dispatch`]  — run pages under a concurrency cap with per-page retry
//! 4. [`transport`] — the only stage with network I/O for translation
//! 5. [`decode`]    — reassemble `data:` lines from arbitrary byte chunks
//! 6. [`payload`]   — turn a decoded payload into a text or artifact event
//! 7. [`merge`]     — join text pages or download and archive artifacts
//! 8. [`postprocess`] — deterministic cleanup of translated text

pub mod decode;
pub mod dispatch;
pub mod input;
pub mod legacy_doc;
pub mod merge;
pub mod payload;
pub mod postprocess;
pub mod segment;
pub mod transport;
