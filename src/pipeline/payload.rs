//! Payload extraction: one decoded payload string → at most one event.
//!
//! The decoder deals with framing; what a payload *means* depends on the
//! workflow behind the endpoint. Some workflows answer with translated text,
//! others upload a translated file and answer with its URL, and older ones
//! prefix the translation with a `译文：` marker. Each convention is a
//! [`PayloadExtractor`] selected by [`ExtractionRule`].

use crate::config::ExtractionRule;
use crate::output::TranslationEvent;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

// Printable ASCII minus quoting delimiters, or non-ASCII that is neither
// punctuation nor whitespace: `，` and `。` end a URL, `报告.docx` does not.
static RE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://(?:[\x21-\x7E&&[^"'<>)\]]]|[^\x00-\x7F\p{P}\s])+"#).unwrap()
});

static RE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)译文：(.*)").unwrap());

/// Turns a decoded payload into an event.
///
/// Returning `None` drops the payload.
pub trait PayloadExtractor: Send + Sync {
    fn extract(&self, payload: &str) -> Option<TranslationEvent>;
}

/// Emits the first embedded URL as an artifact reference, otherwise the
/// whole payload as text.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlSniffer;

impl PayloadExtractor for UrlSniffer {
    fn extract(&self, payload: &str) -> Option<TranslationEvent> {
        if payload.is_empty() {
            return None;
        }
        match RE_URL.find(payload) {
            Some(m) => Some(TranslationEvent::artifact(
                m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']),
            )),
            None => Some(TranslationEvent::text(payload)),
        }
    }
}

/// Emits only the text after `译文：`; payloads without the marker are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerExtractor;

impl PayloadExtractor for MarkerExtractor {
    fn extract(&self, payload: &str) -> Option<TranslationEvent> {
        let caps = RE_MARKER.captures(payload)?;
        let text = caps[1].trim();
        if text.is_empty() {
            None
        } else {
            Some(TranslationEvent::text(text))
        }
    }
}

/// Build the extractor for `rule`.
pub fn for_rule(rule: ExtractionRule) -> Arc<dyn PayloadExtractor> {
    match rule {
        ExtractionRule::UrlSniffing => Arc::new(UrlSniffer),
        ExtractionRule::TranslationMarker => Arc::new(MarkerExtractor),
    }
}
