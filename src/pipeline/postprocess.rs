//! Post-processing: deterministic cleanup of translated page text.
//!
//! Workflow models are prompted for plain translated text but still
//! occasionally wrap it in a code fence, answer with CRLF line endings, or
//! leak zero-width characters from the source. These rules fix that without
//! touching the words themselves, and run before pages are joined so the
//! page separator always lands on clean boundaries.
//!
//! Rules run in order: fences are stripped before line endings are
//! normalised so the fence regex only ever sees the raw answer.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one page of translated text.
///
/// 1. Strip an outer code fence wrapping the whole answer
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of 3+ blank lines down to one blank line
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Trim leading/trailing blank space of the whole page
pub fn clean_translation(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer code fence ──────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ──────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ───────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ──────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 5: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fence_with_language() {
        assert_eq!(strip_outer_fence("```text\nBonjour\nle monde\n```"), "Bonjour\nle monde");
    }

    #[test]
    fn test_strip_fence_without_language() {
        assert_eq!(strip_outer_fence("```\nHello\n```\n"), "Hello");
    }

    #[test]
    fn test_inner_fence_untouched() {
        let input = "Intro\n```\ncode\n```\nOutro";
        assert_eq!(strip_outer_fence(input), input);
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(trim_trailing_whitespace("  hello   \nworld \t"), "  hello\nworld");
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb\n\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("hel\u{200B}lo\u{FEFF}"), "hello");
    }

    #[test]
    fn test_clean_translation_full() {
        let raw = "```\r\nLine\u{200B} one   \r\n\r\n\r\n\r\nLine two\r\n```\r\n";
        assert_eq!(clean_translation(raw), "Line one\n\nLine two");
    }

    #[test]
    fn test_clean_translation_keeps_cjk() {
        assert_eq!(clean_translation("  你好，世界。  \n"), "你好，世界。");
    }
}
