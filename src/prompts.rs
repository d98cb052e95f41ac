//! Prompt construction for one translation request.
//!
//! The workflow behind the transport takes a single free-form `content`
//! parameter and reads the instruction from its tail. Keeping the template
//! here means the wire code in [`crate::pipeline::transport`] never has to
//! know the convention.

use crate::output::TranslationUnit;

/// Default template: the source text followed by "translate into <target>".
///
/// Placeholders: `{text}`, `{source_language}`, `{target_language}`.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "{text}\n翻译成{target_language}";

/// Render the request content for `unit`.
///
/// Uses `template` when given, [`DEFAULT_PROMPT_TEMPLATE`] otherwise.
/// `{text}` is substituted last so placeholder-like strings inside the
/// source text are left alone.
pub fn render_prompt(unit: &TranslationUnit, template: Option<&str>) -> String {
    template
        .unwrap_or(DEFAULT_PROMPT_TEMPLATE)
        .replace("{source_language}", unit.source_language.name())
        .replace("{target_language}", unit.target_language.name())
        .replace("{text}", &unit.source_text)
}
