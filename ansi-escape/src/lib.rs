//! Terminal text utilities: ANSI escape stripping and bounded truncation.
//!
//! Subprocess backends emit colored, cursor-addressed output even with
//! color disabled in the environment; everything that crosses the adapter
//! boundary is passed through [`strip_ansi`] first.

use std::sync::LazyLock;

use regex::Regex;

/// Matches C1 escapes and CSI sequences (`ESC [ params final`).
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let pattern = Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap();
    pattern
});

/// Remove all ANSI escape sequences from `text`.
///
/// Total: empty input returns empty, and the function is idempotent.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Truncate `text` to at most `max_chars` characters, appending `suffix`
/// only when truncation actually occurred.
///
/// The budget is counted in characters, not bytes, so multibyte input is
/// never split mid-codepoint.
pub fn truncate(text: &str, max_chars: usize, suffix: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(suffix);
    out
}
