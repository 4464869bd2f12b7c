pub mod logging;

/// Truncates free-form text for log lines so user content never floods the
/// output.
pub fn preview_text(value: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 120;
    let mut chars = value.chars();
    let preview: String = chars.by_ref().take(MAX_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{preview}…")
    } else {
        preview
    }
}
