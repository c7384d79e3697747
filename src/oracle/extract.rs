use regex::Regex;
use std::sync::OnceLock;

fn fenced_block() -> &'static Regex {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    // Optional info string after the opening fence, then LF or CRLF
    FENCED.get_or_init(|| Regex::new(r"(?s)```[\w+#.-]*[ \t]*\r?\n(.*?)```").expect("valid regex"))
}

/// Pull the patch out of a free-text oracle reply.
///
/// Returns the trimmed body of the first fenced code block; when the reply
/// has no fenced block the whole reply is returned trimmed.
pub fn extract_code_block(text: &str) -> String {
    match fenced_block().captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}
