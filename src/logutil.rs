//! Helpers that keep relayed message text from breaking single-line logs.

use std::fmt::Write;

/// Longest preview of a message body written to the log.
pub const TEXT_PREVIEW_BYTES: usize = 80;

/// Escape a string for single-line logging.
///
/// Backslash, `\n`, `\r` and `\t` are written as escapes; other control
/// characters become `\xNN`. Output is capped at 300 characters.
pub fn escape_log(s: &str) -> String {
    const MAX_CHARS: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_CHARS) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_CHARS {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escaped preview of message text, cut at a UTF-8 boundary to at most
/// `max_bytes` bytes of input and suffixed with `...` when shortened.
pub fn preview(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return escape_log(input);
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&input[..cut]);
    out.push_str("...");
    out
}

/// Lowercase hex of the first `max` bytes, for trace logging raw frames.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max.min(data.len()) * 2);
    for b in data.iter().take(max) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
