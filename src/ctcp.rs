//! Client-to-client protocol payloads, carried inside `PRIVMSG`/`NOTICE`
//! trailing text between a pair of `\x01` delimiters.

pub const DELIMITER: char = '\x01';

pub const VERSION: &str = "VERSION";
pub const PING: &str = "PING";

pub fn encode(tag: &str, text: &str) -> String {
    format!("{DELIMITER}{tag} {text}{DELIMITER}")
}

/// Splits a CTCP payload into its tag and text. Some clients forget the
/// closing delimiter, so it is optional.
pub fn decode(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix(DELIMITER)?;
    let inner = inner.strip_suffix(DELIMITER).unwrap_or(inner);

    match inner.split_once(' ') {
        Some((tag, text)) if !tag.is_empty() => Some((tag, text)),
        None if !inner.is_empty() => Some((inner, "")),
        _ => None,
    }
}
