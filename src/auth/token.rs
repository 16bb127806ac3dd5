//! Opaque token codec.
//!
//! Clients hold `<id>.<secret>`; the server stores only a hash of the
//! secret. The id may not contain the separator, so parsing splits on the
//! first `.` and fails closed on anything degenerate.

const SEPARATOR: char = '.';

/// Format an id and a raw secret into the wire token.
#[must_use]
pub fn format_token(id: &str, secret: &str) -> String {
    format!("{id}{SEPARATOR}{secret}")
}

/// Split a wire token into `(id, secret)`.
///
/// Returns `None` when the separator is missing, leading, or trailing.
/// Pure and total; never panics.
#[must_use]
pub fn parse_token(token: &str) -> Option<(&str, &str)> {
    let dot = token.find(SEPARATOR)?;
    if dot == 0 || dot == token.len() - 1 {
        return None;
    }
    Some((&token[..dot], &token[dot + 1..]))
}
