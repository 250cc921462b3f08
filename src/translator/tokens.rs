//! Whitespace tokenization with blank-preserving string literals

/// Stand-ins for blanks inside quoted literals while splitting on whitespace
const SPACE_MARKER: char = '\u{E000}';
const TAB_MARKER: char = '\u{E001}';

/// Split an expression into whitespace-delimited tokens.
///
/// Blanks inside single-quoted literals survive. An empty expression yields
/// one empty token so the caller reports it like any other bad token.
pub fn tokenize(expression: &str) -> Vec<String> {
    let escaped = escape_quoted_blanks(expression.trim());
    let tokens: Vec<String> = escaped
        .split_whitespace()
        .map(restore_blanks)
        .collect();

    if tokens.is_empty() {
        vec![String::new()]
    } else {
        tokens
    }
}

fn escape_quoted_blanks(expression: &str) -> String {
    let mut quoted = false;
    expression
        .chars()
        .map(|c| match c {
            '\'' => {
                quoted = !quoted;
                c
            }
            ' ' if quoted => SPACE_MARKER,
            '\t' if quoted => TAB_MARKER,
            _ => c,
        })
        .collect()
}

fn restore_blanks(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            SPACE_MARKER => ' ',
            TAB_MARKER => '\t',
            _ => c,
        })
        .collect()
}

/// Content of a single-quoted literal token, if it is one
pub fn string_literal(token: &str) -> Option<&str> {
    let inner = token.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.contains('\'') {
        None
    } else {
        Some(inner)
    }
}
