//! Balanced-brace block extraction.
//!
//! Every parser in this crate pulls construct bodies out of free text with
//! [`extract_block`]: a nesting-aware scanner that returns the text strictly
//! between the next matching `{ ... }` pair. Braces inside double-quoted
//! string literals (including `\"` escapes) do not affect nesting depth, so
//! a handler body like `send("{")` cannot unbalance the enclosing block.

/// Finds the byte index of the next `{` at or after `from` that is not
/// inside a string literal.
pub fn find_block_start(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = from.min(bytes.len());
    let mut in_str = false;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_str => i += 1,
            b'"' => in_str = !in_str,
            b'{' if !in_str => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Returns the text strictly between the next balanced brace pair at or
/// after `from`, together with the index just past the closing brace.
///
/// Returns `None` when no opening brace occurs before end of input, or when
/// the block never closes (the caller decides whether that is fatal).
pub fn extract_block(source: &str, from: usize) -> Option<(&str, usize)> {
    let open = find_block_start(source, from)?;
    let bytes = source.as_bytes();

    let mut depth = 1usize;
    let mut in_str = false;
    let mut i = open + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_str => i += 1,
            b'"' => in_str = !in_str,
            b'{' if !in_str => depth += 1,
            b'}' if !in_str => {
                depth -= 1;
                if depth == 0 {
                    return Some((&source[open + 1..i], i + 1));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}
