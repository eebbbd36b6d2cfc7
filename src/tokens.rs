//! Fast token estimation and budget-aware truncation.
//!
//! Every other component (chunker, batcher, retriever) sizes its work with
//! this heuristic, so it must be cheap and stable: the same input always
//! yields the same estimate, and longer text never estimates smaller.
//! Checkpoint batch boundaries are replanned from it on resume.

/// Approximate chars-per-token ratio for English-ish text and code.
pub(crate) const CHARS_PER_TOKEN: usize = 4;

/// Approximate tokens-per-word multiplier.
const TOKENS_PER_WORD: f64 = 1.3;

/// Marker appended to text cut by [`truncate_to_tokens`].
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Estimate the token count of `text`.
///
/// Takes the larger of a word-based and a character-based estimate
/// (1 token ≈ 0.75 words or 4 characters). Allocation-free.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let chars = text.len();
    ((words as f64 * TOKENS_PER_WORD) as usize).max(chars / CHARS_PER_TOKEN)
}

/// Truncate `text` to approximately `max_tokens`, appending a visible marker.
///
/// Returns the input unchanged when it already fits. The cut prefers a
/// newline in the trailing 20% of the cut window, then any whitespace
/// boundary, over a mid-token cut.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    if text.len() <= max_chars {
        return text.to_string();
    }

    let cut = floor_char_boundary(text, max_chars);
    let mut truncated = &text[..cut];

    // Prefer a newline in the trailing 20% of the window; a newline that
    // only exists earlier falls through to the whitespace check.
    let boundary = truncated
        .rfind('\n')
        .filter(|&pos| pos * 5 > max_chars * 4)
        .or_else(|| {
            truncated
                .rfind(char::is_whitespace)
                .filter(|&pos| pos * 5 > max_chars * 4)
        });
    if let Some(pos) = boundary {
        truncated = &truncated[..pos];
    }

    format!("{}{}", truncated, TRUNCATION_MARKER)
}

/// Largest byte index ≤ `index` that lies on a UTF-8 character boundary.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
