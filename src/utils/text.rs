//! Text processing utilities.

/// Minimum passage characters for context assembly to count as useful.
pub const MIN_VIABLE_CONTENT: usize = 50;

/// Number of Unicode scalar values in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Truncate `text` to at most `max_chars` characters without splitting a word.
///
/// Returns the trimmed prefix ending at the last whitespace boundary that fits.
/// A first word longer than `max_chars` yields an empty string.
pub fn truncate_at_word(text: &str, max_chars: usize) -> &str {
    if char_len(text) <= max_chars {
        return text.trim_end();
    }

    let mut cut = 0;
    for (count, (idx, c)) in text.char_indices().enumerate() {
        if count > max_chars {
            break;
        }
        if c.is_whitespace() {
            cut = idx;
        }
    }
    text[..cut].trim_end()
}
