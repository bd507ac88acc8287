//! Sentence-aware text chunking with whole-sentence overlap.

use std::ops::Range;

use crate::models::{Document, IndexingConfig, Passage};
use crate::utils::char_len;

/// Split `text` into chunks of roughly `chunk_size` characters.
///
/// Chunks are built from whole sentence units and never split a word.
/// Each chunk after the first starts with the trailing sentences of the
/// previous chunk, up to `overlap` characters. A sentence longer than
/// `chunk_size` is emitted as its own chunk.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let units = split_units(text);
    chunk_ranges(&units, chunk_size, overlap)
        .into_iter()
        .map(|range| join_units(&units[range]))
        .collect()
}

/// Text chunker that turns documents into passages.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Target chunk size in characters
    chunk_size: usize,
    /// Overlap size in characters
    overlap: usize,
}

impl TextChunker {
    pub fn new(config: &IndexingConfig) -> Self {
        Self::with_sizes(config.chunk_size as usize, config.chunk_overlap as usize)
    }

    pub fn with_sizes(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
        }
    }

    /// Chunk every page of a document into passages.
    ///
    /// Chunk indices run across pages. Each passage records the markdown
    /// heading in effect where it starts.
    pub fn chunk_document(&self, document: &Document) -> Vec<Passage> {
        let paged = document.is_paged();
        let mut passages = Vec::new();
        let mut chunk_index = 0u32;
        let mut section: Option<String> = None;

        for (page_idx, page_text) in document.pages.iter().enumerate() {
            let page = paged.then(|| page_idx as u32 + 1);
            let units = split_units(page_text);

            // Heading in effect at each unit, carried over from earlier pages
            let mut in_effect = Vec::with_capacity(units.len());
            for unit in &units {
                if let Some(heading) = heading_text(unit) {
                    section = Some(heading);
                }
                in_effect.push(section.clone());
            }

            for range in chunk_ranges(&units, self.chunk_size, self.overlap) {
                let content = join_units(&units[range.clone()]);
                let passage_section = in_effect[range.start].clone();
                passages.push(Passage::new(
                    &document.id,
                    page,
                    passage_section,
                    chunk_index,
                    content,
                ));
                chunk_index += 1;
            }
        }

        passages
    }
}

/// Split text into sentence units.
///
/// A unit ends after `.`, `!` or `?` followed by whitespace, or after a
/// newline. Whitespace following the boundary stays with the unit it ends.
/// Whitespace-only units are dropped.
fn split_units(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = c == '\n'
            || (matches!(c, '.' | '!' | '?')
                && chars.peek().is_some_and(|(_, next)| next.is_whitespace()));
        if !boundary {
            continue;
        }

        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            end = j + next.len_utf8();
            chars.next();
        }
        units.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        units.push(&text[start..]);
    }

    units.retain(|u| !u.trim().is_empty());
    units
}

/// Group units into chunk ranges.
fn chunk_ranges(units: &[&str], chunk_size: usize, overlap: usize) -> Vec<Range<usize>> {
    let lens: Vec<usize> = units.iter().map(|u| char_len(u)).collect();
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut len = 0;

    for (i, &unit_len) in lens.iter().enumerate() {
        if i > start && len + unit_len > chunk_size {
            ranges.push(start..i);

            // Carry trailing whole units, never the entire previous chunk
            let mut carry_start = i;
            let mut carry_len = 0;
            while carry_start > start + 1 && carry_len + lens[carry_start - 1] <= overlap {
                carry_start -= 1;
                carry_len += lens[carry_start];
            }
            start = carry_start;
            len = carry_len;
        }
        len += unit_len;
    }
    if start < units.len() {
        ranges.push(start..units.len());
    }

    ranges
}

fn join_units(units: &[&str]) -> String {
    units.concat().trim().to_string()
}

/// Text of an ATX heading: one to six `#` followed by a space.
fn heading_text(unit: &str) -> Option<String> {
    let trimmed = unit.trim();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let heading = rest.trim().trim_end_matches('#').trim();
    (!heading.is_empty()).then(|| heading.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_sentences(n: usize) -> String {
        (1..=n)
            .map(|i| format!("Sentence number {i} talks about topic {i}."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Length of the longest prefix of `b` that is also a suffix of `a`.
    fn shared_len(a: &str, b: &str) -> usize {
        (1..=a.len().min(b.len()))
            .rev()
            .find(|&k| b.is_char_boundary(k) && a.ends_with(&b[..k]))
            .unwrap_or(0)
    }

    fn without_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_empty_and_whitespace_text() {
        assert!(chunk("", 100, 20).is_empty());
        assert!(chunk("   \n\t  \n", 100, 20).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk("Library opens at 8am. Fines are $0.50/day.", 800, 100);
        assert_eq!(chunks, vec!["Library opens at 8am. Fines are $0.50/day."]);
    }

    #[test]
    fn test_oversized_sentence_is_kept_whole() {
        let long = format!("{} end.", "word ".repeat(60));
        let text = format!("Short one. {long} Another short one.");
        let chunks = chunk(&text, 50, 10);

        assert!(chunks.iter().any(|c| c.contains(long.trim())));
        for c in &chunks {
            assert!(!c.is_empty());
            assert_eq!(c, c.trim());
        }
    }

    #[test]
    fn test_chunks_respect_size_plus_overlap() {
        let text = numbered_sentences(40);
        let (size, overlap) = (150, 60);
        for c in chunk(&text, size, overlap) {
            assert!(c.chars().count() <= size + overlap, "chunk too long: {c}");
        }
    }

    #[test]
    fn test_overlap_is_bounded_and_whole_sentences() {
        let text = numbered_sentences(40);
        let overlap = 60;
        let chunks = chunk(&text, 150, overlap);
        assert!(chunks.len() > 3);

        for pair in chunks.windows(2) {
            let shared = &pair[1][..shared_len(&pair[0], &pair[1])];
            assert!(shared.chars().count() <= overlap);
            if !shared.is_empty() {
                assert!(shared.starts_with("Sentence number"));
                assert!(shared.ends_with('.'));
                // The shared text begins where a sentence begins in the previous chunk
                let before = &pair[0][..pair[0].len() - shared.len()];
                assert!(before.is_empty() || before.ends_with(". "));
            }
        }
    }

    #[test]
    fn test_chunks_cover_all_content() {
        let text = format!(
            "# Borrowing\nUndergraduates may borrow five books.\n\n{}\nReturn books on time!",
            numbered_sentences(25)
        );
        let chunks = chunk(&text, 120, 50);

        let mut rebuilt = without_whitespace(&chunks[0]);
        for pair in chunks.windows(2) {
            let k = shared_len(&pair[0], &pair[1]);
            rebuilt.push_str(&without_whitespace(&pair[1][k..]));
        }
        assert_eq!(rebuilt, without_whitespace(&text));
    }

    #[test]
    fn test_never_splits_words() {
        let text = numbered_sentences(30);
        for c in chunk(&text, 90, 30) {
            assert!(c.starts_with("Sentence"));
            assert!(c.ends_with('.'));
        }
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = numbered_sentences(50);
        assert_eq!(chunk(&text, 200, 80), chunk(&text, 200, 80));
    }

    #[test]
    fn test_line_boundaries_split_units() {
        let units = split_units("Opening hours\nMonday to Friday\n\nWeekends closed");
        assert_eq!(
            units,
            vec!["Opening hours\n", "Monday to Friday\n\n", "Weekends closed"]
        );
    }

    #[test]
    fn test_decimal_points_do_not_split() {
        let units = split_units("Fines are $0.50/day. Pay at the desk.");
        assert_eq!(units, vec!["Fines are $0.50/day. ", "Pay at the desk."]);
    }

    #[test]
    fn test_chunk_document_assigns_pages_and_sections() {
        let document = Document::with_pages(
            "guide.txt",
            vec![
                "# Hours\nThe library opens at 8am.".to_string(),
                "It closes at 10pm.".to_string(),
                "# Fines\nFines are $0.50/day.".to_string(),
            ],
        );
        let passages = TextChunker::with_sizes(800, 100).chunk_document(&document);

        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0].page, Some(1));
        assert_eq!(passages[0].section.as_deref(), Some("Hours"));
        assert_eq!(passages[1].page, Some(2));
        assert_eq!(passages[1].section.as_deref(), Some("Hours"));
        assert_eq!(passages[2].page, Some(3));
        assert_eq!(passages[2].section.as_deref(), Some("Fines"));
        let indices: Vec<u32> = passages.iter().map(|p| p.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_chunk_document_ids_are_stable() {
        let document = Document::new("guide.txt", numbered_sentences(20));
        let chunker = TextChunker::with_sizes(100, 40);

        let first: Vec<String> = chunker
            .chunk_document(&document)
            .into_iter()
            .map(|p| p.chunk_id)
            .collect();
        let second: Vec<String> = chunker
            .chunk_document(&document)
            .into_iter()
            .map(|p| p.chunk_id)
            .collect();

        assert!(first.len() > 1);
        assert_eq!(first, second);
        assert!(chunker.chunk_document(&document)[0].page.is_none());
    }

    #[test]
    fn test_heading_requires_atx_form() {
        assert_eq!(heading_text("# Hours\n").as_deref(), Some("Hours"));
        assert_eq!(heading_text("### Late fees ###").as_deref(), Some("Late fees"));
        assert_eq!(heading_text("#opening hours today."), None);
        assert_eq!(heading_text("####### Too deep"), None);
        assert_eq!(heading_text("#"), None);

        let doc = Document::new("notes.md", "# Hours\n#opening hours today.\nOpen at 8am.");
        let passages = TextChunker::with_sizes(15, 0).chunk_document(&doc);
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[2].content, "Open at 8am.");
        assert_eq!(passages[2].section.as_deref(), Some("Hours"));
    }
}
