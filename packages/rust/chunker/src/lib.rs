//! Sliding-window text chunking for sitekb.
//!
//! Pages are split into overlapping chunks bounded by
//! [`ChunkConfig::max_chunk_size`], preferring to cut at sentence
//! boundaries so chunks stay coherent for embedding.

use sitekb_shared::{ChunkConfig, ChunkRecord, KbId, PageRecord, chunk_id};

/// Chars treated as sentence boundaries when choosing a cut point.
const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', '\n'];

/// Split `text` into chunks of at most `max_chunk_size` chars with
/// `overlap` chars shared between consecutive chunks.
///
/// A window is cut early at the last sentence terminator inside it, but
/// only when that terminator sits past the window midpoint; cutting
/// earlier would produce degenerate slivers. The next window starts
/// `overlap` chars before the previous cut. Advancement is clamped so the
/// loop makes forward progress even when `overlap` approaches
/// `max_chunk_size`.
///
/// Operates on `char` positions, so multi-byte text is never split
/// mid-scalar.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= config.max_chunk_size {
        return vec![text.to_string()];
    }

    let midpoint = config.max_chunk_size / 2;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + config.max_chunk_size).min(chars.len());

        // Cut at the last sentence boundary in the window, if it falls
        // past the midpoint. The final window is taken whole.
        if end < chars.len() {
            if let Some(rel) = last_terminator(&chars[start..end]) {
                if rel > midpoint {
                    end = start + rel + 1;
                }
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end >= chars.len() {
            break;
        }

        let next = end.saturating_sub(config.overlap);
        // Overlap must never swallow the advance made this iteration.
        start = if next > start { next } else { end };
    }

    chunks
}

/// Window-relative index of the last sentence terminator, if any.
fn last_terminator(window: &[char]) -> Option<usize> {
    window
        .iter()
        .rposition(|c| SENTENCE_TERMINATORS.contains(c))
}

/// Chunk a crawled page into persistable records with deterministic ids.
pub fn chunk_page(page: &PageRecord, kb_id: &KbId, config: &ChunkConfig) -> Vec<ChunkRecord> {
    let pieces = chunk_text(&page.content, config);
    tracing::debug!(url = %page.url, chunks = pieces.len(), "chunked page");

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, content)| ChunkRecord {
            id: chunk_id(&page.url, i),
            kb_id: kb_id.clone(),
            content,
            source_url: page.url.clone(),
            title: page.title.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config(max_chunk_size: usize, overlap: usize) -> ChunkConfig {
        ChunkConfig {
            max_chunk_size,
            overlap,
        }
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("hello world", &config(1000, 100));
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", &config(1000, 100)).is_empty());
        assert!(chunk_text("   \n  ", &config(1000, 100)).is_empty());
    }

    #[test]
    fn boundaryless_text_splits_with_overlap() {
        let text = "A".repeat(1500);
        let chunks = chunk_text(&text, &config(1000, 100));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 1000);
        // Second window starts at 1000 - 100 = 900.
        assert_eq!(chunks[1].len(), 600);
    }

    #[test]
    fn every_chunk_respects_the_size_bound() {
        let text = "word. ".repeat(2000);
        let cfg = config(1000, 100);
        for chunk in chunk_text(&text, &cfg) {
            assert!(chunk.chars().count() <= cfg.max_chunk_size);
        }
    }

    #[test]
    fn cuts_at_sentence_boundary_past_midpoint() {
        let text = format!("{}. {}", "A".repeat(600), "B".repeat(600));
        let chunks = chunk_text(&text, &config(1000, 100));

        // Terminator at window offset 600 is past the midpoint, so the
        // first chunk ends right after it.
        assert_eq!(chunks[0].chars().count(), 601);
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn early_boundary_is_ignored() {
        let text = format!("{}. {}", "A".repeat(100), "B".repeat(1400));
        let chunks = chunk_text(&text, &config(1000, 100));

        // The only terminator sits before the midpoint; the window is
        // taken whole instead.
        assert_eq!(chunks[0].chars().count(), 1000);
    }

    #[test]
    fn terminates_when_overlap_exceeds_cut_length() {
        // Sentence cuts shorten windows below the overlap, which would
        // rewind `start` without the advancement clamp.
        let text = format!("{}. ", "A".repeat(550)).repeat(10);
        let chunks = chunk_text(&text, &config(1000, 600));

        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
    }

    #[test]
    fn terminates_when_overlap_nearly_equals_chunk_size() {
        let text = "A".repeat(1200);
        let chunks = chunk_text(&text, &config(1000, 999));

        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "é".repeat(1500);
        let chunks = chunk_text(&text, &config(1000, 100));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 1000);
    }

    #[test]
    fn chunk_page_assigns_deterministic_ids() {
        let page = PageRecord {
            url: "https://example.com/docs".into(),
            title: "Docs".into(),
            content: "A".repeat(1500),
            content_length: 1500,
            crawled_at: Utc::now(),
            content_hash: String::new(),
            links: vec![],
        };
        let kb_id = KbId("kb_example_com_1".into());

        let records = chunk_page(&page, &kb_id, &config(1000, 100));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, chunk_id("https://example.com/docs", 0));
        assert_eq!(records[1].id, chunk_id("https://example.com/docs", 1));
        assert!(records.iter().all(|r| r.kb_id == kb_id));
        assert!(records.iter().all(|r| r.title == "Docs"));
    }
}
