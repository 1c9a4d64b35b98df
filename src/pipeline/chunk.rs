//! Chunk stage
//!
//! Splits canonical text into semantic chunks for evidence linking:
//! 200-1200 chars, paragraph boundaries preferred, ~50 chars of overlap
//! carried from the previous chunk for continuity.

use crate::models::DocumentChunk;
use uuid::Uuid;

const MIN_CHUNK: usize = 200;
const MAX_CHUNK: usize = 1200;
const OVERLAP: usize = 50;

pub fn chunk_text(document_id: &str, text: &str) -> Vec<DocumentChunk> {
    let mut chunks = Vec::new();
    if text.trim().is_empty() {
        return chunks;
    }

    let mut start = 0usize;
    let bytes = text.as_bytes();
    while start < bytes.len() {
        let hard_end = (start + MAX_CHUNK).min(bytes.len());
        let mut end = hard_end;

        if hard_end < bytes.len() {
            // Prefer the last paragraph break past the minimum size, then
            // any line break, then a hard cut.
            let window = &text[start..hard_end];
            let floor = MIN_CHUNK.min(window.len());
            end = window
                .rfind("\n\n")
                .filter(|&p| p >= floor)
                .or_else(|| window.rfind('\n').filter(|&p| p >= floor))
                .map(|p| start + p + 1)
                .unwrap_or(hard_end);
            while !text.is_char_boundary(end) {
                end -= 1;
            }
        }

        let body = &text[start..end];
        if !body.trim().is_empty() {
            // Overlap is prefixed into the stored text; offsets still
            // describe the body's position in the canonical text.
            let overlap_start = chunks
                .last()
                .map(|_| {
                    let mut p = start.saturating_sub(OVERLAP);
                    while !text.is_char_boundary(p) {
                        p += 1;
                    }
                    p
                })
                .unwrap_or(start);
            let stored = text[overlap_start..end].to_string();
            chunks.push(DocumentChunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                seq: chunks.len() as i64,
                char_start: start as i64,
                char_end: end as i64,
                text: stored,
                chunk_type: if body.contains('|') { "table" } else { "paragraph" }.to_string(),
                embedding_key: None,
            });
        }
        if end == start {
            break;
        }
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_text("d", "a short paragraph about duties\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[0].char_start, 0);
    }

    #[test]
    fn test_long_text_splits_on_paragraphs_within_bounds() {
        let paragraph = "HTS 8544.42.90 is subject to additional duties under heading \
                         9903.88.03 at the rate described in this notice. ";
        let text = (0..40).map(|_| paragraph).collect::<Vec<_>>().join("\n\n");
        let chunks = chunk_text("d", &text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            let body_len = (c.char_end - c.char_start) as usize;
            assert!(body_len <= MAX_CHUNK, "chunk body too large: {}", body_len);
        }
        // Offsets reconstruct the canonical text in order.
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].char_end, pair[1].char_start);
        }
    }

    #[test]
    fn test_chunks_carry_overlap_from_predecessor() {
        let line = "a line of regulatory text that repeats for sizing purposes\n";
        let text = line.repeat(60);
        let chunks = chunk_text("d", &text);
        assert!(chunks.len() > 1);
        let first_body_end = chunks[0].char_end as usize;
        let tail_of_first = &text[first_body_end.saturating_sub(20)..first_body_end];
        assert!(chunks[1].text.contains(tail_of_first.trim_end()));
    }

    #[test]
    fn test_table_lines_are_typed() {
        let text = "HTS 8544.42.90 | 9903.88.03 | 25% | effective 2026-01-01\n";
        let chunks = chunk_text("d", text);
        assert_eq!(chunks[0].chunk_type, "table");
    }
}
