//! Splits documents into size-bounded, overlapping chunks.
//!
//! Cuts prefer a semantic boundary (paragraph, newline, sentence, word)
//! found near the end of the size window, and fall back to a hard cut when
//! the window contains none. Neighbouring chunks from the same document
//! share a fixed-size overlap so text spanning a cut is still retrievable.

/// Fraction of the window, counted from its end, in which boundary
/// candidates are searched.
const BOUNDARY_SEARCH_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        assert!(overlap < chunk_size, "overlap must be smaller than chunk_size");
        Self {
            chunk_size,
            overlap,
        }
    }

    /// Split one document's text; chunk order follows text order.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();

        if total == 0 {
            return Vec::new();
        }
        if total <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let window_end = (start + self.chunk_size).min(total);
            let end = if window_end < total {
                self.snap_to_boundary(&chars, start, window_end)
            } else {
                window_end
            };

            chunks.push(chars[start..end].iter().collect());

            if end == total {
                break;
            }
            start = end - self.overlap;
        }

        chunks
    }

    /// Walk backwards from the window end looking for the strongest boundary.
    /// A candidate is only usable if cutting there still advances the next
    /// chunk past the current start.
    fn snap_to_boundary(&self, chars: &[char], start: usize, window_end: usize) -> usize {
        let window_len = window_end - start;
        let search_span = ((window_len as f64) * BOUNDARY_SEARCH_FRACTION).ceil() as usize;
        let search_start = window_end.saturating_sub(search_span).max(start + 1);
        let min_cut = start + self.overlap + 1;

        let candidates: [&dyn Fn(&[char], usize) -> bool; 4] = [
            &|c, i| c[i] == '\n' && i + 1 < c.len() && c[i + 1] == '\n',
            &|c, i| c[i] == '\n',
            &|c, i| {
                matches!(c[i], '.' | '!' | '?')
                    && i + 1 < c.len()
                    && c[i + 1].is_whitespace()
            },
            &|c, i| c[i].is_whitespace(),
        ];

        for is_boundary in candidates {
            let mut i = window_end - 1;
            while i >= search_start {
                if is_boundary(chars, i) {
                    // cut just after the boundary character
                    let cut = i + 1;
                    if cut >= min_cut && cut <= window_end {
                        return cut;
                    }
                }
                if i == search_start {
                    break;
                }
                i -= 1;
            }
        }

        // no usable boundary in the window: hard cut
        window_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        let splitter = ChunkSplitter::new(100, 20);
        assert!(splitter.split("").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = ChunkSplitter::new(100, 20);
        let chunks = splitter.split("short document");
        assert_eq!(chunks, vec!["short document".to_string()]);
    }

    #[test]
    fn chunks_respect_the_size_bound() {
        let splitter = ChunkSplitter::new(100, 20);
        let text = "word ".repeat(200);
        for chunk in splitter.split(&text) {
            assert!(chunk.chars().count() <= 100);
        }
    }

    #[test]
    fn adjacent_chunks_share_the_overlap() {
        let splitter = ChunkSplitter::new(100, 20);
        let text = "abcdefghij".repeat(50);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);

        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].chars().collect();
            let next: Vec<char> = pair[1].chars().collect();
            let tail: String = prev[prev.len() - 20..].iter().collect();
            let head: String = next[..20].iter().collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn cuts_prefer_sentence_boundaries() {
        let splitter = ChunkSplitter::new(100, 10);
        let text = "This is a sentence. ".repeat(20);
        let chunks = splitter.split(&text);
        // every non-final chunk should end just after a sentence boundary
        for chunk in &chunks[..chunks.len() - 1] {
            let trimmed = chunk.trim_end();
            assert!(
                trimmed.ends_with('.'),
                "chunk did not end at a sentence boundary: {:?}",
                &chunk[chunk.len().saturating_sub(20)..]
            );
        }
    }

    #[test]
    fn unbreakable_text_falls_back_to_hard_cuts() {
        let splitter = ChunkSplitter::new(50, 10);
        let text = "x".repeat(200);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);
        assert!(chunks[0].chars().count() == 50);
    }

    #[test]
    fn full_text_is_covered_in_order() {
        let splitter = ChunkSplitter::new(100, 20);
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(30);
        let chunks = splitter.split(&text);

        // stitch chunks back together, dropping each successor's overlap
        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            let chars: Vec<char> = chunk.chars().collect();
            rebuilt.extend(&chars[20..]);
        }
        assert_eq!(rebuilt, text);
    }
}
