//! Recursive character splitter.
//!
//! Splits on the coarsest separator present in the text ("\n\n", then "\n",
//! then " ", then single characters), recursing into pieces that are still
//! too long, then greedily merges the pieces back into chunks of at most
//! `chunk_size` characters that overlap by up to `chunk_overlap` characters.
//! Separators stay attached to the start of the piece that follows them, so
//! every chunk is a contiguous slice of the input.

use super::document::{Chunk, Document};
use crate::core::errors::ApiError;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct RecursiveTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ApiError> {
        Self::with_separators(
            chunk_size,
            chunk_overlap,
            DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_separators(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: Vec<String>,
    ) -> Result<Self, ApiError> {
        if chunk_size == 0 {
            return Err(ApiError::BadRequest(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(ApiError::BadRequest(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators,
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Splits every document and records where each chunk starts.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for document in documents {
            let mut search_from = 0usize;
            for (chunk_index, text) in self.split_text(&document.text).into_iter().enumerate() {
                let byte_start = document.text[search_from..]
                    .find(text.as_str())
                    .map(|pos| search_from + pos)
                    .unwrap_or(search_from);
                let start_offset = document.text[..byte_start].chars().count();

                // The next chunk starts strictly after this one.
                search_from = document.text[byte_start..]
                    .chars()
                    .next()
                    .map(|c| byte_start + c.len_utf8())
                    .unwrap_or(byte_start);

                chunks.push(Chunk {
                    id: format!("{}#{}", document.id, chunk_index),
                    text,
                    source: document.metadata.source.clone(),
                    kind: document.metadata.kind,
                    page: document.metadata.page,
                    chunk_index,
                    start_offset,
                });
            }
        }

        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits));
                good_splits.clear();
            }

            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    final_chunks.push(trimmed.to_string());
                }
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_start = 0usize;
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);

            if total + len > self.chunk_size && current.len() > current_start {
                push_trimmed(&mut docs, &current[current_start..]);

                while current.len() > current_start
                    && (total > self.chunk_overlap || total + len > self.chunk_size)
                {
                    total -= char_len(current[current_start]);
                    current_start += 1;
                }
            }

            current.push(split);
            total += len;
        }

        push_trimmed(&mut docs, &current[current_start..]);
        docs
    }
}

fn push_trimmed(docs: &mut Vec<String>, pieces: &[&str]) {
    let joined = pieces.concat();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

/// Splits on `separator`, attaching each separator to the following piece.
/// An empty separator splits into characters. Empty pieces are dropped.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }

    let mut pieces = Vec::new();
    let mut last = 0usize;
    for (idx, _) in text.match_indices(separator) {
        if idx > last {
            pieces.push(text[last..idx].to_string());
        }
        last = idx;
    }
    if last < text.len() {
        pieces.push(text[last..].to_string());
    }

    pieces.retain(|p| !p.is_empty());
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::document::{DocumentKind, DocumentMetadata};

    fn document(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata: DocumentMetadata {
                source: "data/hr/holidays.txt".to_string(),
                kind: DocumentKind::Txt,
                page: None,
                content_hash: "hash".to_string(),
                extra: None,
            },
        }
    }

    #[test]
    fn rejects_invalid_sizes() {
        assert!(RecursiveTextSplitter::new(0, 0).is_err());
        assert!(RecursiveTextSplitter::new(100, 100).is_err());
        assert!(RecursiveTextSplitter::new(100, 99).is_ok());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = RecursiveTextSplitter::new(1000, 200).unwrap();
        let chunks = splitter.split_text("  New Year's Day is a company holiday.  ");
        assert_eq!(chunks, vec!["New Year's Day is a company holiday."]);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let splitter = RecursiveTextSplitter::new(40, 0).unwrap();
        let text = "Annual leave is 20 days.\n\nSick leave is 10 days.\n\nCarry over is 5 days.";

        let chunks = splitter.split_text(text);

        assert_eq!(
            chunks,
            vec![
                "Annual leave is 20 days.",
                "Sick leave is 10 days.",
                "Carry over is 5 days."
            ]
        );
    }

    #[test]
    fn chunks_respect_size_and_overlap() {
        let splitter = RecursiveTextSplitter::new(50, 15).unwrap();
        let text = "one two three four five six seven eight nine ten eleven twelve \
                    thirteen fourteen fifteen sixteen seventeen eighteen nineteen twenty";

        let chunks = splitter.split_text(text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "chunk too long: {:?}", chunk);
            assert!(!chunk.trim().is_empty());
        }
        for word in text.split_whitespace() {
            assert!(chunks.iter().any(|c| c.contains(word)), "lost word {}", word);
        }
        // Consecutive chunks share at least one word.
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(pair[1].contains(last_word));
        }
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let splitter = RecursiveTextSplitter::new(10, 2).unwrap();
        let text = "x".repeat(25);

        let chunks = splitter.split_text(&text);

        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks[0], "x".repeat(10));
        assert!(chunks.len() >= 3);
    }

    #[test]
    fn multibyte_text_is_measured_in_characters() {
        let splitter = RecursiveTextSplitter::new(8, 0).unwrap();
        let chunks = splitter.split_text("祝日 休暇 出張 規程 採用");

        assert!(chunks.iter().all(|c| c.chars().count() <= 8));
        assert_eq!(chunks.concat().replace(' ', ""), "祝日休暇出張規程採用");
    }

    #[test]
    fn split_documents_assigns_ids_and_offsets() {
        let splitter = RecursiveTextSplitter::new(30, 0).unwrap();
        let doc = document("txt_holidays_abcd1234", "First paragraph here.\n\nSecond paragraph here.");

        let chunks = splitter.split_documents(&[doc.clone()]);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "txt_holidays_abcd1234#0");
        assert_eq!(chunks[1].id, "txt_holidays_abcd1234#1");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[1].start_offset, doc.text.find("Second").unwrap());
        assert_eq!(chunks[1].source, "data/hr/holidays.txt");
    }

    #[test]
    fn repeated_chunks_get_increasing_offsets() {
        let splitter = RecursiveTextSplitter::new(5, 0).unwrap();
        let doc = document("d", "same\nsame\nsame");

        let offsets: Vec<usize> = splitter
            .split_documents(&[doc])
            .into_iter()
            .map(|c| c.start_offset)
            .collect();

        assert_eq!(offsets, vec![0, 5, 10]);
    }
}
