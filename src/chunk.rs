//! Token-window text splitter.
//!
//! Text is pre-tokenized into word-level tokens, then cut into windows of
//! `chunk_size` tokens where consecutive windows share `chunk_overlap`
//! tokens. Each chunk is an exact substring of the input and records its
//! char offsets, so a chunk can always be located in the original file.
//!
//! A token is one of:
//! - an alphanumeric run of at most 16 chars, with at most
//!   one leading space (longer runs such as hashes or base64 are split),
//! - a single punctuation or symbol character, with at most one leading space,
//! - a run of any other whitespace (newlines, tabs, repeated spaces).

use anyhow::{bail, Result};

use crate::models::TextChunk;

/// Longest alphanumeric run kept as a single token.
const MAX_WORD_CHARS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Token {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "Got a larger chunk overlap ({}) than chunk size ({}), should be smaller.",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Split text into chunks with contiguous indices starting at 0.
    ///
    /// Whitespace-only windows are skipped; empty input yields no chunks.
    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        let tokens = tokenize(text);
        let mut chunks = Vec::new();
        if tokens.is_empty() {
            return chunks;
        }

        let step = self.chunk_size - self.chunk_overlap;
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(tokens.len());
            let first = tokens[start];
            let last = tokens[end - 1];
            let piece = &text[first.byte_start..last.byte_end];

            if !piece.trim().is_empty() {
                chunks.push(TextChunk {
                    chunk_index: chunks.len(),
                    text: piece.to_string(),
                    start_char: first.char_start,
                    end_char: last.char_end,
                });
            }

            if end == tokens.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Class {
    Word,
    Symbol,
    Space,
}

fn classify(c: char) -> Class {
    if c.is_alphanumeric() {
        Class::Word
    } else if c.is_whitespace() {
        Class::Space
    } else {
        Class::Symbol
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut char_pos = 0usize;

    while let Some((byte_start, c)) = chars.next() {
        let char_start = char_pos;
        char_pos += 1;
        let mut byte_end = byte_start + c.len_utf8();
        let mut class = classify(c);

        // a single space binds to the token that follows it
        if c == ' ' {
            if let Some(&(i, next)) = chars.peek() {
                if !next.is_whitespace() {
                    chars.next();
                    char_pos += 1;
                    byte_end = i + next.len_utf8();
                    class = classify(next);
                }
            }
        }

        match class {
            Class::Word => {
                let mut word_chars = 1;
                while let Some(&(i, next)) = chars.peek() {
                    if classify(next) != Class::Word || word_chars == MAX_WORD_CHARS {
                        break;
                    }
                    word_chars += 1;
                    chars.next();
                    char_pos += 1;
                    byte_end = i + next.len_utf8();
                }
            }
            Class::Space => {
                while let Some(&(i, next)) = chars.peek() {
                    if !next.is_whitespace() {
                        break;
                    }
                    // leave a final space to lead the next word
                    if next == ' ' {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        if matches!(lookahead.peek(), Some(&(_, after)) if !after.is_whitespace()) {
                            break;
                        }
                    }
                    chars.next();
                    char_pos += 1;
                    byte_end = i + next.len_utf8();
                }
            }
            Class::Symbol => {}
        }

        tokens.push(Token {
            byte_start,
            byte_end,
            char_start,
            char_end: char_pos,
        });
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_tokens(text: &str) -> usize {
        tokenize(text).len()
    }

    fn texts(chunks: &[TextChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn tokenizer_binds_leading_space() {
        let text = "Hello, world!";
        let pieces: Vec<&str> = tokenize(text)
            .iter()
            .map(|t| &text[t.byte_start..t.byte_end])
            .collect();
        assert_eq!(pieces, vec!["Hello", ",", " world", "!"]);
    }

    #[test]
    fn tokenizer_groups_other_whitespace() {
        let text = "a\n\n  b";
        let pieces: Vec<&str> = tokenize(text)
            .iter()
            .map(|t| &text[t.byte_start..t.byte_end])
            .collect();
        assert_eq!(pieces, vec!["a", "\n\n ", " b"]);
    }

    #[test]
    fn tokens_cover_input_exactly() {
        let text = "Ünïcödé text — with   gaps,\tand\r\nlines.";
        let tokens = tokenize(text);
        let rebuilt: String = tokens
            .iter()
            .map(|t| &text[t.byte_start..t.byte_end])
            .collect();
        assert_eq!(rebuilt, text);
        assert_eq!(tokens.last().unwrap().char_end, text.chars().count());
    }

    #[test]
    fn small_text_single_chunk() {
        let chunker = TextChunker::new(512, 50).unwrap();
        let chunks = chunker.chunk_text("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, 13);
    }

    #[test]
    fn empty_and_blank_text_yield_no_chunks() {
        let chunker = TextChunker::new(10, 2).unwrap();
        assert!(chunker.chunk_text("").is_empty());
        assert!(chunker.chunk_text(" \n\t ").is_empty());
    }

    #[test]
    fn windows_overlap_by_configured_tokens() {
        // 10 word tokens: "w0", " w1", ... " w9"
        let text = (0..10).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunker = TextChunker::new(4, 1).unwrap();
        let chunks = chunker.chunk_text(&text);
        assert_eq!(
            texts(&chunks),
            vec!["w0 w1 w2 w3", " w3 w4 w5 w6", " w6 w7 w8 w9"]
        );
    }

    #[test]
    fn last_window_ends_at_final_token() {
        let text = (0..7).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunker = TextChunker::new(4, 2).unwrap();
        let chunks = chunker.chunk_text(&text);
        // starts at tokens 0, 2, 4 -> windows [0,4) [2,6) [4,7)
        assert_eq!(texts(&chunks), vec!["w0 w1 w2 w3", " w2 w3 w4 w5", " w4 w5 w6"]);
    }

    #[test]
    fn offsets_locate_chunk_in_source() {
        let text = "Ålpha beta gamma delta epsilon zeta eta theta";
        let chunker = TextChunker::new(3, 1).unwrap();
        let chars: Vec<char> = text.chars().collect();
        for chunk in chunker.chunk_text(text) {
            let slice: String = chars[chunk.start_char..chunk.end_char].iter().collect();
            assert_eq!(slice, chunk.text);
        }
    }

    #[test]
    fn chunk_indices_contiguous() {
        let text = (0..200)
            .map(|i| format!("Sentence number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunker = TextChunker::new(20, 5).unwrap();
        let chunks = chunker.chunk_text(&text);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i, "Index mismatch at position {}", i);
            assert!(count_tokens(&c.text) <= 20);
        }
    }

    #[test]
    fn long_alphanumeric_runs_are_split() {
        let blob = "QUJD".repeat(10_000);
        let tokens = tokenize(&blob);
        assert_eq!(tokens.len(), blob.len() / MAX_WORD_CHARS);
        assert!(tokens
            .iter()
            .all(|t| t.char_end - t.char_start == MAX_WORD_CHARS));

        let text = format!("see {}", "a".repeat(MAX_WORD_CHARS + 1));
        let pieces: Vec<&str> = tokenize(&text)
            .iter()
            .map(|t| &text[t.byte_start..t.byte_end])
            .collect();
        let long = format!(" {}", "a".repeat(MAX_WORD_CHARS));
        assert_eq!(pieces, vec!["see", long.as_str(), "a"]);
    }

    #[test]
    fn blob_chunks_stay_bounded() {
        let blob = "0123456789abcdef".repeat(4096);
        let chunker = TextChunker::new(512, 50).unwrap();
        let chunks = chunker.chunk_text(&blob);
        assert!(chunks.len() > 1);
        assert!(chunks
            .iter()
            .all(|c| c.text.chars().count() <= 512 * MAX_WORD_CHARS));
        assert_eq!(chunks.last().unwrap().end_char, blob.len());
    }

    #[test]
    fn invalid_settings_rejected() {
        assert!(TextChunker::new(0, 0).is_err());
        assert!(TextChunker::new(10, 10).is_err());
        assert!(TextChunker::new(10, 9).is_ok());
    }
}
