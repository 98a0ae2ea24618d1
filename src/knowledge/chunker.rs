use std::collections::VecDeque;
use std::fmt;
use std::iter::Enumerate;
use std::str::Lines;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::tokens::{default_counter, TokenCounter};

/// Content hash used as the stable chunk id (MD5, lower-case hex).
pub fn chunk_id(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// Piece of text produced by the chunker, before it is tied to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Trimmed chunk text
    pub content: String,
    /// MD5 of `content`
    pub chunk_id: String,
    /// Source line (0-based) of the first contributing line
    pub start_line: usize,
    /// Source line (0-based) of the last contributing line
    pub end_line: usize,
}

impl Segment {
    fn new(content: String, start_line: usize, end_line: usize) -> Self {
        Self {
            chunk_id: chunk_id(&content),
            content,
            start_line,
            end_line,
        }
    }

    /// Attach document identity and position.
    pub fn into_chunk(self, document_id: &str, chunk_index: usize) -> Chunk {
        Chunk {
            chunk_id: self.chunk_id,
            document_id: document_id.to_string(),
            chunk_index,
            content: self.content,
            start_line: self.start_line,
            end_line: self.end_line,
        }
    }
}

/// Text chunk of a document, the unit of extraction and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Token-bounded, sentence-aware line chunker.
#[derive(Clone)]
pub struct Chunker {
    token_limit: usize,
    counter: Arc<dyn TokenCounter>,
}

impl fmt::Debug for Chunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunker")
            .field("token_limit", &self.token_limit)
            .field("counter", &self.counter)
            .finish()
    }
}

impl Chunker {
    /// Create a new chunker.
    pub fn new(token_limit: usize, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            token_limit: token_limit.max(1),
            counter,
        }
    }

    /// Chunker with the default `cl100k_base` counter.
    pub fn with_limit(token_limit: usize) -> Self {
        Self::new(token_limit, default_counter())
    }

    /// Same counter, different limit.
    pub fn resized(&self, token_limit: usize) -> Self {
        Self::new(token_limit, Arc::clone(&self.counter))
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    /// Lazily split text into chunks. The iterator makes a single pass over
    /// `text` and cannot be restarted.
    pub fn chunk<'a>(&'a self, text: &'a str) -> Chunks<'a> {
        Chunks {
            chunker: self,
            lines: text.lines().enumerate(),
            current: String::new(),
            current_lines: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn fits(&self, text: &str) -> bool {
        self.counter.count(text) <= self.token_limit
    }

    /// Byte offset at which to cut a line that does not fit on its own.
    /// Always > 0 so that the scan makes progress.
    fn forced_cut(&self, line: &str) -> usize {
        let bounds: Vec<usize> = line
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(line.len()))
            .collect();

        let fitting = bounds.partition_point(|&end| self.fits(&line[..end]));
        if fitting == 0 {
            return bounds[0];
        }

        let window = &line[..bounds[fitting - 1]];
        best_break(window).unwrap_or(window.len())
    }
}

/// Best break point in `window`, searched backward: blank line, newline,
/// sentence punctuation, clause punctuation, then any whitespace. Returns the
/// byte length of the head to emit.
pub fn best_break(window: &str) -> Option<usize> {
    let candidates = [
        window.rfind("\n\n").map(|i| i + 2),
        window.rfind('\n').map(|i| i + 1),
        window.rfind(['.', '!', '?']).map(|i| i + 1),
        window.rfind([',', ';', ':']).map(|i| i + 1),
        window.rfind(char::is_whitespace),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|&cut| cut > 0 && !window[..cut].trim().is_empty())
}

/// End (exclusive byte offset) of the last sentence-terminal period: a `.`
/// followed by whitespace or end of text.
fn last_sentence_end(text: &str) -> Option<usize> {
    let mut next: Option<char> = None;
    for (idx, ch) in text.char_indices().rev() {
        if ch == '.' && next.map_or(true, char::is_whitespace) {
            return Some(idx + 1);
        }
        next = Some(ch);
    }
    None
}

/// Lazy chunk iterator returned by [`Chunker::chunk`].
pub struct Chunks<'a> {
    chunker: &'a Chunker,
    lines: Enumerate<Lines<'a>>,
    current: String,
    current_lines: Vec<usize>,
    ready: VecDeque<Segment>,
    finished: bool,
}

impl Chunks<'_> {
    fn emit(&mut self, content: &str, start_line: usize, end_line: usize) {
        let content = content.trim();
        if !content.is_empty() {
            self.ready
                .push_back(Segment::new(content.to_string(), start_line, end_line));
        }
    }

    fn clear(&mut self) {
        self.current.clear();
        self.current_lines.clear();
    }

    fn push_line(&mut self, idx: usize, line: &str) {
        let mut line = line;

        loop {
            if self.current.is_empty() {
                if self.chunker.fits(line) {
                    self.current = line.to_string();
                    self.current_lines = vec![idx];
                    return;
                }

                let cut = self.chunker.forced_cut(line);
                let (head, rest) = line.split_at(cut);
                self.emit(head, idx, idx);
                line = rest.trim_start();
                if line.is_empty() {
                    return;
                }
                continue;
            }

            let prospective = format!("{}\n{}", self.current, line);
            if self.chunker.fits(&prospective) {
                self.current = prospective;
                self.current_lines.push(idx);
                return;
            }

            match last_sentence_end(&self.current) {
                Some(end) => {
                    let head = self.current[..end].to_string();
                    let head_last = self.current_lines[head.matches('\n').count()];
                    let first = self.current_lines[0];
                    self.emit(&head, first, head_last);

                    let raw_rest = &self.current[end..];
                    let rest = raw_rest.trim();
                    if rest.is_empty() {
                        self.clear();
                    } else {
                        let offset = end + (raw_rest.len() - raw_rest.trim_start().len());
                        let first_rest_line = self.current[..offset].matches('\n').count();
                        let rest_lines = self.current_lines[first_rest_line..].to_vec();
                        self.current = rest.to_string();
                        self.current_lines = rest_lines;
                    }
                }
                None => {
                    let whole = std::mem::take(&mut self.current);
                    let first = self.current_lines[0];
                    let last = *self.current_lines.last().unwrap_or(&first);
                    self.emit(&whole, first, last);
                    self.clear();
                }
            }
        }
    }

    fn flush(&mut self) {
        if self.current.trim().is_empty() {
            self.clear();
            return;
        }
        let whole = std::mem::take(&mut self.current);
        let first = self.current_lines.first().copied().unwrap_or(0);
        let last = self.current_lines.last().copied().unwrap_or(first);
        self.emit(&whole, first, last);
        self.clear();
    }
}

impl Iterator for Chunks<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        loop {
            if let Some(segment) = self.ready.pop_front() {
                return Some(segment);
            }
            if self.finished {
                return None;
            }
            match self.lines.next() {
                Some((idx, line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.push_line(idx, line);
                }
                None => {
                    self.finished = true;
                    self.flush();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::tokens::{HeuristicTokenCounter, WhitespaceTokenCounter};

    fn words(limit: usize) -> Chunker {
        Chunker::new(limit, Arc::new(WhitespaceTokenCounter))
    }

    fn contents(chunker: &Chunker, text: &str) -> Vec<String> {
        chunker.chunk(text).map(|s| s.content).collect()
    }

    fn normalized(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn chunker_empty_text_returns_empty() {
        assert!(words(10).chunk("").next().is_none());
        assert!(words(10).chunk("  \n\t\n  ").next().is_none());
    }

    #[test]
    fn small_text_is_one_chunk() {
        let chunks: Vec<Segment> = words(10).chunk("hello world\nsecond line").collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello world\nsecond line");
        assert_eq!(chunks[0].start_line, 0);
        assert_eq!(chunks[0].end_line, 1);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let chunks = contents(&words(10), "first\n\n   \nsecond");
        assert_eq!(chunks, vec!["first\nsecond"]);
    }

    #[test]
    fn splits_at_last_sentence_end_and_carries_remainder() {
        let chunker = words(5);
        let chunks: Vec<Segment> = chunker
            .chunk("Alpha beta. Gamma\ndelta epsilon zeta")
            .collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "Alpha beta.");
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (0, 0));
        assert_eq!(chunks[1].content, "Gamma\ndelta epsilon zeta");
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (0, 1));
    }

    #[test]
    fn decimal_point_is_not_a_sentence_end() {
        let chunks = contents(&words(4), "Pi is 3.14 roughly\nand more words here");
        assert_eq!(chunks, vec!["Pi is 3.14 roughly", "and more words here"]);
    }

    #[test]
    fn emits_whole_candidate_when_no_sentence_end() {
        let chunks = contents(&words(4), "one two three\nfour five six");
        assert_eq!(chunks, vec!["one two three", "four five six"]);
    }

    #[test]
    fn forces_split_of_oversized_line_at_whitespace() {
        let chunks = contents(&words(3), "one two three four five six seven");
        assert_eq!(chunks, vec!["one two three", "four five six", "seven"]);
    }

    #[test]
    fn forced_split_prefers_punctuation() {
        let chunks = contents(&words(3), "Hello, world again and more");
        assert_eq!(chunks, vec!["Hello,", "world again and", "more"]);
    }

    #[test]
    fn forced_split_without_break_cuts_at_fitting_prefix() {
        let chunker = Chunker::new(2, Arc::new(HeuristicTokenCounter::new(1)));
        let chunks = contents(&chunker, "abcdef");
        assert_eq!(chunks, vec!["ab", "cd", "ef"]);
    }

    #[test]
    fn best_break_priority_order() {
        assert_eq!(best_break("a\n\nb\nc. d, e f"), Some(3));
        assert_eq!(best_break("a b\nc. d, e f"), Some(4));
        assert_eq!(best_break("a b c. d, e f"), Some(6));
        assert_eq!(best_break("a b c d, e f"), Some(8));
        assert_eq!(best_break("a b c d e f"), Some(9));
        assert_eq!(best_break("abcdef"), None);
    }

    #[test]
    fn chunks_reconstruct_text_and_respect_limit() {
        let text = "The first sentence is here. The second one follows it.\n\
                    A new line with more words. And yet another sentence\n\
                    \n\
                    that spans lines and ends. Final words without period";
        let chunker = words(8);
        let chunks = contents(&chunker, text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(WhitespaceTokenCounter.count(chunk) <= 8, "too big: {chunk}");
        }
        assert_eq!(normalized(&chunks.join(" ")), normalized(text));
    }

    #[test]
    fn chunk_ids_are_content_hashes() {
        let a: Vec<Segment> = words(3).chunk("same text here").collect();
        let b: Vec<Segment> = words(3).chunk("same text here").collect();
        assert_eq!(a[0].chunk_id, b[0].chunk_id);
        assert_eq!(a[0].chunk_id, chunk_id("same text here"));
        assert_eq!(a[0].chunk_id.len(), 32);
        assert_ne!(chunk_id("one"), chunk_id("two"));
    }

    #[test]
    fn segment_into_chunk_keeps_position() {
        let segment = words(10).chunk("hello").next().expect("segment");
        let chunk = segment.into_chunk("doc-1", 3);
        assert_eq!(chunk.document_id, "doc-1");
        assert_eq!(chunk.chunk_index, 3);
        assert_eq!(chunk.content, "hello");
    }

    #[test]
    fn chunker_unicode_text() {
        let chunks = contents(&words(2), "Привет мир тест");
        assert_eq!(chunks, vec!["Привет мир", "тест"]);
    }

    #[test]
    fn zero_limit_uses_minimum() {
        let chunker = words(0);
        assert_eq!(chunker.token_limit(), 1);
        assert_eq!(contents(&chunker, "a b"), vec!["a", "b"]);
    }

    #[test]
    fn chunker_debug() {
        let debug_str = format!("{:?}", words(10));
        assert!(debug_str.contains("Chunker"));
        assert!(debug_str.contains("token_limit"));
    }
}
