//! Token counting used by the chunker and prompt-context helpers.
//!
//! The default counter runs the `cl100k_base` BPE encoding of GPT-4 class
//! models. Counting is pluggable: the pipeline only needs a monotone estimate
//! of how much of the model context a piece of text will take.

use std::fmt::{self, Debug};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

use crate::error::{Error, Result};

static CL100K: Lazy<std::result::Result<Arc<CoreBPE>, String>> =
    Lazy::new(|| cl100k_base().map(Arc::new).map_err(|e| e.to_string()));

/// Something that can estimate the token count of a piece of text.
pub trait TokenCounter: Debug + Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// One token per whitespace-separated word.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Exact token count under the `cl100k_base` encoding.
#[derive(Clone)]
pub struct BpeTokenCounter {
    bpe: Arc<CoreBPE>,
}

impl BpeTokenCounter {
    /// Shares one loaded encoding across all counters.
    pub fn cl100k() -> Result<Self> {
        match CL100K.as_ref() {
            Ok(bpe) => Ok(Self {
                bpe: Arc::clone(bpe),
            }),
            Err(e) => Err(Error::Config(format!("cl100k_base encoding unavailable: {}", e))),
        }
    }
}

impl Debug for BpeTokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BpeTokenCounter")
            .field("encoding", &"cl100k_base")
            .finish()
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Approximation of BPE tokenizers: about four characters per token, and never
/// fewer tokens than words.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenCounter {
    chars_per_token: usize,
}

impl HeuristicTokenCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        let by_chars = chars.div_ceil(self.chars_per_token);
        by_chars.max(text.split_whitespace().count())
    }
}

/// The `cl100k_base` counter, or the character estimate if the encoding
/// cannot be loaded.
pub fn default_counter() -> Arc<dyn TokenCounter> {
    match BpeTokenCounter::cl100k() {
        Ok(counter) => Arc::new(counter),
        Err(e) => {
            warn!("{}, estimating tokens from characters", e);
            Arc::new(HeuristicTokenCounter::default())
        }
    }
}

/// Counter selected by name in configuration. Unknown names get the default.
pub fn counter_from_name(name: &str) -> Arc<dyn TokenCounter> {
    match name.to_lowercase().as_str() {
        "whitespace" | "words" => Arc::new(WhitespaceTokenCounter),
        "heuristic" | "chars" => Arc::new(HeuristicTokenCounter::default()),
        _ => default_counter(),
    }
}

/// Trailing whole lines of `text` whose token count stays within `limit`.
pub fn last_n_tokens(text: &str, limit: usize, counter: &dyn TokenCounter) -> String {
    let mut tail = String::new();

    for line in text.lines().rev() {
        if line.is_empty() {
            continue;
        }
        let candidate = if tail.is_empty() {
            line.to_string()
        } else {
            format!("{}\n{}", line, tail)
        };
        if counter.count(&candidate) > limit {
            break;
        }
        tail = candidate;
    }

    tail.trim().to_string()
}

/// Leading whole lines of `text` whose token count stays within `limit`.
pub fn first_n_tokens(text: &str, limit: usize, counter: &dyn TokenCounter) -> String {
    let mut head = String::new();

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let candidate = if head.is_empty() {
            line.trim().to_string()
        } else {
            format!("{}\n{}", head, line.trim())
        };
        if counter.count(&candidate) > limit {
            break;
        }
        head = candidate;
    }

    head.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_counter_counts_words() {
        let counter = WhitespaceTokenCounter;
        assert_eq!(counter.count("one two  three\nfour"), 4);
        assert_eq!(counter.count("   "), 0);
    }

    #[test]
    fn heuristic_counter_uses_chars_or_words() {
        let counter = HeuristicTokenCounter::default();
        // 16 chars -> 4 tokens, 1 word
        assert_eq!(counter.count("abcdefghijklmnop"), 4);
        // 7 chars, 4 words -> word count wins
        assert_eq!(counter.count("a b c d"), 4);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn bpe_counter_counts_cl100k_tokens() {
        let counter = BpeTokenCounter::cl100k().unwrap();
        assert_eq!(counter.count("hello world"), 2);
        assert_eq!(counter.count(""), 0);
        // Splits long words the heuristic would undercount.
        assert!(counter.count("antidisestablishmentarianism") > 1);
    }

    #[test]
    fn counter_from_name_selects_by_name() {
        assert_eq!(counter_from_name("whitespace").count("aaaaaaaa"), 1);
        assert_eq!(counter_from_name("heuristic").count("aaaaaaaa"), 2);
        assert_eq!(counter_from_name("cl100k").count("hello world"), 2);
        assert!(format!("{:?}", counter_from_name("anything")).contains("cl100k_base"));
    }

    #[test]
    fn last_n_tokens_keeps_trailing_lines() {
        let counter = WhitespaceTokenCounter;
        let text = "one two\n\nthree four\nfive six";
        assert_eq!(last_n_tokens(text, 4, &counter), "three four\nfive six");
        assert_eq!(last_n_tokens(text, 3, &counter), "five six");
        assert_eq!(last_n_tokens(text, 1, &counter), "");
    }

    #[test]
    fn first_n_tokens_keeps_leading_lines() {
        let counter = WhitespaceTokenCounter;
        let text = "one two\nthree four\nfive six";
        assert_eq!(first_n_tokens(text, 5, &counter), "one two\nthree four");
        assert_eq!(first_n_tokens(text, 100, &counter), text);
    }
}
