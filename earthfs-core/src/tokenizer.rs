//! Full-text tokenizer interface.
//!
//! The indexing engine treats tokenization as injected: anything that can
//! open a cursor over a byte range and yield normalized terms with byte
//! offsets works. The default splits on Unicode word boundaries and
//! lowercases, which matches what the index expects for lookups.

use std::collections::HashSet;

/// One normalized term with its source span and ordinal position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub start: usize,
    pub end: usize,
    pub position: usize,
}

pub trait Tokenizer: Send + Sync {
    /// Open a cursor over `text`; the iterator is the cursor, exhausted when
    /// it returns `None`.
    fn tokenize<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = Token> + 'a>;
}

/// Default tokenizer: maximal runs of alphanumeric characters, lowercased,
/// with an optional stop-word list.
#[derive(Default)]
pub struct UnicodeWords {
    stop_words: HashSet<String>,
}

impl UnicodeWords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_words<I: IntoIterator<Item = String>>(stop_words: I) -> Self {
        Self {
            stop_words: stop_words.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }
}

impl Tokenizer for UnicodeWords {
    fn tokenize<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = Token> + 'a> {
        Box::new(WordCursor {
            text,
            offset: 0,
            position: 0,
            stop_words: &self.stop_words,
        })
    }
}

struct WordCursor<'a> {
    text: &'a str,
    offset: usize,
    position: usize,
    stop_words: &'a HashSet<String>,
}

impl<'a> Iterator for WordCursor<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            let rest = &self.text[self.offset..];
            let start_rel = rest.find(|c: char| c.is_alphanumeric())?;
            let start = self.offset + start_rel;
            let word = &self.text[start..];
            let len = word
                .find(|c: char| !c.is_alphanumeric())
                .unwrap_or(word.len());
            let end = start + len;
            self.offset = end;

            let term = self.text[start..end].to_lowercase();
            if self.stop_words.contains(&term) {
                continue;
            }
            let position = self.position;
            self.position += 1;
            return Some(Token { term, start, end, position });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_lowercases() {
        let tok = UnicodeWords::new();
        let tokens: Vec<Token> = tok.tokenize("The quick brown fox").collect();
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["the", "quick", "brown", "fox"]);
        assert_eq!(tokens[1].start, 4);
        assert_eq!(tokens[1].end, 9);
        assert_eq!(tokens[3].position, 3);
    }

    #[test]
    fn punctuation_and_empty_input() {
        let tok = UnicodeWords::new();
        assert_eq!(tok.tokenize("").count(), 0);
        assert_eq!(tok.tokenize("--- !!! ---").count(), 0);
        let terms: Vec<String> = tok.tokenize("a,b;c").map(|t| t.term).collect();
        assert_eq!(terms, vec!["a", "b", "c"]);
    }

    #[test]
    fn stop_words_are_skipped() {
        let tok = UnicodeWords::with_stop_words(["the".to_string(), "a".to_string()]);
        let tokens: Vec<Token> = tok.tokenize("The fox and a hound").collect();
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["fox", "and", "hound"]);
        // Positions count emitted tokens, not source words.
        assert_eq!(tokens[0].position, 0);
        assert_eq!(tokens[2].position, 2);
    }

    #[test]
    fn handles_multibyte_text() {
        let tok = UnicodeWords::new();
        let terms: Vec<String> = tok.tokenize("Grüße, мир").map(|t| t.term).collect();
        assert_eq!(terms, vec!["grüße", "мир"]);
    }
}
