//! Sentence segmentation of streamed content for speech

use avatar_agent_config::constants::speech::SENTENCE_PUNCTUATION;

/// Buffers content tokens and releases speakable sentence units
///
/// A token of exactly one or two newlines flushes the buffer. Otherwise the
/// token (with newlines removed) is appended, and if it is one or two
/// characters long and starts with sentence punctuation the buffer is
/// flushed. Longer tokens never flush, so a lone punctuation mark embedded in
/// a word-bearing token does not split an utterance.
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
    punctuation: Vec<String>,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(SENTENCE_PUNCTUATION.iter().map(|p| p.to_string()).collect())
    }
}

impl SentenceSegmenter {
    pub fn new(punctuation: Vec<String>) -> Self {
        Self {
            buffer: String::new(),
            punctuation,
        }
    }

    /// Append one content token; returns a completed sentence if flushed
    pub fn push(&mut self, token: &str) -> Option<String> {
        if token == "\n" || token == "\n\n" {
            self.buffer.push_str(token);
            return Some(std::mem::take(&mut self.buffer));
        }

        let token = token.replace('\n', "");
        self.buffer.push_str(&token);

        let len = token.chars().count();
        if (len == 1 || len == 2) && self.punctuation.iter().any(|p| token.starts_with(p.as_str())) {
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// Release whatever is buffered at end of stream
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
