//! Sentence preprocessing: splits one utterance into the chunks an engine
//! synthesises independently.
//!
//! The default is no splitting at all. Engines with input-length limits plug
//! in [`SentenceChunker`] or their own [`ChunkSplitter`].

/// One piece of an utterance scheduled for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Set only on the final chunk of an utterance, and only when the caller
    /// asked for the follow-up action (e.g. start listening).
    pub trigger_next: bool,
}

/// Strategy turning a sentence into ordered text segments.
pub trait ChunkSplitter: Send + Sync {
    fn split(&self, sentence: &str) -> Vec<String>;
}

/// Default strategy: the whole sentence is one chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeSentence;

impl ChunkSplitter for WholeSentence {
    fn split(&self, sentence: &str) -> Vec<String> {
        vec![sentence.to_string()]
    }
}

impl<F> ChunkSplitter for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn split(&self, sentence: &str) -> Vec<String> {
        self(sentence)
    }
}

/// Attach `trigger_next` to the last segment; every other chunk gets `false`.
pub fn into_chunks(segments: Vec<String>, trigger_next: bool) -> Vec<Chunk> {
    let last = segments.len().saturating_sub(1);
    segments
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk { text, trigger_next: trigger_next && i == last })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Sentence chunker
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum characters per chunk for [`SentenceChunker`].
pub const CHUNK_MAX_CHARS: usize = 400;

/// Splits on sentence terminators, then packs words of over-long sentences
/// into chunks of at most `max_chars` bytes. Terminators stay attached.
#[derive(Debug, Clone, Copy)]
pub struct SentenceChunker {
    pub max_chars: usize,
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self { max_chars: CHUNK_MAX_CHARS }
    }
}

impl ChunkSplitter for SentenceChunker {
    fn split(&self, sentence: &str) -> Vec<String> {
        let chunks = chunk_text(sentence, self.max_chars);
        if chunks.is_empty() {
            // Keep the one-chunk-per-call contract for blank input.
            return vec![sentence.to_string()];
        }
        chunks
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let next_is_term = text[end..].starts_with(['.', '!', '?']);
            if !next_is_term {
                out.push(&text[start..end]);
                start = end;
            }
        }
    }
    out.push(&text[start..]);
    out
}

fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    for sentence in split_sentences(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if sentence.len() <= max_len {
            chunks.push(sentence.to_string());
            continue;
        }
        let mut current = String::new();
        for word in sentence.split_whitespace() {
            if !current.is_empty() && current.len() + 1 + word.len() > max_len {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
    }
    chunks
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_sentence() {
        assert_eq!(WholeSentence.split("Hi. There."), vec!["Hi. There."]);
    }

    #[test]
    fn test_trigger_only_on_last() {
        let chunks = into_chunks(vec!["a".into(), "b".into(), "c".into()], true);
        let flags: Vec<bool> = chunks.iter().map(|c| c.trigger_next).collect();
        assert_eq!(flags, vec![false, false, true]);

        let chunks = into_chunks(vec!["a".into(), "b".into()], false);
        assert!(chunks.iter().all(|c| !c.trigger_next));
    }

    #[test]
    fn test_chunk_multiple_sentences() {
        let c = SentenceChunker::default().split("Hello. World! Foo?? bar");
        assert_eq!(c, vec!["Hello.", "World!", "Foo??", "bar"]);
    }

    #[test]
    fn test_chunk_long_sentence() {
        let long = "word ".repeat(200);
        let c = SentenceChunker { max_chars: 40 }.split(long.trim());
        assert!(c.len() > 1);
        for chunk in &c {
            assert!(chunk.len() <= 40, "chunk too long: {chunk}");
        }
        assert_eq!(c.join(" "), long.trim());
    }

    #[test]
    fn test_blank_input_is_one_chunk() {
        assert_eq!(SentenceChunker::default().split("  "), vec!["  "]);
    }

    #[test]
    fn test_closure_splitter() {
        let by_comma = |s: &str| s.split(',').map(|p| p.trim().to_string()).collect::<Vec<_>>();
        assert_eq!(by_comma.split("a, b"), vec!["a", "b"]);
    }
}
