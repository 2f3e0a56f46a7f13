//! Grapheme-to-phoneme providers.
//!
//! A G2P provider is optional. When a backend returns no phonemes, the engine
//! asks the provider for ARPAbet phonemes (to cache next to the audio) and
//! for visemes (mouth movements). Failing to phonemise an utterance never
//! aborts synthesis.

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::viseme::{parse_phonemes, Viseme};

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w']+").unwrap());

#[derive(Debug, Error)]
pub enum G2pError {
    /// The provider has no pronunciation for part of the text. Expected for
    /// names and foreign words; callers treat it silently.
    #[error("out of vocabulary: {0}")]
    OutOfVocabulary(String),

    #[error("unsupported language: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait G2pProvider: Send + Sync {
    /// Space-separated phoneme string for `text`.
    fn utterance_to_phonemes(&self, text: &str, lang: &str) -> Result<String, G2pError>;

    /// Mouth-movement track for `text`; derived from the phonemes by default.
    fn utterance_to_visemes(&self, text: &str, lang: &str) -> Result<Vec<Viseme>, G2pError> {
        let phonemes = self.utterance_to_phonemes(text, lang)?;
        Ok(parse_phonemes(&phonemes))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ARPAbet dictionary provider
// ─────────────────────────────────────────────────────────────────────────────

/// Pronouncing-dictionary G2P over a CMU-style ARPAbet dictionary.
///
/// Dictionary lines look like `HELLO  HH AH0 L OW1`; `;;;` starts a comment
/// and alternate pronunciations (`WORD(2)`) are ignored. Stress digits are
/// dropped from the output.
pub struct DictionaryG2p {
    lang: String,
    words: HashMap<String, String>,
}

impl DictionaryG2p {
    pub fn new(lang: impl Into<String>, words: HashMap<String, String>) -> Self {
        let words = words.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();
        Self { lang: lang.into().to_lowercase(), words }
    }

    pub fn parse(lang: &str, content: &str) -> Self {
        let mut words = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(";;;") {
                continue;
            }
            let Some((word, pron)) = line.split_once(char::is_whitespace) else {
                continue;
            };
            if word.ends_with(')') {
                continue;
            }
            let phones: Vec<&str> = pron
                .split_whitespace()
                .map(|p| p.trim_end_matches(|c: char| c.is_ascii_digit()))
                .collect();
            words.entry(word.to_lowercase()).or_insert_with(|| phones.join(" "));
        }
        Self::new(lang, words)
    }

    pub fn load(lang: &str, path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read G2P dictionary: {}", path.display()))?;
        Ok(Self::parse(lang, &content))
    }

    fn supports(&self, lang: &str) -> bool {
        let primary = |l: &str| l.split(['-', '_']).next().unwrap_or("").to_lowercase();
        primary(lang) == primary(&self.lang)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl G2pProvider for DictionaryG2p {
    fn utterance_to_phonemes(&self, text: &str, lang: &str) -> Result<String, G2pError> {
        if !self.supports(lang) {
            return Err(G2pError::Unsupported(lang.to_string()));
        }
        let mut out = Vec::new();
        for word in RE_WORD.find_iter(text).map(|m| m.as_str()) {
            let phones = self
                .words
                .get(&word.to_lowercase())
                .ok_or_else(|| G2pError::OutOfVocabulary(word.to_string()))?;
            out.push(phones.as_str());
        }
        if out.is_empty() {
            return Err(G2pError::OutOfVocabulary(text.to_string()));
        }
        Ok(out.join(" "))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
