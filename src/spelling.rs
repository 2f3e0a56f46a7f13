//! Phonetic spellings: per-language word substitutions applied before
//! synthesis so engines pronounce brand names and acronyms correctly.
//!
//! Resource layout: `<resources>/text/<lang>/phonetic_spellings.txt`, one
//! `word: replacement` pair per line.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, error};

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w']+").unwrap());

/// Immutable lookup table, keyed by lowercase word.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhoneticSpellings {
    table: HashMap<String, String>,
}

impl PhoneticSpellings {
    pub fn new(table: HashMap<String, String>) -> Self {
        let table = table.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect();
        Self { table }
    }

    /// Resource path for `lang` under `resources_dir`.
    pub fn resource_path(resources_dir: &Path, lang: &str) -> PathBuf {
        resources_dir
            .join("text")
            .join(lang.to_lowercase())
            .join("phonetic_spellings.txt")
    }

    /// Load the table for `lang`.
    ///
    /// A missing resource is normal and yields an empty table; a malformed
    /// file is logged and also yields an empty table.
    pub fn load(resources_dir: Option<&Path>, lang: &str) -> Self {
        let Some(dir) = resources_dir else {
            debug!(target: "tts", "no resources dir configured, phonetic spellings disabled");
            return Self::default();
        };
        let path = Self::resource_path(dir, lang);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                debug!(target: "tts", path = %path.display(), "failed to locate phonetic spellings resource: {e}");
                return Self::default();
            }
        };
        match Self::parse(&content) {
            Ok(spellings) => spellings,
            Err(line) => {
                error!(target: "tts", path = %path.display(), line, "failed to load phonetic spellings");
                Self::default()
            }
        }
    }

    /// Parse `word: replacement` lines. Blank lines are skipped; any other
    /// line without exactly one `:` rejects the whole file (the offending
    /// line is returned).
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut table = HashMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => {
                    table.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => return Err(line.to_string()),
            }
        }
        Ok(Self::new(table))
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Replace every word whose lowercase form is in the table.
    pub fn apply(&self, sentence: &str) -> String {
        if self.table.is_empty() {
            return sentence.to_string();
        }
        RE_WORD
            .replace_all(sentence, |caps: &Captures| {
                let word = &caps[0];
                match self.table.get(&word.to_lowercase()) {
                    Some(spelled) => spelled.clone(),
                    None => word.to_string(),
                }
            })
            .into_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_apply() {
        let sp = PhoneticSpellings::parse("ovos: oh voss\n\nJarvis : jar viss\n").unwrap();
        assert_eq!(sp.len(), 2);
        assert_eq!(sp.apply("Hello OVOS, I'm jarvis"), "Hello oh voss, I'm jar viss");
    }

    #[test]
    fn test_whole_words_only() {
        let sp = PhoneticSpellings::parse("ai: A I").unwrap();
        assert_eq!(sp.apply("said the ai"), "said the A I");
    }

    #[test]
    fn test_malformed_line_rejects_file() {
        assert_eq!(
            PhoneticSpellings::parse("good: fine\nbroken line\n"),
            Err("broken line".to_string())
        );
    }

    #[test]
    fn test_missing_resource_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PhoneticSpellings::load(Some(dir.path()), "en-us").is_empty());
        assert!(PhoneticSpellings::load(None, "en-us").is_empty());
    }

    #[test]
    fn test_load_from_resource_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = PhoneticSpellings::resource_path(dir.path(), "EN-US");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "gif: jiff\n").unwrap();
        let sp = PhoneticSpellings::load(Some(dir.path()), "en-US");
        assert_eq!(sp.apply("a GIF"), "a jiff");
    }
}
