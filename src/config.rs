//! Engine configuration: the capability declaration a concrete TTS plugin
//! ships with, plus the per-namespace cache configuration.
//!
//! Both are plain JSON documents:
//!
//! ```json
//! {
//!   "lang": "en-us",
//!   "ssml_tags": ["speak", "prosody"],
//!   "enable_cache": true,
//!   "audio_ext": "wav",
//!   "cache": { "persist_cache": true, "persist_thresh": 2 }
//! }
//! ```

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{cache::namespace_dir, error::Result};

/// Environment variable overriding the root directory of all TTS caches.
pub const CACHE_DIR_ENV: &str = "SYNTHKIT_CACHE_DIR";

// ─────────────────────────────────────────────────────────────────────────────
// Cache configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration handed to a cache store when its namespace is first used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Free-disk threshold (percent) below which a store may evict entries.
    pub min_free_percent: u8,

    /// Keep frequently used entries across [`clear`](crate::cache::CacheStore::clear).
    pub persist_cache: bool,

    /// Number of hits after which an entry counts as frequently used.
    pub persist_thresh: u32,

    /// Directory holding read-only, pre-synthesised entries. `None` means
    /// `<cache base>/preloaded/<namespace>`.
    #[serde(rename = "preloaded_cache")]
    pub preloaded_cache_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_free_percent: 75,
            persist_cache: false,
            persist_thresh: 1,
            preloaded_cache_path: None,
        }
    }
}

impl CacheConfig {
    /// Preloaded directory for `namespace`, falling back to the default
    /// location under [`cache_base_dir`].
    pub fn preloaded_dir(&self, namespace: &str) -> PathBuf {
        self.preloaded_cache_path
            .clone()
            .unwrap_or_else(|| namespace_dir(&cache_base_dir().join("preloaded"), namespace))
    }
}

/// Root directory for TTS caches.
///
/// `$SYNTHKIT_CACHE_DIR`, else `$XDG_CACHE_HOME/synthkit`, else
/// `<tmp>/synthkit`.
pub fn cache_base_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
        .join("synthkit")
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Deserialised engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine language, used for the phonetic-spelling resource.
    pub lang: String,

    /// Engine-level voice preference; sessions may override it.
    pub voice: Option<String>,

    /// SSML tag names this engine understands. Empty means plain text only.
    pub ssml_tags: BTreeSet<String>,

    /// Read and fill the sentence cache.
    pub enable_cache: bool,

    /// Log the stopwatch delta next to every metric event.
    pub log_timestamps: bool,

    /// Extension of the audio files the backend writes.
    pub audio_ext: String,

    /// Apply the phonetic-spelling table before synthesis.
    pub phonetic_spelling: bool,

    /// Root of the resource tree (`text/<lang>/phonetic_spellings.txt`).
    pub resources_dir: Option<PathBuf>,

    /// CMU-style ARPAbet dictionary used as the G2P provider.
    pub g2p_dictionary: Option<PathBuf>,

    /// Cache store configuration; `None` uses [`CacheConfig::default`].
    pub cache: Option<CacheConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lang: "en-us".to_string(),
            voice: None,
            ssml_tags: BTreeSet::new(),
            enable_cache: true,
            log_timestamps: false,
            audio_ext: "wav".to_string(),
            phonetic_spelling: true,
            resources_dir: None,
            g2p_dictionary: None,
            cache: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.cache.clone().unwrap_or_default()
    }

    /// Engine voice, `"default"` when unset.
    pub fn voice(&self) -> &str {
        self.voice.as_deref().unwrap_or("default")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let cfg = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert!(cfg.enable_cache);
        assert!(cfg.phonetic_spelling);
        assert_eq!(cfg.audio_ext, "wav");
        assert_eq!(cfg.voice(), "default");
    }

    #[test]
    fn test_cache_section() {
        let cfg = EngineConfig::from_json_str(
            r#"{"ssml_tags": ["speak", "prosody"],
                "cache": {"persist_cache": true, "preloaded_cache": "/opt/tts"}}"#,
        )
        .unwrap();
        assert!(cfg.ssml_tags.contains("prosody"));
        let cache = cfg.cache_config();
        assert!(cache.persist_cache);
        assert_eq!(cache.min_free_percent, 75);
        assert_eq!(cache.persist_thresh, 1);
        assert_eq!(cache.preloaded_dir("x/y/z"), PathBuf::from("/opt/tts"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"voice": "alan", "enable_cache": false}"#).unwrap();
        let cfg = EngineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.voice(), "alan");
        assert!(!cfg.enable_cache);
        assert!(matches!(
            EngineConfig::from_file(&dir.path().join("missing.json")),
            Err(crate::error::TtsError::Io(_))
        ));
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = EngineConfig::from_json_str("{\"enable_cache\": 3}").unwrap_err();
        assert!(matches!(err, crate::error::TtsError::Config(_)));
    }
}
