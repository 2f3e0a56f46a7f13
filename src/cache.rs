//! Content-addressed sentence cache.
//!
//! [`CacheStore`] is the contract the orchestrator relies on; storage details
//! (eviction, persistence, codecs) belong to the implementation. [`FileCache`]
//! is the reference store: one directory per namespace holding
//! `<fingerprint>.<ext>` audio files and `<fingerprint>.pho` phoneme files.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

/// Extension of phoneme artifacts written by [`FileCache`].
pub const PHONEME_EXT: &str = "pho";

// ─────────────────────────────────────────────────────────────────────────────
// Artifacts
// ─────────────────────────────────────────────────────────────────────────────

/// Location of a synthesised audio file. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioArtifact {
    pub path: PathBuf,
}

impl AudioArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Location of a cached phoneme string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhonemeArtifact {
    pub path: PathBuf,
}

impl PhonemeArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> io::Result<String> {
        std::fs::read_to_string(&self.path)
    }

    pub fn save(&self, phonemes: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, phonemes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub audio: AudioArtifact,
    pub phonemes: Option<PhonemeArtifact>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store contract
// ─────────────────────────────────────────────────────────────────────────────

/// Storage for one namespace, shared by every engine using that namespace.
///
/// Implementations own their consistency: the orchestrator only checks
/// hit/miss and writes once on a miss.
pub trait CacheStore: Send + Sync {
    fn contains(&self, fingerprint: &str) -> bool;

    fn get(&self, fingerprint: &str) -> Option<CacheEntry>;

    /// Record an entry. The audio artifact of an existing entry is kept; a
    /// provided phoneme artifact is attached to it.
    fn put(&self, fingerprint: &str, audio: AudioArtifact, phonemes: Option<PhonemeArtifact>);

    /// Where the backend should write audio for `fingerprint`.
    fn new_audio_handle(&self, fingerprint: &str) -> AudioArtifact;

    fn new_phoneme_handle(&self, fingerprint: &str) -> PhonemeArtifact;

    fn clear(&self) -> io::Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// FileCache
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CachedSentence {
    entry: CacheEntry,
    hits: u32,
    preloaded: bool,
}

/// Directory-backed [`CacheStore`].
///
/// Entries already on disk (in the cache directory or the preloaded
/// directory) are indexed at construction, so fingerprints stay addressable
/// across restarts. Preloaded entries are never deleted; with
/// `persist_cache`, entries hit at least `persist_thresh` times also survive
/// [`clear`](CacheStore::clear).
pub struct FileCache {
    namespace: String,
    dir: PathBuf,
    audio_ext: String,
    config: CacheConfig,
    entries: RwLock<HashMap<String, CachedSentence>>,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>, namespace: &str, config: CacheConfig, audio_ext: &str) -> Self {
        let dir = dir.into();
        let mut entries = scan_dir(&config.preloaded_dir(namespace), audio_ext, true);
        entries.extend(scan_dir(&dir, audio_ext, false));
        if !entries.is_empty() {
            info!(target: "tts", namespace, count = entries.len(), "indexed cached sentences");
        }
        Self {
            namespace: namespace.to_string(),
            dir,
            audio_ext: audio_ext.to_string(),
            config,
            entries: RwLock::new(entries),
        }
    }

    /// Store for `namespace` in its own directory below `root`.
    pub fn in_root(root: &Path, namespace: &str, config: CacheConfig, audio_ext: &str) -> Self {
        Self::new(namespace_dir(root, namespace), namespace, config, audio_ext)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn is_persistent(&self, cached: &CachedSentence) -> bool {
        cached.preloaded || (self.config.persist_cache && cached.hits >= self.config.persist_thresh)
    }

    fn ensure_dir(&self) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(target: "tts", dir = %self.dir.display(), "cannot create cache dir: {e}");
        }
    }
}

/// Directory for `namespace` below `root`.
///
/// Each `/`-separated part becomes one path component. Empty parts, `.`/`..`
/// and characters outside `[A-Za-z0-9._-]` are replaced with `_`, so the
/// result never leaves `root`.
pub fn namespace_dir(root: &Path, namespace: &str) -> PathBuf {
    let mut dir = root.to_path_buf();
    for part in namespace.split('/') {
        dir.push(safe_component(part));
    }
    dir
}

fn safe_component(part: &str) -> String {
    if part.is_empty() || part.chars().all(|c| c == '.') {
        return "_".repeat(part.len().max(1));
    }
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

fn scan_dir(dir: &Path, audio_ext: &str, preloaded: bool) -> HashMap<String, CachedSentence> {
    let mut found = HashMap::new();
    let read = match std::fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) => {
            debug!(target: "tts", dir = %dir.display(), "no cached sentences: {e}");
            return found;
        }
    };
    for path in read.flatten().map(|e| e.path()) {
        if path.extension().and_then(|e| e.to_str()) != Some(audio_ext) {
            continue;
        }
        let Some(fp) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let pho = dir.join(format!("{fp}.{PHONEME_EXT}"));
        let phonemes = pho.is_file().then(|| PhonemeArtifact::new(pho));
        let entry = CacheEntry { audio: AudioArtifact::new(path), phonemes };
        found.insert(fp, CachedSentence { entry, hits: 0, preloaded });
    }
    found
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl CacheStore for FileCache {
    fn contains(&self, fingerprint: &str) -> bool {
        self.entries.read().contains_key(fingerprint)
    }

    fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.write();
        let cached = entries.get_mut(fingerprint)?;
        cached.hits = cached.hits.saturating_add(1);
        Some(cached.entry.clone())
    }

    fn put(&self, fingerprint: &str, audio: AudioArtifact, phonemes: Option<PhonemeArtifact>) {
        let mut entries = self.entries.write();
        match entries.get_mut(fingerprint) {
            Some(cached) => {
                if phonemes.is_some() {
                    cached.entry.phonemes = phonemes;
                }
            }
            None => {
                let entry = CacheEntry { audio, phonemes };
                entries.insert(
                    fingerprint.to_string(),
                    CachedSentence { entry, hits: 0, preloaded: false },
                );
            }
        }
    }

    fn new_audio_handle(&self, fingerprint: &str) -> AudioArtifact {
        self.ensure_dir();
        AudioArtifact::new(self.dir.join(format!("{fingerprint}.{}", self.audio_ext)))
    }

    fn new_phoneme_handle(&self, fingerprint: &str) -> PhonemeArtifact {
        PhonemeArtifact::new(self.dir.join(format!("{fingerprint}.{PHONEME_EXT}")))
    }

    fn clear(&self) -> io::Result<()> {
        let mut entries = self.entries.write();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, cached)| !self.is_persistent(cached))
            .map(|(fp, _)| fp.clone())
            .collect();
        let mut first_err = None;
        let mut removed = 0usize;
        for fp in doomed {
            let Some(cached) = entries.remove(&fp) else {
                continue;
            };
            let mut files = Vec::new();
            if cached.entry.audio.path.starts_with(&self.dir) {
                files.push(&cached.entry.audio.path);
            }
            if let Some(pho) = &cached.entry.phonemes {
                files.push(&pho.path);
            }

            let mut failed = false;
            for path in files {
                if let Err(e) = remove_file_if_exists(path) {
                    warn!(target: "tts", path = %path.display(), "cannot delete cached file: {e}");
                    failed = true;
                    first_err.get_or_insert(e);
                }
            }
            if failed {
                // Still on disk, so still addressable.
                entries.insert(fp, cached);
            } else {
                removed += 1;
            }
        }
        info!(target: "tts", namespace = %self.namespace, removed, "cleared TTS cache");
        first_err.map_or(Ok(()), Err)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> CacheConfig {
        CacheConfig { preloaded_cache_path: Some(root.join("preloaded")), ..Default::default() }
    }

    fn write_entry(cache: &FileCache, fp: &str, phonemes: Option<&str>) {
        let audio = cache.new_audio_handle(fp);
        std::fs::write(&audio.path, b"RIFF").unwrap();
        let pho = phonemes.map(|p| {
            let handle = cache.new_phoneme_handle(fp);
            handle.save(p).unwrap();
            handle
        });
        cache.put(fp, audio, pho);
    }

    #[test]
    fn test_namespace_dir_components() {
        let root = Path::new("/var/cache/tts");
        assert_eq!(namespace_dir(root, "mimic/alan/en-us"), root.join("mimic/alan/en-us"));
        assert_eq!(namespace_dir(root, "/default/pt-pt"), root.join("_/default/pt-pt"));
        assert_eq!(namespace_dir(root, "p/../../x"), root.join("p/__/__/x"));
        assert_eq!(namespace_dir(root, "p/v o/l"), root.join("p/v_o/l"));
    }

    #[test]
    fn test_in_root_dir_never_escapes() {
        let root = tempfile::tempdir().unwrap();
        let cache = FileCache::in_root(root.path(), "../../etc/default/.", config(root.path()), "wav");
        assert!(cache.dir().starts_with(root.path()), "got: {}", cache.dir().display());
        assert_eq!(cache.dir(), root.path().join("__/__/etc/default/_"));
    }

    #[test]
    fn test_put_get_contains() {
        let root = tempfile::tempdir().unwrap();
        let cache = FileCache::new(root.path().join("ns"), "p/v/l", config(root.path()), "wav");
        assert!(!cache.contains("abc"));
        write_entry(&cache, "abc", Some("HH AH"));
        assert!(cache.contains("abc"));
        let entry = cache.get("abc").unwrap();
        assert_eq!(entry.audio.path, root.path().join("ns").join("abc.wav"));
        assert_eq!(entry.phonemes.unwrap().load().unwrap(), "HH AH");
    }

    #[test]
    fn test_put_keeps_audio_and_backfills_phonemes() {
        let root = tempfile::tempdir().unwrap();
        let cache = FileCache::new(root.path().join("ns"), "p/v/l", config(root.path()), "wav");
        write_entry(&cache, "abc", None);
        let original = cache.get("abc").unwrap().audio;

        let pho = cache.new_phoneme_handle("abc");
        pho.save("W ER L D").unwrap();
        cache.put("abc", AudioArtifact::new("/elsewhere.wav"), Some(pho.clone()));

        let entry = cache.get("abc").unwrap();
        assert_eq!(entry.audio, original);
        assert_eq!(entry.phonemes, Some(pho));
    }

    #[test]
    fn test_entries_survive_reopen() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ns");
        {
            let cache = FileCache::new(&dir, "p/v/l", config(root.path()), "wav");
            write_entry(&cache, "abc", Some("AH"));
            write_entry(&cache, "def", None);
        }
        let cache = FileCache::new(&dir, "p/v/l", config(root.path()), "wav");
        assert_eq!(cache.len(), 2);
        assert!(cache.get("abc").unwrap().phonemes.is_some());
        assert!(cache.get("def").unwrap().phonemes.is_none());
    }

    #[test]
    fn test_clear_respects_persistence() {
        let root = tempfile::tempdir().unwrap();
        let preloaded = root.path().join("preloaded");
        std::fs::create_dir_all(&preloaded).unwrap();
        std::fs::write(preloaded.join("pre.wav"), b"RIFF").unwrap();

        let cfg = CacheConfig { persist_cache: true, persist_thresh: 2, ..config(root.path()) };
        let cache = FileCache::new(root.path().join("ns"), "p/v/l", cfg, "wav");
        write_entry(&cache, "hot", None);
        write_entry(&cache, "cold", Some("K OW L D"));
        cache.get("hot");
        cache.get("hot");
        cache.get("cold");

        cache.clear().unwrap();
        assert!(cache.contains("pre"));
        assert!(cache.contains("hot"));
        assert!(!cache.contains("cold"));
        assert!(!root.path().join("ns").join("cold.wav").exists());
        assert!(!root.path().join("ns").join("cold.pho").exists());
        assert!(preloaded.join("pre.wav").exists());
    }

    #[test]
    fn test_clear_continues_past_failed_removal() {
        let root = tempfile::tempdir().unwrap();
        let cache = FileCache::new(root.path().join("ns"), "p/v/l", config(root.path()), "wav");
        for fp in ["a", "b", "c"] {
            write_entry(&cache, fp, Some("AH"));
        }
        // A directory where the audio file should be cannot be unlinked.
        let stuck = cache.new_audio_handle("stuck");
        std::fs::create_dir_all(stuck.path.join("inner")).unwrap();
        cache.put("stuck", stuck.clone(), None);

        assert!(cache.clear().is_err());
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("stuck"));
        for fp in ["a", "b", "c"] {
            assert!(!cache.contains(fp));
            assert!(!root.path().join("ns").join(format!("{fp}.wav")).exists());
            assert!(!root.path().join("ns").join(format!("{fp}.pho")).exists());
        }
    }

    #[test]
    fn test_clear_without_persistence_removes_all_written() {
        let root = tempfile::tempdir().unwrap();
        let cache = FileCache::new(root.path().join("ns"), "p/v/l", config(root.path()), "wav");
        write_entry(&cache, "a", None);
        cache.get("a");
        cache.clear().unwrap();
        assert!(cache.is_empty());
    }
}
