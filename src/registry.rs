//! Cache-of-caches: one shared [`CacheStore`] per namespace.
//!
//! Create one registry at process start and hand clones of its `Arc` to every
//! engine; stores are built lazily on first use and live until an explicit
//! [`clear`](CacheRegistry::clear).

use std::{path::PathBuf, sync::Arc};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    cache::{CacheStore, FileCache},
    config::{cache_base_dir, CacheConfig},
};

/// Builds the store for a namespace on first access.
pub type CacheFactory =
    Box<dyn Fn(&str, &CacheConfig, &str) -> Arc<dyn CacheStore> + Send + Sync>;

pub struct CacheRegistry {
    caches: DashMap<String, Arc<dyn CacheStore>>,
    factory: CacheFactory,
}

impl CacheRegistry {
    pub fn new(factory: CacheFactory) -> Self {
        Self { caches: DashMap::new(), factory }
    }

    /// [`FileCache`] stores rooted at `root/<namespace>`.
    pub fn file_backed(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::new(Box::new(move |namespace: &str, config: &CacheConfig, audio_ext: &str| {
            let cache = FileCache::in_root(&root, namespace, config.clone(), audio_ext);
            debug!(target: "tts", namespace, dir = %cache.dir().display(), "file cache location");
            Arc::new(cache) as Arc<dyn CacheStore>
        }))
    }

    /// The shared store for `namespace`, constructed with `config` the first
    /// time the namespace is seen. Later calls ignore `config`.
    pub fn get_cache(&self, namespace: &str, config: &CacheConfig, audio_ext: &str) -> Arc<dyn CacheStore> {
        if let Some(cache) = self.caches.get(namespace) {
            return Arc::clone(cache.value());
        }
        let entry = self.caches.entry(namespace.to_string()).or_insert_with(|| {
            debug!(target: "tts", namespace, "creating TTS cache");
            (self.factory)(namespace, config, audio_ext)
        });
        Arc::clone(entry.value())
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Clear and forget the store of one namespace.
    pub fn clear_namespace(&self, namespace: &str) {
        if let Some((_, cache)) = self.caches.remove(namespace) {
            if let Err(e) = cache.clear() {
                warn!(target: "tts", namespace, "failed to clear TTS cache: {e}");
            }
        }
    }

    /// Clear and forget every store.
    pub fn clear(&self) {
        let namespaces: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        for namespace in namespaces {
            self.clear_namespace(&namespace);
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::file_backed(cache_base_dir())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
