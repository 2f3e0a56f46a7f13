//! # synthkit
//!
//! Synthesis-and-caching core of a text-to-speech engine. A backend knows
//! how to turn a chunk of text into audio; this crate does everything around
//! it: markup filtering, pronunciation fixes, chunking, per-voice sentence
//! caching, phoneme and mouth-movement derivation, and ordered hand-off to a
//! playback consumer.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use synthkit::{
//!     BackendDescriptor, EngineConfig, ExecuteOptions, PlaybackQueue, SynthOutput,
//!     SynthParams, SynthesisBackend, TtsEngine, AudioArtifact,
//! };
//!
//! struct Silence;
//!
//! impl SynthesisBackend for Silence {
//!     fn descriptor(&self) -> BackendDescriptor {
//!         BackendDescriptor::new("silence").with_params(["voice"])
//!     }
//!
//!     fn synthesize(&self, _: &str, audio: &AudioArtifact, _: &SynthParams) -> anyhow::Result<SynthOutput> {
//!         std::fs::write(&audio.path, b"")?;
//!         Ok(SynthOutput { audio: audio.clone(), phonemes: None })
//!     }
//! }
//!
//! let queue = PlaybackQueue::new();
//! let engine = TtsEngine::builder(EngineConfig::default(), Arc::new(Silence), queue.sender())
//!     .build()
//!     .unwrap();
//! engine.execute("Hello from Rust!", None, false, ExecuteOptions::default()).unwrap();
//!
//! for item in queue.drain() {
//!     println!("play {}", item.audio_path.display());
//! }
//! ```
//!
//! ## Pipeline
//! 1. **SSML filter**: unsupported markup removed, `<speak>` wrapper normalised.
//! 2. **Phonetic spelling**: per-language word replacements.
//! 3. **Chunking**: pluggable; the whole utterance is one chunk by default.
//! 4. **Context**: plugin / voice / language resolved from the session.
//! 5. **Synthesis**: cache lookup by sentence fingerprint, backend on miss.
//! 6. **Visemes**: from backend phonemes, else from the G2P provider.
//! 7. **Hand-off**: one [`PlaybackItem`] per chunk, in order.

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod g2p;
pub mod metrics;
pub mod playback;
pub mod preprocess;
pub mod registry;
pub mod spelling;
pub mod ssml;
pub mod viseme;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use backend::{BackendDescriptor, ConcatBackend, SynthOutput, SynthParams, SynthesisBackend};
pub use cache::{AudioArtifact, CacheEntry, CacheStore, FileCache, PhonemeArtifact};
pub use config::{CacheConfig, EngineConfig};
pub use context::{Message, Session, SessionManager, SessionSource, SynthesisContext};
pub use engine::{EngineBuilder, ExecuteOptions, SynthResult, TtsEngine};
pub use error::{Result, TtsError};
pub use g2p::{DictionaryG2p, G2pError, G2pProvider};
pub use metrics::{MetricEvent, MetricSink, NoopMetrics};
pub use playback::{PlaybackControl, PlaybackItem, PlaybackQueue, PlaybackSender};
pub use registry::CacheRegistry;
pub use viseme::Viseme;
