//! Synthesis orchestrator.
//!
//! [`TtsEngine`] owns one backend and drives every utterance through the same
//! pipeline:
//!
//! ```text
//! sentence ─► SSML filter ─► phonetic spelling ─► chunk splitter
//!          ─► context (session) ─► per chunk: cache / backend ─► visemes
//!          ─► playback queue
//! ```
//!
//! Chunks are synthesised and queued strictly in order on the caller's
//! thread. Only backend failures and a closed playback queue surface as
//! errors; metrics, G2P and viseme problems are logged and degrade.

use std::{collections::BTreeSet, path::Path, sync::Arc};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendDescriptor, SynthParams, SynthesisBackend},
    cache::{AudioArtifact, CacheStore, PhonemeArtifact},
    config::{CacheConfig, EngineConfig},
    context::{current_message, Message, Session, SessionManager, SessionSource, SynthesisContext, DEFAULT_SESSION_ID},
    error::{Result, TtsError},
    fingerprint::fingerprint,
    g2p::{DictionaryG2p, G2pError, G2pProvider},
    metrics::{MetricEvent, MetricSink, Metrics, NoopMetrics},
    playback::{PlaybackControl, PlaybackItem, PlaybackSender},
    preprocess::{into_chunks, ChunkSplitter, WholeSentence},
    registry::CacheRegistry,
    spelling::PhoneticSpellings,
    ssml::{self, IdentityTags, TagTransformer},
    viseme::derive_visemes,
};

/// Per-request options for [`TtsEngine::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Message that triggered the request; wins over the thread's ambient
    /// message and over the synthetic one built from the identifier.
    pub message: Option<Message>,
    /// Extra backend parameters. Keys the backend does not declare are dropped.
    pub params: SynthParams,
}

impl ExecuteOptions {
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Audio and phonemes for one synthesised chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthResult {
    pub audio: AudioArtifact,
    pub phonemes: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct EngineBuilder {
    config: EngineConfig,
    backend: Arc<dyn SynthesisBackend>,
    playback: PlaybackSender,
    sessions: Option<Arc<dyn SessionSource>>,
    registry: Option<Arc<CacheRegistry>>,
    metric_sink: Arc<dyn MetricSink>,
    g2p: Option<Arc<dyn G2pProvider>>,
    splitter: Box<dyn ChunkSplitter>,
    tags: Box<dyn TagTransformer>,
    control: Option<Arc<dyn PlaybackControl>>,
}

impl EngineBuilder {
    /// Session storage. Defaults to a [`SessionManager`] whose default
    /// session uses this engine's language, voice and backend name.
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionSource>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Shared cache-of-caches. Defaults to a private file-backed registry.
    pub fn with_registry(mut self, registry: Arc<CacheRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = sink;
        self
    }

    /// Overrides the dictionary named by `g2p_dictionary` in the config.
    pub fn with_g2p(mut self, g2p: Arc<dyn G2pProvider>) -> Self {
        self.g2p = Some(g2p);
        self
    }

    pub fn with_splitter(mut self, splitter: impl ChunkSplitter + 'static) -> Self {
        self.splitter = Box::new(splitter);
        self
    }

    pub fn with_tag_transformer(mut self, tags: impl TagTransformer + 'static) -> Self {
        self.tags = Box::new(tags);
        self
    }

    pub fn with_playback_control(mut self, control: Arc<dyn PlaybackControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn build(self) -> Result<TtsEngine> {
        let descriptor = self.backend.descriptor();
        descriptor.validate()?;

        let config = self.config;
        let sessions = self.sessions.unwrap_or_else(|| {
            let session = Session::new(DEFAULT_SESSION_ID, &config.lang, &descriptor.name)
                .with_voice(config.voice());
            Arc::new(SessionManager::new(session))
        });
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(CacheRegistry::default()));

        let spellings = if config.phonetic_spelling {
            PhoneticSpellings::load(config.resources_dir.as_deref(), &config.lang)
        } else {
            PhoneticSpellings::default()
        };
        let g2p = self.g2p.or_else(|| {
            config
                .g2p_dictionary
                .as_deref()
                .and_then(|path| load_dictionary(&config.lang, path))
        });

        let engine = TtsEngine {
            cache_config: config.cache_config(),
            metrics: Metrics::new(self.metric_sink, config.log_timestamps),
            config,
            backend: self.backend,
            descriptor,
            playback: self.playback,
            sessions,
            registry,
            spellings,
            g2p,
            splitter: self.splitter,
            tags: self.tags,
            control: RwLock::new(None),
        };
        info!(
            target: "tts",
            backend = %engine.descriptor.name,
            lang = %engine.config.lang,
            cache = engine.config.enable_cache,
            "TTS engine ready"
        );
        engine.metrics.emit("tts.init");
        if let Some(control) = self.control {
            engine.attach_playback(control);
        }
        Ok(engine)
    }
}

fn load_dictionary(lang: &str, path: &Path) -> Option<Arc<dyn G2pProvider>> {
    match DictionaryG2p::load(lang, path) {
        Ok(dict) => {
            debug!(target: "tts", path = %path.display(), words = dict.len(), "loaded G2P dictionary");
            Some(Arc::new(dict))
        }
        Err(e) => {
            debug!(target: "tts", "G2P disabled: {e:#}");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

pub struct TtsEngine {
    config: EngineConfig,
    cache_config: CacheConfig,
    backend: Arc<dyn SynthesisBackend>,
    descriptor: BackendDescriptor,
    playback: PlaybackSender,
    sessions: Arc<dyn SessionSource>,
    registry: Arc<CacheRegistry>,
    spellings: PhoneticSpellings,
    g2p: Option<Arc<dyn G2pProvider>>,
    splitter: Box<dyn ChunkSplitter>,
    tags: Box<dyn TagTransformer>,
    metrics: Metrics,
    control: RwLock<Option<Arc<dyn PlaybackControl>>>,
}

impl TtsEngine {
    pub fn builder(
        config: EngineConfig,
        backend: Arc<dyn SynthesisBackend>,
        playback: PlaybackSender,
    ) -> EngineBuilder {
        EngineBuilder {
            config,
            backend,
            playback,
            sessions: None,
            registry: None,
            metric_sink: Arc::new(NoopMetrics),
            g2p: None,
            splitter: Box::new(WholeSentence),
            tags: Box::new(IdentityTags),
            control: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn available_languages(&self) -> BTreeSet<String> {
        self.descriptor.languages.clone()
    }

    // ── Text normalisation ────────────────────────────────────────────────────

    /// Filter markup down to the tags this engine declared.
    pub fn validate_ssml(&self, utterance: &str) -> String {
        ssml::validate(utterance, &self.config.ssml_tags, self.tags.as_ref())
    }

    pub fn replace_phonetic_spellings(&self, sentence: &str) -> String {
        if !self.config.phonetic_spelling {
            return sentence.to_string();
        }
        self.spellings.apply(sentence)
    }

    // ── Context ───────────────────────────────────────────────────────────────

    /// Context for `message`, or for the default session.
    pub fn context_for(&self, message: Option<&Message>) -> SynthesisContext {
        SynthesisContext::from_source(self.sessions.as_ref(), message)
    }

    pub fn clear_cache(&self, ctx: &SynthesisContext) {
        self.registry.clear_namespace(&ctx.namespace);
    }

    // ── Pipeline ──────────────────────────────────────────────────────────────

    /// Synthesise `sentence` and queue it for playback, one item per chunk.
    ///
    /// The originating message is `options.message`, else the thread's ambient
    /// message, else a synthetic `speak` message for `identifier`.
    pub fn execute(
        &self,
        sentence: &str,
        identifier: Option<&str>,
        trigger_next: bool,
        options: ExecuteOptions,
    ) -> Result<()> {
        let sentence = self.validate_ssml(sentence);
        self.metrics.emit("tts.ssml.validated");

        let sentence = self.replace_phonetic_spellings(&sentence);
        if sentence.trim().is_empty() {
            debug!(target: "tts", "nothing to speak after preprocessing");
            return Ok(());
        }

        let chunks = into_chunks(self.splitter.split(&sentence), trigger_next);
        self.metrics
            .record(MetricEvent::new("tts.preprocessed").with_field("n_chunks", chunks.len()));

        let ExecuteOptions { message, params } = options;
        let message = message
            .or_else(current_message)
            .unwrap_or_else(|| Message::speak(identifier));
        let ctx = self.context_for(Some(&message));

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let result = self.synth(&chunk.text, &ctx, &params)?;
            let visemes = derive_visemes(
                result.phonemes.as_deref(),
                &chunk.text,
                &ctx.lang,
                self.g2p.as_deref(),
            );
            self.playback.push(PlaybackItem {
                audio_path: result.audio.path,
                visemes,
                trigger_next: chunk.trigger_next,
                namespace: ctx.namespace.clone(),
                message: message.clone(),
            })?;
            self.metrics
                .record(MetricEvent::new("tts.queued").with_field("chunk", idx));
        }
        Ok(())
    }

    /// Audio and phonemes for `text` in `ctx`, from cache when possible.
    ///
    /// The context's `lang` and `voice` override the same keys in `params`.
    pub fn synth(&self, text: &str, ctx: &SynthesisContext, params: &SynthParams) -> Result<SynthResult> {
        self.metrics.emit("tts.synth.start");
        let fp = fingerprint(text);
        let cache = ctx.get_cache(&self.registry, &self.cache_config, &self.config.audio_ext);

        if self.config.enable_cache {
            if let Some(entry) = cache.get(&fp) {
                debug!(target: "tts", namespace = %ctx.namespace, fingerprint = %fp, "cache hit");
                let phonemes = match &entry.phonemes {
                    Some(pho) => pho
                        .load()
                        .map_err(|e| warn!(target: "tts", path = %pho.path.display(), "cannot read cached phonemes: {e}"))
                        .ok(),
                    None => {
                        let phonemes = self.g2p_phonemes(text, &ctx.lang);
                        if let Some(pho) = phonemes.as_deref().and_then(|p| self.save_phonemes(cache.as_ref(), &fp, p)) {
                            cache.put(&fp, entry.audio.clone(), Some(pho));
                        }
                        phonemes
                    }
                };
                self.metrics
                    .record(MetricEvent::new("tts.synth.finished").with_field("cache", true));
                return Ok(SynthResult { audio: entry.audio, phonemes });
            }
        }

        let audio = cache.new_audio_handle(&fp);
        let mut request = params.clone();
        request.insert("lang".to_string(), Value::String(ctx.lang.clone()));
        request.insert("voice".to_string(), Value::String(ctx.voice.clone()));
        let request = self.descriptor.filter_params(&request);

        let output = self
            .backend
            .synthesize(text, &audio, &request)
            .map_err(TtsError::Synthesis)?;
        self.metrics.emit("tts.synth.finished");

        let mut phonemes = output.phonemes.filter(|p| !p.trim().is_empty());
        if self.config.enable_cache {
            if phonemes.is_none() {
                phonemes = self.g2p_phonemes(text, &ctx.lang);
            }
            let pho = phonemes
                .as_deref()
                .and_then(|p| self.save_phonemes(cache.as_ref(), &fp, p));
            cache.put(&fp, output.audio.clone(), pho);
            self.metrics.emit("tts.synth.cached");
        }
        Ok(SynthResult { audio: output.audio, phonemes })
    }

    fn g2p_phonemes(&self, text: &str, lang: &str) -> Option<String> {
        let g2p = self.g2p.as_ref()?;
        match g2p.utterance_to_phonemes(text, lang) {
            Ok(phonemes) if !phonemes.trim().is_empty() => {
                self.metrics.emit("tts.phonemes.g2p");
                Some(phonemes)
            }
            Ok(_) => None,
            Err(e) => {
                if !matches!(e, G2pError::OutOfVocabulary(_)) {
                    debug!(target: "tts", lang, "G2P failed: {e:#}");
                }
                self.metrics.record(
                    MetricEvent::new("tts.phonemes.g2p.error").with_field("error", e.to_string()),
                );
                None
            }
        }
    }

    fn save_phonemes(&self, cache: &dyn CacheStore, fp: &str, phonemes: &str) -> Option<PhonemeArtifact> {
        let handle = cache.new_phoneme_handle(fp);
        match handle.save(phonemes) {
            Ok(()) => Some(handle),
            Err(e) => {
                warn!(target: "tts", path = %handle.path.display(), "cannot cache phonemes: {e}");
                None
            }
        }
    }

    // ── Playback lifecycle ────────────────────────────────────────────────────

    /// Called by the playback consumer when it starts playing an item.
    pub fn begin_audio(&self) {
        self.metrics.stopwatch().start();
        self.metrics.emit("tts.start");
    }

    /// Called by the playback consumer when an item finished playing.
    pub fn end_audio(&self) {
        let mut event = MetricEvent::new("tts.end");
        if let Some(span) = self.metrics.stopwatch().stop() {
            event = event.with_field("duration", span.as_secs_f64());
        }
        self.metrics.record(event);
    }

    pub fn attach_playback(&self, control: Arc<dyn PlaybackControl>) {
        *self.control.write() = Some(control);
        self.metrics.emit("tts.setup");
    }

    /// Stop playback. In-flight synthesis is not interrupted.
    pub fn stop(&self) {
        let control = self.control.read().clone();
        if let Some(control) = control {
            if let Err(e) = control.stop() {
                debug!(target: "tts", "playback stop failed: {e:#}");
            }
        }
        self.metrics.emit("tts.stop");
    }

    /// Stop playback and detach from it.
    pub fn shutdown(&self) {
        self.stop();
        self.control.write().take();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
