//! Basic synthkit example: a tone backend behind the full pipeline.
//!
//! Usage:
//!   cargo run --example basic
//!   cargo run --example basic -- --text "Hello. Hello again." --cache /tmp/synthkit-demo
//!   cargo run --example basic -- --config engine.json
//!
//! Every chunk is synthesised as a short sine tone whose length follows the
//! text. Running twice with the same `--cache` serves the second run from
//! the sentence cache. Set `RUST_LOG=tts=debug` to watch the pipeline.

use std::{f32::consts::PI, path::PathBuf, sync::Arc};

use anyhow::Context;
use synthkit::{
    metrics::MetricLog, preprocess::SentenceChunker, AudioArtifact, BackendDescriptor,
    CacheRegistry, EngineConfig, ExecuteOptions, PlaybackQueue, SynthOutput, SynthParams,
    SynthesisBackend, TtsEngine,
};
use tracing_subscriber::EnvFilter;

const SAMPLE_RATE: u32 = 16_000;

/// Writes a tone per chunk; `pitch` (Hz) is the only tunable parameter.
struct ToneBackend;

impl SynthesisBackend for ToneBackend {
    fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor::new("tone")
            .with_params(["pitch", "lang"])
            .with_languages(["en-us"])
    }

    fn synthesize(&self, text: &str, audio: &AudioArtifact, params: &SynthParams) -> anyhow::Result<SynthOutput> {
        let pitch = params.get("pitch").and_then(|v| v.as_f64()).unwrap_or(440.0) as f32;
        let n = (text.chars().count() as u32 * SAMPLE_RATE / 20) as usize;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&audio.path, spec)
            .with_context(|| format!("Cannot create WAV: {}", audio.path.display()))?;
        for i in 0..n {
            let s = (2.0 * PI * pitch * i as f32 / SAMPLE_RATE as f32).sin() * 0.3;
            writer.write_sample((s * i16::MAX as f32) as i16).context("WAV write error")?;
        }
        writer.finalize().context("WAV finalise error")?;

        // One neutral-mouth phoneme per word.
        let phonemes = text
            .split_whitespace()
            .map(|_| "AH:0.15")
            .collect::<Vec<_>>()
            .join(" ");
        Ok(SynthOutput { audio: audio.clone(), phonemes: Some(phonemes) })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Parse simple CLI arguments ───────────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let mut text = "<speak>Hello from Rust. <b>This</b> is a cached tone.</speak>".to_string();
    let mut cache_dir = std::env::temp_dir().join("synthkit-demo");
    let mut pitch = 440.0f64;
    let mut config_path: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--text" => { if let Some(v) = args.next() { text = v; } }
            "--cache" => { if let Some(v) = args.next() { cache_dir = PathBuf::from(v); } }
            "--pitch" => { if let Some(v) = args.next() { pitch = v.parse().unwrap_or(440.0); } }
            "--config" => { if let Some(v) = args.next() { config_path = Some(PathBuf::from(v)); } }
            "--help" => {
                println!("Usage: basic [--text TEXT] [--cache DIR] [--pitch HZ] [--config FILE]");
                return Ok(());
            }
            _ => {}
        }
    }

    // ── Build the engine ─────────────────────────────────────────────────────
    let config = match &config_path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Cannot load config: {}", path.display()))?,
        None => EngineConfig::from_json_str(r#"{ "lang": "en-us", "ssml_tags": ["speak"] }"#)?,
    };
    println!("Engine voice: {}  lang: {}", config.voice(), config.lang);
    let queue = PlaybackQueue::new();
    let metrics = Arc::new(MetricLog::new());
    let engine = TtsEngine::builder(config, Arc::new(ToneBackend), queue.sender())
        .with_registry(Arc::new(CacheRegistry::file_backed(&cache_dir)))
        .with_splitter(SentenceChunker::default())
        .with_metric_sink(metrics.clone())
        .build()?;

    // ── Synthesise ───────────────────────────────────────────────────────────
    let t0 = std::time::Instant::now();
    let options = ExecuteOptions::default().with_param("pitch", pitch);
    engine.execute(&text, None, true, options)?;
    println!("Synthesised in {:.2?}", t0.elapsed());

    // ── Play (print) ─────────────────────────────────────────────────────────
    for item in queue.drain() {
        engine.begin_audio();
        let frames = hound::WavReader::open(&item.audio_path)?.duration();
        println!(
            "{}  {:.2}s  visemes={}  trigger_next={}",
            item.audio_path.display(),
            frames as f32 / SAMPLE_RATE as f32,
            item.visemes.as_ref().map_or(0, Vec::len),
            item.trigger_next,
        );
        engine.end_audio();
    }

    let hits = metrics
        .events()
        .iter()
        .filter(|e| e.metric_type == "tts.synth.finished" && e.fields.contains_key("cache"))
        .count();
    println!("{hits} chunk(s) served from cache in {}", cache_dir.display());
    Ok(())
}
