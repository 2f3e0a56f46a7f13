//! Synthesis backends.
//!
//! A backend turns one chunk of text into an audio file at a path chosen by
//! the cache. Each backend declares up front which request parameters it
//! understands; the engine drops everything else before calling it.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    cache::AudioArtifact,
    error::{Result, TtsError},
};

/// Free-form request parameters (`lang`, `voice`, `speed`, …).
pub type SynthParams = BTreeMap<String, Value>;

/// Parameter names the engine supplies itself and never forwards.
pub const RESERVED_PARAMS: [&str; 2] = ["sentence", "wav_file"];

// ─────────────────────────────────────────────────────────────────────────────
// Descriptor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendDescriptor {
    pub name: String,
    pub accepted_params: BTreeSet<String>,
    pub languages: BTreeSet<String>,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages
            .extend(languages.into_iter().map(|l| l.into().to_lowercase()));
        self
    }

    /// Checked once when an engine is built around the backend.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TtsError::InvalidBackend("backend name is empty".into()));
        }
        if let Some(reserved) = RESERVED_PARAMS
            .iter()
            .find(|r| self.accepted_params.contains(**r))
        {
            return Err(TtsError::InvalidBackend(format!(
                "{}: parameter '{reserved}' is reserved",
                self.name
            )));
        }
        Ok(())
    }

    pub fn accepts(&self, param: &str) -> bool {
        self.accepted_params.contains(param)
    }

    /// Keep only the parameters this backend declared.
    pub fn filter_params(&self, params: &SynthParams) -> SynthParams {
        let kept: SynthParams = params
            .iter()
            .filter(|(k, _)| self.accepts(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if kept.len() < params.len() {
            let dropped: Vec<&str> = params
                .keys()
                .filter(|k| !self.accepts(k))
                .map(String::as_str)
                .collect();
            debug!(target: "tts", backend = %self.name, ?dropped, "ignoring unsupported params");
        }
        kept
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend contract
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SynthOutput {
    pub audio: AudioArtifact,
    /// Phonemes in `PH:dur PH …` form, when the backend knows them.
    pub phonemes: Option<String>,
}

pub trait SynthesisBackend: Send + Sync {
    fn descriptor(&self) -> BackendDescriptor;

    /// Write audio for `text` to `audio.path`. `params` only holds keys from
    /// the descriptor's `accepted_params`.
    fn synthesize(
        &self,
        text: &str,
        audio: &AudioArtifact,
        params: &SynthParams,
    ) -> anyhow::Result<SynthOutput>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Concatenating backend
// ─────────────────────────────────────────────────────────────────────────────

/// Maps a sentence to prerecorded WAV snippets, played back to back.
pub trait SentenceToFiles: Send + Sync {
    fn sentence_to_files(
        &self,
        text: &str,
        params: &SynthParams,
    ) -> anyhow::Result<(Vec<PathBuf>, Option<String>)>;
}

impl<F> SentenceToFiles for F
where
    F: Fn(&str, &SynthParams) -> anyhow::Result<(Vec<PathBuf>, Option<String>)> + Send + Sync,
{
    fn sentence_to_files(
        &self,
        text: &str,
        params: &SynthParams,
    ) -> anyhow::Result<(Vec<PathBuf>, Option<String>)> {
        self(text, params)
    }
}

/// Backend that stitches snippet files into one WAV.
///
/// Snippets that do not exist are skipped with a warning. All remaining
/// snippets must share one WAV format.
pub struct ConcatBackend<S> {
    descriptor: BackendDescriptor,
    source: S,
}

impl<S: SentenceToFiles> ConcatBackend<S> {
    pub fn new(descriptor: BackendDescriptor, source: S) -> Self {
        Self { descriptor, source }
    }
}

impl<S: SentenceToFiles> SynthesisBackend for ConcatBackend<S> {
    fn descriptor(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }

    fn synthesize(
        &self,
        text: &str,
        audio: &AudioArtifact,
        params: &SynthParams,
    ) -> anyhow::Result<SynthOutput> {
        let (files, phonemes) = self.source.sentence_to_files(text, params)?;
        concat_wav(&files, &audio.path)?;
        Ok(SynthOutput { audio: audio.clone(), phonemes })
    }
}

/// Concatenate `files` into `output`. Returns the number of frames written.
pub fn concat_wav(files: &[PathBuf], output: &Path) -> anyhow::Result<u32> {
    let present: Vec<&PathBuf> = files
        .iter()
        .filter(|f| {
            let ok = f.is_file();
            if !ok {
                warn!(target: "tts", file = %f.display(), "skipping missing audio snippet");
            }
            ok
        })
        .collect();
    let Some(first) = present.first() else {
        bail!("no audio snippets to concatenate into {}", output.display());
    };

    let spec = hound::WavReader::open(first)
        .with_context(|| format!("Cannot open WAV: {}", first.display()))?
        .spec();
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("Cannot create WAV: {}", output.display()))?;

    for path in present {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Cannot open WAV: {}", path.display()))?;
        if reader.spec() != spec {
            bail!(
                "WAV format mismatch: {} is {:?}, expected {:?}",
                path.display(),
                reader.spec(),
                spec
            );
        }
        match spec.sample_format {
            hound::SampleFormat::Int => {
                for s in reader.samples::<i32>() {
                    writer.write_sample(s.context("WAV read error")?).context("WAV write error")?;
                }
            }
            hound::SampleFormat::Float => {
                for s in reader.samples::<f32>() {
                    writer.write_sample(s.context("WAV read error")?).context("WAV write error")?;
                }
            }
        }
    }

    let frames = writer.duration();
    writer.finalize().context("WAV finalise error")?;
    Ok(frames)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_tone(path: &Path, sample_rate: u32, n: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..n {
            w.write_sample((i % 100) as i16).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(BackendDescriptor::new("mimic").with_params(["voice"]).validate().is_ok());
        assert!(matches!(
            BackendDescriptor::new("  ").validate(),
            Err(TtsError::InvalidBackend(_))
        ));
        assert!(matches!(
            BackendDescriptor::new("bad").with_params(["wav_file"]).validate(),
            Err(TtsError::InvalidBackend(_))
        ));
    }

    #[test]
    fn test_filter_params_drops_unknown_keys() {
        let d = BackendDescriptor::new("mimic").with_params(["voice", "speed"]);
        let mut params = SynthParams::new();
        params.insert("voice".into(), json!("alan"));
        params.insert("pitch".into(), json!(3));
        let kept = d.filter_params(&params);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept["voice"], json!("alan"));
    }

    #[test]
    fn test_concat_skips_missing_snippets() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_tone(&a, 16_000, 100);
        write_tone(&b, 16_000, 50);
        let out = dir.path().join("out.wav");

        let frames = concat_wav(&[a, dir.path().join("missing.wav"), b], &out).unwrap();
        assert_eq!(frames, 150);
        assert_eq!(hound::WavReader::open(&out).unwrap().duration(), 150);
    }

    #[test]
    fn test_concat_rejects_mixed_formats() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_tone(&a, 16_000, 10);
        write_tone(&b, 22_050, 10);
        let err = concat_wav(&[a, b], &dir.path().join("out.wav")).unwrap_err();
        assert!(err.to_string().contains("mismatch"), "got: {err}");
    }

    #[test]
    fn test_concat_backend_returns_phonemes() {
        let dir = tempfile::tempdir().unwrap();
        let snippet = dir.path().join("hi.wav");
        write_tone(&snippet, 16_000, 20);
        let source = move |_: &str, _: &SynthParams| -> anyhow::Result<(Vec<PathBuf>, Option<String>)> {
            Ok((vec![snippet.clone()], Some("HH:0.1 AY:0.2".into())))
        };
        let backend = ConcatBackend::new(BackendDescriptor::new("concat"), source);
        let artifact = AudioArtifact::new(dir.path().join("out.wav"));
        let out = backend.synthesize("hi", &artifact, &SynthParams::new()).unwrap();
        assert_eq!(out.audio, artifact);
        assert_eq!(out.phonemes.as_deref(), Some("HH:0.1 AY:0.2"));
        assert!(artifact.path.is_file());
    }
}
