//! Crate error type.
//!
//! Only failures that prevent producing usable audio surface here. Problems
//! with auxiliary data (phonemes, visemes, metrics, optional resources) are
//! logged and degrade instead of returning an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtsError {
    /// The synthesis backend failed; no audio was produced.
    #[error("synthesis failed: {0:#}")]
    Synthesis(anyhow::Error),

    /// A backend descriptor was rejected at registration time.
    #[error("invalid backend descriptor: {0}")]
    InvalidBackend(String),

    /// The playback consumer dropped its end of the hand-off queue.
    #[error("playback queue closed")]
    QueueClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TtsError>;
