//! Hand-off between synthesis and playback.
//!
//! The engine pushes one [`PlaybackItem`] per synthesised chunk; a playback
//! consumer (outside this crate) pops them in FIFO order. Audio output, device
//! handling and the consumer thread itself are the consumer's business.

use std::path::PathBuf;

use crossbeam::channel::{self, Receiver, Sender};

use crate::{
    context::Message,
    error::{Result, TtsError},
    viseme::Viseme,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackItem {
    pub audio_path: PathBuf,
    pub visemes: Option<Vec<Viseme>>,
    /// Set on the last chunk of an utterance when the caller asked for the
    /// next utterance to follow without waiting.
    pub trigger_next: bool,
    pub namespace: String,
    pub message: Message,
}

/// FIFO queue, unbounded unless built with [`PlaybackQueue::bounded`].
pub struct PlaybackQueue {
    tx: Sender<PlaybackItem>,
    rx: Receiver<PlaybackItem>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Producers block while `capacity` items are waiting.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self { tx, rx }
    }

    pub fn sender(&self) -> PlaybackSender {
        PlaybackSender { tx: self.tx.clone() }
    }

    pub fn receiver(&self) -> Receiver<PlaybackItem> {
        self.rx.clone()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Take everything currently queued without blocking.
    pub fn drain(&self) -> Vec<PlaybackItem> {
        self.rx.try_iter().collect()
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of a [`PlaybackQueue`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PlaybackSender {
    tx: Sender<PlaybackItem>,
}

impl PlaybackSender {
    pub fn push(&self, item: PlaybackItem) -> Result<()> {
        self.tx.send(item).map_err(|_| TtsError::QueueClosed)
    }
}

/// Handle to whatever is playing audio right now.
pub trait PlaybackControl: Send + Sync {
    /// Stop current playback and discard anything queued.
    fn stop(&self) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: usize) -> PlaybackItem {
        PlaybackItem {
            audio_path: PathBuf::from(format!("/tmp/{n}.wav")),
            visemes: None,
            trigger_next: false,
            namespace: "p/v/l".into(),
            message: Message::speak(None),
        }
    }

    fn producer_of(path: &std::path::Path) -> usize {
        let n: usize = path.file_stem().unwrap().to_str().unwrap().parse().unwrap();
        n / 100
    }

    #[test]
    fn test_fifo_order() {
        let q = PlaybackQueue::new();
        let tx = q.sender();
        for n in 0..5 {
            tx.push(item(n)).unwrap();
        }
        let got: Vec<_> = q.drain().into_iter().map(|i| i.audio_path).collect();
        let want: Vec<_> = (0..5).map(|n| item(n).audio_path).collect();
        assert_eq!(got, want);
        assert!(q.is_empty());
    }

    #[test]
    fn test_multiple_producers() {
        let q = PlaybackQueue::bounded(4);
        let rx = q.receiver();
        let handles: Vec<_> = (0..3)
            .map(|t| {
                let tx = q.sender();
                std::thread::spawn(move || {
                    for n in 0..10 {
                        tx.push(item(t * 100 + n)).unwrap();
                    }
                })
            })
            .collect();
        let mut received = Vec::new();
        while received.len() < 30 {
            received.push(rx.recv().unwrap());
        }
        for h in handles {
            h.join().unwrap();
        }
        // Each producer's items keep their relative order.
        for t in 0..3 {
            let mine: Vec<_> = received
                .iter()
                .filter(|i| producer_of(&i.audio_path) == t)
                .map(|i| i.audio_path.clone())
                .collect();
            let want: Vec<_> = (0..10).map(|n| item(t * 100 + n).audio_path).collect();
            assert_eq!(mine, want);
        }
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let q = PlaybackQueue::new();
        let tx = q.sender();
        drop(q);
        assert!(matches!(tx.push(item(0)), Err(TtsError::QueueClosed)));
    }
}
