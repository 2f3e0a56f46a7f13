//! Diagnostic metric events.
//!
//! Every stage of the pipeline reports a [`MetricEvent`] to a pluggable
//! [`MetricSink`]. Sinks are untrusted: [`Metrics::record`] swallows and logs
//! their failures so reporting can never abort synthesis.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    pub metric_type: String,
    pub fields: Map<String, Value>,
}

impl MetricEvent {
    pub fn new(metric_type: impl Into<String>) -> Self {
        Self { metric_type: metric_type.into(), fields: Map::new() }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

pub trait MetricSink: Send + Sync {
    fn handle_metric(&self, event: &MetricEvent) -> anyhow::Result<()>;
}

impl<F> MetricSink for F
where
    F: Fn(&MetricEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_metric(&self, event: &MetricEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricSink for NoopMetrics {
    fn handle_metric(&self, _: &MetricEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MetricLog {
    events: Mutex<Vec<MetricEvent>>,
}

impl MetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }

    /// Metric types in arrival order.
    pub fn types(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.metric_type.clone()).collect()
    }
}

impl MetricSink for MetricLog {
    fn handle_metric(&self, event: &MetricEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stopwatch
// ─────────────────────────────────────────────────────────────────────────────

/// Wall-clock timer shared by the engine's metric calls.
#[derive(Debug)]
pub struct Stopwatch {
    origin: Instant,
    started: Mutex<Option<Instant>>,
    last: Mutex<Option<Duration>>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self { origin: Instant::now(), started: Mutex::new(None), last: Mutex::new(None) }
    }

    pub fn start(&self) {
        *self.started.lock() = Some(Instant::now());
    }

    /// Stop and return the measured span; `None` if never started.
    pub fn stop(&self) -> Option<Duration> {
        let span = self.started.lock().take().map(|t| t.elapsed());
        if span.is_some() {
            *self.last.lock() = span;
        }
        span
    }

    pub fn is_running(&self) -> bool {
        self.started.lock().is_some()
    }

    /// Duration of the last completed span.
    pub fn last(&self) -> Option<Duration> {
        *self.last.lock()
    }

    /// Time since the stopwatch was created.
    pub fn since_origin(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guarded recorder
// ─────────────────────────────────────────────────────────────────────────────

pub struct Metrics {
    sink: Arc<dyn MetricSink>,
    stopwatch: Stopwatch,
    log_timestamps: bool,
}

impl Metrics {
    pub fn new(sink: Arc<dyn MetricSink>, log_timestamps: bool) -> Self {
        Self { sink, stopwatch: Stopwatch::new(), log_timestamps }
    }

    pub fn stopwatch(&self) -> &Stopwatch {
        &self.stopwatch
    }

    /// Forward `event` to the sink. Never fails, even if the sink panics.
    pub fn record(&self, event: MetricEvent) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.handle_metric(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(target: "tts", metric = %event.metric_type, "metric callback failed: {e:#}");
            }
            Err(_) => {
                error!(target: "tts", metric = %event.metric_type, "metric callback panicked");
            }
        }
        if self.log_timestamps {
            debug!(
                target: "tts",
                metric = %event.metric_type,
                elapsed_ms = self.stopwatch.since_origin().as_millis() as u64,
                "metric recorded"
            );
        }
    }

    pub fn emit(&self, metric_type: &str) {
        self.record(MetricEvent::new(metric_type));
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(Arc::new(NoopMetrics), false)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[test]
    fn test_event_fields_serialize() {
        let e = MetricEvent::new("tts.preprocessed").with_field("n_chunks", 3);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["metric_type"], "tts.preprocessed");
        assert_eq!(json["fields"]["n_chunks"], 3);
    }

    #[test]
    fn test_failing_sink_is_swallowed() {
        let sink = |_: &MetricEvent| -> anyhow::Result<()> { bail!("sink offline") };
        let metrics = Metrics::new(Arc::new(sink), true);
        metrics.emit("tts.start");
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        let sink = |e: &MetricEvent| -> anyhow::Result<()> {
            if e.metric_type == "tts.start" {
                panic!("sink bug");
            }
            Ok(())
        };
        let metrics = Metrics::new(Arc::new(sink), false);
        metrics.emit("tts.start");
        metrics.emit("tts.end");
    }

    #[test]
    fn test_log_collects_in_order() {
        let log = Arc::new(MetricLog::new());
        let metrics = Metrics::new(log.clone(), false);
        metrics.emit("tts.start");
        metrics.record(MetricEvent::new("tts.end").with_field("cache", true));
        assert_eq!(log.types(), vec!["tts.start", "tts.end"]);
        assert_eq!(log.events()[1].fields["cache"], Value::Bool(true));
    }

    #[test]
    fn test_stopwatch_span() {
        let sw = Stopwatch::new();
        assert_eq!(sw.stop(), None);
        sw.start();
        assert!(sw.is_running());
        let span = sw.stop().unwrap();
        assert_eq!(sw.last(), Some(span));
        assert!(!sw.is_running());
    }
}
