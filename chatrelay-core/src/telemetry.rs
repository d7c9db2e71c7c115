//! Telemetry primitives for per-segment tracing.
//! By default, no telemetry is emitted unless a sink is installed via `set_telemetry_sink`.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// One record per finished response segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SegmentLog {
    /// Provider identifier, e.g. "openai", "anthropic".
    pub provider: Option<String>,

    /// Model identifier, e.g. "gpt-4o".
    pub model: Option<String>,

    /// Zero-based index of the segment within its turn (== switches so far).
    pub segment_index: u32,

    /// Finish reason as a normalized string (e.g., "stop", "length", "error").
    pub finish_reason: Option<String>,

    /// Length of the generated text in bytes.
    pub text_len: usize,

    /// Elapsed time from opening the segment to its terminal event.
    pub latency_ms: Option<u64>,
}

impl SegmentLog {
    pub fn new(segment_index: u32) -> Self {
        Self {
            segment_index,
            ..Default::default()
        }
    }

    pub fn provider(mut self, p: impl Into<String>) -> Self {
        self.provider = Some(p.into());
        self
    }

    pub fn model_opt(mut self, m: Option<&str>) -> Self {
        self.model = m.map(|s| s.to_string());
        self
    }

    pub fn finish_reason(mut self, r: impl Into<String>) -> Self {
        self.finish_reason = Some(r.into());
        self
    }

    pub fn text_len(mut self, n: usize) -> Self {
        self.text_len = n;
        self
    }

    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
}

/// Implement this to receive telemetry events.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record_segment` **may** be called from any thread; implementations should avoid panicking.
/// - Keep overhead minimal; this may be on hot paths.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_segment(&self, log: SegmentLog);
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
///
/// This is a write-once global for the process lifetime (backed by `OnceCell`).
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

/// Emit a segment record if a sink is installed. Crate-visible by design.
///
/// In tests, emission is suppressed unless explicitly enabled via `test_set_capture_enabled`.
#[inline]
pub(crate) fn emit_segment(log: SegmentLog) {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return;
        }
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record_segment(log);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test thread.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_fields() {
        let log = SegmentLog::new(1)
            .provider("openai")
            .model_opt(Some("gpt-4o"))
            .finish_reason("length")
            .text_len(42)
            .latency_ms(120);
        assert_eq!(log.segment_index, 1);
        assert_eq!(log.provider.as_deref(), Some("openai"));
        assert_eq!(log.model.as_deref(), Some("gpt-4o"));
        assert_eq!(log.finish_reason.as_deref(), Some("length"));
        assert_eq!(log.text_len, 42);
        assert_eq!(log.latency_ms, Some(120));
    }
}
