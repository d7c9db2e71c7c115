//! Stream Adapter: turns a provider's event stream into (a) a plain byte
//! stream suitable for a `SwitchableStream` and (b) a finish channel that
//! resolves exactly once with the full segment text and its finish reason.
//!
//! Failures before the provider stream exists propagate as `Err` from
//! `open_segment`; the caller never receives a silently empty stream.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{CoreResult, RelayError};
use crate::model::{ChatMessage, FinishReason, SegmentRequest, ToolChoice};
use crate::provider_factory::ProviderRegistry;
use crate::stream::{BoxStreamEv, StreamEvent};
use crate::switchable::ByteSource;
use crate::telemetry::SegmentLog;

/// Terminal report for one segment: the full generated text and why the
/// provider stopped.
#[derive(Debug, PartialEq)]
pub struct SegmentEnd {
    pub text: String,
    pub reason: FinishReason,
}

/// One provider call in flight. `bytes` feeds the switchable stream; `finish`
/// resolves after the byte stream ends. If the segment is abandoned before
/// its terminal event, the sender side is dropped and `finish` yields a
/// receive error instead.
pub struct Segment {
    pub bytes: ByteSource,
    pub finish: oneshot::Receiver<CoreResult<SegmentEnd>>,
}

#[derive(Clone)]
pub struct StreamAdapter {
    registry: Arc<ProviderRegistry>,
    max_tokens: u32,
}

impl StreamAdapter {
    pub fn new(registry: Arc<ProviderRegistry>, max_tokens: u32) -> Self {
        Self {
            registry,
            max_tokens,
        }
    }

    /// Invoke `provider` with the full message list and wrap the resulting
    /// event stream. `segment_index` is the zero-based position of this
    /// segment within its turn, used for telemetry.
    pub async fn open_segment(
        &self,
        provider: &str,
        model: Option<String>,
        messages: Vec<ChatMessage>,
        segment_index: u32,
    ) -> CoreResult<Segment> {
        let prov = self.registry.get(provider).ok_or_else(|| {
            RelayError::Validation(format!("unknown provider '{provider}'"))
        })?;

        let req = SegmentRequest {
            model: model.clone(),
            messages,
            max_tokens: self.max_tokens,
            tool_choice: ToolChoice::None,
        };
        let started = Instant::now();
        let events = prov.stream_chat(req).await?;

        let (finish_tx, finish_rx) = oneshot::channel();
        let bytes = SegmentStream {
            provider: prov.name().to_string(),
            model,
            segment_index,
            events,
            transcript: String::new(),
            finish: Some(finish_tx),
            started,
        };
        Ok(Segment {
            bytes: Box::pin(bytes),
            finish: finish_rx,
        })
    }
}

/// Forwards provider deltas as bytes while accumulating the transcript, then
/// reports the terminal event through the finish channel exactly once.
struct SegmentStream {
    provider: String,
    model: Option<String>,
    segment_index: u32,
    events: BoxStreamEv,
    transcript: String,
    finish: Option<oneshot::Sender<CoreResult<SegmentEnd>>>,
    started: Instant,
}

impl SegmentStream {
    fn log(&self, reason: &str) -> SegmentLog {
        SegmentLog::new(self.segment_index)
            .provider(&self.provider)
            .model_opt(self.model.as_deref())
            .finish_reason(reason)
            .text_len(self.transcript.len())
            .latency_ms(self.started.elapsed().as_millis() as u64)
    }

    fn resolve(&mut self, result: CoreResult<SegmentEnd>) {
        if let Some(tx) = self.finish.take() {
            let _ = tx.send(result);
        }
    }
}

impl futures_util::stream::Stream for SegmentStream {
    type Item = Bytes;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        if self.finish.is_none() {
            return Poll::Ready(None);
        }
        loop {
            match self.events.as_mut().poll_next(cx) {
                Poll::Ready(Some(StreamEvent::Delta(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.transcript.push_str(&text);
                    return Poll::Ready(Some(Bytes::from(text)));
                }
                Poll::Ready(Some(StreamEvent::Finish { reason })) => {
                    crate::telemetry::emit_segment(self.log(finish_reason_code(reason)));
                    let text = std::mem::take(&mut self.transcript);
                    self.resolve(Ok(SegmentEnd { text, reason }));
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(StreamEvent::Error(e))) => {
                    crate::telemetry::emit_segment(self.log("error"));
                    tracing::warn!(provider = %self.provider, error = %e, "provider stream failed mid-segment");
                    self.resolve(Err(e));
                    return Poll::Ready(None);
                }
                Poll::Ready(None) => {
                    // Contract breach: the provider stream must end with a
                    // terminal event.
                    let provider = self.provider.clone();
                    self.resolve(Err(RelayError::ProviderError {
                        provider,
                        code: "eof".into(),
                        message: "provider stream ended without a terminal event".into(),
                    }));
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn finish_reason_code(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::ToolUse => "tool_use",
        FinishReason::Other => "other",
    }
}
