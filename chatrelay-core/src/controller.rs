//! Continuation Controller: ties finish reasons to stream switches.
//!
//! One turn = one `SwitchableStream`. The first segment is opened before the
//! readable side is handed back, so a provider failure at that point is still
//! an ordinary `Err` (HTTP 500, nothing streamed). From then on the driver
//! task owns the stream: every `length` finish triggers a continuation with
//! the accumulated text appended as an assistant turn, until a non-`length`
//! finish, the segment budget, or a client disconnect ends the turn.

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_stream::wrappers::ReceiverStream;

use crate::adapter::{SegmentEnd, StreamAdapter};
use crate::config::LimitsCfg;
use crate::error::{CoreResult, RelayError};
use crate::model::{ChatMessage, ChatTurnRequest};
use crate::prompt;
use crate::switchable::SwitchableStream;

/// Final accounting for one turn, delivered after the stream closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSummary {
    pub segments: u32,
    pub switches: u32,
}

/// A running turn: the byte stream for the HTTP response plus a channel that
/// resolves once the turn is over. Errors after the first byte can only
/// surface here — the response status is already committed by then, so the
/// wire-visible signal is a prematurely ended body.
pub struct TurnHandle {
    pub readable: ReceiverStream<Bytes>,
    pub outcome: oneshot::Receiver<CoreResult<TurnSummary>>,
}

#[derive(Clone)]
pub struct ContinuationController {
    adapter: StreamAdapter,
    limits: LimitsCfg,
}

impl ContinuationController {
    pub fn new(adapter: StreamAdapter, limits: LimitsCfg) -> Self {
        Self { adapter, limits }
    }

    /// Start one chat turn. Returns as soon as the first provider stream is
    /// open, so the caller can begin flushing bytes before any continuation
    /// decision is made.
    pub async fn open_turn(&self, req: ChatTurnRequest) -> CoreResult<TurnHandle> {
        req.validate()?;

        // System message is rebuilt per request and always sits at position 0.
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        messages.push(prompt::system_message(&req.context));
        messages.extend(req.messages);

        let mut stream = SwitchableStream::new();
        let Some(readable) = stream.take_readable() else {
            return Err(RelayError::Other(anyhow::anyhow!(
                "freshly created stream had no readable side"
            )));
        };

        let first = self
            .adapter
            .open_segment(&req.provider, req.model.clone(), messages.clone(), 0)
            .await?;
        stream.attach_source(first.bytes).await?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let driver = Driver {
            adapter: self.adapter.clone(),
            limits: self.limits,
            provider: req.provider,
            model: req.model,
            messages,
            stream,
        };
        tokio::spawn(driver.run(first.finish, outcome_tx));

        Ok(TurnHandle {
            readable,
            outcome: outcome_rx,
        })
    }
}

/// Sole writer of the turn's `SwitchableStream`. Segments are strictly
/// sequential, so the loop processes one finish report at a time.
struct Driver {
    adapter: StreamAdapter,
    limits: LimitsCfg,
    provider: String,
    model: Option<String>,
    messages: Vec<ChatMessage>,
    stream: SwitchableStream,
}

impl Driver {
    async fn run(
        mut self,
        mut finish: oneshot::Receiver<CoreResult<SegmentEnd>>,
        outcome: oneshot::Sender<CoreResult<TurnSummary>>,
    ) {
        let mut segments: u32 = 1;
        let result = loop {
            let end = match finish.await {
                Ok(Ok(end)) => end,
                Ok(Err(e)) => break Err(e),
                Err(_) => {
                    // Segment abandoned without a terminal report; happens
                    // when the consumer went away mid-segment.
                    tracing::debug!(segments, "segment ended without a finish report");
                    break Ok(self.summary(segments));
                }
            };

            if !end.reason.is_truncated() {
                break Ok(self.summary(segments));
            }

            if segments >= self.limits.max_response_segments {
                break Err(RelayError::SegmentBudgetExhausted {
                    switches: self.stream.switches(),
                    max_segments: self.limits.max_response_segments,
                });
            }

            if !self.stream.is_downstream_connected() {
                tracing::debug!(segments, "client disconnected; skipping continuation");
                break Ok(self.summary(segments));
            }

            let switches_left = self.limits.max_response_segments - segments;
            tracing::info!(
                max_tokens = self.limits.max_tokens,
                switches_left,
                "provider hit its token limit; continuing turn"
            );

            // The continuation sees the original conversation plus a single
            // synthetic assistant turn holding the latest partial text; prior
            // partials are not carried along.
            let mut continuation = self.messages.clone();
            continuation.push(ChatMessage::assistant(end.text));
            let segment = match self
                .adapter
                .open_segment(&self.provider, self.model.clone(), continuation, segments)
                .await
            {
                Ok(segment) => segment,
                Err(e) => break Err(e),
            };
            if let Err(e) = self.stream.attach_source(segment.bytes).await {
                break Err(e);
            }
            segments += 1;
            finish = segment.finish;
        };

        self.stream.close().await;
        match result {
            Ok(summary) => {
                tracing::debug!(
                    segments = summary.segments,
                    switches = summary.switches,
                    "turn finished"
                );
                let _ = outcome.send(Ok(summary));
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed after streaming began");
                let _ = outcome.send(Err(e));
            }
        }
    }

    fn summary(&self, segments: u32) -> TurnSummary {
        TurnSummary {
            segments,
            switches: self.stream.switches(),
        }
    }
}
