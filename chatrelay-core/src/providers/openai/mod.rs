use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, RelayError};
use crate::http_client::{HttpClient, SseStream};
use crate::model::{ChatMessage, FinishReason, SegmentRequest, ToolChoice};
use crate::provider::StreamProvider;
use crate::stream::{BoxStreamEv, StreamEvent};

const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone)]
pub struct OpenAi {
    http: HttpClient,
    base: String,
    org: Option<String>,
    name: String, // usually "openai"
    api_key: String,
    default_model: String,
}

impl OpenAi {
    pub fn new(
        http: HttpClient,
        api_key: String,
        base: String,
        org: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            http,
            api_key,
            base,
            org,
            name: "openai".into(),
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        OpenAi::new(
            HttpClient::new_default().unwrap(),
            "test-key".into(),
            server_base.to_string(),
            None,
            None,
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut h = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(org) = &self.org {
            h.push(("OpenAI-Organization".into(), org.clone()));
        }
        h
    }
}

// ---- Wire structs (minimal) ----
#[derive(Serialize)]
struct OAChatReq<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    max_tokens: u32,
    tool_choice: &'a str,
}

#[derive(Deserialize)]
struct OAChunk {
    choices: Vec<OAChunkChoice>,
}

#[derive(Deserialize)]
struct OAChunkChoice {
    #[serde(default)]
    delta: OADelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OADelta {
    #[serde(default)]
    content: Option<String>,
}

fn map_finish(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" => FinishReason::ToolUse,
        _ => FinishReason::Other,
    }
}

fn tool_choice_wire(tc: ToolChoice) -> &'static str {
    match tc {
        ToolChoice::None => "none",
        ToolChoice::Auto => "auto",
    }
}

#[async_trait]
impl StreamProvider for OpenAi {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(&self, req: SegmentRequest) -> CoreResult<BoxStreamEv> {
        let model = req.model.as_deref().unwrap_or(&self.default_model);
        let payload = OAChatReq {
            model,
            messages: &req.messages,
            stream: true,
            max_tokens: req.max_tokens,
            tool_choice: tool_choice_wire(req.tool_choice),
        };
        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}/v1/chat/completions", self.base);
        let lines = self
            .http
            .post_sse_lines(&self.name, &url, &payload, &hdrs)
            .await?;
        Ok(Box::pin(EventStream::new(self.name.clone(), lines)))
    }
}

/// Decodes OpenAI chat-completions SSE lines into `StreamEvent`s.
/// Emits exactly one terminal event: `Finish` on `[DONE]`, or `Error` when
/// the transport dies or the stream ends without a terminal chunk.
struct EventStream {
    provider: String,
    lines: SseStream,
    finish: Option<FinishReason>,
    terminated: bool,
}

impl EventStream {
    fn new(provider: String, lines: SseStream) -> Self {
        Self {
            provider,
            lines,
            finish: None,
            terminated: false,
        }
    }
}

impl futures_util::stream::Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        if self.terminated {
            return Poll::Ready(None);
        }
        loop {
            match self.lines.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(sse))) => {
                    let line = sse.line.trim();
                    let Some(data) = line.strip_prefix("data:") else {
                        continue; // event names, comments, keep-alives
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        self.terminated = true;
                        let reason = self.finish.take().unwrap_or(FinishReason::Stop);
                        return Poll::Ready(Some(StreamEvent::Finish { reason }));
                    }
                    let chunk: OAChunk = match serde_json::from_str(data) {
                        Ok(c) => c,
                        Err(e) => {
                            tracing::debug!(provider = %self.provider, error = %e, "skipping undecodable SSE chunk");
                            continue;
                        }
                    };
                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };
                    if let Some(reason) = choice.finish_reason.as_deref() {
                        self.finish = Some(map_finish(reason));
                    }
                    if let Some(text) = choice.delta.content
                        && !text.is_empty()
                    {
                        return Poll::Ready(Some(StreamEvent::Delta(text)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.terminated = true;
                    return Poll::Ready(Some(StreamEvent::Error(e)));
                }
                Poll::Ready(None) => {
                    self.terminated = true;
                    // A finish_reason without [DONE] still counts as a clean end.
                    let ev = match self.finish.take() {
                        Some(reason) => StreamEvent::Finish { reason },
                        None => StreamEvent::Error(RelayError::ProviderError {
                            provider: self.provider.clone(),
                            code: "eof".into(),
                            message: "stream ended without a terminal chunk".into(),
                        }),
                    };
                    return Poll::Ready(Some(ev));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
