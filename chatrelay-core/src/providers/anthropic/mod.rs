use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, RelayError};
use crate::http_client::{HttpClient, SseStream};
use crate::model::{FinishReason, Role, SegmentRequest};
use crate::provider::StreamProvider;
use crate::stream::{BoxStreamEv, StreamEvent};

/// Default Anthropic API version header required by the Messages API.
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";

#[derive(Debug, Clone)]
pub struct Anthropic {
    http: HttpClient,
    api_key: SecretString,
    base: String,
    name: String,
    default_model: String,
}

impl Anthropic {
    pub fn new(
        http: HttpClient,
        api_key: SecretString,
        base: String,
        default_model: Option<String>,
    ) -> Self {
        Self {
            http,
            api_key,
            base,
            name: "anthropic".into(),
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        Anthropic::new(
            HttpClient::new_default().unwrap(),
            SecretString::new("test-key".into()),
            server_base.to_string(),
            None,
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "x-api-key".to_string(),
                self.api_key.expose_secret().to_string(),
            ),
            (
                "anthropic-version".to_string(),
                ANTHROPIC_API_VERSION.to_string(),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }

    fn map_stop(reason: &str) -> FinishReason {
        match reason {
            "end_turn" => FinishReason::Stop,
            "stop_sequence" => FinishReason::Stop,
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::ToolUse,
            _ => FinishReason::Other,
        }
    }
}

// ===== Anthropic wire types (Messages API, streaming) =====

#[derive(Serialize)]
struct AMsgReq<'a> {
    model: &'a str,
    messages: Vec<AMessage<'a>>, // role/content pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct AMessage<'a> {
    role: &'a str,
    content: Vec<AContent<'a>>, // Anthropic requires an array of content blocks
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AContent<'a> {
    Text { text: &'a str },
}

/// One decoded SSE `data:` payload. The `type` tag alone is enough to route;
/// `event:` lines are redundant and ignored.
#[derive(Deserialize)]
struct AStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<ADelta>,
    #[serde(default)]
    error: Option<AError>,
}

#[derive(Deserialize)]
struct ADelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AError {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl StreamProvider for Anthropic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(&self, req: SegmentRequest) -> CoreResult<BoxStreamEv> {
        // The Messages API takes system text as a top-level field, not a message.
        let mut system_prompts: Vec<&str> = Vec::new();
        let mut msgs: Vec<AMessage> = Vec::new();
        for m in &req.messages {
            match m.role {
                Role::System => system_prompts.push(m.content.as_str()),
                Role::User => msgs.push(AMessage {
                    role: "user",
                    content: vec![AContent::Text { text: &m.content }],
                }),
                Role::Assistant => msgs.push(AMessage {
                    role: "assistant",
                    content: vec![AContent::Text { text: &m.content }],
                }),
            }
        }
        let system = if system_prompts.is_empty() {
            None
        } else {
            Some(system_prompts.join("\n"))
        };

        let model = req.model.as_deref().unwrap_or(&self.default_model);
        let payload = AMsgReq {
            model,
            messages: msgs,
            system,
            max_tokens: req.max_tokens.max(1),
            stream: true,
        };

        let owned_headers = self.headers();
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = format!("{}/v1/messages", self.base);
        let lines = self
            .http
            .post_sse_lines(&self.name, &url, &payload, &hdrs)
            .await?;
        Ok(Box::pin(EventStream::new(self.name.clone(), lines)))
    }
}

/// Decodes Messages API SSE lines into `StreamEvent`s. Terminal is
/// `message_stop` (with the stop reason captured from the preceding
/// `message_delta`), an `error` event, or transport failure.
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
                        continue;
                    };
                    let ev: AStreamEvent = match serde_json::from_str(data.trim()) {
                        Ok(ev) => ev,
                        Err(e) => {
                            tracing::debug!(provider = %self.provider, error = %e, "skipping undecodable SSE chunk");
                            continue;
                        }
                    };
                    match ev.kind.as_str() {
                        "content_block_delta" => {
                            if let Some(text) = ev.delta.and_then(|d| d.text)
                                && !text.is_empty()
                            {
                                return Poll::Ready(Some(StreamEvent::Delta(text)));
                            }
                        }
                        "message_delta" => {
                            if let Some(reason) = ev.delta.and_then(|d| d.stop_reason) {
                                self.finish = Some(Anthropic::map_stop(&reason));
                            }
                        }
                        "message_stop" => {
                            self.terminated = true;
                            let reason = self.finish.take().unwrap_or(FinishReason::Stop);
                            return Poll::Ready(Some(StreamEvent::Finish { reason }));
                        }
                        "error" => {
                            self.terminated = true;
                            let message = ev.error.map(|e| e.message).unwrap_or_default();
                            return Poll::Ready(Some(StreamEvent::Error(
                                RelayError::ProviderError {
                                    provider: self.provider.clone(),
                                    code: "stream_error".into(),
                                    message,
                                },
                            )));
                        }
                        // message_start, content_block_start/stop, ping
                        _ => {}
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.terminated = true;
                    return Poll::Ready(Some(StreamEvent::Error(e)));
                }
                Poll::Ready(None) => {
                    self.terminated = true;
                    let ev = match self.finish.take() {
                        Some(reason) => StreamEvent::Finish { reason },
                        None => StreamEvent::Error(RelayError::ProviderError {
                            provider: self.provider.clone(),
                            code: "eof".into(),
                            message: "stream ended without message_stop".into(),
                        }),
                    };
                    return Poll::Ready(Some(ev));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatMessage, ToolChoice};
    use futures_util::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;

    fn req() -> SegmentRequest {
        SegmentRequest {
            model: None,
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 128,
            tool_choice: ToolChoice::None,
        }
    }

    async fn collect(provider: &Anthropic, req: SegmentRequest) -> (String, Option<StreamEvent>) {
        let mut stream = provider.stream_chat(req).await.expect("stream ok");
        let mut text = String::new();
        let mut terminal = None;
        while let Some(ev) = stream.next().await {
            if ev.is_terminal() {
                terminal = Some(ev);
                break;
            }
            text.push_str(ev.as_delta().unwrap_or_default());
        }
        assert!(stream.next().await.is_none(), "no events after terminal");
        (text, terminal)
    }

    const HAPPY_BODY: &str = concat!(
        "event: message_start\n",
        r#"data: {"type":"message_start","message":{"id":"msg_1"}}"#,
        "\n\n",
        "event: content_block_delta\n",
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hello "}}"#,
        "\n\n",
        "event: content_block_delta\n",
        r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"claude"}}"#,
        "\n\n",
        "event: message_delta\n",
        r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#,
        "\n\n",
        "event: message_stop\n",
        r#"data: {"type":"message_stop"}"#,
        "\n\n",
    );

    #[tokio::test]
    async fn deltas_and_end_turn_are_decoded() {
        let server = MockServer::start();
        let provider = Anthropic::new_for_tests(&server.base_url());
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .header("x-api-key", "test-key")
                .header("anthropic-version", ANTHROPIC_API_VERSION)
                .body_contains("\"stream\":true");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(HAPPY_BODY);
        });

        let (text, terminal) = collect(&provider, req()).await;
        assert_eq!(text, "hello claude");
        match terminal {
            Some(StreamEvent::Finish { reason }) => assert_eq!(reason, FinishReason::Stop),
            other => panic!("expected Finish, got {other:?}"),
        }
        m.assert();
    }

    #[tokio::test]
    async fn max_tokens_maps_to_length() {
        let server = MockServer::start();
        let provider = Anthropic::new_for_tests(&server.base_url());
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(200).body(concat!(
                r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Part1 "}}"#,
                "\n\n",
                r#"data: {"type":"message_delta","delta":{"stop_reason":"max_tokens"}}"#,
                "\n\n",
                r#"data: {"type":"message_stop"}"#,
                "\n\n",
            ));
        });

        let (text, terminal) = collect(&provider, req()).await;
        assert_eq!(text, "Part1 ");
        match terminal {
            Some(StreamEvent::Finish { reason }) => assert_eq!(reason, FinishReason::Length),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_event_surfaces_mid_stream() {
        let server = MockServer::start();
        let provider = Anthropic::new_for_tests(&server.base_url());
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(200).body(concat!(
                r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                "\n\n",
            ));
        });

        let (_, terminal) = collect(&provider, req()).await;
        match terminal {
            Some(StreamEvent::Error(RelayError::ProviderError { message, .. })) => {
                assert_eq!(message, "Overloaded")
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn system_messages_join_into_top_level_field() {
        let server = MockServer::start();
        let provider = Anthropic::new_for_tests(&server.base_url());
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .body_contains("\"system\":\"A\\nB\"");
            then.status(200).body(concat!(
                r#"data: {"type":"message_stop"}"#,
                "\n\n"
            ));
        });

        let mut r = req();
        r.messages = vec![
            ChatMessage::system("A"),
            ChatMessage::system("B"),
            ChatMessage::user("hi"),
        ];
        let _ = collect(&provider, r).await;
        m.assert();
    }

    #[tokio::test]
    async fn status_529_maps_to_unavailable() {
        let server = MockServer::start();
        let provider = Anthropic::new_for_tests(&server.base_url());
        let _m = server.mock(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(529).body("overloaded");
        });

        let Err(err) = provider.stream_chat(req()).await else {
            panic!("expected the call to be rejected");
        };
        assert!(matches!(err, RelayError::ProviderUnavailable { .. }));
    }
}
