use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{FinishReason, SegmentRequest};
use crate::stream::{BoxStreamEv, StreamEvent};

/// A provider that can stream one generation segment.
///
/// Implementations return a stream obeying the `StreamEvent` contract: zero
/// or more `Delta`s followed by exactly one terminal event. A failure before
/// the stream is obtained must surface as `Err`, never as an empty stream.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn stream_chat(&self, req: SegmentRequest) -> CoreResult<BoxStreamEv>;
}

/// A dummy provider implementation that always streams a canned response.
/// Useful for tests or as a placeholder.
pub struct NullProvider;

#[async_trait]
impl StreamProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    async fn stream_chat(&self, _req: SegmentRequest) -> CoreResult<BoxStreamEv> {
        let events = vec![
            StreamEvent::Delta("[null provider response]".to_string()),
            StreamEvent::Finish {
                reason: FinishReason::Stop,
            },
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatMessage, ToolChoice};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn null_provider_streams_canned_text() {
        let prov = NullProvider;
        let req = SegmentRequest {
            model: None,
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 128,
            tool_choice: ToolChoice::None,
        };
        let mut stream = prov.stream_chat(req).await.expect("stream ok");

        let first = stream.next().await.expect("delta");
        assert_eq!(first.as_delta(), Some("[null provider response]"));

        let second = stream.next().await.expect("terminal");
        match second {
            StreamEvent::Finish { reason } => assert_eq!(reason, FinishReason::Stop),
            other => panic!("expected Finish, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }
}
