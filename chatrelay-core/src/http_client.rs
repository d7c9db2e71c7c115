use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{CoreResult, RelayError};

/// Represents a single Server-Sent-Event line (already split on `\n`).
#[derive(Debug, Clone)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream = std::pin::Pin<
    Box<dyn futures_util::stream::Stream<Item = crate::error::CoreResult<SseLine>> + Send>,
>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(std::time::Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(std::time::Duration::from_millis(cfg.request_timeout_ms));
        if let Some(cap) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(cap);
        }
        let inner = builder
            .build()
            .map_err(|e| RelayError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "chatrelay/0.1".to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// POST JSON and return an SSE (Server-Sent Events) line stream.
    /// Each yielded item is one raw line (trim not applied) from the SSE channel.
    ///
    /// Non-2xx responses are mapped to an error before any line is yielded,
    /// so a failed provider call never looks like an empty stream.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        provider: &str,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let provider_name = provider.to_string();
        let resp = req.send().await.map_err(|_| RelayError::ProviderUnavailable {
            provider: provider_name.clone(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(&provider_name, status, ra, &body));
        }

        // Stream body as bytes and split on '\n'
        let byte_stream = resp.bytes_stream();
        let line_stream = LineStream::new(provider_name, Box::pin(byte_stream));
        Ok(Box::pin(line_stream))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // Non-numeric (HTTP-date) forms are ignored.
    None
}

pub(crate) fn map_http_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> RelayError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RelayError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => RelayError::ProviderUnavailable {
            provider: provider.to_string(),
        },
        s => RelayError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        // The cut must land on a char boundary or slicing panics.
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

/// Internal line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
struct LineStream {
    provider: String,
    inner: std::pin::Pin<
        Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buf: String,
    flushed_tail: bool,
}

impl LineStream {
    fn new(
        provider: String,
        inner: std::pin::Pin<
            Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
        >,
    ) -> Self {
        Self {
            provider,
            inner,
            buf: String::new(),
            flushed_tail: false,
        }
    }
}

impl futures_util::stream::Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            // If we already have a newline in the buffer, split and yield immediately.
            if let Some(idx) = self.buf.find('\n') {
                let mut line = self.buf.drain(..=idx).collect::<String>();
                if line.ends_with('\n') {
                    if line.ends_with("\r\n") {
                        line.truncate(line.len() - 2);
                    } else {
                        line.truncate(line.len() - 1);
                    }
                }
                return Poll::Ready(Some(Ok(SseLine { line })));
            }

            // Otherwise, poll the inner stream for more bytes
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let s = String::from_utf8_lossy(&chunk);
                    self.buf.push_str(&s);
                    continue;
                }
                Poll::Ready(Some(Err(_e))) => {
                    let provider = self.provider.clone();
                    return Poll::Ready(Some(Err(RelayError::ProviderUnavailable { provider })));
                }
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        let line = std::mem::take(&mut self.buf);
                        return Poll::Ready(Some(Ok(SseLine { line })));
                    } else {
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn sse_lines_split_and_strip_newlines() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: one\r\ndata: two\n\ndata: [DONE]\n");
        });

        let client = HttpClient::new_default().unwrap();
        let mut stream = client
            .post_sse_lines("test", &format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(item) = stream.next().await {
            lines.push(item.unwrap().line);
        }
        assert_eq!(lines, vec!["data: one", "data: two", "", "data: [DONE]"]);
        m.assert();
    }

    #[tokio::test]
    async fn dangling_tail_is_flushed() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(200).body("data: partial"); // no trailing newline
        });

        let client = HttpClient::new_default().unwrap();
        let mut stream = client
            .post_sse_lines("test", &format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.line, "data: partial");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn status_429_maps_to_rate_limited() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(429).header("Retry-After", "2").body("slow down");
        });

        let client = HttpClient::new_default().unwrap();
        let Err(err) = client
            .post_sse_lines("openai", &format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
        else {
            panic!("expected the request to be rejected");
        };
        match err {
            RelayError::RateLimited {
                provider,
                retry_after,
            } => {
                assert_eq!(provider, "openai");
                assert_eq!(retry_after, Some(2));
            }
            other => panic!("expected RateLimited, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_503_maps_to_unavailable() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(503).body("oops");
        });

        let client = HttpClient::new_default().unwrap();
        let Err(err) = client
            .post_sse_lines("openai", &format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
        else {
            panic!("expected the request to be rejected");
        };
        assert!(matches!(err, RelayError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn status_400_truncates_body() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/stream");
            then.status(400).body(big);
        });

        let client = HttpClient::new_default().unwrap();
        let Err(err) = client
            .post_sse_lines("openai", &format!("{}/stream", server.base_url()), &json!({}), &[])
            .await
        else {
            panic!("expected the request to be rejected");
        };
        match err {
            RelayError::ProviderError { code, message, .. } => {
                assert_eq!(code, "400");
                assert!(message.ends_with("..."));
                assert!(message.len() <= 303);
            }
            other => panic!("expected ProviderError, got: {other:?}"),
        }
    }

    #[test]
    fn truncation_lands_on_a_char_boundary() {
        // Byte 300 falls inside a two-byte character.
        let body = format!("a{}", "é".repeat(151));
        let err = map_http_error("openai", StatusCode::BAD_REQUEST, None, &body);
        match err {
            RelayError::ProviderError { message, .. } => {
                assert!(message.ends_with("..."));
                assert!(message.len() <= 303);
            }
            other => panic!("expected ProviderError, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn network_error_maps_to_unavailable() {
        // Port 9 (discard) is typically closed.
        let client = HttpClient::new_default().unwrap();
        let Err(err) = client
            .post_sse_lines("openai", "http://127.0.0.1:9/stream", &json!({}), &[])
            .await
        else {
            panic!("expected the request to fail");
        };
        assert!(matches!(err, RelayError::ProviderUnavailable { .. }));
    }
}
