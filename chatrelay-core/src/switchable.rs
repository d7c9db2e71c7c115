//! The stream-switching primitive behind response continuation.
//!
//! A `SwitchableStream` presents one continuous byte stream to a single
//! downstream consumer while letting the upstream source be replaced between
//! segments. The consumer never observes the switch: bytes of source N+1
//! follow bytes of source N with no interleaving and exactly one
//! end-of-stream.
//!
//! Ownership rules:
//! - Exactly one writer (the continuation controller) calls `attach_source`
//!   and `close`; the consumer only reads.
//! - Closing is terminal. Attaching after close is an error.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{CoreResult, RelayError};

/// Bounded channel depth between the forward task and the HTTP consumer.
/// Small on purpose: a slow consumer suspends the forward task rather than
/// buffering a whole segment in memory.
const CHANNEL_CAPACITY: usize = 16;

/// A byte source for one segment. Errors do not travel this path; the
/// adapter reports them through its finish channel instead.
pub type ByteSource = BoxStream<'static, Bytes>;

pub struct SwitchableStream {
    tx: Option<mpsc::Sender<Bytes>>,
    readable: Option<ReceiverStream<Bytes>>,
    forward: Option<JoinHandle<()>>,
    switches: u32,
    attached: bool,
}

impl SwitchableStream {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            tx: Some(tx),
            readable: Some(ReceiverStream::new(rx)),
            forward: None,
            switches: 0,
            attached: false,
        }
    }

    /// Hands out the single consumer-side stream. Returns `None` on every
    /// call after the first.
    pub fn take_readable(&mut self) -> Option<ReceiverStream<Bytes>> {
        self.readable.take()
    }

    /// Number of source switches so far. The first attach does not count.
    pub fn switches(&self) -> u32 {
        self.switches
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// False once the consumer dropped the readable side. Checked by the
    /// controller before issuing a continuation call.
    pub fn is_downstream_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Begin forwarding `source` into the downstream stream. If a previous
    /// source is still running, it is abandoned first: bytes it has not yet
    /// flushed are dropped, never merged. Every successful attach after the
    /// first increments the switch count.
    pub async fn attach_source(&mut self, mut source: ByteSource) -> CoreResult<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(RelayError::Validation(
                "cannot attach a source to a closed stream".into(),
            ));
        };

        // Make sure the old forward task is fully stopped before the new one
        // starts, so bytes cannot interleave across the switch.
        if let Some(handle) = self.forward.take() {
            handle.abort();
            let _ = handle.await;
        }
        if self.attached {
            self.switches += 1;
        } else {
            self.attached = true;
        }

        let tx = tx.clone();
        self.forward = Some(tokio::spawn(async move {
            while let Some(chunk) = source.next().await {
                // Send failure means the consumer went away; stop reading.
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    /// Finalize the downstream stream so the consumer observes end-of-stream.
    /// Idempotent; safe to call in any state.
    pub async fn close(&mut self) {
        if let Some(handle) = self.forward.take() {
            handle.abort();
            let _ = handle.await;
        }
        // Dropping the last sender is what ends the consumer stream.
        self.tx = None;
    }
}

impl Default for SwitchableStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn source_of(parts: &[&str]) -> ByteSource {
        let owned: Vec<Bytes> = parts.iter().map(|p| Bytes::from(p.to_string())).collect();
        Box::pin(stream::iter(owned))
    }

    async fn collect(readable: ReceiverStream<Bytes>) -> String {
        let chunks: Vec<Bytes> = readable.collect().await;
        chunks
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn single_source_flows_through() {
        let mut stream = SwitchableStream::new();
        let mut readable = stream.take_readable().unwrap();

        stream.attach_source(source_of(&["Hello ", "world."])).await.unwrap();
        assert_eq!(stream.switches(), 0);

        assert_eq!(readable.next().await.unwrap(), Bytes::from_static(b"Hello "));
        assert_eq!(readable.next().await.unwrap(), Bytes::from_static(b"world."));
        stream.close().await;
        assert!(readable.next().await.is_none());
    }

    #[tokio::test]
    async fn sequential_sources_concatenate_in_order() {
        let mut stream = SwitchableStream::new();
        let mut readable = stream.take_readable().unwrap();

        stream.attach_source(source_of(&["Part1 "])).await.unwrap();
        assert_eq!(readable.next().await.unwrap(), Bytes::from_static(b"Part1 "));

        stream.attach_source(source_of(&["Part2."])).await.unwrap();
        assert_eq!(stream.switches(), 1);
        assert_eq!(readable.next().await.unwrap(), Bytes::from_static(b"Part2."));

        stream.close().await;
        assert!(readable.next().await.is_none());
    }

    #[tokio::test]
    async fn abandoned_source_stops_producing() {
        let mut stream = SwitchableStream::new();
        let mut readable = stream.take_readable().unwrap();

        // First source yields one chunk and then hangs forever.
        let hanging: ByteSource = Box::pin(
            stream::iter(vec![Bytes::from_static(b"A")]).chain(stream::pending()),
        );
        stream.attach_source(hanging).await.unwrap();
        assert_eq!(readable.next().await.unwrap(), Bytes::from_static(b"A"));

        stream.attach_source(source_of(&["B"])).await.unwrap();
        assert_eq!(stream.switches(), 1);

        // Only the new source's bytes arrive after the switch.
        assert_eq!(readable.next().await.unwrap(), Bytes::from_static(b"B"));
        stream.close().await;
        assert_eq!(collect(readable).await, "");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut stream = SwitchableStream::new();
        let mut readable = stream.take_readable().unwrap();
        stream.attach_source(source_of(&["x"])).await.unwrap();
        assert_eq!(readable.next().await.unwrap(), Bytes::from_static(b"x"));

        stream.close().await;
        stream.close().await;
        assert!(stream.is_closed());

        // Exactly one end-of-stream, no stray items after it.
        assert!(readable.next().await.is_none());
        assert!(readable.next().await.is_none());
    }

    #[tokio::test]
    async fn attach_after_close_is_rejected() {
        let mut stream = SwitchableStream::new();
        let _readable = stream.take_readable().unwrap();
        stream.close().await;

        let err = stream.attach_source(source_of(&["late"])).await.unwrap_err();
        match err {
            RelayError::Validation(msg) => assert!(msg.contains("closed")),
            other => panic!("expected Validation error, got {other:?}"),
        }
        // Switch count is untouched by the failed attach.
        assert_eq!(stream.switches(), 0);
    }

    #[tokio::test]
    async fn readable_can_only_be_taken_once() {
        let mut stream = SwitchableStream::new();
        assert!(stream.take_readable().is_some());
        assert!(stream.take_readable().is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_is_observable() {
        let mut stream = SwitchableStream::new();
        let readable = stream.take_readable().unwrap();
        assert!(stream.is_downstream_connected());

        drop(readable);
        assert!(!stream.is_downstream_connected());
    }

    #[tokio::test]
    async fn switch_count_never_decreases() {
        let mut stream = SwitchableStream::new();
        let _readable = stream.take_readable().unwrap();
        for expected in 0..3u32 {
            stream.attach_source(source_of(&["x"])).await.unwrap();
            assert_eq!(stream.switches(), expected);
        }
        stream.close().await;
        assert_eq!(stream.switches(), 2);
    }
}
