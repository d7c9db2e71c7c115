//! Streaming primitives exposed by chatrelay.
//!
//! Contract:
//! - Providers may emit 0..n `Delta` events.
//! - The stream **must** terminate with exactly one terminal event: `Finish` or `Error`.
//! - After a terminal event, no further events are emitted.
//!
//! This module intentionally avoids deriving `Clone` / `PartialEq` because `Error` contains
//! `RelayError`, which is not (and should not be) `Clone` or `Eq`.

/// What the adapter receives incrementally from a provider.
#[non_exhaustive]
#[derive(Debug)]
pub enum StreamEvent {
    /// Partial assistant text (delta). Empty string is allowed but should be rare.
    Delta(String),
    /// Provider finished generating, with the reason it stopped.
    Finish { reason: crate::model::FinishReason },
    /// Transport/parse error surfaced mid-stream; stream ends after this.
    Error(crate::error::RelayError),
}

impl StreamEvent {
    /// Returns true if this event terminates the stream (`Finish` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error(_))
    }

    /// Convenience accessor for `Delta` contents.
    pub fn as_delta(&self) -> Option<&str> {
        match self {
            Self::Delta(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of streaming events. `StreamProvider::stream_chat` returns this.
pub type BoxStreamEv = futures::stream::BoxStream<'static, StreamEvent>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FinishReason;

    #[test]
    fn helpers_work() {
        let d = StreamEvent::Delta("hi".into());
        assert!(!d.is_terminal());
        assert_eq!(d.as_delta(), Some("hi"));

        let f = StreamEvent::Finish {
            reason: FinishReason::Stop,
        };
        assert!(f.is_terminal());
        assert_eq!(f.as_delta(), None);

        let e = StreamEvent::Error(crate::error::RelayError::Validation("x".into()));
        assert!(e.is_terminal());
    }
}
