use thiserror::Error;

/// Core error type for chatrelay.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by provider {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    /// The provider kept stopping on its token limit and the turn ran out of
    /// allowed continuation switches. Fatal for the request; bytes already
    /// flushed downstream stay delivered.
    #[error("maximum continuation segments reached: {switches} switches, cap {max_segments}")]
    SegmentBudgetExhausted { switches: u32, max_segments: u32 },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, RelayError>;
