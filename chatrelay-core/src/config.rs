use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Providers {
    pub openai: Option<ProviderCfg>,
    pub anthropic: Option<ProviderCfg>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderCfg {
    /// Name of the environment variable that contains the API key.
    pub api_key_env: String,
    /// Optional base URL override (defaults to the provider's public API).
    #[serde(default)]
    pub base: Option<String>,
    /// Default model used when the request does not name one.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_max_segments() -> u32 {
    2
}
fn default_max_tokens() -> u32 {
    8_192
}

/// Continuation budget for one chat turn.
///
/// `max_response_segments` caps the number of stream switches; `max_tokens`
/// is forwarded to the provider per segment and is not enforced locally.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LimitsCfg {
    #[serde(default = "default_max_segments")]
    pub max_response_segments: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LimitsCfg {
    fn default() -> Self {
        Self {
            max_response_segments: default_max_segments(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 300000ms; streamed
    /// generations can legitimately run for minutes)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: Providers,
    #[serde(default)]
    pub limits: LimitsCfg,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub server: ServerCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::RelayError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::RelayError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::RelayError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// A segment cap of zero would reject every `length` finish outright.
    pub fn validate(&self) -> crate::error::CoreResult<()> {
        if self.limits.max_response_segments == 0 {
            return Err(crate::error::RelayError::Validation(
                "limits.max_response_segments must be >= 1".into(),
            ));
        }
        Ok(())
    }
}
