//! chatrelay-core: response-stream continuation engine.
//!
//! Streams chat completions from LLM providers and transparently continues a
//! response when the provider stops at its token limit, splicing the
//! continuation segments into one uninterrupted byte stream for the client.

pub mod adapter;
pub mod config;
pub mod controller;
pub mod error;
pub mod http_client;
pub mod model;
pub mod prompt;
pub mod provider;
pub mod provider_factory;
pub mod providers;
pub mod stream;
pub mod switchable;
pub mod telemetry;
