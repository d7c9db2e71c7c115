//! HTTP surface: a single streaming chat endpoint in front of the
//! continuation engine.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures_util::StreamExt;
use tower_http::trace::TraceLayer;

use chatrelay_core::adapter::StreamAdapter;
use chatrelay_core::config::Config;
use chatrelay_core::controller::ContinuationController;
use chatrelay_core::error::CoreResult;
use chatrelay_core::model::ChatTurnRequest;
use chatrelay_core::provider_factory::ProviderRegistry;

#[derive(Clone)]
pub struct AppState {
    controller: ContinuationController,
}

impl AppState {
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let registry = Arc::new(ProviderRegistry::from_config(cfg)?);
        let adapter = StreamAdapter::new(registry, cfg.limits.max_tokens);
        Ok(Self {
            controller: ContinuationController::new(adapter, cfg.limits),
        })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /api/chat
///
/// The response contract is deliberately coarse: anything that fails before
/// the first byte is an empty 500; once the 200 and its headers are out the
/// status is committed, and a mid-stream failure can only surface as a body
/// that ends early.
async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let req: ChatTurnRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting malformed chat request");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let turn = match state.controller.open_turn(req).await {
        Ok(turn) => turn,
        Err(e) => {
            tracing::error!(error = %e, "failed to open chat turn");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // The outcome resolves only after the stream closed; log it out of band.
    tokio::spawn(async move {
        match turn.outcome.await {
            Ok(Ok(summary)) => tracing::info!(
                segments = summary.segments,
                switches = summary.switches,
                "chat turn completed"
            ),
            Ok(Err(e)) => tracing::error!(error = %e, "chat turn failed mid-stream"),
            Err(_) => tracing::error!("chat turn driver dropped without an outcome"),
        }
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(turn.readable.map(Ok::<_, Infallible>)),
    )
        .into_response()
}
