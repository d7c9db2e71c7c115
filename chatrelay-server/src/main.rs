use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use chatrelay_core::config::Config;
use chatrelay_server::{AppState, app};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Streaming chat relay with transparent response continuation",
    long_about = None
)]
struct Cli {
    /// Path to a JSON or TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override, e.g. 0.0.0.0:9000.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrelay=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    let listen = cli.listen.unwrap_or_else(|| cfg.server.listen.clone());

    let state = AppState::from_config(&cfg)?;
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tracing::info!(%listen, "chatrelay listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
