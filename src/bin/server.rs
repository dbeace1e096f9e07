#![forbid(unsafe_code)]

//! HTTP entry point. Resolves configuration, prepares the storage tree and
//! serves the download routes until Ctrl+C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use newtube_grab::{
    config::{ConfigOverrides, ServiceConfig, resolve_config},
    http::{AppState, router},
    pipeline::Downloader,
    ytdlp::ensure_program_available,
};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "newtube-grab", about = "Fetch remote media and serve the stored files")]
struct Args {
    /// Port to listen on (default 3001, or PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Address to bind (default 0.0.0.0, or HOST).
    #[arg(long)]
    host: Option<String>,
    /// Directory holding videos/ and audios/ (default ./public).
    #[arg(long)]
    storage_root: Option<PathBuf>,
    /// Dotenv file consulted after the process environment.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl From<Args> for ConfigOverrides {
    fn from(args: Args) -> Self {
        Self {
            storage_root: args.storage_root,
            host: args.host,
            port: args.port,
            env_path: args.env_file,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = resolve_config(Args::parse().into()).context("resolving configuration")?;
    let layout = config.storage_layout();
    layout
        .prepare()
        .await
        .with_context(|| format!("preparing {}", layout.root().display()))?;
    probe_tools(&config).await;

    let app = router(AppState::new(Downloader::from_config(&config)));
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(%addr, root = %layout.root().display(), "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// Missing tools only cost the routes that need them, so startup goes on.
async fn probe_tools(config: &ServiceConfig) {
    if let Err(err) = ensure_program_available(&config.yt_dlp, "--version").await {
        warn!(error = %err, "yt-dlp unavailable; both download routes will fail");
    }
    if let Err(err) = ensure_program_available(&config.ffmpeg, "-version").await {
        warn!(error = %err, "ffmpeg unavailable; /downloadmp3 will fail");
    }
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_become_overrides() {
        let args = Args::try_parse_from([
            "newtube-grab",
            "--port",
            "4000",
            "--storage-root",
            "/srv/public",
            "--env-file",
            "prod.env",
        ])
        .unwrap();
        let overrides = ConfigOverrides::from(args);
        assert_eq!(overrides.port, Some(4000));
        assert_eq!(overrides.storage_root, Some(PathBuf::from("/srv/public")));
        assert_eq!(overrides.env_path, Some(PathBuf::from("prod.env")));
        assert!(overrides.host.is_none());
    }

    #[test]
    fn no_flags_means_no_overrides() {
        let overrides = ConfigOverrides::from(Args::try_parse_from(["newtube-grab"]).unwrap());
        assert!(overrides.port.is_none());
        assert!(overrides.storage_root.is_none());
    }
}
