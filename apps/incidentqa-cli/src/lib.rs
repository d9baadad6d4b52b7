//! HTTP surface and shared wiring for the `incidentqa` binaries.
pub mod routes;
pub mod state;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use incidentqa_core::config::{resolve_with_base, Config, Settings};

use crate::state::AppState;

/// Loads settings from `path` when given, otherwise from the working
/// directory's `config.toml` chain. Relative data paths resolve against the
/// config file's directory.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<(Settings, PathBuf)> {
    let (config, base) = match path {
        Some(p) => (Config::load_file(p)?, p.parent().map(Path::to_path_buf).unwrap_or_default()),
        None => (Config::load()?, std::env::current_dir()?),
    };
    let mut settings = config.settings()?;
    settings.data.index_dir = resolve_with_base(&base, &settings.data.index_dir).to_string_lossy().into_owned();
    settings.data.incidents_dir = resolve_with_base(&base, &settings.data.incidents_dir).to_string_lossy().into_owned();
    if let Some(dir) = settings.embed.model_dir.take() {
        settings.embed.model_dir = Some(resolve_with_base(&base, dir).to_string_lossy().into_owned());
    }
    Ok((settings, base))
}

/// `RUST_LOG` wins over `log.level`; an unparseable level falls back to `info`.
pub fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let addr: SocketAddr = settings.server.bind.parse()?;
    let state = AppState::from_settings(&settings)?;
    let app = routes::router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
