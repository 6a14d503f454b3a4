mod app;
mod session;

use anyhow::Context;
use authgate::{config::Settings, register_default_modules, storage::FlatFileStorage, Authgate};
use clap::Parser;
use session::SessionTable;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const MODULES: [&str; 5] = ["auth", "confirm", "lock", "expire", "recover"];

#[derive(Parser, Debug)]
#[command(name = "authgate-server", about = "Authentication server")]
struct Cli {
    /// TOML settings file; `authgate.toml`/`authgate.json` in the working directory otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(settings: &Settings, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::load().context("loading settings")?,
    };
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    settings.validate()?;
    init_tracing(&settings, cli.json_logs);

    let storage = Arc::new(
        FlatFileStorage::new(&settings.data_dir)
            .with_context(|| format!("opening data dir {}", settings.data_dir.display()))?,
    );
    let addr = settings.bind_addr;
    let sessions = SessionTable::new(Duration::from_secs(settings.expire_after_secs));

    let mut builder = Authgate::builder(settings, storage.clone()).with_confirm_store(storage);
    register_default_modules(&mut builder)?;
    let authgate = Arc::new(builder.build(MODULES)?);
    for (module, templates) in authgate.templates() {
        debug!(module = %module, ?templates, "module templates");
    }

    let app = app::build_router(authgate, sessions);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, modules = ?MODULES, "authgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("authgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
