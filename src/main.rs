use std::sync::Arc;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use warden::authz::{web, Enforcer, KdlFileAdapter, Model};
use warden::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "RBAC/ABAC policy enforcement service")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "WARDEN_CONFIG")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // a broken model is fatal
    let model = Model::load(&settings.authz.model_path)?;

    if let Some(dir) = settings.authz.policy_path.parent() {
        std::fs::create_dir_all(dir).into_diagnostic()?;
    }
    let adapter = KdlFileAdapter::new(&settings.authz.policy_path);
    let enforcer = Arc::new(Enforcer::open(model, adapter)?);

    let addr = settings.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "Policy enforcement API listening");

    axum::serve(listener, web::router(Arc::clone(&enforcer)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    enforcer.teardown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
