use anyhow::{Context, Result};
use clap::Parser;

use device_relay::api::relay_router;
use device_relay::config::{Config, Subcommands};
use device_relay::device::{launch_url, new_client_id};
use device_relay::events::{init_logging, EventEmitter};
use device_relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();

    match cfg.command.clone() {
        Some(Subcommands::LaunchUrl {
            base_url,
            client_id,
        }) => {
            let base_url = base_url.unwrap_or_else(|| cfg.base_url());
            let client_id = client_id.unwrap_or_else(new_client_id);
            println!("{}", launch_url(&base_url, &client_id));
            Ok(())
        }
        Some(Subcommands::Serve) | None => run_serve(cfg).await,
    }
}

async fn run_serve(cfg: Config) -> Result<()> {
    init_logging(&cfg)?;

    let relay = Relay::new(cfg.relay_options(), EventEmitter::new(cfg.json_output));
    let router = relay_router(relay.clone(), cfg.public_dir.clone());

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind relay on {addr}"))?;
    tracing::info!(
        addr = %addr,
        public_dir = %cfg.public_dir.display(),
        "relay listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server error")?;

    tracing::info!(
        agents = relay.agent_count(),
        pending = relay.pending().len(),
        "relay stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::warn!(error = %error, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
