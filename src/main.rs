use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use roombook::audit::TracingAudit;
use roombook::config::Config;
use roombook::engine::{Engine, WalStore};
use roombook::users::StaticDirectory;

#[derive(Debug, Parser)]
#[command(name = "roombook", about = "Meeting room reservations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Resolve reservations whose user is still free text against the user directory.
    RelinkUsers,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env();

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let users = match &config.users_file {
        Some(path) => {
            let dir = StaticDirectory::load(path)?;
            info!(path = %path.display(), users = dir.len(), "user directory loaded");
            dir
        }
        None => {
            tracing::warn!("ROOMBOOK_USERS_FILE not set, user directory is empty");
            StaticDirectory::default()
        }
    };
    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(users),
        Arc::new(TracingAudit),
        config.engine_settings(),
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store, engine).await?,
        Command::RelinkUsers => {
            let report = engine.relink_users().await?;
            info!(
                scanned = report.scanned,
                relinked = report.relinked,
                unresolved = report.unresolved.len(),
                "user relink finished"
            );
            for id in &report.unresolved {
                info!("unresolved: {id}");
            }
            store.close().await?;
        }
    }
    Ok(())
}

async fn serve(
    config: Config,
    store: Arc<WalStore>,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error>> {
    roombook::observability::init(config.metrics_port)?;

    let threshold = config.compact_threshold;
    let compactor_store = store.clone();
    tokio::spawn(async move {
        roombook::compactor::run_compactor(compactor_store, threshold).await;
    });

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roombook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {}", engine.rooms().join(","));
    info!("  reservations: {} ({} active)", store.len(), store.active_count());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    roombook::http::serve(listener, engine, shutdown_signal()).await?;

    info!("flushing WAL...");
    store.close().await?;
    info!("roombook stopped");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
    info!("shutdown signal received, draining requests");
}
