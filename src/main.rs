use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use session_core::{
    cache,
    config::SessionCoreConfig,
    db::DbPool,
    events::{new_instance_id, start_event_listener},
    observability,
    persistence::DurablePersistenceWriter,
    session::{SessionService, start_session_sweeper},
    users::StaticUserDirectory,
};

/// CLI arguments for the session core
#[derive(Parser, Debug)]
#[command(version, about = "Session and token management core", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "session-core.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the sweeper and event listener until interrupted (default)
    Serve,
    /// Run a single expiry sweep and exit
    SweepOnce,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match SessionCoreConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                args.config.display(),
                e
            );
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        std::process::exit(1);
    }

    tracing::info!(config_file = %args.config.display(), "Configuration loaded");

    let service = match build_service(&config).await {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start session core");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match args.command {
        Some(Command::SweepOnce) => run_sweep_once(&service).await,
        Some(Command::Serve) | None => run_serve(service, &config).await,
    }
}

/// Connect the cache and database and assemble the service.
async fn build_service(
    config: &SessionCoreConfig,
) -> Result<SessionService, Box<dyn std::error::Error + Send + Sync>> {
    let cache = cache::from_config(&config.cache).await?;

    let persistence = if config.database.is_none() {
        tracing::info!("No database configured, session history will not be recorded");
        DurablePersistenceWriter::disabled()
    } else {
        let pool = DbPool::from_config(&config.database).await?;
        if config.database.run_migrations() {
            pool.run_migrations().await?;
        }
        DurablePersistenceWriter::new(pool.sessions())
    };

    let instance_id = new_instance_id();
    tracing::info!(instance_id = %instance_id, "Session core instance starting");

    // User management lives elsewhere; the standalone binary admits any user
    let users = Arc::new(StaticUserDirectory::allow_all());

    Ok(SessionService::new(
        config.sessions.clone(),
        cache,
        persistence,
        users,
        instance_id,
    )?)
}

async fn run_sweep_once(service: &SessionService) {
    match service.cleanup_expired_sessions().await {
        Ok(report) => {
            tracing::info!(
                scanned = report.scanned,
                stale_removed = report.stale_removed,
                expired = report.expired,
                "Sweep complete"
            );
            println!(
                "scanned={} stale_removed={} expired={}",
                report.scanned, report.stale_removed, report.expired
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Sweep failed");
            eprintln!("Error: Sweep failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_serve(service: SessionService, config: &SessionCoreConfig) {
    let sweeper = tokio::spawn(start_session_sweeper(
        service.clone(),
        config.sessions.clone(),
    ));

    let listener = match start_event_listener(service.events()).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Cross-instance event listener unavailable");
            None
        }
    };

    shutdown_signal().await;

    tracing::info!("Shutdown signal received, stopping background tasks");
    sweeper.abort();
    if let Some(listener) = listener {
        listener.abort();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
