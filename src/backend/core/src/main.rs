//! Portguard Server - Main entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use portguard_core::{
    api::{self, AppState},
    config::Config,
    db::{DatabaseConnector, SimulatedDatabase},
    events::EventBroadcaster,
    process::SimulatedHost,
    recovery::{HostBindings, RecoveryOrchestrator},
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "portguard-server", version, about = "Service health monitor and recovery orchestrator")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "PORTGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Act on an in-memory host instead of real processes and PostgreSQL
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let _telemetry = telemetry::init_telemetry(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        simulate = args.simulate,
        services = config.registry.services.len(),
        critical_ports = config.registry.critical_ports.len(),
        "Starting Portguard server"
    );

    let bindings = if args.simulate {
        let db: Arc<dyn DatabaseConnector> = Arc::new(SimulatedDatabase::healthy());
        HostBindings::simulated(SimulatedHost::new(), db)
    } else {
        HostBindings::os(&config)?
    };

    if bindings.db.is_configured() {
        match bindings.db.migrate().await {
            Ok(()) => tracing::info!("Database migrations applied"),
            Err(e) => tracing::warn!(error = %e, "Database migrations not applied at startup"),
        }
    } else {
        tracing::warn!("No database URL configured; database checks will report errors");
    }

    let events = Arc::new(EventBroadcaster::default());
    let orchestrator = RecoveryOrchestrator::new(&config, bindings, events)?;
    let app = api::build_router(AppState::new(orchestrator));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received");
}
