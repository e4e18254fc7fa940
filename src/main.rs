use doc_relay::config::Config;
use doc_relay::server::{open_store, shutdown_signal, RelayServer};
use std::panic;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "doc_relay=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting relay...");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open document store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = match RelayServer::bind(&config, store).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start relay: {}", e);
            return ExitCode::FAILURE;
        }
    };

    server.run_until(shutdown_signal()).await;
    ExitCode::SUCCESS
}
