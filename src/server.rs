use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{DocStore, MemoryDocStore, PgDocStore, StoreError};
use crate::routes::{create_admin_routes, create_relay_routes};
use crate::services::spawn_persistence_scheduler;
use crate::utils::{shutdown_channel, shutdown_requested};
use crate::ws::RoomRegistry;
use crate::AppState;

#[derive(Debug)]
pub enum ServerError {
    Bind { addr: String, source: std::io::Error },
    Io(std::io::Error),
    Store(StoreError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
            ServerError::Store(e) => write!(f, "Document store error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Io(e) => Some(e),
            ServerError::Store(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::Store(e)
    }
}

/// Open the configured document store
///
/// Without a database URL the relay keeps documents in memory only.
pub async fn open_store(config: &Config) -> Result<Arc<dyn DocStore>, ServerError> {
    match &config.db_url {
        Some(db_url) => {
            let store = PgDocStore::connect_lazy(db_url, config.db_max_connections)?;
            if let Err(e) = store.ensure_schema().await {
                error!("Failed to prepare database schema: {}", e);
                warn!("Persistence will fail until the database is reachable");
            }
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database URL configured - documents are kept in memory and lost on restart");
            Ok(Arc::new(MemoryDocStore::new()))
        }
    }
}

async fn bind(addr: String) -> Result<TcpListener, ServerError> {
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

fn spawn_listener(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown).await })
            .await;
        if let Err(e) = result {
            error!("{} listener failed: {}", name, e);
        }
    })
}

/// Entry point of the relay: binds the listeners and starts the background tasks
pub struct RelayServer;

impl RelayServer {
    pub async fn bind(config: &Config, store: Arc<dyn DocStore>) -> Result<RunningServer, ServerError> {
        let relay_listener = bind(config.server_address()).await?;
        let admin_listener = match config.api_address() {
            Some(addr) => Some(bind(addr).await?),
            None => None,
        };
        let local_addr = relay_listener.local_addr()?;
        let admin_addr = match &admin_listener {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };

        let registry = Arc::new(RoomRegistry::new(store));
        let (shutdown, shutdown_rx) = shutdown_channel();
        let app_state = Arc::new(AppState::new(registry.clone(), shutdown_rx.clone()));

        let scheduler = spawn_persistence_scheduler(
            registry.clone(),
            config.persist_interval(),
            shutdown_rx.clone(),
        );
        let relay = spawn_listener(
            "Relay",
            relay_listener,
            create_relay_routes(app_state.clone()),
            shutdown_rx.clone(),
        );
        info!("📡 Relay listening on ws://{}", local_addr);

        let admin = admin_listener.map(|listener| {
            spawn_listener("Admin", listener, create_admin_routes(app_state), shutdown_rx)
        });
        match admin_addr {
            Some(addr) => info!("📚 Admin API on http://{}/api, Swagger UI on http://{}/swagger", addr, addr),
            None => info!("Admin API disabled"),
        }

        Ok(RunningServer {
            local_addr,
            admin_addr,
            registry,
            shutdown,
            relay,
            admin,
            scheduler,
            grace: config.shutdown_grace(),
        })
    }
}

/// Handle of a started relay
pub struct RunningServer {
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    registry: Arc<RoomRegistry>,
    shutdown: watch::Sender<bool>,
    relay: JoinHandle<()>,
    admin: Option<JoinHandle<()>>,
    scheduler: JoinHandle<()>,
    grace: Duration,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Serve until `signal` resolves (or the relay listener dies), then shut down
    pub async fn run_until<F>(mut self, signal: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = signal => info!("Shutdown signal received"),
            _ = &mut self.relay => error!("Relay listener stopped unexpectedly"),
        }
        self.shutdown().await;
    }

    /// Stop accepting, let every connection leave its room, then drain the scheduler.
    pub async fn shutdown(mut self) {
        info!("Shutting down relay...");
        self.shutdown.send_replace(true);

        if !self.relay.is_finished()
            && tokio::time::timeout(self.grace, &mut self.relay).await.is_err()
        {
            warn!("Relay listener did not stop within {:?}", self.grace);
        }
        if let Some(admin) = self.admin.take() {
            if tokio::time::timeout(self.grace, admin).await.is_err() {
                warn!("Admin listener did not stop within {:?}", self.grace);
            }
        }

        // Connections saw the flag and are leaving their rooms
        if tokio::time::timeout(self.grace, self.registry.wait_until_empty())
            .await
            .is_err()
        {
            warn!(
                "{} rooms still open after {:?}, leaving them to the final flush",
                self.registry.room_count(),
                self.grace
            );
        }

        if let Err(e) = (&mut self.scheduler).await {
            error!("Persistence scheduler failed: {}", e);
        }
        info!("Relay stopped");
    }
}

/// Resolve on Ctrl-C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_shuts_down() {
        let server = RelayServer::bind(&local_config(), Arc::new(MemoryDocStore::new()))
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.admin_addr().is_none());

        tokio::time::timeout(Duration::from_secs(5), server.shutdown())
            .await
            .expect("shutdown should finish");
    }

    #[tokio::test]
    async fn occupied_port_is_a_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            port: taken.local_addr().unwrap().port(),
            ..local_config()
        };
        let err = RelayServer::bind(&config, Arc::new(MemoryDocStore::new()))
            .await
            .err()
            .expect("port is already in use");
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn open_store_without_database_uses_memory() {
        let store = open_store(&Config::default()).await;
        assert!(store.is_ok());
    }
}
