//! Daemon lifecycle: bootstrap, serve, shut down.
//!
//! [`Daemon::start`] brings a node up in a fixed order:
//!
//! 1. Connect to `PostgreSQL`, retrying until the connect budget is spent
//! 2. Tear the schema down in test mode, then set it up
//! 3. Bind the listener
//! 4. Build the cluster from the listen address and the seeds, and dial the peers
//! 5. Build the cache and the session manager
//! 6. Spawn the cleanup sweep
//! 7. Serve HTTP until shutdown

use crate::config::Config;
use crate::discovery::{DiscoveryError, discover};
use mnemosyne_core::environment::{Clock, SystemClock};
use mnemosyne_core::{Storage, StorageError};
use mnemosyne_postgres::{PostgresStorage, PostgresStorageOptions, is_identifier};
use mnemosyne_runtime::metrics::{MetricsError, MetricsExporter};
use mnemosyne_runtime::retry::{RetryPolicy, retry_with_backoff};
use mnemosyne_runtime::{Cache, Cleanup, CleanupOutcome, Cluster, ClusterError, SessionManager};
use mnemosyne_web::{AppState, ClientError, HttpDialer, router};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Errors raised while starting or stopping the daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The store could not be reached or prepared.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// The listener could not be bound or served.
    #[error("server: {0}")]
    Io(#[from] std::io::Error),

    /// Peers could not be discovered.
    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    /// A peer could not be dialed.
    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),

    /// The peer client could not be built.
    #[error("peer client: {0}")]
    Client(#[from] ClientError),

    /// The metrics recorder could not be installed.
    #[error("metrics: {0}")]
    Metrics(#[from] MetricsError),

    /// A background task panicked.
    #[error("task failed: {0}")]
    Task(String),
}

/// A running node.
pub struct Daemon {
    addr: SocketAddr,
    storage: Arc<PostgresStorage>,
    manager: Arc<SessionManager>,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<std::io::Result<()>>,
    cleanup: Option<JoinHandle<CleanupOutcome>>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Bootstrap and serve on the configured host and port.
    ///
    /// # Errors
    ///
    /// Fails on the first bootstrap step that fails; nothing is left running.
    pub async fn start(config: Config) -> Result<Self, DaemonError> {
        let storage = connect_storage(&config).await?;
        let listener = TcpListener::bind(config.server.bind_addr()).await?;
        Self::launch(config, storage, listener).await
    }

    /// Bootstrap and serve on an already bound listener.
    ///
    /// `config.cluster.listen` must still name the address peers use to
    /// reach this node.
    ///
    /// # Errors
    ///
    /// As [`Daemon::start`].
    pub async fn start_with_listener(
        config: Config,
        listener: TcpListener,
    ) -> Result<Self, DaemonError> {
        let storage = connect_storage(&config).await?;
        Self::launch(config, storage, listener).await
    }

    async fn launch(
        config: Config,
        storage: Arc<PostgresStorage>,
        listener: TcpListener,
    ) -> Result<Self, DaemonError> {
        let addr = listener.local_addr()?;

        let cluster = connect_cluster(&config).await?;
        info!(
            listen = %cluster.listen(),
            nodes = cluster.len(),
            "Cluster connected"
        );

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(Cache::new(config.session.cache_ttl, clock.clone()));
        let manager = Arc::new(SessionManager::new(storage.clone(), cache, cluster));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let cleanup = Cleanup::new(storage.clone(), config.session.ttc)
            .with_policy(config.session.cleanup_policy)
            .with_clock(clock)
            .spawn(shutdown_rx.clone());
        info!(
            interval_secs = config.session.ttc.as_secs(),
            policy = %config.session.cleanup_policy,
            "Cleanup scheduled"
        );

        let mut exporter = MetricsExporter::new();
        exporter.start()?;
        let state = AppState::new(manager.clone())
            .with_metrics(Arc::new(exporter))
            .with_internal_errors_exposed(config.server.debug_errors);

        let app = router(state);
        let mut server_rx = shutdown_rx;
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_rx.wait_for(|stop| *stop).await;
                })
                .await
        });
        info!(%addr, "Listening");

        Ok(Self {
            addr,
            storage,
            manager,
            shutdown,
            server,
            cleanup: Some(cleanup),
        })
    }

    /// Address the HTTP server is bound to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The node's session manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Resolve when the cleanup sweep stops on its own.
    ///
    /// Under the fail-stop policy this is how a failed sweep surfaces.
    /// Pending forever once the outcome has been taken.
    pub async fn cleanup_stopped(&mut self) -> CleanupOutcome {
        let Some(handle) = self.cleanup.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = handle.await.unwrap_or_else(|e| {
            CleanupOutcome::Failed(StorageError::Database(format!("cleanup task failed: {e}")))
        });
        self.cleanup = None;
        outcome
    }

    /// Serve until `signal` resolves, then shut down.
    ///
    /// A sweep that stops on its own under the fail-stop policy is logged and
    /// the node keeps serving; only expiry stops.
    ///
    /// # Errors
    ///
    /// As [`Daemon::shutdown`].
    pub async fn serve_until<F>(mut self, signal: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);
        loop {
            tokio::select! {
                () = &mut signal => break,
                outcome = self.cleanup_stopped() => {
                    if let CleanupOutcome::Failed(err) = outcome {
                        error!(error = %err, "Session cleanup stopped, expired sessions are no longer swept");
                    }
                }
            }
        }
        self.shutdown().await
    }

    /// Stop serving, wait for the sweep, and close the pool.
    ///
    /// # Errors
    ///
    /// The server's own I/O error, or [`DaemonError::Task`] if a task panicked.
    pub async fn shutdown(self) -> Result<(), DaemonError> {
        info!("Shutting down");
        self.shutdown.send_replace(true);

        let served = self
            .server
            .await
            .map_err(|e| DaemonError::Task(e.to_string()))?;
        if let Some(cleanup) = self.cleanup {
            let outcome = cleanup.await.map_err(|e| DaemonError::Task(e.to_string()))?;
            info!(?outcome, "Cleanup stopped");
        }
        self.storage.pool().close().await;
        info!("Shutdown complete");

        served.map_err(DaemonError::from)
    }
}

/// Connect, ping, and prepare the schema.
async fn connect_storage(config: &Config) -> Result<Arc<PostgresStorage>, DaemonError> {
    let pg = &config.postgres;
    for name in [&pg.schema, &pg.table] {
        if !is_identifier(name) {
            return Err(DaemonError::Config(format!(
                "{name:?} is not a valid schema or table name"
            )));
        }
    }

    let policy = RetryPolicy::builder()
        .initial_delay(pg.connect_retry)
        .max_delay(pg.connect_retry)
        .timeout(pg.connect_timeout)
        .build();
    let storage = retry_with_backoff(&policy, "database connect", || async {
        let pool = mnemosyne_postgres::connect(&pg.url, pg.max_connections, pg.connect_retry).await?;
        let storage = PostgresStorage::new(
            pool,
            PostgresStorageOptions {
                schema: pg.schema.clone(),
                table: pg.table.clone(),
                ttl: config.session.ttl,
            },
        )?;
        storage.ping().await?;
        Ok::<_, StorageError>(storage)
    })
    .await?;
    info!(schema = %pg.schema, table = %pg.table, "Database connected");

    if pg.test_mode {
        storage.teardown().await?;
    }
    storage.setup().await?;

    Ok(Arc::new(storage))
}

/// Collect the seeds and dial every peer.
async fn connect_cluster(config: &Config) -> Result<Cluster, DaemonError> {
    let mut seeds = config.cluster.seeds.clone();
    if let Some(url) = &config.cluster.discovery_url {
        seeds.extend(discover(&reqwest::Client::new(), url).await?);
    }

    let dialer = match &config.cluster.peer_ca_file {
        Some(path) => HttpDialer::with_root_certificate(&tokio::fs::read(path).await?)?,
        None => HttpDialer::new()?,
    };

    let mut cluster = Cluster::new(config.cluster.listen.clone(), seeds);
    cluster.connect(&dialer).await?;
    Ok(cluster)
}
