use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::db::Connector;
use crate::dispatch::DispatchLoop;
use crate::errors::{Error, Result};
use crate::metrics::LoadgenMetrics;
use crate::metrics_server::MetricsServer;
use crate::pool::ConnectionPool;
use crate::workload::MaxIdCache;

/// Validated startup configuration.
#[derive(Clone, Debug)]
pub struct LoadgenConfig {
    /// Number of connections, and so of concurrently running dispatch loops.
    pub concurrency: NonZeroUsize,
    /// Where the metrics endpoint listens. Port 0 picks a free port.
    pub metrics_addr: SocketAddr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Running,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Uninitialized => "not yet started",
            LifecycleState::Initializing => "initialization in progress",
            LifecycleState::Running => "running",
            LifecycleState::Failed => "failed",
        })
    }
}

/// Brings up the pool and the metrics endpoint, then keeps one dispatch loop busy per
/// connection.
pub struct LoadGenerator<K: Connector> {
    config: LoadgenConfig,
    connector: K,
    state: LifecycleState,
    error: Option<Arc<Error>>,
    metrics: Arc<LoadgenMetrics>,
    max_id: Arc<MaxIdCache>,
    metrics_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl<K: Connector> LoadGenerator<K> {
    pub fn new(config: LoadgenConfig, connector: K) -> Result<Self> {
        let metrics = Arc::new(LoadgenMetrics::new(&connector.target())?);
        Ok(Self {
            config,
            connector,
            state: LifecycleState::Uninitialized,
            error: None,
            metrics,
            max_id: Arc::new(MaxIdCache::new()),
            metrics_addr: None,
            tasks: Vec::new(),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The fatal startup error, once the generator has failed.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_deref()
    }

    pub fn metrics(&self) -> &Arc<LoadgenMetrics> {
        &self.metrics
    }

    pub fn max_id(&self) -> Option<i64> {
        self.max_id.get()
    }

    /// Address the metrics endpoint is bound to, once running.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Open the pool, then the metrics endpoint, then start one dispatch loop per
    /// connection. Returns as soon as the loops are spawned.
    ///
    /// May only be called once. Any startup failure leaves the generator `Failed` with no
    /// loops running.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != LifecycleState::Uninitialized {
            let msg = format!("start() called while {}", self.state);
            tracing::error!("{msg}");
            return Err(Error::AssertionFailed(msg));
        }

        tracing::debug!("starting load generator");
        self.state = LifecycleState::Initializing;

        match self.init().await {
            Ok((pool, server)) => {
                self.state = LifecycleState::Running;
                self.spawn(pool, server);
                Ok(())
            }
            Err(e) => {
                let err = Arc::new(e);
                self.fail(Arc::clone(&err))?;
                Err(Error::Startup(err))
            }
        }
    }

    /// Record a fatal error. The first error wins; failing again is a no-op.
    pub fn fail(&mut self, err: Arc<Error>) -> Result<()> {
        match self.state {
            LifecycleState::Failed => Ok(()),
            LifecycleState::Initializing => {
                tracing::debug!("load generator failed: {err}");
                self.state = LifecycleState::Failed;
                self.error = Some(err);
                Ok(())
            }
            state => Err(Error::AssertionFailed(format!(
                "fail() called while {state}: {err}"
            ))),
        }
    }

    async fn init(&mut self) -> Result<(ConnectionPool<K::Connection>, MetricsServer)> {
        let pool = ConnectionPool::establish(
            &self.connector,
            self.config.concurrency,
            Arc::clone(&self.metrics),
        )
        .await?;

        let server =
            match MetricsServer::bind(self.config.metrics_addr, Arc::clone(&self.metrics)).await {
                Ok(server) => server,
                Err(e) => {
                    pool.close().await;
                    return Err(e);
                }
            };
        self.metrics_addr = server.local_addr().ok();

        Ok((pool, server))
    }

    fn spawn(&mut self, pool: ConnectionPool<K::Connection>, server: MetricsServer) {
        self.tasks.push(tokio::spawn(server.run()));
        for pooled in pool.into_connections() {
            let dispatch = DispatchLoop::new(
                pooled.index,
                pooled.conn,
                Arc::clone(&self.metrics),
                Arc::clone(&self.max_id),
            );
            self.tasks.push(tokio::spawn(dispatch.run()));
        }
        tracing::info!(
            "load generator running with {} connection(s)",
            self.config.concurrency
        );
    }

    /// Stop the dispatch loops and the metrics endpoint. Connections owned by the loops are
    /// dropped with them.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        if self.state == LifecycleState::Running {
            self.metrics.nconns.sub(self.config.concurrency.get() as i64);
        }
        tracing::debug!("load generator stopped");
    }
}
