use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::db::{Connection, Connector};
use crate::errors::{Error, Result};
use crate::metrics::LoadgenMetrics;

/// A connection together with its slot in the pool.
pub struct PooledConnection<C> {
    pub index: usize,
    pub conn: C,
}

enum BuildState {
    Building,
    Ready,
    RollingBack(Error),
    Failed(Error),
}

/// Fixed-size set of connections opened at startup.
///
/// A pool only exists once every connection is open: construction either yields all of
/// them or rolls back whatever it managed to open.
pub struct ConnectionPool<C: Connection> {
    connections: Vec<PooledConnection<C>>,
    metrics: Arc<LoadgenMetrics>,
}

impl<C: Connection> ConnectionPool<C> {
    /// Open `size` connections one after another. Connecting sequentially keeps test setup
    /// from storming the target database.
    ///
    /// On the first failure every connection opened so far is closed (close errors are
    /// logged and otherwise ignored) and that first failure is returned.
    #[tracing::instrument(skip(connector, metrics))]
    pub async fn establish<K>(
        connector: &K,
        size: NonZeroUsize,
        metrics: Arc<LoadgenMetrics>,
    ) -> Result<Self>
    where
        K: Connector<Connection = C>,
    {
        let total = size.get();
        let mut connections: Vec<PooledConnection<C>> = Vec::with_capacity(total);
        let mut state = BuildState::Building;

        loop {
            state = match state {
                BuildState::Building if connections.len() == total => BuildState::Ready,
                BuildState::Building => {
                    let index = connections.len();
                    tracing::debug!("creating connection {index}");
                    match connector.connect().await {
                        Ok(conn) => {
                            tracing::debug!("created connection {index}");
                            metrics.nconns.inc();
                            connections.push(PooledConnection { index, conn });
                            BuildState::Building
                        }
                        Err(source) => BuildState::RollingBack(Error::Connect {
                            index,
                            total,
                            source: Box::new(source),
                        }),
                    }
                }
                BuildState::RollingBack(err) => {
                    tracing::debug!(
                        "rolling back {} connection(s) after: {err}",
                        connections.len()
                    );
                    close_all(std::mem::take(&mut connections), &metrics).await;
                    BuildState::Failed(err)
                }
                BuildState::Ready => {
                    return Ok(Self {
                        connections,
                        metrics,
                    });
                }
                BuildState::Failed(err) => return Err(err),
            };
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Hand each connection to its owner. The gauge keeps counting them as open.
    pub fn into_connections(self) -> Vec<PooledConnection<C>> {
        self.connections
    }

    /// Close every connection and bring the gauge back down.
    pub async fn close(self) {
        close_all(self.connections, &self.metrics).await;
    }
}

async fn close_all<C: Connection>(connections: Vec<PooledConnection<C>>, metrics: &LoadgenMetrics) {
    for PooledConnection { index, conn } in connections {
        if let Err(e) = conn.close().await {
            tracing::warn!("closing connection {index}: {e}");
        }
        metrics.nconns.dec();
    }
}
