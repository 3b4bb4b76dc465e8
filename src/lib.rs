pub mod db;
pub mod dispatch;
pub mod errors;
pub mod generator;
pub mod metrics;
pub mod metrics_server;
pub mod pool;
pub mod workload;

// Re-export commonly used types
pub use crate::db::{Connection, Connector, PgConnector};
pub use crate::generator::{LifecycleState, LoadGenerator, LoadgenConfig};
pub use crate::metrics::LoadgenMetrics;
