use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("postgres error: {}", with_causes(.0))]
    Postgres(#[from] tokio_postgres::Error),
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("utf8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("creating connection {index} of {total}: {source}")]
    Connect {
        index: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("starting metric server on {addr}: {source}")]
    MetricsBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to update maxid: {0}")]
    MaxId(String),
    #[error("starting load generator: {0}")]
    Startup(#[source] Arc<Error>),
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    #[error("other error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Render `err` followed by each cause in its `source()` chain that its own text does not
/// already include. `tokio_postgres::Error` prints only its kind ("db error"), keeping the
/// server's message in the chain.
fn with_causes(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
