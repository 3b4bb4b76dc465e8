use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONNECTION, CONTENT_TYPE, HeaderValue};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;

use crate::errors::{Error, Result};
use crate::metrics::{LoadgenMetrics, TEXT_FORMAT};

pub const METRICS_PATH: &str = "/metrics";

/// HTTP server for serving Prometheus metrics
pub struct MetricsServer {
    listener: TcpListener,
    metrics: Arc<LoadgenMetrics>,
}

impl MetricsServer {
    /// Bind the listening socket. Failing here is a startup error; nothing is served until
    /// [`MetricsServer::run`].
    pub async fn bind(addr: SocketAddr, metrics: Arc<LoadgenMetrics>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::MetricsBind { addr, source })?;
        Ok(Self { listener, metrics })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve scrape requests - this runs until the task is dropped
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Serving metrics on http://{addr}{METRICS_PATH}"),
            Err(e) => tracing::warn!("Serving metrics on unknown address: {e}"),
        }

        let listener = &self.listener;
        loop {
            let stream = accept_with_backoff(|| listener.accept()).await;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics = Arc::clone(&metrics);
                    async move {
                        let path = req.uri().path();
                        let response = respond(req.method(), path, || metrics.collect());
                        Ok::<_, Infallible>(response)
                    }
                });
                if let Err(err) = Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await
                {
                    tracing::error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

/// Pause after a failed accept. Errors such as EMFILE persist until other sockets close.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Call `accept` until it yields a connection, sleeping [`ACCEPT_BACKOFF`] after each error.
async fn accept_with_backoff<F, Fut, S, A>(mut accept: F) -> S
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(S, A)>>,
{
    loop {
        match accept().await {
            Ok((stream, _)) => return stream,
            Err(e) => {
                tracing::warn!("Error accepting metrics connection: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Route one request: `GET /metrics` returns the snapshot rendered by `collect`, anything
/// else is rejected without calling it.
pub fn respond<F>(method: &Method, path: &str, collect: F) -> Response<Full<Bytes>>
where
    F: FnOnce() -> Result<String>,
{
    if path != METRICS_PATH {
        return empty(StatusCode::NOT_FOUND);
    }
    if *method != Method::GET {
        return empty(StatusCode::METHOD_NOT_ALLOWED);
    }

    match collect() {
        Ok(metrics_output) => {
            let mut response = Response::new(Full::new(Bytes::from(metrics_output)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
            response
        }
        Err(e) => {
            tracing::warn!("failed to collect metrics: {e}");
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}
