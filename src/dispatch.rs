use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use crate::db::{Connection, Row};
use crate::errors::{Error, Result};
use crate::metrics::LoadgenMetrics;
use crate::workload::{self, MaxIdCache, Operation, OperationType, Selection};

/// What happened to one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Error,
    /// Never submitted; the operation needs a max id and none is known yet.
    Skipped,
}

/// Drives one connection: pick an operation, submit it, record the result, repeat.
pub struct DispatchLoop<C: Connection> {
    index: usize,
    conn: C,
    metrics: Arc<LoadgenMetrics>,
    max_id: Arc<MaxIdCache>,
    rng: StdRng,
}

impl<C: Connection> DispatchLoop<C> {
    pub fn new(
        index: usize,
        conn: C,
        metrics: Arc<LoadgenMetrics>,
        max_id: Arc<MaxIdCache>,
    ) -> Self {
        Self::with_rng(index, conn, metrics, max_id, StdRng::from_entropy())
    }

    pub fn with_rng(
        index: usize,
        conn: C,
        metrics: Arc<LoadgenMetrics>,
        max_id: Arc<MaxIdCache>,
        rng: StdRng,
    ) -> Self {
        Self {
            index,
            conn,
            metrics,
            max_id,
            rng,
        }
    }

    /// Dispatch operations back to back for as long as the task lives. Individual query
    /// failures are counted and never end the loop.
    ///
    /// Yields after every operation: a dead connection fails without suspending, and the
    /// loop must not hold its worker thread while that lasts.
    pub async fn run(mut self) {
        tracing::debug!("dispatch loop {} started", self.index);
        loop {
            self.step().await;
            tokio::task::yield_now().await;
        }
    }

    /// Select and run a single operation.
    pub async fn step(&mut self) -> Outcome {
        let draw: f64 = self.rng.r#gen();
        match workload::select(draw, self.max_id.get(), &mut self.rng) {
            Selection::Run(op) => self.dispatch(op).await,
            Selection::Skip(kind) => {
                self.metrics.record_skip(kind);
                tracing::trace!(kind = kind.as_str(), "skipped query: no max id yet");
                Outcome::Skipped
            }
        }
    }

    /// Submit `op` on this loop's connection and record its result.
    pub async fn dispatch(&mut self, op: Operation) -> Outcome {
        let kind = op.kind;
        tracing::trace!(kind = kind.as_str(), "begin query");

        let timer = self.metrics.start_query(kind);
        let result = match self.conn.execute(&op.sql).await {
            Ok(rows) if kind == OperationType::FetchMax => self.update_max_id(&rows),
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        let elapsed = timer.finish(&result);

        let label = if result.is_ok() { "ok" } else { "error" };
        tracing::trace!(
            kind = kind.as_str(),
            sql = %op.sql,
            result = label,
            time_us = elapsed.as_micros() as u64,
            "finished query"
        );

        match result {
            Ok(()) => Outcome::Ok,
            Err(e) => {
                tracing::debug!("connection {}: {kind} query failed: {e}", self.index);
                Outcome::Error
            }
        }
    }

    /// Store the max id returned by a `fetch_max`. A NULL max (empty table) leaves the
    /// cached value alone.
    fn update_max_id(&self, rows: &[Row]) -> Result<()> {
        let result = parse_max_id(rows).map(|max| {
            if let Some(max) = max {
                self.max_id.set(max);
            }
        });
        if let Err(e) = &result {
            tracing::error!("{e}");
        }
        result
    }
}

fn parse_max_id(rows: &[Row]) -> Result<Option<i64>> {
    let [row] = rows else {
        return Err(Error::MaxId(format!("expected 1 row, found {}", rows.len())));
    };
    match row.get("max") {
        None => Err(Error::MaxId("result has no \"max\" column".to_string())),
        Some(None) => Ok(None),
        Some(Some(text)) => text
            .parse::<i64>()
            .map(Some)
            .map_err(|e| Error::MaxId(format!("parsing {text:?}: {e}"))),
    }
}
