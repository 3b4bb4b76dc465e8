#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pgloadgen::db::{Connection, Connector, Row};
use pgloadgen::errors::{Error, Result};

/// In-memory stand-in for a database: counts sessions and answers `fetch_max` with a
/// configurable value.
#[derive(Default)]
pub struct MockDb {
    /// Zero-based connection attempt that should fail, if any.
    pub fail_connect_at: Option<usize>,
    pub connect_attempts: AtomicUsize,
    pub open: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail_close: AtomicBool,
    pub fail_queries: AtomicBool,
    /// Fail every query without suspending, like a client whose connection has dropped.
    pub fail_queries_immediately: AtomicBool,
    pub max_id: Mutex<Option<String>>,
    pub executed: Mutex<Vec<String>>,
}

impl MockDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_at(index: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_connect_at: Some(index),
            ..Self::default()
        })
    }

    pub fn set_max_id(&self, value: Option<&str>) {
        *self.max_id.lock().unwrap() = value.map(str::to_owned);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

pub struct MockConnector {
    pub db: Arc<MockDb>,
}

impl MockConnector {
    pub fn new(db: Arc<MockDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    fn target(&self) -> String {
        "mock/test".to_string()
    }

    async fn connect(&self) -> Result<MockConnection> {
        let attempt = self.db.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.db.fail_connect_at == Some(attempt) {
            return Err(Error::Other(
                format!("connection refused (attempt {attempt})").into(),
            ));
        }
        self.db.open.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            db: Arc::clone(&self.db),
        })
    }
}

pub struct MockConnection {
    db: Arc<MockDb>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.db.executed.lock().unwrap().push(sql.to_string());
        if self.db.fail_queries_immediately.load(Ordering::SeqCst) {
            return Err(Error::Other("connection closed".into()));
        }
        tokio::task::yield_now().await;
        if self.db.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::Other("injected query failure".into()));
        }
        if sql.starts_with("SELECT MAX(id)") {
            let max = self.db.max_id.lock().unwrap().clone();
            return Ok(vec![Row::new(vec![("max".to_string(), max)])]);
        }
        Ok(Vec::new())
    }

    async fn close(self) -> Result<()> {
        self.db.open.fetch_sub(1, Ordering::SeqCst);
        self.db.closed.fetch_add(1, Ordering::SeqCst);
        if self.db.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Other("close failed".into()));
        }
        Ok(())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}
