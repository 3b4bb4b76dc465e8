use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::config::Host;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};

use crate::errors::{Error, Result};

/// One row of a result set, with every column rendered as text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Option<String>)>) -> Self {
        Self { columns }
    }

    /// `None` if the row has no such column, `Some(None)` if the column is NULL.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.as_deref())
    }
}

/// Something that can open database sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Human-readable description of the target, without credentials.
    fn target(&self) -> String;

    async fn connect(&self) -> Result<Self::Connection>;
}

/// A live database session. Only one statement batch is ever in flight per connection.
#[async_trait]
pub trait Connection: Send + Sized + 'static {
    /// Run `sql` (possibly several `;`-separated statements) and return the rows produced.
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>>;

    async fn close(self) -> Result<()>;
}

pub struct PgConnector {
    config: Config,
}

impl PgConnector {
    /// Parse a libpq-style connection string or `postgres://` URL.
    pub fn new(url: &str) -> Result<Self> {
        let config: Config = url.parse()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    fn target(&self) -> String {
        let hosts = self
            .config
            .get_hosts()
            .iter()
            .map(|host| match host {
                Host::Tcp(name) => name.clone(),
                #[cfg(unix)]
                Host::Unix(path) => path.display().to_string(),
            })
            .collect::<Vec<_>>()
            .join(",");
        let ports = self
            .config
            .get_ports()
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let dbname = self.config.get_dbname().unwrap_or_default();
        if ports.is_empty() {
            format!("{hosts}/{dbname}")
        } else {
            format!("{hosts}:{ports}/{dbname}")
        }
    }

    async fn connect(&self) -> Result<PgConnection> {
        let (client, connection) = self.config.connect(NoTls).await?;

        // The connection object performs the actual I/O; it runs until the client is dropped.
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {e}");
            }
        });

        Ok(PgConnection { client, driver })
    }
}

pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>> {
        let messages = self.client.simple_query(sql).await?;
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let columns = row
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(i, column)| (column.name().to_string(), row.get(i).map(str::to_owned)))
                    .collect();
                rows.push(Row::new(columns));
            }
        }
        Ok(rows)
    }

    async fn close(self) -> Result<()> {
        let PgConnection { client, driver } = self;
        drop(client);
        driver.await.map_err(|e| Error::Other(Box::new(e)))
    }
}
