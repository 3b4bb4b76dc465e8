use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use tracing_subscriber::EnvFilter;

use pgloadgen::workload::CREATE_TABLE_SQL;
use pgloadgen::{Connection, Connector, LoadGenerator, LoadgenConfig, PgConnector};

#[derive(Parser, Debug)]
#[command(
    name = "pgloadgen",
    version,
    about = "Generate a mixed read/insert/update workload against PostgreSQL"
)]
struct Args {
    /// Number of connections, each running queries back to back
    #[arg(short = 'c', long = "concurrency", default_value = "8")]
    concurrency: NonZeroUsize,

    /// PostgreSQL connection string or URL
    #[arg(short = 'u', long = "pg-url", env = "PGLOADGEN_PG_URL")]
    pg_url: String,

    /// Address to serve /metrics on
    #[arg(long = "http-host", default_value = "127.0.0.1")]
    http_host: IpAddr,

    /// Port to serve /metrics on
    #[arg(short = 'p', long = "http-port", default_value_t = 9145)]
    http_port: u16,

    /// Create the target table if it does not exist before starting
    #[arg(long = "create-table")]
    create_table: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let connector = PgConnector::new(&args.pg_url).wrap_err("parsing --pg-url")?;

    if args.create_table {
        let mut conn = connector.connect().await.wrap_err("connecting to create table")?;
        conn.execute(CREATE_TABLE_SQL).await.wrap_err("creating table")?;
        conn.close().await?;
        tracing::info!("ensured table exists on {}", connector.target());
    }

    let config = LoadgenConfig {
        concurrency: args.concurrency,
        metrics_addr: SocketAddr::new(args.http_host, args.http_port),
    };
    let mut generator = LoadGenerator::new(config, connector)?;
    generator.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupted, shutting down");
    generator.shutdown().await;

    Ok(())
}
