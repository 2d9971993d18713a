use crate::{
    config::AppConfig,
    connection::{ConnectionGuard, Connector},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use diesel_async::pooled_connection::PoolableConnection;
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::certs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info};

pub type PgPool = Pool<PgConnectionManager>;

pub type PgGuard = ConnectionGuard<PgConnector>;

/// Builds pools for the connection guard. A pool only counts as connected
/// once a connection has actually been checked out.
#[derive(Clone)]
pub struct PgConnector {
    manager: PgConnectionManager,
    max_pool_size: u32,
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let manager = PgConnectionManager::new(config)?;
        Ok(Self {
            manager,
            max_pool_size: config.max_pool_size,
            connect_timeout: config.connect_timeout,
        })
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = PgPool;

    async fn connect(&self) -> Result<PgPool> {
        // bb8 reports a failing connect only as `TimedOut`; dial once
        // directly so the guard records the real cause.
        let connection = tokio::time::timeout(self.connect_timeout, self.manager.connect())
            .await
            .context("timed out connecting to database")?
            .context("initial database connectivity check failed")?;
        drop(connection);

        let pool = Pool::builder()
            .max_size(self.max_pool_size)
            .connection_timeout(self.connect_timeout)
            .build(self.manager.clone())
            .await
            .context("failed to build PostgreSQL connection pool")?;
        info!(max_size = self.max_pool_size, "database pool ready");

        Ok(pool)
    }

    async fn close(&self, pool: PgPool) {
        let state = pool.state();
        debug!(
            connections = state.connections,
            idle = state.idle_connections,
            "dropping database pool"
        );
        drop(pool);
    }
}

#[derive(Clone)]
pub struct PgConnectionManager {
    config: PgConfig,
    tls: PgTls,
    /// Server-side cap on each statement, matching the request timeout, so an
    /// abandoned query does not keep running on a pooled connection.
    statement_timeout: Duration,
}

#[derive(Clone)]
enum PgTls {
    None,
    Rustls(MakeRustlsConnect),
}

impl PgConnectionManager {
    fn new(config: &AppConfig) -> Result<Self> {
        let pg_config = config
            .database_url
            .parse::<PgConfig>()
            .context("invalid CLIENTQL_DATABASE_URL")?;

        let client_auth = match (config.pg_ssl_cert.as_deref(), config.pg_ssl_key.as_deref()) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => anyhow::bail!("PGSSLCERT and PGSSLKEY must both be set (or neither)"),
        };

        let tls = match config.pg_ssl_root_cert.as_deref() {
            Some(root) => PgTls::Rustls(MakeRustlsConnect::new(tls_client_config(
                root,
                client_auth,
            )?)),
            None if client_auth.is_some() => {
                anyhow::bail!("PGSSLCERT/PGSSLKEY require PGSSLROOTCERT")
            }
            None => PgTls::None,
        };

        Ok(Self {
            config: pg_config,
            tls,
            statement_timeout: config.request_timeout,
        })
    }

    fn uses_tls(&self) -> bool {
        matches!(self.tls, PgTls::Rustls(_))
    }

    fn session_setup(&self) -> String {
        format!(
            "SET statement_timeout = {}",
            self.statement_timeout.as_millis()
        )
    }
}

#[async_trait]
impl ManageConnection for PgConnectionManager {
    type Connection = AsyncPgConnection;
    type Error = anyhow::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let connection = match &self.tls {
            PgTls::None => {
                let (client, connection) = self.config.connect(NoTls).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
            PgTls::Rustls(connector) => {
                let (client, connection) = self.config.connect(connector.clone()).await?;
                AsyncPgConnection::try_from_client_and_connection(client, connection).await
            }
        };
        let mut connection = connection.map_err(|err| anyhow::anyhow!(err))?;
        connection
            .batch_execute(&self.session_setup())
            .await
            .context("failed to apply statement_timeout")?;
        debug!(
            tls = self.uses_tls(),
            statement_timeout_ms = self.statement_timeout.as_millis() as u64,
            "opened database connection"
        );
        Ok(connection)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.batch_execute("SELECT 1").await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
    }
}

fn tls_client_config(root: &str, client_auth: Option<(&str, &str)>) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in read_certificates(root, "PGSSLROOTCERT")? {
        roots
            .add(cert)
            .map_err(|_| anyhow::anyhow!("invalid certificate in PGSSLROOTCERT"))?;
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    match client_auth {
        None => Ok(builder.with_no_client_auth()),
        Some((cert, key)) => builder
            .with_client_auth_cert(read_certificates(cert, "PGSSLCERT")?, read_private_key(key)?)
            .context("failed to configure database client certificate"),
    }
}

fn open_pem(path: &str, var: &str) -> Result<BufReader<File>> {
    let file = File::open(Path::new(path))
        .with_context(|| format!("failed to open {var} file '{path}'"))?;
    Ok(BufReader::new(file))
}

fn read_certificates(path: &str, var: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path, var)?;
    let chain = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse {var}"))?;

    if chain.is_empty() {
        anyhow::bail!("{var} contained no certificates");
    }

    Ok(chain)
}

fn read_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path, "PGSSLKEY")?;
    rustls_pemfile::private_key(&mut reader)
        .context("failed to parse PGSSLKEY")?
        .context("PGSSLKEY contained no private keys")
}
