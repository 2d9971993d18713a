use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub max_pool_size: u32,
    pub connect_timeout: Duration,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    clientql_listen_addr: Option<String>,
    #[serde(default)]
    clientql_listen_host: Option<String>,
    #[serde(default)]
    clientql_listen_port: Option<u16>,
    #[serde(default)]
    clientql_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    clientql_max_pool_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    clientql_connect_timeout_secs: u64,
    #[serde(default)]
    pgsslrootcert: Option<String>,
    #[serde(default)]
    pgsslcert: Option<String>,
    #[serde(default)]
    pgsslkey: Option<String>,
    #[serde(default)]
    clientql_api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    clientql_request_timeout_secs: u64,
}

const DEFAULT_PORT: u16 = 8490;

const fn default_pool_size() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

const fn default_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse CLIENTQL_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.clientql_listen_addr,
            raw.clientql_listen_host,
            raw.clientql_listen_port,
        )?;

        let database_url = raw
            .clientql_database_url
            .or(raw.database_url)
            .or_else(|| env::var("DATABASE_URL").ok())
            .context("CLIENTQL_DATABASE_URL or DATABASE_URL must be set")?;

        let api_key = raw.clientql_api_key.and_then(|key| {
            let key = key.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Ok(Self {
            listen_addr,
            database_url,
            max_pool_size: raw.clientql_max_pool_size.max(1),
            connect_timeout: Duration::from_secs(raw.clientql_connect_timeout_secs.max(1)),
            pg_ssl_root_cert: raw.pgsslrootcert,
            pg_ssl_cert: raw.pgsslcert,
            pg_ssl_key: raw.pgsslkey,
            api_key,
            request_timeout: Duration::from_secs(raw.clientql_request_timeout_secs.max(1)),
        })
    }

    /// Defaults for running the service in-process (tests, tooling) against `database_url`.
    pub fn embedded(database_url: String) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url,
            max_pool_size: 2,
            connect_timeout: Duration::from_secs(default_connect_timeout_secs()),
            pg_ssl_root_cert: None,
            pg_ssl_cert: None,
            pg_ssl_key: None,
            api_key: None,
            request_timeout: Duration::from_secs(default_timeout_secs()),
        }
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid CLIENTQL_LISTEN_ADDR value")?
            .next()
            .context("CLIENTQL_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(DEFAULT_PORT);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid clientql listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}
