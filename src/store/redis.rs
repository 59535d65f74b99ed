//! KeyDB / Redis backed [`KeyValueStore`].
//!
//! Builds a [`fred::clients::Pool`] for the instance described in
//! [`crate::config::RedisConfig`], optionally enabling TLS via `rustls`.

use anyhow::{Context, Result};
use fred::clients::Pool;
use fred::interfaces::{ClientLike, KeysInterface};
use fred::types::config::{Config as FredConfig, ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::{Builder, CustomCommand, Value};
use tracing::{debug, trace};

use super::{KeyValueStore, ScanPage};
use crate::config::RedisConfig;

/// The reaper is sequential, so two connections are plenty.
const POOL_SIZE: usize = 2;

pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Build the pool and open its connections.
    ///
    /// Connectivity is verified separately with [`KeyValueStore::ping`].
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let (host, port) = parse_host_port(&config.host, config.port)?;
        let server_config = ServerConfig::new_centralized(host, port);

        let mut fred_config = FredConfig {
            server: server_config,
            ..FredConfig::default()
        };

        if config.tls {
            fred_config.tls = Some(TlsConnector::default_rustls()?.into());
        }

        if let Some(ref password) = config.password {
            fred_config.password = Some(password.clone());
        }

        let mut builder = Builder::from_config(fred_config);
        builder.set_policy(ReconnectPolicy::new_exponential(3, 100, 5_000, 2));

        let pool = builder
            .build_pool(POOL_SIZE)
            .context("failed to build Redis connection pool")?;
        pool.init()
            .await
            .with_context(|| format!("failed to connect to Redis at {host}:{port}"))?;

        tracing::info!(
            host,
            port,
            tls = config.tls,
            pool_size = POOL_SIZE,
            "Redis pool initialised"
        );

        Ok(Self { pool })
    }

    /// Close every connection in the pool.
    pub async fn disconnect(&self) -> Result<()> {
        self.pool.quit().await.context("Redis QUIT failed")?;
        debug!("Redis pool closed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let _: String = self.pool.ping(None).await.context("Redis PING failed")?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: u32) -> Result<ScanPage> {
        let reply: Value = self
            .pool
            .custom(
                CustomCommand::new_static("SCAN", None::<u16>, false),
                vec![
                    cursor.to_string(),
                    "MATCH".to_string(),
                    pattern.to_string(),
                    "COUNT".to_string(),
                    count.to_string(),
                ],
            )
            .await
            .context("Redis SCAN failed")?;

        let page = parse_scan_reply(reply)?;
        trace!(cursor, next = page.cursor, keys = page.keys.len(), "scan page");
        Ok(page)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self
            .pool
            .get(key)
            .await
            .with_context(|| format!("Redis GET {key} failed"))?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let removed: u64 = self
            .pool
            .del(key)
            .await
            .with_context(|| format!("Redis DEL {key} failed"))?;
        Ok(removed)
    }
}

/// Decode a `SCAN` reply: a two-element array of cursor and key list.
fn parse_scan_reply(reply: Value) -> Result<ScanPage> {
    let mut parts = reply.into_array().into_iter();
    let (Some(cursor), Some(keys), None) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("unexpected SCAN reply shape");
    };

    let cursor: String = cursor.convert().context("SCAN cursor is not a string")?;
    let cursor: u64 = cursor
        .parse()
        .with_context(|| format!("invalid SCAN cursor: {cursor}"))?;
    let keys: Vec<String> = keys.convert().context("SCAN keys are not strings")?;

    Ok(ScanPage { cursor, keys })
}

/// Split `host` into host and port.
///
/// `host` may carry a `redis://` / `rediss://` scheme and an explicit
/// `:port`, which takes precedence over `default_port`.  IPv6 addresses must
/// be bracketed (`[::1]` or `[::1]:6380`).
pub fn parse_host_port(host: &str, default_port: u16) -> Result<(&str, u16)> {
    let endpoint = host
        .trim_start_matches("rediss://")
        .trim_start_matches("redis://");
    let endpoint = endpoint.split('/').next().unwrap_or(endpoint);

    let parse_port = |port_str: &str| -> Result<u16> {
        port_str
            .parse()
            .with_context(|| format!("invalid port in Redis host: {endpoint}"))
    };

    if let Some(bracketed) = endpoint.strip_prefix('[') {
        let Some((addr, rest)) = bracketed.split_once(']') else {
            anyhow::bail!("unterminated IPv6 address in Redis host: {endpoint}");
        };
        return match rest.strip_prefix(':') {
            Some(port_str) => Ok((addr, parse_port(port_str)?)),
            None if rest.is_empty() => Ok((addr, default_port)),
            None => anyhow::bail!("unexpected text after IPv6 address in Redis host: {endpoint}"),
        };
    }

    anyhow::ensure!(
        endpoint.matches(':').count() <= 1,
        "IPv6 Redis host must be bracketed, e.g. [::1]:6379: {endpoint}"
    );

    if let Some((host, port_str)) = endpoint.split_once(':') {
        Ok((host, parse_port(port_str)?))
    } else {
        Ok((endpoint, default_port))
    }
}
