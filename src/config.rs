use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::keys::DEFAULT_ROUTER_ROOT;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub forgejo: ForgejoConfig,
    pub reaper: ReaperConfig,
    /// Where to write Prometheus text-format run metrics, if anywhere.
    pub metrics_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Redis / KeyDB
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RedisConfig {
    /// Hostname, optionally with a `redis://` scheme and `:port`.
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub tls: bool,
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Forgejo
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ForgejoConfig {
    /// Base URL of the Forgejo instance (e.g. `https://git.example.com`).
    pub host: String,
    /// API token sent as `Authorization: token ...`.
    pub token: Option<String>,
    /// Upper bound on a single existence check.
    pub timeout: Duration,
}

impl fmt::Debug for ForgejoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForgejoConfig")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub const DEFAULT_FORGEJO_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// Reaper behaviour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Report what would be deleted without touching the store.
    pub dry_run: bool,
    /// `COUNT` hint for each `SCAN` round-trip.
    pub scan_count: u32,
    /// Root key of the Traefik Redis provider.
    pub router_root: String,
}

pub const DEFAULT_SCAN_COUNT: u32 = 100;

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            scan_count: DEFAULT_SCAN_COUNT,
            router_root: DEFAULT_ROUTER_ROOT.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Sanity checks that the argument parser cannot express.
pub fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.redis.host.trim().is_empty(),
        "Redis host must not be empty"
    );
    anyhow::ensure!(config.redis.port != 0, "Redis port must not be 0");

    let host = config.forgejo.host.trim();
    anyhow::ensure!(
        host.starts_with("http://") || host.starts_with("https://"),
        "Forgejo host must be an http(s) URL, got {host:?}"
    );
    anyhow::ensure!(
        !config.forgejo.timeout.is_zero(),
        "Forgejo timeout must be greater than zero"
    );

    anyhow::ensure!(
        config.reaper.scan_count > 0,
        "scan count must be greater than zero"
    );
    anyhow::ensure!(
        !config.reaper.router_root.is_empty() && !config.reaper.router_root.ends_with('/'),
        "Traefik root key must be non-empty without a trailing '/'"
    );
    Ok(())
}
