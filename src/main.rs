mod config;
mod forge;
mod keys;
mod metrics;
mod reaper;
mod store;
mod summary;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{
    Config, DEFAULT_FORGEJO_TIMEOUT_SECS, DEFAULT_SCAN_COUNT, ForgejoConfig, RedisConfig,
    ReaperConfig,
};
use crate::forge::forgejo::ForgejoOracle;
use crate::keys::DEFAULT_ROUTER_ROOT;
use crate::metrics::MetricsRegistry;
use crate::reaper::{ReapContext, Reaper};
use crate::store::KeyValueStore;
use crate::store::redis::RedisStore;
use crate::summary::EXIT_FATAL;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pages-reaper",
    version,
    about = "Removes custom-domain mappings whose repository no longer has a .pages file"
)]
struct Cli {
    /// Redis host, optionally `host:port`.
    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    redis_port: u16,

    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    redis_password: Option<String>,

    /// Connect to Redis over TLS.
    #[arg(long, env = "REDIS_TLS")]
    redis_tls: bool,

    /// Forgejo base URL (e.g. `https://git.example.com`).
    #[arg(long, env = "FORGEJO_HOST")]
    forgejo_host: String,

    #[arg(long, env = "FORGEJO_TOKEN", hide_env_values = true)]
    forgejo_token: Option<String>,

    /// Seconds to wait for each repository check.
    #[arg(
        long,
        env = "FORGEJO_TIMEOUT",
        default_value_t = DEFAULT_FORGEJO_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    forgejo_timeout: u64,

    /// `COUNT` hint for each SCAN round-trip.
    #[arg(
        long,
        env = "REAPER_SCAN_COUNT",
        default_value_t = DEFAULT_SCAN_COUNT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    scan_count: u32,

    /// Root key used by the Traefik Redis provider.
    #[arg(long, env = "TRAEFIK_ROOT_KEY", default_value = DEFAULT_ROUTER_ROOT)]
    traefik_root_key: String,

    /// Write run metrics here in Prometheus text format.
    #[arg(long, env = "REAPER_METRICS_FILE")]
    metrics_file: Option<PathBuf>,

    #[arg(long, env = "REAPER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Show what would be deleted without deleting anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            redis: RedisConfig {
                host: self.redis_host,
                port: self.redis_port,
                password: self.redis_password.filter(|p| !p.is_empty()),
                tls: self.redis_tls,
            },
            forgejo: ForgejoConfig {
                host: self.forgejo_host,
                token: self.forgejo_token.filter(|t| !t.is_empty()),
                timeout: Duration::from_secs(self.forgejo_timeout),
            },
            reaper: ReaperConfig {
                dry_run: self.dry_run,
                scan_count: self.scan_count,
                router_root: self.traefik_root_key,
            },
            metrics_file: self.metrics_file,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing(format: LogFormat) {
    let json = (format == LogFormat::Json)
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text = (format == LogFormat::Text)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json)
        .with(text)
        .init();
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::warn!("received SIGINT, stopping scan"),
        () = terminate => tracing::warn!("received SIGTERM, stopping scan"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// Connect, reap, disconnect.  Returns the process exit status.
async fn run(config: Config) -> Result<u8> {
    config::validate_config(&config)?;

    tracing::info!(
        redis_host = %config.redis.host,
        redis_port = config.redis.port,
        forgejo = %config.forgejo.host,
        dry_run = config.reaper.dry_run,
        "starting pages-reaper"
    );

    // ---- Infrastructure clients ----
    let oracle = Arc::new(ForgejoOracle::new(&config.forgejo)?);
    let store = Arc::new(
        RedisStore::connect(&config.redis)
            .await
            .context("Redis is unreachable")?,
    );
    if let Err(e) = store.ping().await {
        let _ = store.disconnect().await;
        return Err(e.context("Redis is unreachable"));
    }
    tracing::info!("Redis connection successful");

    let metrics = MetricsRegistry::new();
    let ctx = ReapContext {
        store: Arc::clone(&store) as Arc<dyn KeyValueStore>,
        oracle,
        metrics: metrics.clone(),
    };

    // ---- Interrupt handling ----
    let cancel = CancellationToken::new();
    let signal_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    // ---- Reap ----
    let result = Reaper::new(ctx, config.reaper.clone(), cancel).run().await;
    signal_handle.abort();

    if let Err(e) = store.disconnect().await {
        tracing::warn!(error = %format!("{e:#}"), "failed to close Redis connections");
    }

    let summary = result?;
    println!("\n{summary}\n");

    if let Some(ref path) = config.metrics_file {
        if let Err(e) = metrics.write_textfile(path).await {
            tracing::warn!(error = %format!("{e:#}"), "failed to write metrics file");
        }
    }

    Ok(summary.exit_status())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli.into_config()).await {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fatal error");
            eprintln!("\nFatal error: {e:?}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
