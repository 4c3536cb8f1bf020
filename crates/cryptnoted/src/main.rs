//! cryptnoted: cryptnote daemon
//!
//! Usage:
//!   cryptnoted [--config /etc/cryptnote/config.toml] [--log info] [--log-format json|text]
//!
//! Hosts the expiry reaper over the configured note store and serves
//! Prometheus metrics plus liveness/readiness probes.

mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cryptnoted", version, about = "cryptnote one-time note daemon")]
struct Cli {
    /// Path to cryptnote.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CRYPTNOTE_CONFIG",
        default_value = "/etc/cryptnote/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides daemon.log_level
    #[arg(long, env = "CRYPTNOTE_LOG")]
    log: Option<String>,

    /// Log format; overrides daemon.log_format
    #[arg(long, env = "CRYPTNOTE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config is read before logging starts so its levels can apply.
    let config = cryptnote_reveal::bootstrap::load_config(&cli.config).await?;

    let level = cli.log.unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli.log_format.unwrap_or(match config.daemon.log_format.as_str() {
        "text" => LogFormat::Text,
        _ => LogFormat::Json,
    });
    init_logging(&level, format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "cryptnoted starting"
    );

    daemon::run(config).await
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
