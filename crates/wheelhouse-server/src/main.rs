//! Wheelhouse server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 90s turns, one-second ticks, port 4000
//! wheelhouse-server --bind 0.0.0.0:4000
//!
//! # Short turns and a coarser deadband for a demo event
//! wheelhouse-server --default-time 30 --deadband 10
//! ```

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wheelhouse_core::{ArbiterConfig, GlobalConfig};
use wheelhouse_server::{DriverConfig, Server, ServerRuntimeConfig};

/// Shared remote-vehicle control server
#[derive(Parser, Debug)]
#[command(name = "wheelhouse-server")]
#[command(about = "Time-sliced remote control arbitration for one vehicle")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4000")]
    bind: String,

    /// Seconds of control granted to newly queued sessions
    #[arg(long, default_value_t = wheelhouse_core::config::DEFAULT_TIME_ALLOWED)]
    default_time: u32,

    /// Scheduler tick in milliseconds; each tick is one countdown second
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Missed heartbeat intervals before the holder is revoked (0 disables)
    #[arg(long, default_value_t = wheelhouse_core::config::DEFAULT_HEARTBEAT_MISSES)]
    heartbeat_misses: u32,

    /// Quantization step for command percentages
    #[arg(long, default_value_t = wheelhouse_core::config::DEFAULT_DEADBAND_STEP)]
    deadband: u8,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Wheelhouse server starting");
    tracing::info!("Binding to {}", args.bind);

    let arbiter = ArbiterConfig {
        time: GlobalConfig { default_time_allowed: args.default_time, ..GlobalConfig::default() },
        tick_interval: Duration::from_millis(args.tick_ms),
        heartbeat_misses: args.heartbeat_misses,
        deadband_step: args.deadband,
        ..ArbiterConfig::default()
    };

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        driver: DriverConfig { arbiter, max_connections: args.max_connections },
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
