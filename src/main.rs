//! BoltKV - A Single-Threaded In-Memory Key-Value Server
//!
//! This is the main entry point for the BoltKV server.
//! It parses the command line, sets up logging and runs the reactor until
//! Ctrl+C is received.

use anyhow::Context;
use boltkv::config::{parse_eviction_policy, parse_memory_size, Config};
use boltkv::storage::EvictionPolicy;
use boltkv::Reactor;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// A single-threaded, Redis-compatible in-memory key-value server
#[derive(Debug, Parser)]
#[command(name = "boltkv", version, about)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = boltkv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = boltkv::DEFAULT_PORT)]
    port: u16,

    /// Number of logical databases
    #[arg(long, default_value_t = 16)]
    databases: usize,

    /// Memory bound such as 100mb or 2gb (0 disables the bound)
    #[arg(long, default_value = "0", value_parser = parse_memory_size)]
    maxmemory: usize,

    /// What to evict when the memory bound is reached
    #[arg(long, default_value = "noeviction", value_parser = parse_eviction_policy)]
    eviction_policy: EvictionPolicy,

    /// Maintenance ticks per second (active expiry, timeouts, rehashing)
    #[arg(long, default_value_t = 10)]
    hz: u32,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            host: self.host,
            port: self.port,
            databases: self.databases,
            max_memory: self.maxmemory,
            eviction_policy: self.eviction_policy,
            tick_hz: self.hz,
            ..Config::default()
        }
    }
}

fn print_banner(config: &Config) {
    println!(
        r#"
        ____        ____  __ ___    __
       / __ )____  / / /_/ //_/ |  / /
      / __  / __ \/ / __/ ,<  | | / /
     / /_/ / /_/ / / /_/ /| | | |/ /
    /_____/\____/_/\__/_/ |_| |___/

BoltKV v{} - Single-Threaded In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Server started on {}
Databases: {}   Max memory: {}   Policy: {}   Tick: {} Hz
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        boltkv::VERSION,
        config.bind_address(),
        config.databases,
        if config.max_memory == 0 {
            "unlimited".to_string()
        } else {
            format!("{} bytes", config.max_memory)
        },
        config.eviction_policy,
        config.tick_hz,
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = args.into_config();
    let mut reactor = Reactor::bind(config.clone())
        .await
        .with_context(|| format!("failed to start server on {}", config.bind_address()))?;

    print_banner(&config);
    info!(addr = %reactor.local_addr()?, "Listening");

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    reactor.run(shutdown).await?;

    info!("Server shutdown complete");
    Ok(())
}
