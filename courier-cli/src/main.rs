//! Courier CLI - inspect configuration and exercise the bus

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::config::CourierConfig;
use courier_core::pubsub::{Bus, HandlerResult, InboundMessage};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier pub/sub CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to courier.toml and COURIER_* variables)
    #[arg(short, long, global = true, env = "COURIER_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as JSON
    Config,
    /// Publish messages through an in-process bus and print statistics
    Demo {
        /// Number of messages to publish
        #[arg(short = 'n', long, default_value_t = 1000)]
        count: u64,
        /// Subscription pattern
        #[arg(short, long, default_value = "demo")]
        pattern: String,
        /// Treat the pattern as a regular expression
        #[arg(long)]
        regex: bool,
        /// Channel to publish on
        #[arg(long, default_value = "demo")]
        channel: String,
    },
    /// Version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<CourierConfig> {
    let config = match path {
        Some(path) => CourierConfig::from_file(path),
        None => CourierConfig::load(),
    };
    config.context("loading configuration")
}

async fn run_demo(
    config: CourierConfig,
    count: u64,
    pattern: &str,
    regex: bool,
    channel: &str,
) -> Result<()> {
    let bus: Bus<Arc<AtomicU64>> = Bus::builder().config(config.bus).build()?;
    bus.start()?;

    let received = Arc::new(AtomicU64::new(0));
    bus.subscribe(
        pattern,
        regex,
        |_: &InboundMessage, received: &Arc<AtomicU64>| -> HandlerResult {
            received.fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
        received.clone(),
    )?;

    let started = Instant::now();
    for i in 0..count {
        bus.publish(channel, &i.to_le_bytes()).await?;
    }
    bus.flush().await?;
    let elapsed = started.elapsed();

    bus.stop().await;

    tracing::info!(
        received = received.load(Ordering::Relaxed),
        elapsed_ms = elapsed.as_millis() as u64,
        "Demo finished"
    );
    println!("{}", serde_json::to_string_pretty(&bus.stats())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("courier {}", env!("CARGO_PKG_VERSION"));
            println!("courier-core {}", courier_core::VERSION);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Demo {
            count,
            pattern,
            regex,
            channel,
        } => run_demo(config, count, &pattern, regex, &channel).await?,
    }

    Ok(())
}
