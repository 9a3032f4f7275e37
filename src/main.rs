use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use armada::config::AppConfig;
use armada::orchestrator::Orchestrator;
use armada::registry::CrawlerRegistry;

#[derive(Parser)]
#[command(
    name = "armada",
    version,
    about = "Crawler fleet orchestrator: health monitoring, job tracking, metrics",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until interrupted
    Run {
        /// Config file path; environment variables are used when absent
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Validate a fleet file and exit
    Check {
        /// Fleet file path
        #[arg(short, long, default_value = "config/fleet.toml")]
        fleet_file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    match cli.command {
        Commands::Run { config } => {
            let config = match config {
                Some(path) => AppConfig::from_file(std::path::Path::new(&path))?,
                None => AppConfig::from_env()?,
            };
            run(config).await?;
        }

        Commands::Check { fleet_file } => {
            check(&fleet_file).await?;
        }
    }

    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    armada::telemetry::init_telemetry()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Armada starting");

    let orchestrator = Orchestrator::build(config).await?;
    orchestrator.spawn_background_tasks();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");
    orchestrator.shutdown();

    Ok(())
}

async fn check(fleet_file: &str) -> Result<()> {
    let registry = CrawlerRegistry::load(fleet_file)?;

    let crawlers = registry.all().await;
    println!("Fleet file OK: {} crawler(s)", crawlers.len());
    for config in crawlers {
        let enabled = if config.enabled { "enabled" } else { "disabled" };
        println!("  {} ({}) {} [{}]", config.id, config.name, config.base_url, enabled);
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("armada=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("armada=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
