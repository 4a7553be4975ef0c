use clap::{Parser, Subcommand};
use tracing::{error, info};

use strangle_core::{BotError, ConfigLoader, Environment, RunFlag};
use strangle_orchestrator::Supervisor;

#[derive(Parser)]
#[command(name = "strangle-bot")]
#[command(about = "Automated short-strangle options seller for Deribit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run trading cycles until ctrl-c
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Override the configured venue environment
        #[arg(long, value_parser = ["test", "prod"])]
        env: Option<String>,
        /// Submit real orders instead of paper trading
        #[arg(long)]
        live: bool,
    },
    /// Load and print the effective configuration, then exit
    CheckConfig {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run { config, env, live } => {
            let code = run_bot(&config, env.as_deref(), live).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::CheckConfig { config } => check_config(&config)?,
    }
    Ok(())
}

/// Runs the supervisor and maps its terminal state to an exit code:
/// 0 for a clean stop, 1 for an auth rejection, 2 when the reconnect
/// budget ran out.
async fn run_bot(config_path: &str, env: Option<&str>, live: bool) -> anyhow::Result<i32> {
    let mut config = ConfigLoader::load_from(config_path)?;
    match env {
        Some("test") => config.venue.env = Environment::Test,
        Some("prod") => config.venue.env = Environment::Prod,
        _ => {}
    }
    if live {
        config.trading.live = true;
    }
    info!(
        env = %config.venue.env,
        currency = %config.venue.currency,
        live = config.trading.live,
        "starting"
    );

    let stop = RunFlag::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, winding down");
            ctrl_c_stop.shutdown();
        }
    });

    match Supervisor::new(config, stop).run().await {
        Ok(()) => Ok(0),
        Err(e @ BotError::Auth { .. }) => {
            error!(error = %e, "authentication rejected");
            Ok(1)
        }
        Err(e @ BotError::ConnectionExhausted { .. }) => {
            error!(error = %e, "connection budget exhausted");
            Ok(2)
        }
        Err(e) => Err(e.into()),
    }
}

fn check_config(config_path: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path)?;
    println!("environment: {}", config.venue.env);
    println!("currency:    {}", config.venue.currency);
    println!("endpoint:    {}", config.venue.endpoint().url);
    println!("live:        {}", config.trading.live);
    println!("expiry cutoff hour: {}", config.trading.expiry_cutoff_hour);
    println!(
        "put delta band:  [{}, {}]",
        config.trading.put_delta_min, config.trading.put_delta_max
    );
    println!(
        "call delta band: ({}, {}]",
        config.trading.call_delta_min, config.trading.call_delta_max
    );
    println!("min premium: {}", config.trading.min_premium);
    Ok(())
}
