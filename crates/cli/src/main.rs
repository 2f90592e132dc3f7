use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prisma_brokers_common::SimulatedConnector;
use prisma_brokers_exnova::{ExnovaConfig, ExnovaConnector};
use prisma_core::allowlist::{self, Category, Market};
use prisma_core::Connector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "prisma")]
#[command(about = "Local back-end for the Prisma chart front-end: broker login, open pairs and candles")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Server {
        /// Bind address
        #[arg(short, long, env = "PRISMA_BIND", default_value = "127.0.0.1:5000")]
        bind: String,

        /// TOML file overriding the Exnova endpoints
        #[arg(short, long, env = "PRISMA_CONFIG")]
        config: Option<PathBuf>,

        /// Serve against an in-memory upstream instead of Exnova
        #[arg(long)]
        simulated: bool,
    },

    /// List the allow-listed instrument names
    Pairs,

    /// Print the effective Exnova configuration
    Config {
        /// TOML file overriding the Exnova endpoints
        #[arg(short, long, env = "PRISMA_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.log_json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    match cli.command {
        Commands::Server {
            bind,
            config,
            simulated,
        } => {
            let connector: Arc<dyn Connector> = if simulated {
                tracing::warn!("Using the simulated upstream; no broker traffic will be made");
                Arc::new(SimulatedConnector::default())
            } else {
                let config = load_config(config.as_deref())?;
                tracing::info!(auth_url = %config.auth_url, ws_url = %config.ws_url, "Using Exnova upstream");
                Arc::new(ExnovaConnector::new(config))
            };

            print_banner(&bind);
            prisma_api::start_server(connector, &bind).await?;
        }
        Commands::Pairs => {
            println!("Allow-listed instruments ({}):", allowlist::len());
            for group in allowlist::groups() {
                println!(
                    "  {:<10} {:<4} {}",
                    category_label(group.category),
                    market_label(group.market),
                    group.names.join(", ")
                );
            }
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ExnovaConfig> {
    let Some(path) = path else {
        return Ok(ExnovaConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = ExnovaConfig::from_toml(&raw)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Page the user opens once the server is up.
const FRONT_END_PAGE: &str = "robo-sinais.html";

fn print_banner(bind: &str) {
    println!("{}", banner(bind));
}

fn banner(bind: &str) -> String {
    let sep = "=".repeat(60);
    [
        String::new(),
        sep.clone(),
        "  PRISMA back-end".to_string(),
        sep.clone(),
        format!("  Listening on:  http://{}", bind),
        "  Keep this terminal open while you use the charts.".to_string(),
        format!("  Now open {} in your browser.", FRONT_END_PAGE),
        sep,
    ]
    .join("\n")
}

fn category_label(category: Category) -> &'static str {
    match category {
        Category::Forex => "forex",
        Category::Crypto => "crypto",
        Category::Commodity => "commodity",
        Category::Equity => "equity",
    }
}

fn market_label(market: Market) -> &'static str {
    match market {
        Market::Open => "open",
        Market::Otc => "otc",
    }
}
