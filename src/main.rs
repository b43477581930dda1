//! Fluxgate CLI entry point.
//!
//! Runs a gateway from a TOML configuration, lists the connector types
//! compiled into this build, or prints an example configuration:
//! ```bash
//! fluxgate run gateway.toml
//! fluxgate list-connectors
//! fluxgate example > gateway.toml
//! ```

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fluxgate::core::metadata::connector_registry;
use fluxgate::{Engine, GatewayConfig};

/// Fluxgate - Industrial Data Gateway
#[derive(Parser, Debug)]
#[command(name = "fluxgate", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway with the given configuration
    Run {
        /// Path to the TOML configuration file
        config: std::path::PathBuf,

        /// Start without activating any connector
        #[arg(long)]
        safe_mode: bool,
    },

    /// List connector types available in this build
    ListConnectors,

    /// Print an example configuration, or example settings for one connector type
    Example {
        /// Connector type (see `list-connectors`); omit for a full configuration
        connector_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> fluxgate::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, safe_mode } => run(config, safe_mode).await,
        Commands::ListConnectors => {
            list_connectors();
            Ok(())
        }
        Commands::Example { connector_type } => example(connector_type.as_deref()),
    }
}

async fn run(config_path: std::path::PathBuf, safe_mode: bool) -> fluxgate::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = GatewayConfig::from_file(&config_path)?;
    if safe_mode {
        config.engine.safe_mode = true;
    }

    let mut engine = Engine::new(config);
    engine.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    engine.stop().await;
    Ok(())
}

fn list_connectors() {
    println!("Available connectors:");
    println!();

    for meta in connector_registry().connectors() {
        let capabilities = match (meta.handles_values, meta.handles_files) {
            (true, true) => "values, files",
            (true, false) => "values",
            (false, true) => "files",
            (false, false) => "none",
        };
        println!("  {} [{}] ({})", meta.name, meta.kind, capabilities);
        println!("    {}", meta.description);
        println!();
    }
}

fn example(connector_type: Option<&str>) -> fluxgate::Result<()> {
    match connector_type {
        None => print!("{}", EXAMPLE_CONFIG),
        Some(name) => {
            let meta = connector_registry().find(name).ok_or_else(|| {
                fluxgate::EngineError::Config(format!(
                    "unknown connector type '{}', see `list-connectors`",
                    name
                ))
            })?;
            println!("# {} ({}) settings", meta.display_name, meta.kind);
            println!("{}", serde_json::to_string_pretty(&meta.example_settings)?);
        }
    }
    Ok(())
}

const EXAMPLE_CONFIG: &str = r#"# Fluxgate configuration example

[engine]
name = "Plant Gateway"
cache_folder = "./cache"
status_interval_ms = 5000

[[engine.scan_modes]]
scan_mode = "every10s"
cron = "*/10 * * * * *"

[[south]]
id = "sim"
name = "Boiler Simulator"
type = "simulator"
scan_mode = "every10s"

[south.settings]
min = 20.0
max = 80.0

[[north]]
id = "historian"
name = "Plant Historian"
type = "http"
subscribed_to = ["sim"]

[north.caching]
send_interval_ms = 10000
retry_interval_ms = 5000
group_count = 1000
max_send_count = 10000

[north.caching.archive]
enabled = false

[north.settings]
url = "https://historian.example.com/api/values"
authentication = { type = "basic", username = "gateway", password = "secret" }
"#;
