// Quotagate - Main Entry Point
//
// Quota-enforcing reverse proxy:
// - CLI interface
// - Configuration loading (file, environment, flags)
// - Logging setup
// - Daemon startup

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use quotagate::config::{Config, DEFAULT_CONFIG_FILE};
use quotagate::daemon;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Quotagate: per-client quota enforcement in front of an HTTP service
#[derive(Parser, Debug)]
#[command(name = "quotagate")]
#[command(author = "Quotagate Contributors")]
#[command(version)]
#[command(
    about = "Quota-enforcing HTTP reverse proxy with per-client request and weight limits",
    long_about = None
)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the proxy and control plane (default)
    Serve(OverrideArgs),
    /// Print the resolved configuration as TOML and exit
    CheckConfig(OverrideArgs),
}

/// Flags shared by every command that resolves a configuration
#[derive(ClapArgs, Debug, Default)]
struct OverrideArgs {
    /// Upstream base URL
    #[arg(long, value_name = "URL")]
    upstream: Option<String>,

    /// Proxy listener port
    #[arg(long, value_name = "PORT")]
    proxy_port: Option<u16>,

    /// REST control plane port
    #[arg(long, value_name = "PORT")]
    config_port: Option<u16>,

    /// JSON-RPC control plane port
    #[arg(long, value_name = "PORT")]
    rpc_port: Option<u16>,

    /// Metrics server port
    #[arg(long, value_name = "PORT")]
    metrics_port: Option<u16>,
}

impl OverrideArgs {
    /// Flags take precedence over file and environment
    fn apply(&self, config: &mut Config) {
        if let Some(upstream) = &self.upstream {
            config.proxy.upstream_url = upstream.clone();
        }
        if let Some(port) = self.proxy_port {
            config.proxy.port = port;
        }
        if let Some(port) = self.config_port {
            config.control.rest_port = port;
        }
        if let Some(port) = self.rpc_port {
            config.control.rpc_port = port;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = Config::load_from_path(&path)?;

    match args.command.unwrap_or(Commands::Serve(OverrideArgs::default())) {
        Commands::CheckConfig(overrides) => {
            overrides.apply(&mut config);
            config.validate()?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Serve(overrides) => {
            overrides.apply(&mut config);
            config.validate()?;

            init_tracing(&config, args.verbose)?;
            info!("🚦 Quotagate v{} starting...", env!("CARGO_PKG_VERSION"));

            daemon::run(config).await
        }
    }
}

/// Initialize tracing from the logging section; `-v` forces debug
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
