//! slsd - Simple Lookup Service cache daemon.
//!
//! Entry point for the `slsd` binary. Exit codes: 0 on clean shutdown,
//! 1 on fatal bootstrap failure (e.g. the record store cannot be opened),
//! 2 on bad command-line arguments.

// Use mimalloc for better multi-core performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use slsd::api::ServiceContext;
use slsd::config::ServiceConfig;
use slsd::logging::{LogConfig, LogFormat, init_logging};

#[derive(Parser)]
#[command(name = "slsd")]
#[command(version)]
#[command(about = "Simple Lookup Service cache daemon")]
#[command(
    long_about = "A record registry for federated service discovery: endpoints publish \
                  self-describing records, renew them by heartbeat, and are discovered \
                  through structured queries. Subscribers receive matching record changes \
                  in batched pushes."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lookup service
    ///
    /// Starts the HTTP API, the maintenance scheduler, and the
    /// subscription flush workers.
    ///
    /// Examples:
    ///   slsd serve                           # defaults (0.0.0.0:8090)
    ///   slsd serve --port 8080               # custom port
    ///   slsd serve --config /etc/slsd.toml   # explicit config file
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Listener port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Path to the slsd.toml config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Data directory for the persistent store (overrides config)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        /// Log output format: pretty, json, compact
        #[arg(long, default_value = "pretty")]
        log_format: LogFormat,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            config,
            data_dir,
            log_format,
        } => {
            init_logging(&LogConfig::default().format(log_format));

            if let Err(e) = serve(host, port, config.as_deref(), data_dir).await {
                tracing::error!(error = %e, "Fatal bootstrap failure");
                eprintln!("slsd: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = ServiceConfig::load(config_path)?;
    if let Some(host) = host {
        config.service.host = host;
    }
    if let Some(port) = port {
        config.service.port = port;
    }
    if let Some(data_dir) = data_dir {
        config.storage.data_dir = Some(data_dir);
    }

    let (ctx, flush_rx) = ServiceContext::from_config(config)?;
    slsd::http::serve(ctx, flush_rx).await
}
