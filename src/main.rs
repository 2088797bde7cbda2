use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_thought_tree::{
    config::{Config, LogFormat},
    server::{AppState, McpServer},
    storage::{FileStorage, TreeRepository},
};

#[derive(Parser, Debug)]
#[command(
    name = "mcp-thought-tree",
    version,
    about = "MCP server for stateful Tree-of-Thought search over stdio"
)]
struct Cli {
    /// Directory holding one JSON record per thought tree
    #[arg(long, env = "TOT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Tracing filter, e.g. "info" or "mcp_thought_tree=debug"
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format written to stderr: pretty or json
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match load_config(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP Thought Tree Server starting..."
    );

    let storage = match FileStorage::new(&config.storage).await {
        Ok(s) => {
            info!(path = %config.storage.data_dir.display(), "File storage initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize record directory");
            return Err(e.into());
        }
    };

    let repo = TreeRepository::new(Arc::new(storage));
    let state = Arc::new(AppState::new(config, repo));
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Environment configuration with command-line overrides applied.
fn load_config(cli: Cli) -> mcp_thought_tree::AppResult<Config> {
    let mut config = Config::from_env()?;

    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    Ok(config)
}

/// Initialize tracing/logging. Stdout carries the protocol, so logs go to stderr.
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
