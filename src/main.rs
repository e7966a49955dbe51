use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use plugin_relay::commands;
use plugin_relay::config;
use plugin_relay::error::{ConfigError, Result};
use plugin_relay::proxy::RouteTable;
use plugin_relay::state::AppState;
use plugin_relay::web;

#[derive(Parser, Debug)]
#[command(name = "plugin-relay")]
#[command(about = "Routes plugin invocations through a correlating queue to a worker pool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the relay server (default)
    Run,
    /// Validate configuration and print the route table
    Check {
        /// Send an empty request through every route
        #[arg(long)]
        probe: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        format!("plugin_relay={log_level}")
            .parse()
            .map_err(|e| ConfigError::Parse(format!("Invalid log directive: {e}")))?,
    );
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match config::load_from_path(&path).await {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!(
                        "Failed to load configuration from {}: {}",
                        path.display(),
                        e
                    );
                    return Err(e);
                }
            }
        }
        None => {
            info!("Loading configuration from default locations");
            match config::load_from_env_or_file().await {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {}", e);
                    return Err(e);
                }
            }
        }
    };

    if let Some(Command::Check { probe }) = args.command {
        return commands::run_config_check(config, probe).await;
    }

    info!("Starting plugin relay");
    info!(
        "Relay will listen on {}:{}",
        config.server.host, config.server.port
    );

    let (state, jobs) = AppState::from_config(config)?;
    let tasks = state.start(jobs);
    let table = Arc::new(RouteTable::build(&state));

    let web_state = state.clone();
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::start_server(web_state, table).await {
            error!("Relay server error: {}", e);
        }
    });

    shutdown_signal().await;

    info!("Shutting down plugin relay");

    let shutdown_timeout = tokio::time::timeout(tokio::time::Duration::from_secs(30), async {
        state.shutdown();
        let _ = tokio::join!(web_handle, tasks.join());
    })
    .await;

    match shutdown_timeout {
        Ok(_) => {
            info!("Graceful shutdown completed");
        }
        Err(_) => {
            error!("Shutdown timeout exceeded, forcing exit");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
