use clap::Parser;
use ember_core::Config;
use ember_server::error::{ServerError, ServerResult};
use ember_server::server::Server;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ember-server", about = "Log-structured hash key-value server")]
struct Args {
    /// TOML config file for the engine; defaults apply when unset.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file.
    #[arg(long = "dir_path")]
    dir_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ember_server=info".parse().unwrap())
                .add_directive("ember_core=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load config");
            return;
        }
    };

    let addr = config.addr.clone();
    let server = match Server::new(config) {
        Ok(server) => server,
        Err(err) => {
            error!(error = %err, "failed to open the engine");
            return;
        }
    };

    tokio::select! {
        result = server.listen(&addr) => {
            if let Err(err) = result {
                error!(error = %err, "listener failed");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    if let Err(err) = server.stop() {
        error!(error = %err, "failed to close the engine cleanly");
    }
    info!("ember is ready to exit, bye");
}

fn load_config(args: &Args) -> ServerResult<Config> {
    let mut config = match &args.config {
        None => {
            info!("no config set, using the default config");
            Config::default()
        }
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| ServerError::Config(e.to_string()))?
        }
    };
    if let Some(dir) = &args.dir_path {
        config.dir_path = dir.clone();
    }
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
