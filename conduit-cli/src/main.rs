mod accounts;

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conduit_dispatch::{SignalDispatcher, DEFAULT_WORKER_LIMIT};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Conduit signal dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads the configured accounts and serves the signal-intake HTTP front.
    Serve(ServeArgs),
    /// Loads and validates a configuration file without starting the server.
    CheckConfig(CheckConfigArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    #[arg(long)]
    config: PathBuf,
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: String,
    #[arg(long, default_value_t = DEFAULT_WORKER_LIMIT)]
    workers: usize,
}

#[derive(clap::Args)]
struct CheckConfigArgs {
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::CheckConfig(args) => check_config(args),
    }
}

/// `RUST_LOG` selects verbosity as usual; `CONDUIT_LOG_FORMAT=json` switches
/// the formatter to newline-delimited JSON for log-shipping pipelines.
fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,conduit_cli=info".into());
    let json = std::env::var("CONDUIT_LOG_FORMAT").as_deref() == Ok("json");

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = conduit_config::load_config(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;

    let processors = accounts::build_processors(&config).context("failed to initialize configured accounts")?;
    info!(accounts = processors.len(), "accounts initialized");

    let dispatcher = Arc::new(SignalDispatcher::new(processors, args.workers));
    let listener = TcpListener::bind(&args.bind).with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "starting conduit server");

    conduit_server::serve(dispatcher, listener, shutdown_signal())
        .await
        .context("server exited with an error")
}

fn check_config(args: CheckConfigArgs) -> Result<()> {
    conduit_config::validate_config(&args.config)
        .with_context(|| format!("config at {} is invalid", args.config.display()))?;
    println!("{} is valid", args.config.display());
    Ok(())
}

/// Resolves once SIGINT or SIGTERM arrives, letting `conduit_server::serve`
/// drain in-flight connections before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
