//! `config-generator`: run a generation mode once, or serve the generation routes over HTTP.

use clap::{Parser, Subcommand};
use config_generator::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE};
use config_generator::{app, load_config, run, AppState, Mode, PgConnector};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "config-generator")]
#[command(about = "Generate service configs, permissions and QGIS projects from the ConfigDB")]
struct Cli {
    /// Generator config document
    #[arg(long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Service configs, permissions and QGIS projects
    All,
    /// One JSON config per configured service
    #[command(name = "service_configs")]
    ServiceConfigs,
    /// The combined permissions file
    Permissions,
    /// QGIS projects for WMS and WFS services
    Qgs,
    /// Serve POST /generate_configs and POST /update_qgs
    Serve {
        #[arg(long, default_value = "127.0.0.1:5032")]
        listen: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("config_generator=info")),
        )
        .init();

    let cli = Cli::parse();
    let config_file = cli.config;
    let result = match cli.command {
        Command::All => generate(&config_file, Mode::All).await,
        Command::ServiceConfigs => generate(&config_file, Mode::ServiceConfigs).await,
        Command::Permissions => generate(&config_file, Mode::Permissions).await,
        Command::Qgs => generate(&config_file, Mode::Qgs).await,
        Command::Serve { listen } => serve(config_file, listen).await,
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("config-generator: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every stage succeeded.
async fn generate(config_file: &Path, mode: Mode) -> Result<bool, Box<dyn std::error::Error>> {
    let config = load_config(config_file).await?;
    let report = run(&config, &PgConnector, mode.stages()).await?;
    for entry in report.log.entries() {
        println!("{:<7} {}", entry.level, entry.msg);
    }
    for failed in report.failed_stages() {
        eprintln!(
            "config-generator: stage {} failed: {}",
            failed.stage,
            failed.error.as_deref().unwrap_or_default()
        );
    }
    Ok(report.succeeded())
}

async fn serve(config_file: PathBuf, listen: SocketAddr) -> Result<bool, Box<dyn std::error::Error>> {
    // fail fast on a broken config document; requests reload it anyway
    load_config(&config_file).await?;
    let state = AppState::new(config_file, Arc::new(PgConnector));
    let listener = TcpListener::bind(listen).await?;
    tracing::info!("config-generator listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;
    Ok(true)
}
