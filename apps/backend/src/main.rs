mod config;
mod errors;
mod lifecycle;
mod model;
mod routes;
mod state;

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::errors::ServiceError;
use crate::lifecycle::ShutdownSignal;
use crate::model::{ModelLoader, PackageModelLoader};

pub const SERVICE_NAME: &str = "Resume Analyzer Backend";

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration errors are reported before logging exists.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            let err = ServiceError::Config(e);
            eprintln!("{err}");
            return ExitCode::from(err.exit_code());
        }
    };

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={level},tower_http={level}",
                env!("CARGO_CRATE_NAME"),
                level = &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting {} v{}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));

    // Handlers go in before anything is published, so an early SIGTERM still
    // takes the cleanup path.
    let signal = match ShutdownSignal::install() {
        Ok(signal) => signal,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let loader = PackageModelLoader::new(config.model_dir.clone(), config.model_name.clone());
    let package_dir = loader.package_dir();
    let model_name = loader.model_name().to_string();

    match lifecycle::run(&config, loader, signal.recv()).await {
        Ok(()) => {
            info!("{} stopped", SERVICE_NAME);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            match &e {
                ServiceError::ModelLoad(_) => info!(
                    "Install the {model_name} model package at {} or set MODEL_DIR/MODEL_NAME",
                    package_dir.display()
                ),
                ServiceError::DiscoveryWrite { .. } => {
                    info!("Check write permissions or set BACKEND_PORT_FILE")
                }
                ServiceError::ResourceUnavailable { .. } => {
                    info!("No free port on {}; check BACKEND_HOST", config.host)
                }
                _ => {}
            }
            ExitCode::from(e.exit_code())
        }
    }
}
