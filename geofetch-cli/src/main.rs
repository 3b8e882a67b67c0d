mod cli;
mod commands;
mod config;
mod error;
mod utils;

use std::path::Path;
use std::process;
use std::sync::Mutex;

use clap::Parser;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands, ConfigAction},
    commands::{CommandExecutor, Service},
    config::AppConfig,
    error::{AppError, Result},
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = ?e, "Application failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args);
    debug!(?config, "Loaded configuration");

    let executor = CommandExecutor::new(config.clone());

    match &args.command {
        Commands::Wms(service) => {
            let request = executor.service_request(Service::Wms, service)?;
            executor.download(request, &service.output).await?;
        }
        Commands::Wcs(service) => {
            let request = executor.service_request(Service::Wcs, service)?;
            executor.download(request, &service.output).await?;
        }
        Commands::Fis(service) => {
            let request = executor.service_request(Service::Fis, service)?;
            executor.download(request, &service.output).await?;
        }
        Commands::Aws(aws) => {
            let request = executor.aws_request(aws)?;
            executor.download(request, &aws.output).await?;
        }
        Commands::Cache { action } => executor.cache(*action).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => println!("{}", config.show()?),
            ConfigAction::Reset => {
                let path = AppConfig::reset(args.config.as_deref())?;
                println!("Configuration reset to defaults: {}", path.display());
            }
            ConfigAction::Path => match args
                .config
                .clone()
                .or_else(AppConfig::default_config_path)
            {
                Some(path) => println!("{}", path.display()),
                None => {
                    return Err(AppError::Config(
                        "No configuration path available".to_string(),
                    ));
                }
            },
        },
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // stdout carries the artifact paths, logs go to stderr
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_level(verbose)
        .with_writer(std::io::stderr);

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    Ok(())
}
