//! NID Extract - command-line front end
//!
//! Extracts card fields from one image and prints a JSON report, and manages
//! model files and the configuration file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use nid_extract::config::{self, AppConfig};
use nid_extract::storage::{self, UploadStore};
use nid_extract::vision::{ModelManager, VisionServices};
use nid_extract::{ExtractionOrchestrator, ExtractionReport};

/// NID Extract - national identity card field extraction
#[derive(Parser, Debug)]
#[command(name = "nid-extract")]
#[command(about = "Detect and read the fields of a national identity card photograph")]
struct Args {
    /// Configuration file (default: <config dir>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract fields from a card image and print the JSON report
    Extract {
        /// Card image (png, jpg or jpeg)
        image: PathBuf,

        /// Save an annotated copy beside the image as output_<name>
        #[arg(long)]
        overlay: bool,

        /// Copy the image into the upload store before extracting
        #[arg(long)]
        store: bool,
    },
    /// Inspect or download model files
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ModelsAction {
    /// Show which model files are present
    Status,
    /// Download missing model files
    Fetch,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the report
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    match args.command {
        Command::Extract { image, overlay, store } => {
            let config = load_or_create_config(args.config.as_deref());
            let report = run_extract(&config, &image, overlay, store);
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Command::Models { action } => {
            let config = load_or_create_config(args.config.as_deref());
            let models = ModelManager::new(&config.models)?;
            match action {
                ModelsAction::Status => print_model_status(&models),
                ModelsAction::Fetch => {
                    models.ensure_all_models()?;
                    print_model_status(&models);
                }
            }
        }
        Command::Config {
            action: ConfigAction::Init { force },
        } => {
            let path = match args.config {
                Some(path) => path,
                None => default_config_path()?,
            };
            if path.exists() && !force {
                anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
            }
            config::save_config(&AppConfig::default(), &path)
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

/// Run one extraction and shape the outcome into a report
fn run_extract(config: &AppConfig, image: &Path, overlay: bool, store: bool) -> ExtractionReport {
    let stored = if store {
        let outcome = UploadStore::new(&config.intake)
            .map_err(|e| e.to_string())
            .and_then(|uploads| uploads.store_file(image).map_err(|e| e.to_string()));
        match outcome {
            Ok(path) => Some(path),
            Err(error) => return ExtractionReport::Failure { error },
        }
    } else {
        None
    };

    let services = match ModelManager::new(&config.models).and_then(|models| VisionServices::load(config, &models)) {
        Ok(services) => services,
        Err(e) => {
            return ExtractionReport::Failure {
                error: format!("{:#}", e),
            }
        }
    };

    let orchestrator = ExtractionOrchestrator::new(services, config);
    let input = stored.as_deref().unwrap_or(image);
    ExtractionReport::from_outcome(orchestrator.extract(input, overlay), stored)
}

fn print_model_status(models: &ModelManager) {
    println!("Models directory: {}", models.models_dir().display());
    for (kind, available, size) in models.get_model_status() {
        let state = match (available, size) {
            (true, Some(bytes)) => format!("present ({} bytes)", bytes),
            _ => "missing".to_string(),
        };
        println!("  {:<24} {:<20} {}", kind.display_name(), kind.filename(), state);
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(storage::get_config_dir()?.join("config.toml"))
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().ok(),
    };

    if let Some(config_path) = path {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring configuration {:?}: {:#}", config_path, e),
            }
        } else if explicit.is_some() {
            warn!("Configuration {:?} not found", config_path);
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}
