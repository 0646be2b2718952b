use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use webdav_uploader::config::{self, UploadConfig};
use webdav_uploader::security::InputValidator;
use webdav_uploader::shutdown;
use webdav_uploader::uploader::{DispatchOutcome, TaskDispatcher, UploadEngine};

#[derive(Parser, Debug)]
#[command(name = "webdav-uploader")]
#[command(about = "Upload images and files to a WebDAV server with retry and local fallback")]
struct Cli {
    /// Path to a JSON config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// WebDAV base URL, e.g. https://dav.example.com/remote.php/dav/files/me
    #[arg(long, global = true, env = "WEBDAV_URL")]
    url: Option<String>,

    #[arg(long, global = true, env = "WEBDAV_USERNAME")]
    username: Option<String>,

    #[arg(long, global = true, env = "WEBDAV_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Log level: off, error, warn, info, debug or trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a config template
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Upload PNG images under time-stamped names
    Image {
        #[arg(required = true, value_name = "PNG")]
        files: Vec<PathBuf>,

        /// Keep a copy under output/upload-fail when every attempt fails
        #[arg(long)]
        save_local_when_fail: bool,

        /// Upload in the background instead of waiting for each image
        #[arg(long = "async")]
        async_upload: bool,
    },
    /// Upload a file as-is, keeping its name
    File {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Remove the file once the server has accepted it
        #[arg(long)]
        delete_after_upload: bool,

        #[arg(long = "async")]
        async_upload: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Init { force } = &cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("info"));
        return run_init(cli.config.clone(), *force);
    }

    let mut config = config::load_config_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);
    init_logging(&config.log_level);

    config::validate_config(&config).context("Invalid configuration")?;
    log::info!("Uploading to {}", config.webdav_url);

    let interrupted = shutdown::register_interrupt_handler()
        .context("Failed to register Ctrl+C handler")?;

    let engine = Arc::new(UploadEngine::from_config(&config)?);
    let dispatcher = TaskDispatcher::new(engine, config.dispatcher_config());
    let destination = config.destination();

    match cli.command {
        Command::Image {
            files,
            save_local_when_fail,
            async_upload,
        } => {
            let mut options = config.options();
            options.save_local_when_fail |= save_local_when_fail;
            options.run_detached |= async_upload;

            let mut images = Vec::with_capacity(files.len());
            for file in &files {
                if interrupted.load(Ordering::SeqCst) {
                    log::warn!("Interrupted, skipping remaining images");
                    break;
                }
                match tokio::fs::read(file).await {
                    Ok(data) => images.push(Bytes::from(data)),
                    Err(e) => log::error!("Failed to read {}: {}", file.display(), e),
                }
            }

            let (_images, outcomes) = dispatcher
                .dispatch_images(images, &destination, options)
                .await;
            for outcome in &outcomes {
                log_outcome(outcome);
            }
        }
        Command::File {
            path,
            delete_after_upload,
            async_upload,
        } => {
            InputValidator::validate_source_file(&path.to_string_lossy())
                .context("Invalid source file")?;

            let mut options = config.options();
            options.delete_source_on_success |= delete_after_upload;
            options.run_detached |= async_upload;

            let (_path, outcome) = dispatcher.dispatch_file(path, &destination, options).await;
            log_outcome(&outcome);
        }
        Command::Init { .. } => unreachable!("handled above"),
    }

    dispatcher.shutdown().await;
    Ok(())
}

fn init_logging(level: &str) {
    let level = level
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn apply_overrides(config: &mut UploadConfig, cli: &Cli) {
    if let Some(url) = &cli.url {
        config.webdav_url = url.clone();
    }
    if let Some(username) = &cli.username {
        config.webdav_username = username.clone();
    }
    if let Some(password) = &cli.password {
        config.webdav_password = password.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
}

fn run_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => config::get_default_config_path()?,
    };

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }

    config::save_config(&UploadConfig::template(), &path)?;
    println!("Wrote config template to {}", path.display());
    Ok(())
}

fn log_outcome(outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Completed(result) if result.succeeded => {
            log::info!(
                "Uploaded {}",
                result.remote_url.as_deref().unwrap_or("<unknown>")
            );
        }
        DispatchOutcome::Completed(result) => match &result.local_path {
            Some(path) => log::warn!("Upload failed, kept local copy at {}", path.display()),
            None => log::warn!("Upload failed"),
        },
        DispatchOutcome::Detached(task_id) => {
            log::debug!("Upload {} running in the background", task_id);
        }
        DispatchOutcome::Dropped(task_id) => {
            log::error!("Upload {} could not be queued", task_id);
        }
    }
}
