//! `pushy`: command line host for the update engine.

mod console_ui;
mod error;
mod logging;
mod runtime;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde_json::{Map, Value};

use pushy_core::{
    Collaborators, HttpDownloader, HttpTransport, PendingDownload, ResourceInstaller,
    UpdateClient, UpdateOutcome, UpdatePhase, apply_pending_resources,
};
use pushy_platform::AppPaths;

use crate::console_ui::ConsoleUi;
use crate::error::HostError;
use crate::logging::init_logging;
use crate::runtime::DesktopRuntime;
use crate::settings::HostSettings;

const USER_AGENT: &str = concat!("pushy/", env!("CARGO_PKG_VERSION"));

/// Over-the-air updates for hybrid apps
#[derive(Parser, Debug)]
#[command(name = "pushy", version)]
#[command(about = "Check for and install over-the-air app updates", long_about = None)]
struct Cli {
    /// Keep settings, logs and resources under this directory
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Answer yes to every prompt
    #[arg(short, long, global = true)]
    yes: bool,

    /// Override an update option, e.g. --set projectId=abc --set log=true
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    options: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print version facts and effective options as JSON
    Info,
    /// Ask the update server for a newer version and roll it out
    Check {
        /// Always ask before installing, whatever the update type
        #[arg(long)]
        manual: bool,
    },
    /// Check, then download the available package without asking
    Download,
    /// Store the --set options in the settings file
    Configure,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), HostError> {
    let paths = match &cli.root {
        Some(root) => AppPaths::rooted(root),
        None => AppPaths::new()?,
    };
    paths
        .ensure_dirs()
        .map_err(|error| HostError::io("failed to create app directories", error))?;

    let mut settings = HostSettings::load(&paths);
    init_logging(&paths, settings.debug_logging, settings.max_log_size_bytes);

    let overrides = parse_options(&cli.options)?;

    if let Command::Configure = cli.command {
        settings.options.extend(overrides);
        settings
            .save(&paths)
            .map_err(|error| HostError::io("failed to save settings", error))?;
        println!("Saved {}", paths.settings_file().display());
        return Ok(());
    }

    match apply_pending_resources(&paths.resource_dir()) {
        Ok(true) => info!("Applied staged resource package"),
        Ok(false) => {}
        Err(error) => warn!("Failed to apply staged resource package: {error}"),
    }

    let mut options = settings.options.clone();
    options.extend(overrides);
    if let Command::Download = cli.command {
        options.insert("custom".to_string(), Value::Bool(true));
    }

    let http = reqwest::Client::builder()
        .timeout(settings.http_timeout())
        .user_agent(USER_AGENT)
        .build()
        .map_err(HostError::HttpClient)?;

    let ui = Arc::new(ConsoleUi::new(cli.yes));
    let client = UpdateClient::new(
        Collaborators {
            runtime: Arc::new(DesktopRuntime::new(
                settings.app.clone(),
                paths.resource_dir(),
            )),
            transport: Arc::new(HttpTransport::new(http)),
            downloader: Arc::new(HttpDownloader::with_user_agent(USER_AGENT)),
            installer: Arc::new(ResourceInstaller::new(paths.resource_dir())),
            ui: ui.clone(),
        },
        settings.download_options(&paths),
        &options,
    );

    match cli.command {
        Command::Info => {
            let info = client.info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Check { manual } => {
            let outcome = client.get_update(manual).await;
            report(&outcome)?;
            client.wait_for_background().await;
            offer_restart(&client, &ui).await?;
        }
        Command::Download => {
            let outcome = client.get_update(true).await;
            report(&outcome)?;
            if !outcome.status_code.is_update_required() {
                return Ok(());
            }

            match client.start_pending_download().map_err(HostError::Download)? {
                PendingDownload::Started => {
                    client.wait_for_background().await;
                    offer_restart(&client, &ui).await?;
                }
                PendingDownload::OpenedExternally => {
                    println!("Opened the download page in the browser");
                }
            }
        }
        Command::Configure => {}
    }

    Ok(())
}

fn parse_options(raw: &[String]) -> Result<Map<String, Value>, HostError> {
    raw.iter().map(|option| parse_option(option)).collect()
}

/// `KEY=VALUE`, where VALUE is read as JSON and falls back to a plain string.
fn parse_option(raw: &str) -> Result<(String, Value), HostError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| HostError::InvalidOption(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(HostError::InvalidOption(raw.to_string()));
    }

    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn report(outcome: &UpdateOutcome) -> Result<(), HostError> {
    println!("{}", serde_json::to_string_pretty(outcome)?);

    if outcome.status_code.code() >= 400 {
        return Err(HostError::Check {
            status: outcome.status_code,
            message: outcome.message.clone(),
        });
    }
    Ok(())
}

async fn offer_restart(client: &UpdateClient, ui: &ConsoleUi) -> Result<(), HostError> {
    let installed = ui.installed() || client.phase() == UpdatePhase::SilentUpdated;
    if installed && ui.confirm_restart().await {
        client.restart_app().map_err(HostError::Restart)?;
    }
    Ok(())
}
