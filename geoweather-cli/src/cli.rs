use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use geoweather_core::{
    ChannelObserver, Config, FetchEvent, FetchOrchestrator, FetchResult, Fix, LocationAdapter,
    LocationPlatform, PermissionOutcome, PermissionRetry, StaticPlatform, WeatherClient,
    permission::request_until_granted,
};
use inquire::{Confirm, CustomType, Password};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{display, prompt::TerminalPrompt};

/// Provider name used for a position given on the command line.
const MANUAL_PROVIDER: &str = "manual";

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "geoweather", version, about = "Current weather for your last known location")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store the API key and, optionally, a location.
    Configure,

    /// Fetch and print the weather once.
    Show(FetchArgs),

    /// Fetch the weather, then offer to reload until declined.
    Watch(FetchArgs),
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Latitude in degrees; tried before any stored location.
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Longitude in degrees.
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// OpenWeatherMap API key; overrides the configured one.
    #[arg(long, env = "OPENWEATHER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure().await,
            Command::Show(args) => show(args).await,
            Command::Watch(args) => watch(args).await,
        }
    }
}

struct Session {
    orchestrator: FetchOrchestrator,
    events: UnboundedReceiver<FetchEvent>,
    platform: Arc<StaticPlatform>,
    prompt: TerminalPrompt,
    retry: PermissionRetry,
    json: bool,
}

impl Session {
    fn start(args: FetchArgs) -> anyhow::Result<Self> {
        let config = Config::load()?;
        let api_key = match args.api_key {
            Some(key) => key,
            None => config.api_key()?.to_string(),
        };

        let platform = Arc::new(config.platform());
        if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
            platform.register(MANUAL_PROVIDER, Some(Fix::new(lat, lon)));
            // A position typed by the user needs no permission.
            platform.grant();
        }

        let (observer, events) = ChannelObserver::new();
        let client = WeatherClient::with_base_url(config.base_url().to_string(), api_key);

        let orchestrator = FetchOrchestrator::builder(
            Arc::new(LocationAdapter::new(Arc::clone(&platform))),
            Arc::new(client),
        )
        .observer(Arc::new(observer))
        .build();

        Ok(Self {
            orchestrator,
            events,
            prompt: TerminalPrompt::new(Arc::clone(&platform)),
            platform,
            retry: config.retry_policy(),
            json: args.json,
        })
    }

    /// Prompts on this task before a refresh, so questions never interleave
    /// with refresh output. Nothing is asked when there is nothing to read.
    async fn ensure_permission(&self) {
        if self.platform.has_permission() || self.platform.enabled_providers().is_empty() {
            return;
        }

        if request_until_granted(&self.prompt, self.retry).await != PermissionOutcome::Granted {
            eprintln!("Location access denied; requesting weather without a fix.");
        }
    }

    /// One refresh, with progress drained and printed on this task.
    async fn cycle(&mut self) -> anyhow::Result<FetchResult> {
        let mut handle = self.orchestrator.spawn_refresh();

        loop {
            tokio::select! {
                // Events first: the completion is queued before the task finishes.
                biased;

                Some(event) = self.events.recv() => match event {
                    FetchEvent::Started => {
                        if !self.json {
                            display::loading();
                        }
                    }
                    FetchEvent::Completed(result) => {
                        display::render(&result, self.orchestrator.last_coordinate(), self.json);
                        break;
                    }
                },
                // The task ended without reporting completion, e.g. it panicked.
                joined = &mut handle => {
                    return joined.context("Weather refresh task failed");
                }
            }
        }

        handle.await.context("Weather refresh task failed")
    }
}

async fn show(args: FetchArgs) -> anyhow::Result<()> {
    let mut session = Session::start(args)?;
    session.ensure_permission().await;
    let result = session.cycle().await?;

    if let Some(kind) = result.failure_kind() {
        bail!("Weather unavailable ({kind})");
    }
    Ok(())
}

async fn watch(args: FetchArgs) -> anyhow::Result<()> {
    let mut session = Session::start(args)?;

    loop {
        // Denied access is asked for again on every reload.
        session.ensure_permission().await;
        session.cycle().await?;

        let again = tokio::task::spawn_blocking(|| {
            Confirm::new("Reload?").with_default(true).prompt()
        })
        .await
        .context("Reload prompt task failed")?;

        // Esc or Ctrl-C ends the session like answering "no".
        if !matches!(again, Ok(true)) {
            return Ok(());
        }
    }
}

async fn configure() -> anyhow::Result<()> {
    let mut config = tokio::task::spawn_blocking(|| -> anyhow::Result<Config> {
        let mut config = Config::load()?;

        let api_key = Password::new("OpenWeatherMap API key:")
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;
        config.set_api_key(api_key.trim().to_string());

        let add_location = Confirm::new("Store a location to use when no other fix is known?")
            .with_default(false)
            .prompt()?;

        if add_location {
            let latitude = CustomType::<f64>::new("Latitude (degrees):")
                .with_error_message("Please type a number")
                .prompt()?;
            let longitude = CustomType::<f64>::new("Longitude (degrees):")
                .with_error_message("Please type a number")
                .prompt()?;
            config.upsert_location(MANUAL_PROVIDER, Fix::new(latitude, longitude));
        }

        Ok(config)
    })
    .await
    .context("Configuration prompt task failed")??;

    if !config.locations.is_empty() && !config.permission_granted {
        config.permission_granted = tokio::task::spawn_blocking(|| {
            Confirm::new("Allow geoweather to read the stored location?")
                .with_default(true)
                .prompt()
        })
        .await??;
    }

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}
