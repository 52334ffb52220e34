use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use inquire::{CustomType, Text};
use log::info;
use weather_relay_core::{
    AcquisitionSettings, Config, Overrides, Profile, PublicationSettings, acquire, publish_file,
};

use crate::signal::shutdown_signal;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather-relay",
    version,
    about = "Download archived weather observations and replay them to an MQTT broker"
)]
pub struct Cli {
    /// Config file to use instead of the one in the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Where dates and the publish interval come from when not set explicitly:
    /// "env" requires them, "fixed" uses a hardcoded range and a one hour interval.
    #[arg(long, global = true, default_value = "env", value_parser = parse_profile)]
    pub profile: Profile,

    /// Dataset path, shared by both stages.
    #[arg(long, global = true)]
    pub data_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RangeArgs {
    /// First day to download (YYYY-MM-DD).
    #[arg(long, env = "START_DATE")]
    pub start_date: Option<String>,

    /// Last day to download (YYYY-MM-DD).
    #[arg(long, env = "END_DATE")]
    pub end_date: Option<String>,

    /// Don't draw a progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct IntervalArgs {
    /// Seconds to wait after each published row.
    #[arg(long, env = "INTERVAL")]
    pub interval: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set broker details and the publish interval.
    Configure,

    /// Download the archive range and normalize it.
    Download {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Publish an already downloaded dataset.
    Publish {
        #[command(flatten)]
        interval: IntervalArgs,
    },

    /// Download, then publish.
    Run {
        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        interval: IntervalArgs,
    },
}

fn parse_profile(value: &str) -> Result<Profile, String> {
    Profile::try_from(value).map_err(|e| e.to_string())
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        }
        .context("Failed to load configuration")?;

        match &self.command {
            Command::Configure => configure(config, self.config.as_deref()),
            Command::Download { range } => {
                let settings = self.acquisition_settings(&config, range)?;
                download(&settings, !range.no_progress).await
            }
            Command::Publish { interval } => {
                let settings = self.publication_settings(&config, interval)?;
                publish(&settings).await
            }
            Command::Run { range, interval } => {
                // Resolve both up front so a missing interval fails before downloading.
                let acquisition = self.acquisition_settings(&config, range)?;
                let publication = self.publication_settings(&config, interval)?;

                download(&acquisition, !range.no_progress)
                    .await
                    .context("Publication step skipped")?;
                publish(&publication).await
            }
        }
    }

    fn overrides(&self, range: Option<&RangeArgs>, interval: Option<&IntervalArgs>) -> Overrides {
        Overrides {
            start_date: range.and_then(|r| r.start_date.clone()),
            end_date: range.and_then(|r| r.end_date.clone()),
            interval_secs: interval.and_then(|i| i.interval),
            data_file: self.data_file.clone(),
        }
    }

    fn acquisition_settings(
        &self,
        config: &Config,
        range: &RangeArgs,
    ) -> anyhow::Result<AcquisitionSettings> {
        config
            .acquisition_settings(self.profile, &self.overrides(Some(range), None))
            .with_context(|| format!("Invalid download settings (profile '{}')", self.profile))
    }

    fn publication_settings(
        &self,
        config: &Config,
        interval: &IntervalArgs,
    ) -> anyhow::Result<PublicationSettings> {
        config
            .publication_settings(self.profile, &self.overrides(None, Some(interval)))
            .with_context(|| format!("Invalid publish settings (profile '{}')", self.profile))
    }
}

async fn download(settings: &AcquisitionSettings, show_progress: bool) -> anyhow::Result<()> {
    info!(
        "Requesting {} .. {} from {}",
        settings.request.start_date, settings.request.end_date, settings.endpoint
    );

    acquire(settings, show_progress)
        .await
        .context("Acquisition failed")?;
    Ok(())
}

async fn publish(settings: &PublicationSettings) -> anyhow::Result<()> {
    info!(
        "Publishing {} to {}:{} on '{}' every {:?}",
        settings.data_file.display(),
        settings.broker.host,
        settings.broker.port,
        settings.broker.topic,
        settings.interval
    );

    let report = publish_file(settings, shutdown_signal())
        .await
        .context("Publication could not start")?;

    info!("{} rows published", report.published);
    match report.into_fatal_error() {
        Some(e) => Err(e).context("Publication failed"),
        None => Ok(()),
    }
}

fn configure(mut config: Config, path: Option<&Path>) -> anyhow::Result<()> {
    config.broker.host = Text::new("Broker host:")
        .with_default(&config.broker.host)
        .prompt()?;
    config.broker.port = CustomType::<u16>::new("Broker port:")
        .with_default(config.broker.port)
        .with_error_message("Please enter a port number")
        .prompt()?;
    config.broker.topic = Text::new("Topic:")
        .with_default(&config.broker.topic)
        .prompt()?;

    let interval = CustomType::<u64>::new("Publish interval in seconds:")
        .with_error_message("Please enter a whole number of seconds");
    let interval = match config.publish.interval_secs {
        Some(current) => interval.with_default(current),
        None => interval,
    };
    config.publish.interval_secs = Some(interval.prompt()?);

    let saved_to = match path {
        Some(path) => {
            config.save_to(path)?;
            path.to_path_buf()
        }
        None => config.save()?,
    };
    println!("Configuration saved to {}", saved_to.display());
    Ok(())
}
