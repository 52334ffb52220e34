use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{error::ConfigError, model::ArchiveRequest};

pub const ARCHIVE_ENDPOINT: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const DEFAULT_LATITUDE: f64 = 12.9184;
pub const DEFAULT_LONGITUDE: f64 = 79.1325;
pub const DEFAULT_DATA_FILE: &str = "data.csv";

pub const DEFAULT_BROKER_HOST: &str = "emqx";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "topic/telemetry";
pub const DEFAULT_CLIENT_ID: &str = "weather-relay";

/// Date range and cadence of the `fixed` profile.
pub const FIXED_START_DATE: &str = "2024-01-01";
pub const FIXED_END_DATE: &str = "2024-01-31";
pub const FIXED_INTERVAL_SECS: u64 = 3600;

/// Where start/end dates and the publish interval come from when nothing
/// more specific is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Everything must be supplied by the environment, the config file or flags.
    #[default]
    Env,
    /// Hardcoded date range and a one hour interval.
    Fixed,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Env => "env",
            Profile::Fixed => "fixed",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Profile {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "env" => Ok(Profile::Env),
            "fixed" => Ok(Profile::Fixed),
            _ => Err(ConfigError::Invalid {
                field: "profile",
                reason: format!("unknown profile '{value}', expected 'env' or 'fixed'"),
            }),
        }
    }
}

/// Values supplied by the environment or the command line. They win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub interval_secs: Option<u64>,
    pub data_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub endpoint: String,
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            endpoint: ARCHIVE_ENDPOINT.to_string(),
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            start_date: None,
            end_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// MQTT QoS level, 0..=2.
    pub qos: u8,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            topic: DEFAULT_TOPIC.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            keep_alive_secs: 60,
            qos: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PublishConfig {
    pub interval_secs: Option<u64>,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// data_file = "data.csv"
///
/// [broker]
/// host = "localhost"
/// port = 1883
///
/// [publish]
/// interval_secs = 10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_file: PathBuf,
    pub archive: ArchiveConfig,
    pub broker: BrokerConfig,
    pub publish: PublishConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            archive: ArchiveConfig::default(),
            broker: BrokerConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

/// Everything the acquisition stage needs.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub endpoint: String,
    pub request: ArchiveRequest,
    pub data_file: PathBuf,
}

/// Everything the publication stage needs.
#[derive(Debug, Clone)]
pub struct PublicationSettings {
    pub broker: BrokerConfig,
    pub interval: Duration,
    pub data_file: PathBuf,
}

impl Config {
    /// Load config from the platform location, or defaults if it doesn't exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load config from an explicit path; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to the platform location.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let toml = toml::to_string_pretty(self)?;
        fs::write(path, toml).map_err(write_err)
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("dev", "weather-relay", "weather-relay")
            .ok_or(ConfigError::NoConfigDir)?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    fn data_file(&self, overrides: &Overrides) -> PathBuf {
        overrides
            .data_file
            .clone()
            .unwrap_or_else(|| self.data_file.clone())
    }

    pub fn acquisition_settings(
        &self,
        profile: Profile,
        overrides: &Overrides,
    ) -> Result<AcquisitionSettings, ConfigError> {
        let (fixed_start, fixed_end) = match profile {
            Profile::Env => (None, None),
            Profile::Fixed => (Some(FIXED_START_DATE), Some(FIXED_END_DATE)),
        };

        let start = overrides
            .start_date
            .as_deref()
            .or(self.archive.start_date.as_deref())
            .or(fixed_start)
            .ok_or(ConfigError::Missing("start_date"))?;
        let end = overrides
            .end_date
            .as_deref()
            .or(self.archive.end_date.as_deref())
            .or(fixed_end)
            .ok_or(ConfigError::Missing("end_date"))?;

        let start_date = parse_date("start_date", start)?;
        let end_date = parse_date("end_date", end)?;
        if start_date > end_date {
            return Err(ConfigError::Invalid {
                field: "end_date",
                reason: format!("{end_date} is before start date {start_date}"),
            });
        }

        Ok(AcquisitionSettings {
            endpoint: self.archive.endpoint.clone(),
            request: ArchiveRequest::new(
                self.archive.latitude,
                self.archive.longitude,
                start_date,
                end_date,
            ),
            data_file: self.data_file(overrides),
        })
    }

    pub fn publication_settings(
        &self,
        profile: Profile,
        overrides: &Overrides,
    ) -> Result<PublicationSettings, ConfigError> {
        let fixed_interval = match profile {
            Profile::Env => None,
            Profile::Fixed => Some(FIXED_INTERVAL_SECS),
        };

        let interval_secs = overrides
            .interval_secs
            .or(self.publish.interval_secs)
            .or(fixed_interval)
            .ok_or(ConfigError::Missing("interval"))?;

        if self.broker.qos > 2 {
            return Err(ConfigError::Invalid {
                field: "qos",
                reason: format!("{} is not an MQTT QoS level (0, 1 or 2)", self.broker.qos),
            });
        }
        if self.broker.topic.is_empty() {
            return Err(ConfigError::Invalid {
                field: "topic",
                reason: "topic must not be empty".to_string(),
            });
        }

        Ok(PublicationSettings {
            broker: self.broker.clone(),
            interval: Duration::from_secs(interval_secs),
            data_file: self.data_file(overrides),
        })
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("'{value}' is not an ISO date (YYYY-MM-DD): {e}"),
    })
}
