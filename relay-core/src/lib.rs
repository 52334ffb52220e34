//! Core library for the `weather-relay` CLI.
//!
//! This crate defines:
//! - Configuration layering (file, environment, flags) and startup profiles
//! - The acquisition stage: archive download and CSV normalization
//! - The publication stage: MQTT connection and the paced publish loop
//! - Shared domain models (archive request, observation record, telemetry message)
//!
//! It is used by `weather-relay-cli`, but can also be reused by other binaries or services.

pub mod acquisition;
pub mod broker;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod progress;
pub mod publisher;

pub use acquisition::{ArchiveClient, acquire};
pub use broker::{ConnectionState, DisconnectReason, MqttBroker, TelemetrySink};
pub use config::{AcquisitionSettings, Config, Overrides, Profile, PublicationSettings};
pub use dataset::{Dataset, normalize};
pub use error::{
    AcquireError, AcquisitionError, BrokerError, ConfigError, DatasetError, PublicationError,
    PublishError,
};
pub use model::{ArchiveRequest, ObservationRecord, WeatherTelemetry};
pub use publisher::{PublishOutcome, PublishReport, Publisher, publish_file};
