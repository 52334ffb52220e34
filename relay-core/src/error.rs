use std::path::PathBuf;

use thiserror::Error;

/// Failures while downloading the archive dataset.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("network error while talking to the weather archive")]
    Network(#[source] reqwest::Error),

    #[error("archive request failed with status {status}: {body}")]
    Transfer {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("download ended early: expected {expected} bytes, received {received}")]
    IncompleteBody { expected: u64, received: u64 },

    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while reading or rewriting the on-disk dataset artifact.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("data file {} was not found", .0.display())]
    MissingFile(PathBuf),

    #[error("data file {} is empty, no data to process", .0.display())]
    Empty(PathBuf),

    #[error("data file {} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("I/O error on data file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DatasetError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        DatasetError::Malformed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to MQTT broker at {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },
}

/// Failures inside the publish loop. `row` is 1-based and counts data rows only.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("row {row}: required field '{field}' is missing")]
    MissingField { row: usize, field: &'static str },

    #[error("row {row}: field '{field}' has non-numeric value '{value}'")]
    InvalidValue {
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("row {row}: cannot parse time value '{value}'")]
    InvalidTimestamp { row: usize, value: String },

    #[error("broker client rejected publish")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PublishError {
    /// Data errors mean the artifact itself is unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PublishError::Sink(_))
    }
}

/// Why the acquisition stage stopped.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("download was not successful, pre-processing skipped")]
    Download(#[from] AcquisitionError),

    #[error("pre-processing failed")]
    Normalize(#[from] DatasetError),
}

/// Why the publication stage could not start.
#[derive(Debug, Error)]
pub enum PublicationError {
    #[error("cannot load data file")]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting '{0}' (set it in the config file, the environment or on the command line)")]
    Missing(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write config file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize configuration to TOML")]
    Serialize(#[from] toml::ser::Error),

    #[error("could not determine platform config directory")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sink_errors_are_recoverable() {
        let missing = PublishError::MissingField {
            row: 1,
            field: "humidity",
        };
        assert!(missing.is_fatal());

        let sink = PublishError::Sink("channel closed".into());
        assert!(!sink.is_fatal());
    }

    #[test]
    fn missing_field_message_names_row_and_field() {
        let err = PublishError::MissingField {
            row: 3,
            field: "pressure",
        };
        let msg = err.to_string();
        assert!(msg.contains("row 3"));
        assert!(msg.contains("'pressure'"));
    }
}
