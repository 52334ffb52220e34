use std::{future::Future, time::Duration};

use log::{error, info, warn};
use prost::Message;

use crate::{
    broker::{DisconnectReason, MqttBroker, TelemetrySink},
    config::PublicationSettings,
    dataset::Dataset,
    error::{DatasetError, PublicationError, PublishError},
};

#[derive(Debug)]
pub enum PublishOutcome {
    /// Every row was published.
    Completed,
    /// The shutdown signal fired.
    Interrupted,
    /// The loop stopped on an error. Rows after the failing one were not published.
    Failed(PublishError),
}

#[derive(Debug)]
pub struct PublishReport {
    pub published: usize,
    pub outcome: PublishOutcome,
}

impl PublishReport {
    /// The error that should fail the process, if any. Broker-side publish
    /// failures end the loop but are not escalated.
    pub fn into_fatal_error(self) -> Option<PublishError> {
        match self.outcome {
            PublishOutcome::Failed(e) if e.is_fatal() => Some(e),
            _ => None,
        }
    }
}

/// Walks a dataset in file order, publishing one message per row and pausing
/// `interval` after each.
#[derive(Debug)]
pub struct Publisher<'a, S: TelemetrySink + ?Sized> {
    sink: &'a S,
    topic: String,
    interval: Duration,
}

impl<'a, S: TelemetrySink + ?Sized> Publisher<'a, S> {
    pub fn new(sink: &'a S, topic: impl Into<String>, interval: Duration) -> Self {
        Self {
            sink,
            topic: topic.into(),
            interval,
        }
    }

    /// Publish until the dataset is exhausted, a row or publish fails, or
    /// `shutdown` resolves. Never returns an error: the outcome is in the report.
    pub async fn run<F>(&self, dataset: &Dataset, shutdown: F) -> PublishReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut published = 0;

        let report = |published, outcome| PublishReport { published, outcome };

        for record in dataset.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    error!("An error occurred during publication: {e}");
                    return report(published, PublishOutcome::Failed(e));
                }
            };

            let payload = record.to_telemetry().encode_to_vec();

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Publication interrupted by user.");
                    return report(published, PublishOutcome::Interrupted);
                }
                res = self.sink.publish(&self.topic, payload) => {
                    if let Err(e) = res {
                        error!("An error occurred during publication: {e}");
                        return report(published, PublishOutcome::Failed(e));
                    }
                }
            }

            published += 1;
            info!("Published data for {} to {}.", record.time, self.topic);

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Publication interrupted by user.");
                    return report(published, PublishOutcome::Interrupted);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Published {published} rows to {}", self.topic);
        report(published, PublishOutcome::Completed)
    }
}

/// Load the artifact, connect, publish, then always disconnect.
///
/// The dataset is loaded before connecting so a missing or empty file never
/// opens a broker session.
pub async fn publish_file<F>(
    settings: &PublicationSettings,
    shutdown: F,
) -> Result<PublishReport, PublicationError>
where
    F: Future<Output = ()>,
{
    let path = settings.data_file.clone();
    let dataset = tokio::task::spawn_blocking(move || Dataset::load(&path))
        .await
        .map_err(|e| DatasetError::io(&settings.data_file, std::io::Error::other(e)))??;
    info!("Loaded {} rows from {}", dataset.len(), settings.data_file.display());

    let broker = MqttBroker::connect(&settings.broker).await?;

    let report = Publisher::new(&broker, &settings.broker.topic, settings.interval)
        .run(&dataset, shutdown)
        .await;

    match broker.shutdown().await {
        DisconnectReason::Unexpected(reason) => {
            warn!("Broker connection had already dropped: {reason}")
        }
        DisconnectReason::ConnectFailed(_) | DisconnectReason::Expected => {}
    }
    info!("Program exited gracefully.");

    Ok(report)
}
