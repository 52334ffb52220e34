//! MQTT connection to the telemetry broker.
//!
//! `rumqttc` hands back a client and an event loop. The event loop runs on its
//! own task and reports connection state through a `watch` channel, so the
//! publisher only sees explicit transitions:
//! `Disconnected -> Connecting -> Connected -> Disconnected`.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::BrokerConfig,
    error::{BrokerError, PublishError},
};

/// Capacity of the client's request channel. `publish` blocks when it is full.
const REQUEST_CAPACITY: usize = 64;

/// How long shutdown waits for the event loop to flush the DISCONNECT packet.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Destination for encoded telemetry. Publishing is fire-and-forget: returning
/// `Ok` means the message was handed to the client, not that it was delivered.
#[async_trait]
pub trait TelemetrySink: Send + Sync + Debug {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Never got past the handshake.
    ConnectFailed(String),
    /// We sent DISCONNECT.
    Expected,
    /// The broker or the network dropped us.
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected(Option<DisconnectReason>),
    Connecting,
    Connected,
}

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

#[derive(Debug)]
pub struct MqttBroker {
    client: AsyncClient,
    qos: QoS,
    state: watch::Receiver<ConnectionState>,
    network: JoinHandle<()>,
}

impl MqttBroker {
    /// Connect and wait for the broker's CONNACK. The background event loop is
    /// stopped before returning an error.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, mut state) = watch::channel(ConnectionState::Disconnected(None));

        info!("Connecting to MQTT broker at {}:{}...", config.host, config.port);
        tx.send_replace(ConnectionState::Connecting);
        let network = tokio::spawn(drive(eventloop, tx));

        let connect_err = |reason: String| BrokerError::Connect {
            host: config.host.clone(),
            port: config.port,
            reason,
        };

        let outcome = state
            .wait_for(|s| !matches!(s, ConnectionState::Connecting))
            .await
            .map(|s| (*s).clone());

        match outcome {
            Ok(ConnectionState::Connected) => {
                info!("Connected to MQTT Broker!");
                Ok(Self {
                    client,
                    qos: qos_from_level(config.qos),
                    state,
                    network,
                })
            }
            Ok(ConnectionState::Disconnected(Some(DisconnectReason::ConnectFailed(reason)))) => {
                network.abort();
                Err(connect_err(reason))
            }
            Ok(other) => {
                network.abort();
                Err(connect_err(format!("unexpected connection state {other:?}")))
            }
            Err(_) => {
                network.abort();
                Err(connect_err("network task ended before handshake".to_string()))
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Send DISCONNECT, then stop the background event loop.
    pub async fn shutdown(mut self) -> DisconnectReason {
        if matches!(*self.state.borrow(), ConnectionState::Connected) {
            if let Err(e) = self.client.disconnect().await {
                debug!("Disconnect request not accepted: {e}");
            }
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.network)
            .await
            .is_err()
        {
            debug!("Event loop did not stop within {SHUTDOWN_GRACE:?}, aborting it");
            self.network.abort();
        }

        let reason = match &*self.state.borrow() {
            ConnectionState::Disconnected(Some(reason)) => reason.clone(),
            _ => DisconnectReason::Expected,
        };
        info!("Disconnected from MQTT Broker");
        reason
    }
}

#[async_trait]
impl TelemetrySink for MqttBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|e| PublishError::Sink(Box::new(e)))
    }
}

/// Poll the event loop until the connection ends, publishing state transitions.
async fn drive(mut eventloop: EventLoop, state: watch::Sender<ConnectionState>) {
    let mut connected = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected = true;
                    state.send_replace(ConnectionState::Connected);
                } else {
                    let reason = format!("broker refused connection: {:?}", ack.code);
                    error!("Failed to connect, {reason}");
                    state.send_replace(ConnectionState::Disconnected(Some(
                        DisconnectReason::ConnectFailed(reason),
                    )));
                    return;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnection was expected");
                state.send_replace(ConnectionState::Disconnected(Some(DisconnectReason::Expected)));
                return;
            }
            Ok(event) => debug!("MQTT event: {event:?}"),
            Err(e) if !connected => {
                let reason = describe(&e);
                error!("Failed to connect, {reason}");
                state.send_replace(ConnectionState::Disconnected(Some(
                    DisconnectReason::ConnectFailed(reason),
                )));
                return;
            }
            Err(e) => {
                let reason = describe(&e);
                warn!("Unexpected disconnection: {reason}");
                state.send_replace(ConnectionState::Disconnected(Some(
                    DisconnectReason::Unexpected(reason),
                )));
                return;
            }
        }
    }
}

fn describe(err: &ConnectionError) -> String {
    match err {
        ConnectionError::ConnectionRefused(code) => format!("broker refused connection: {code:?}"),
        other => other.to_string(),
    }
}
