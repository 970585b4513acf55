//! # laundry-mqtt
//!
//! Connects the machines' MQTT topics to the engine.
//!
//! [`TelemetryLink`] subscribes to `<prefix>/+/+` and hands every publish to a
//! [`TelemetryBridge`], which decodes, validates and enqueues it. Reconnects
//! are driven by the rumqttc event loop; the subscription is renewed on every
//! `ConnAck` since sessions are clean.

use std::time::Duration;

use laundry_core::{LaundryConfig, TelemetryBridge};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before polling again after a connection error.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the request channel between client and event loop.
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("MQTT username is set but no password was given")]
    IncompleteCredentials,

    #[error("failed to queue subscription: {0}")]
    Subscribe(#[from] ClientError),
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub credentials: Option<(String, String)>,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl MqttSettings {
    /// Returns `None` when no broker is configured.
    pub fn from_config(config: &LaundryConfig) -> Result<Option<Self>, MqttError> {
        let telemetry = &config.telemetry;
        let Some(host) = telemetry.broker_host.clone() else {
            return Ok(None);
        };
        let credentials = match (&telemetry.username, &telemetry.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            (Some(_), None) => return Err(MqttError::IncompleteCredentials),
            (None, _) => None,
        };

        Ok(Some(Self {
            host,
            port: telemetry.broker_port,
            tls: telemetry.tls,
            credentials,
            client_id: telemetry.client_id.clone(),
            keep_alive: Duration::from_secs(telemetry.keep_alive_secs),
        }))
    }

    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((user, pass)) = &self.credentials {
            options.set_credentials(user, pass);
        }
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Subscriber feeding broker messages into a [`TelemetryBridge`].
pub struct TelemetryLink {
    client: AsyncClient,
    events: EventLoop,
    bridge: TelemetryBridge,
    broker: String,
}

impl TelemetryLink {
    pub fn new(settings: &MqttSettings, bridge: TelemetryBridge) -> Self {
        let (client, events) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
        Self {
            client,
            events,
            bridge,
            broker: format!("{}:{}", settings.host, settings.port),
        }
    }

    /// Runs until `cancel` fires or the engine stops accepting telemetry.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            broker = %self.broker,
            topics = %self.bridge.scheme().subscription(),
            "MQTT telemetry link started"
        );

        loop {
            if self.bridge.is_closed() {
                info!("Engine stopped, closing MQTT link");
                break;
            }

            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                polled = self.events.poll() => polled,
            };

            match polled {
                Ok(event) => {
                    if let Err(e) = self.on_event(&event) {
                        warn!(error = %e, "MQTT request failed");
                    }
                }
                Err(e) => {
                    warn!(
                        broker = %self.broker,
                        error = %e,
                        "MQTT connection error, retrying in {:?}",
                        RECONNECT_DELAY
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "MQTT disconnect not sent");
        }
        info!("MQTT telemetry link stopped");
    }

    fn on_event(&self, event: &Event) -> Result<(), MqttError> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!(broker = %self.broker, code = ?ack.code, "Connected to MQTT broker");
                self.client
                    .try_subscribe(self.bridge.scheme().subscription(), QoS::AtLeastOnce)?;
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!(pkid = ack.pkid, codes = ?ack.return_codes, "Subscription acknowledged");
            }
            Event::Incoming(Packet::Publish(publish)) => {
                // Rejections are logged by the bridge.
                let _ = self.bridge.deliver(&publish.topic, &publish.payload);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use laundry_core::{Engine, EngineConfig};
    use laundry_proto::{
        Artifact, ChatTarget, Delivery, DeliveryError, MachineClass, OutboundHandle, SlotKey,
    };
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};

    use super::*;

    struct NoDelivery;

    #[async_trait]
    impl Delivery for NoDelivery {
        async fn send(
            &self,
            _target: &ChatTarget,
            _artifact: &Artifact,
        ) -> Result<OutboundHandle, DeliveryError> {
            Err(DeliveryError::Transport("offline".to_string()))
        }

        async fn edit(
            &self,
            _handle: &OutboundHandle,
            _artifact: &Artifact,
        ) -> Result<(), DeliveryError> {
            Err(DeliveryError::Transport("offline".to_string()))
        }
    }

    fn settings() -> MqttSettings {
        let mut config = LaundryConfig::default();
        config.telemetry.broker_host = Some("broker.example".to_string());
        config.telemetry.username = Some("laundry".to_string());
        config.telemetry.password = Some("secret".to_string());
        config.telemetry.tls = false;
        MqttSettings::from_config(&config).unwrap().unwrap()
    }

    #[test]
    fn no_broker_means_no_link() {
        let config = LaundryConfig::default();
        assert!(MqttSettings::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn settings_follow_config() {
        let settings = settings();
        assert_eq!(settings.host, "broker.example");
        assert_eq!(settings.port, 8883);
        assert!(!settings.tls);
        assert_eq!(
            settings.credentials,
            Some(("laundry".to_string(), "secret".to_string()))
        );

        let options = settings.options();
        assert_eq!(
            options.broker_address(),
            ("broker.example".to_string(), 8883)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert_eq!(options.client_id(), "laundry-bot");
    }

    #[test]
    fn username_without_password_is_rejected() {
        let mut config = LaundryConfig::default();
        config.telemetry.broker_host = Some("broker.example".to_string());
        config.telemetry.username = Some("laundry".to_string());
        assert!(matches!(
            MqttSettings::from_config(&config),
            Err(MqttError::IncompleteCredentials)
        ));
    }

    #[tokio::test]
    async fn publishes_reach_the_registry() {
        let (engine, handle) = Engine::new(EngineConfig::default(), Arc::new(NoDelivery));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.run(cancel.clone()));

        let bridge = handle.telemetry_bridge(LaundryConfig::default().topic_scheme());
        let link = TelemetryLink::new(&settings(), bridge);

        link.on_event(&Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))))
        .unwrap();
        for (topic, payload) in [
            ("laundry/washer/3", "45"),
            ("laundry/dryer/2", "F"),
            ("laundry/dryer/99", "10"),
            ("laundry/washer/4", "soon"),
        ] {
            link.on_event(&Event::Incoming(Packet::Publish(Publish::new(
                topic,
                QoS::AtLeastOnce,
                payload,
            ))))
            .unwrap();
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.remaining(SlotKey::washer(3)), Some(45));
        assert_eq!(snapshot.remaining(SlotKey::dryer(2)), Some(0));
        assert_eq!(snapshot.remaining(SlotKey::washer(4)), Some(0));
        assert_eq!(
            snapshot
                .class(MachineClass::Washer)
                .filter(|r| !r.is_free())
                .count(),
            1
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn link_stops_on_cancel() {
        let (engine, handle) = Engine::new(EngineConfig::default(), Arc::new(NoDelivery));
        let bridge = handle.telemetry_bridge(LaundryConfig::default().topic_scheme());
        let link = TelemetryLink::new(&settings(), bridge);

        let cancel = CancellationToken::new();
        cancel.cancel();
        link.run(cancel).await;
        drop(engine);
    }

    #[tokio::test]
    async fn link_stops_when_engine_is_gone() {
        let (engine, handle) = Engine::new(EngineConfig::default(), Arc::new(NoDelivery));
        let bridge = handle.telemetry_bridge(LaundryConfig::default().topic_scheme());
        drop(engine);

        let link = TelemetryLink::new(&settings(), bridge);
        link.run(CancellationToken::new()).await;
    }
}
