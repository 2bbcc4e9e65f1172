use crate::prelude::*;
use crate::coordinator::Stats;
use crate::voltronic::telemetry::Telemetry;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

const AVAILABILITY: &str = "availability";
const RECONNECT_DELAY_SECS: u64 = 2;

// Message {{{
/// An outbound publish. `topic` is relative to the configured prefix.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// Bridge-wide availability, `<prefix>/availability`.
    pub fn for_availability(online: bool) -> Message {
        Message {
            topic: AVAILABILITY.to_string(),
            retain: true,
            payload: Self::online_str(online).to_string(),
        }
    }

    pub fn for_inverter_availability(inverter: &str, online: bool) -> Message {
        Message {
            topic: format!("{}/{}", inverter, AVAILABILITY),
            retain: true,
            payload: Self::online_str(online).to_string(),
        }
    }

    pub fn for_state(telemetry: &Telemetry) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/state", telemetry.inverter),
            retain: false,
            payload: serde_json::to_string(telemetry)?,
        })
    }

    pub fn for_last_error(inverter: &str, error: &str, timestamp: &str) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/last_error", inverter),
            retain: true,
            payload: serde_json::to_string(&serde_json::json!({
                "error": error,
                "timestamp": timestamp,
            }))?,
        })
    }

    fn online_str(online: bool) -> &'static str {
        if online {
            ONLINE
        } else {
            OFFLINE
        }
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

/// The bus publisher. Everything else hands it messages through
/// `Channels::to_mqtt`, from any number of tasks.
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
    stats: Arc<Mutex<Stats>>,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels, stats: Arc<Mutex<Stats>>) -> Self {
        Self {
            config,
            channels,
            stats,
        }
    }

    /// Runs until `stop` is called. `messages` should be subscribed before
    /// anything starts publishing, so nothing is lost while connecting.
    pub async fn start(&self, messages: Receiver) -> Result<()> {
        let c = &self.config;

        let mut options = MqttOptions::new(c.mqtt_client_id(), c.mqtt_host(), c.mqtt_port());
        options.set_last_will(LastWill::new(
            self.topic(AVAILABILITY),
            OFFLINE,
            QoS::AtMostOnce,
            true,
        ));
        options.set_keep_alive(Duration::from_secs(60));
        if let Some((username, password)) = c.mqtt_credentials() {
            options.set_credentials(username, password);
        }

        info!("initializing mqtt at {}:{}", c.mqtt_host(), c.mqtt_port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.receiver(client.clone(), eventloop),
            self.sender(client, messages)
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
    }

    // drives the connection; announces the bridge on every (re)connect
    async fn receiver(&self, client: AsyncClient, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_mqtt.subscribe();

        loop {
            tokio::select! {
                msg = shutdown.recv() => match msg {
                    Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                    _ => continue,
                },
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        // try_ variant: awaiting here would stop the eventloop being polled
                        let online = Message::for_availability(true);
                        if let Err(e) = client.try_publish(
                            self.topic(&online.topic),
                            QoS::AtMostOnce,
                            online.retain,
                            online.payload,
                        ) {
                            warn!("failed to publish availability: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("mqtt: {}", e);
                        info!("mqtt reconnecting in {}s", RECONNECT_DELAY_SECS);
                        tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
                    }
                    _ => {} // keepalives etc
                },
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    // everyone else -> broker
    async fn sender(&self, client: AsyncClient, mut messages: Receiver) -> Result<()> {
        loop {
            match messages.recv().await {
                Ok(ChannelData::Shutdown) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Ok(ChannelData::Message(message)) => {
                    let topic = self.topic(&message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);

                    let result = client
                        .publish(&topic, QoS::AtMostOnce, message.retain, message.payload.into_bytes())
                        .await;

                    if let Ok(mut stats) = self.stats.lock() {
                        match result {
                            Ok(()) => stats.mqtt_messages_sent += 1,
                            Err(_) => stats.mqtt_errors += 1,
                        }
                    }
                    if let Err(err) = result {
                        warn!("MQTT publish to {} failed: {}", topic, err);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("MQTT sender lagging, {} messages dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => bail!("to_mqtt channel closed"),
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.config.topic_prefix(), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_topics() {
        assert_eq!(
            Message::for_availability(true),
            Message {
                topic: "availability".to_string(),
                retain: true,
                payload: "online".to_string(),
            }
        );
        assert_eq!(
            Message::for_inverter_availability("garage", false),
            Message {
                topic: "garage/availability".to_string(),
                retain: true,
                payload: "offline".to_string(),
            }
        );
    }

    #[test]
    fn last_error() -> Result<()> {
        let m = Message::for_last_error("garage", "no such device", "2026-01-01T00:00:00.000Z")?;
        assert_eq!(m.topic, "garage/last_error");
        assert!(m.retain);

        let json: serde_json::Value = serde_json::from_str(&m.payload)?;
        assert_eq!(json["error"], "no such device");
        assert_eq!(json["timestamp"], "2026-01-01T00:00:00.000Z");

        Ok(())
    }

    #[test]
    fn prefixed_topic() -> Result<()> {
        let config = ConfigWrapper::from_config(Config::from_json(
            r#"{"mqtt_topic_prefix": "home/solar/"}"#,
        )?);
        let mqtt = Mqtt::new(config, Channels::new(), Arc::new(Mutex::new(Stats::default())));
        assert_eq!(mqtt.topic("garage/state"), "home/solar/garage/state");
        assert_eq!(mqtt.topic(AVAILABILITY), "home/solar/availability");
        Ok(())
    }
}
