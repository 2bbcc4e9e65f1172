#![allow(dead_code)]

use voltronic_bridge::prelude::*;
use voltronic_bridge::voltronic::packet::{checksum, TERMINATOR};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const QPIGS_REPLY: &str = "(230.0 50.0 230.0 50.0 0800 0600 020 400 51.20 010 090 0035 0005 060.5 00.00 00000 00010110 00 00 00000 010\r";
pub const QMOD_REPLY: &str = "(L\r";

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();
impl Factory {
    pub fn inverter(name: &str) -> config::Inverter {
        config::Inverter {
            name: name.to_string(),
            port: format!("/dev/tty{}", name),
            baudrate: 2400,
            enabled: true,
        }
    }

    /// Millisecond timings so the loops turn over quickly.
    pub fn config(inverters: Vec<config::Inverter>) -> ConfigWrapper {
        ConfigWrapper::from_config(Config {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_topic_prefix: "voltronic".to_string(),
            mqtt_client_id: "voltronic-bridge-test".to_string(),
            poll_interval_s: Duration::from_millis(20),
            connect_timeout_s: Duration::from_millis(100),
            reconnect_backoff_s: Duration::from_millis(20),
            inverters,
            loglevel: "debug".to_string(),
        })
    }

    pub fn config_for(names: &[&str]) -> ConfigWrapper {
        Self::config(names.iter().map(|n| Self::inverter(n)).collect())
    }
}

/// How a simulated inverter behaves.
#[derive(Clone, Debug)]
pub enum Behaviour {
    /// Answers QPIGS and QMOD.
    Normal,
    /// Opens fine, never answers.
    Silent,
    /// Answers QMOD only.
    NoMetrics,
    /// Answers this many queries, then drops the line.
    HangUpAfter(usize),
    /// The port can't be opened.
    Unplugged,
}

impl Behaviour {
    fn reply(&self, command: &str) -> Option<&'static str> {
        match (self, command) {
            (Self::Silent, _) => None,
            (Self::NoMetrics, "QPIGS") => None,
            (_, "QPIGS") => Some(QPIGS_REPLY),
            (_, "QMOD") => Some(QMOD_REPLY),
            _ => Some("(NAK\r"),
        }
    }
}

/// Plays the inverter end of `device`, checking each frame's CRC.
pub async fn simulate(mut device: DuplexStream, behaviour: Behaviour) {
    let mut frame = Vec::new();
    let mut byte = [0u8; 1];
    let mut answered = 0;

    loop {
        match device.read(&mut byte).await {
            Ok(0) | Err(_) => return,
            Ok(_) => frame.push(byte[0]),
        }
        if byte[0] != TERMINATOR {
            continue;
        }

        let received = std::mem::take(&mut frame);
        if received.len() < 3 {
            continue;
        }
        let (command, crc) = received[..received.len() - 1].split_at(received.len() - 3);
        let reply = if u16::from_be_bytes([crc[0], crc[1]]) == checksum(command) {
            behaviour.reply(&String::from_utf8_lossy(command))
        } else {
            Some("(NAK\r")
        };

        if let Some(reply) = reply {
            if device.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
            answered += 1;
        }

        if let Behaviour::HangUpAfter(n) = behaviour {
            if answered >= n {
                return;
            }
        }
    }
}

/// Hands out in-memory links to simulated inverters, by name.
pub struct MockConnector {
    behaviours: HashMap<String, Behaviour>,
    opens: Mutex<HashMap<String, usize>>,
}

impl MockConnector {
    pub fn new(behaviours: &[(&str, Behaviour)]) -> Self {
        Self {
            behaviours: behaviours
                .iter()
                .map(|(name, b)| (name.to_string(), b.clone()))
                .collect(),
            opens: Mutex::new(HashMap::new()),
        }
    }

    pub fn opens(&self, name: &str) -> usize {
        self.opens.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, inverter: &config::Inverter) -> Result<Box<dyn Link>> {
        *self
            .opens
            .lock()
            .unwrap()
            .entry(inverter.name().to_string())
            .or_default() += 1;

        match self.behaviours.get(inverter.name()) {
            None | Some(Behaviour::Unplugged) => Err(voltronic_bridge::error::Error::LinkOpen {
                port: inverter.port().to_string(),
                reason: "No such file or directory".to_string(),
            }
            .into()),
            Some(behaviour) => {
                let (host, device) = tokio::io::duplex(1024);
                tokio::spawn(simulate(device, behaviour.clone()));
                Ok(Box::new(host))
            }
        }
    }
}

pub fn unwrap_mqtt_message(data: mqtt::ChannelData) -> mqtt::Message {
    match data {
        mqtt::ChannelData::Message(m) => m,
        other => panic!("expected a message, got {:?}", other),
    }
}

/// Gathers outbound messages until `done` is satisfied, panicking if that
/// takes longer than `limit`.
pub async fn collect_until<F>(
    rx: &mut broadcast::Receiver<mqtt::ChannelData>,
    limit: Duration,
    mut done: F,
) -> Vec<mqtt::Message>
where
    F: FnMut(&[mqtt::Message]) -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    let mut messages = Vec::new();

    while !done(&messages) {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(data)) => messages.push(unwrap_mqtt_message(data)),
            Ok(Err(e)) => panic!("channel error: {}", e),
            Err(_) => panic!("gave up waiting, got {:#?}", messages),
        }
    }

    messages
}

pub fn count(messages: &[mqtt::Message], topic: &str) -> usize {
    messages.iter().filter(|m| m.topic == topic).count()
}

pub fn payloads<'a>(messages: &'a [mqtt::Message], topic: &str) -> Vec<&'a str> {
    messages
        .iter()
        .filter(|m| m.topic == topic)
        .map(|m| m.payload.as_str())
        .collect()
}

pub fn states(messages: &[mqtt::Message], inverter: &str) -> Vec<serde_json::Value> {
    payloads(messages, &format!("{}/state", inverter))
        .into_iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect()
}
