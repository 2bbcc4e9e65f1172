use crate::prelude::*;
use crate::error;
use crate::voltronic::packet::CommandFrame;
use crate::voltronic::packet_decoder::read_response;
use crate::voltronic::telemetry::Telemetry;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Lifecycle events, inverter -> coordinator.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Connected(String),
    Polled { inverter: String, ok: bool },
    Disconnect { inverter: String, error: String },
}
pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

/// One request/response exchange over `link`.
///
/// Residual input is cleared first so a stale reply can't be taken for this
/// one. Both the write and the read are bounded by `timeout`.
pub async fn query<L>(link: &mut L, command: &Command, timeout: Duration) -> Response
where
    L: Link + ?Sized,
{
    let frame = CommandFrame::new(command);

    if let Err(e) = link.clear_input() {
        // not fatal; at worst a stale reply gets read
        debug!("clearing input before {} failed: {}", command, e);
    }

    match tokio::time::timeout(timeout, send_frame(link, &frame)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(error::Error::Write(e.to_string())),
        Err(_) => return Err(error::Error::Write(format!("timed out after {}ms", timeout.as_millis()))),
    }

    read_response(link, timeout).await
}

async fn send_frame<L>(link: &mut L, frame: &CommandFrame) -> std::io::Result<()>
where
    L: Link + ?Sized,
{
    link.write_all(frame.bytes()).await?;
    link.flush().await
}

/// The poll loop for one configured inverter:
/// connect, announce, poll forever; on failure announce, back off, repeat.
#[derive(Clone)]
pub struct Inverter {
    config: ConfigWrapper,
    inverter: config::Inverter,
    channels: Channels,
    connector: Arc<dyn Connector>,
}

impl Inverter {
    pub fn new(
        config: ConfigWrapper,
        inverter: &config::Inverter,
        channels: Channels,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            inverter: inverter.clone(),
            channels,
            connector,
        }
    }

    pub fn name(&self) -> &str {
        self.inverter.name()
    }

    /// Never returns; the task is aborted to stop it.
    pub async fn start(&self) {
        loop {
            let e = match self.connect().await {
                Ok(never) => match never {},
                Err(e) => e,
            };

            error!("inverter {}: {:#}", self.name(), e);
            self.disconnected(&e);

            info!(
                "inverter {}: reconnecting in {}s",
                self.name(),
                self.config.reconnect_backoff().as_secs_f32()
            );
            tokio::time::sleep(self.config.reconnect_backoff()).await;
        }
    }

    // only ever returns the error that ended the connection; the link is
    // closed when it drops on the way out
    async fn connect(&self) -> Result<Infallible> {
        info!(
            "connecting to inverter {} at {} ({} baud)",
            self.name(),
            self.inverter.port(),
            self.inverter.baudrate()
        );

        let mut link = self.connector.open(&self.inverter).await?;

        info!("inverter {}: connected!", self.name());
        self.publish(mqtt::Message::for_inverter_availability(self.name(), true));
        self.send_event(ChannelData::Connected(self.name().to_string()));

        loop {
            let (telemetry, link_error) = self.poll(link.as_mut()).await;

            self.publish(mqtt::Message::for_state(&telemetry)?);
            self.send_event(ChannelData::Polled {
                inverter: self.name().to_string(),
                ok: telemetry.ok,
            });

            if let Some(e) = link_error {
                return Err(e.into());
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// One poll cycle. Each query may fail on its own without aborting the
    /// other; a broken link is handed back so the caller can reconnect after
    /// publishing what it got.
    pub async fn poll(&self, link: &mut dyn Link) -> (Telemetry, Option<error::Error>) {
        let timeout = self.config.response_timeout();
        // stamped when the cycle starts, not when the last reply came in
        let timestamp = Self::timestamp();

        let qpigs = query(link, &Command::Qpigs, timeout).await;
        let qmod = query(link, &Command::Qmod, timeout).await;

        for (command, response) in [(Command::Qpigs, &qpigs), (Command::Qmod, &qmod)] {
            match response {
                Ok(text) => debug!("inverter {}: {} = {:?}", self.name(), command, text),
                Err(e) => warn!("inverter {}: {} failed: {}", self.name(), command, e),
            }
        }

        let link_error = [&qpigs, &qmod]
            .into_iter()
            .find_map(|r| r.as_ref().err().filter(|e| e.is_link_failure()).cloned());

        let telemetry = Telemetry::new(&self.inverter, timestamp, &qpigs, &qmod);
        (telemetry, link_error)
    }

    // best effort; nothing here may fail the loop
    fn disconnected(&self, e: &anyhow::Error) {
        let description = format!("{:#}", e);

        self.publish(mqtt::Message::for_inverter_availability(self.name(), false));
        match mqtt::Message::for_last_error(self.name(), &description, &Self::timestamp()) {
            Ok(m) => self.publish(m),
            Err(err) => warn!("inverter {}: can't build last_error: {}", self.name(), err),
        }
        self.send_event(ChannelData::Disconnect {
            inverter: self.name().to_string(),
            error: description,
        });
    }

    fn publish(&self, message: mqtt::Message) {
        if self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(message))
            .is_err()
        {
            warn!("inverter {}: mqtt channel closed, message dropped", self.name());
        }
    }

    fn send_event(&self, event: ChannelData) {
        // nobody listening is fine
        let _ = self.channels.from_inverter.send(event);
    }

    fn timestamp() -> String {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}
