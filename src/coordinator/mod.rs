use crate::prelude::*;
use crate::voltronic::inverter::ChannelData;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InverterStats {
    pub connects: u64,
    pub disconnections: u64,
    pub polls: u64,
    pub failed_polls: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct Stats {
    pub mqtt_messages_sent: u64,
    pub mqtt_errors: u64,
    pub inverters: HashMap<String, InverterStats>,
}

impl Stats {
    pub fn print_summary(&self) {
        info!("Statistics:");
        info!("  MQTT:");
        info!("    Messages sent: {}", self.mqtt_messages_sent);
        info!("    Errors: {}", self.mqtt_errors);
        info!("  Inverters:");
        let mut names: Vec<&String> = self.inverters.keys().collect();
        names.sort();
        for name in names {
            let s = &self.inverters[name];
            info!("    {}:", name);
            info!("      Connects: {}", s.connects);
            info!("      Disconnections: {}", s.disconnections);
            info!("      Polls: {} ({} incomplete)", s.polls, s.failed_polls);
            if let Some(e) = &s.last_error {
                info!("      Last error: {}", e);
            }
        }
    }

    fn record(&mut self, event: ChannelData) {
        match event {
            ChannelData::Connected(inverter) => {
                self.inverters.entry(inverter).or_default().connects += 1;
            }
            ChannelData::Polled { inverter, ok } => {
                let s = self.inverters.entry(inverter).or_default();
                s.polls += 1;
                if !ok {
                    s.failed_polls += 1;
                }
            }
            ChannelData::Disconnect { inverter, error } => {
                let s = self.inverters.entry(inverter).or_default();
                s.disconnections += 1;
                s.last_error = Some(error);
            }
        }
    }
}

struct InverterTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Owns one poll loop task per active inverter, by name.
///
/// The loops share nothing but the outbound MQTT channel, so one inverter
/// failing has no effect on the others.
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    connector: Arc<dyn Connector>,
    tasks: Vec<InverterTask>,
    monitor: Option<JoinHandle<()>>,
    pub stats: Arc<Mutex<Stats>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            channels,
            connector,
            tasks: Vec::new(),
            monitor: None,
            stats: Arc::new(Mutex::new(Stats::default())),
        }
    }

    /// Spawns the loops, returning how many were started. Calling it again
    /// while they run does nothing.
    pub fn start(&mut self) -> usize {
        if !self.tasks.is_empty() {
            return 0;
        }

        // subscribe before any loop can emit
        let events = self.channels.from_inverter.subscribe();
        self.monitor = Some(tokio::spawn(Self::monitor(events, self.stats.clone())));

        for inverter in self.config.active_inverters() {
            let name = inverter.name().to_string();
            let subject = Inverter::new(
                self.config.clone(),
                &inverter,
                self.channels.clone(),
                self.connector.clone(),
            );

            info!("starting inverter {} on {}", name, inverter.port());
            let handle = tokio::spawn(async move { subject.start().await });
            self.tasks.push(InverterTask { name, handle });
        }

        self.tasks.len()
    }

    pub fn inverter_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .iter()
            .any(|t| t.name == name && !t.handle.is_finished())
    }

    pub async fn stop(&mut self) {
        info!("Stopping {} inverter task(s)...", self.tasks.len());

        for task in self.tasks.drain(..) {
            task.handle.abort();
            match task.handle.await {
                Err(e) if e.is_cancelled() => debug!("inverter {} stopped", task.name),
                Err(e) => error!("inverter {} task failed: {}", task.name, e),
                Ok(()) => {}
            }
        }

        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
            let _ = monitor.await;
        }
    }

    async fn monitor(mut events: crate::voltronic::inverter::Receiver, stats: Arc<Mutex<Stats>>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(mut stats) = stats.lock() {
                        stats.record(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator missed {} inverter events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
