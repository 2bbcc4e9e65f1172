pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::{
    channels::Channels,
    config::{self, Config, ConfigWrapper},
    coordinator::Coordinator,
    mqtt,
    voltronic::{
        self,
        inverter::Inverter,
        link::{Connector, Link, SerialConnector},
        packet::Command,
        packet_decoder::Response,
    },
};
