use crate::prelude::*;
use crate::error;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, StopBits};

/// A byte pipe to one inverter. Owned by exactly one poll loop, which is what
/// keeps at most one exchange in flight per link.
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send {
    /// Throws away anything received but not yet read.
    fn clear_input(&mut self) -> std::io::Result<()>;
}

impl Link for tokio_serial::SerialStream {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(std::io::Error::from)
    }
}

// in-memory pipe, for simulated inverters
impl Link for tokio::io::DuplexStream {
    fn clear_input(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Opens links for configured inverters.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, inverter: &config::Inverter) -> Result<Box<dyn Link>>;
}

/// Opens the inverter's serial device at its baud rate, 8N1, no flow control.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialConnector;

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self, inverter: &config::Inverter) -> Result<Box<dyn Link>> {
        debug!("opening serial port {} at {} baud", inverter.port(), inverter.baudrate());

        #[allow(unused_mut)]
        let mut port = tokio_serial::new(inverter.port(), inverter.baudrate())
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| error::Error::LinkOpen {
                port: inverter.port().to_string(),
                reason: e.to_string(),
            })?;

        #[cfg(unix)]
        if let Err(e) = port.set_exclusive(true) {
            warn!("{}: failed to take exclusive access: {}", inverter.port(), e);
        }

        Ok(Box::new(port))
    }
}
