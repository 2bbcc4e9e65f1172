use std::time::Duration;

/// Failures the bridge distinguishes between.
///
/// Only `Config` is fatal, and only at startup. Everything else is caught at
/// the per-inverter loop and turned into availability/last_error messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to open {port}: {reason}")]
    LinkOpen { port: String, reason: String },

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("no response within {}ms", .0.as_millis())]
    ResponseTimeout(Duration),
}

impl Error {
    /// True when the serial link itself is broken, as opposed to the
    /// inverter just not answering in time.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Write(_) | Self::Read(_))
    }
}

/// Creates an anyhow error with the current file and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        anyhow::anyhow!(
            "[{}:{}] {}",
            std::path::Path::new(file!())
                .file_name()
                .map(|f| f.to_string_lossy())
                .unwrap_or_default(),
            line!(),
            format!($($arg)*)
        )
    };
}
