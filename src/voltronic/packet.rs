/// Every request and every response ends with a carriage return.
pub const TERMINATOR: u8 = b'\r';

/// CRC-16/XMODEM: poly 0x1021, init 0, no reflection, no final xor.
pub fn checksum(data: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(data)
}

/// Query commands understood by the inverter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// General status parameters (the multi-field metrics query).
    Qpigs,
    /// Device mode, answered with a single letter.
    Qmod,
    Other(String),
}

impl Command {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Qpigs => "QPIGS",
            Self::Qmod => "QMOD",
            Self::Other(c) => c,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "QPIGS" => Self::Qpigs,
            "QMOD" => Self::Qmod,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An outbound request: command bytes, big-endian checksum, terminator.
///
/// The command text is not escaped, so it must not contain `TERMINATOR`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandFrame(Vec<u8>);

impl CommandFrame {
    pub fn new(command: &Command) -> Self {
        Self(frame(command.as_str()))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

pub fn frame(command: &str) -> Vec<u8> {
    let payload: Vec<u8> = command.chars().map(|c| c as u8).collect();

    let mut r = Vec::with_capacity(payload.len() + 3);
    r.extend_from_slice(&payload);
    r.extend_from_slice(&checksum(&payload).to_be_bytes());
    r.push(TERMINATOR);
    r
}
