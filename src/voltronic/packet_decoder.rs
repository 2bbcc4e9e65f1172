use crate::error::Error;
use crate::voltronic::packet::TERMINATOR;

use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;

/// Outcome of one command/response exchange. A failure never carries
/// response text.
pub type Response = std::result::Result<String, Error>;

// a reply this long with no terminator means the stream is garbage
const MAX_RESPONSE_SIZE: usize = 4096;

/// Splits a byte stream into terminator-delimited responses, cleaning each
/// one into the text between the leading `(` and the carriage return.
#[derive(Debug, Default)]
pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Turns raw reply bytes into payload text: trim, drop one leading `(`,
    /// drop every carriage return, trim again.
    pub fn clean(bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim();
        let text = text.strip_prefix('(').unwrap_or(text);
        text.replace('\r', "").trim().to_string()
    }
}

impl Decoder for ResponseDecoder {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|&b| b == TERMINATOR) {
            Some(pos) => {
                let reply = src.split_to(pos + 1);
                Ok(Some(Self::clean(&reply)))
            }
            None if src.len() > MAX_RESPONSE_SIZE => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("no terminator in {} bytes", src.len()),
            )),
            None => Ok(None),
        }
    }
}

/// Reads one response, giving up after `timeout`.
///
/// Whatever arrived before the terminator (or before giving up) is owned by
/// this call; bytes after the first terminator are discarded with it.
pub async fn read_response<R>(reader: &mut R, timeout: Duration) -> Response
where
    R: AsyncRead + Unpin + ?Sized,
{
    match tokio::time::timeout(timeout, read_until_terminator(reader)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::Read(e.to_string())),
        Err(_) => Err(Error::ResponseTimeout(timeout)),
    }
}

async fn read_until_terminator<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(256);
    let mut decoder = ResponseDecoder::new();

    loop {
        if let Some(text) = decoder.decode(&mut buf)? {
            return Ok(text);
        }
        if reader.read_buf(&mut buf).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "link closed",
            ));
        }
    }
}
