use std::{error::Error, fmt, io};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{
    cipher::{AdapterKey, CipherError, decrypt, encrypt},
    message::Message,
};

pub const FRAME_DELIMITER: u8 = b'\n';
pub const MAX_FRAME_BYTES: usize = 64 * 1024;
const READ_CHUNK_BYTES: usize = 4096;

#[derive(Debug)]
pub enum ProtocolError {
    Io(io::Error),
    Json(serde_json::Error),
    Cipher(CipherError),
    FrameTooLarge(usize),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Io(err) => write!(f, "I/O error: {}", err),
            ProtocolError::Json(err) => write!(f, "JSON error: {}", err),
            ProtocolError::Cipher(err) => write!(f, "cipher error: {}", err),
            ProtocolError::FrameTooLarge(size) => write!(
                f,
                "frame is {} bytes, above configured maximum {}",
                size, MAX_FRAME_BYTES
            ),
        }
    }
}

impl Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
    fn from(value: io::Error) -> Self {
        ProtocolError::Io(value)
    }
}

impl From<CipherError> for ProtocolError {
    fn from(value: CipherError) -> Self {
        ProtocolError::Cipher(value)
    }
}

/// Serializes, encrypts and terminates `message` with the frame delimiter.
pub fn encode_frame(message: &Message, key: &AdapterKey) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(message).map_err(ProtocolError::Json)?;
    let mut frame = encrypt(&payload, key)?.into_bytes();
    if frame.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }

    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Decodes one frame with its delimiter already removed.
///
/// Only a frame that fails to decrypt or is not JSON at all is an error;
/// anything else maps onto a [`Message`] via [`Message::from_value`].
pub fn decode_frame(frame: &[u8], key: &AdapterKey) -> Result<Message, ProtocolError> {
    let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
    let payload = decrypt(frame, key)?;
    let value = serde_json::from_slice::<Value>(&payload).map_err(ProtocolError::Json)?;
    Ok(Message::from_value(value))
}

/// Reassembles delimiter-terminated frames from arbitrarily split reads.
///
/// Bytes are scanned for the delimiter once: `scanned` remembers how far the
/// last search got, and consumed frames are only compacted away on the next
/// `push`.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    start: usize,
    scanned: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Takes the next complete frame, skipping empty ones.
    ///
    /// Fails once a frame, complete or not, grows past [`MAX_FRAME_BYTES`].
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        loop {
            let from = self.scanned.max(self.start);
            let Some(offset) = self.buf[from..]
                .iter()
                .position(|b| *b == FRAME_DELIMITER)
            else {
                self.scanned = self.buf.len();
                let pending = self.pending_len();
                if pending > MAX_FRAME_BYTES {
                    return Err(ProtocolError::FrameTooLarge(pending));
                }
                return Ok(None);
            };

            let end = from + offset;
            let frame = self.buf[self.start..end].to_vec();
            self.start = end + 1;
            self.scanned = self.start;

            if frame.len() > MAX_FRAME_BYTES {
                return Err(ProtocolError::FrameTooLarge(frame.len()));
            }
            if !frame.is_empty() {
                return Ok(Some(frame));
            }
        }
    }

    /// Bytes buffered after the last complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len() - self.start
    }
}

pub async fn write_frame<W>(
    writer: &mut W,
    message: &Message,
    key: &AdapterKey,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message, key)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads until `buffer` yields a frame. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(
    reader: &mut R,
    buffer: &mut FrameBuffer,
    key: &AdapterKey,
) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        if let Some(frame) = buffer.next_frame()? {
            return decode_frame(&frame, key).map(Some);
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.push(&chunk[..n]);
    }
}
