//! Length-prefixed framing for the reliable stream.
//!
//! Wire format: `[u32 little-endian length][bincode payload]`.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::net::protocol::{encode, EncodeError, ServerMessage};

/// Largest accepted frame payload
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Conservative QUIC datagram payload size
pub const MAX_DATAGRAM_SIZE: usize = 1200;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Peer closed the stream")]
    ConnectionClosed,
    #[error("Frame of {0} bytes exceeds {1}")]
    MessageTooLarge(usize, usize),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("Stream I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// A clean or mid-frame EOF both mean the peer went away
fn closed_on_eof(e: io::Error) -> FramingError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FramingError::ConnectionClosed
    } else {
        FramingError::Io(e)
    }
}

/// Read the next frame payload. Oversized lengths are refused before any
/// payload buffer is allocated.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(closed_on_eof)?;

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FramingError::MessageTooLarge(len, MAX_FRAME_SIZE));
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await.map_err(closed_on_eof)?;
    }
    Ok(payload)
}

/// Write `payload` as one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> Result<(), FramingError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FramingError::MessageTooLarge(payload.len(), MAX_FRAME_SIZE));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Encode and write a server message as one frame
pub async fn write_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    message: &ServerMessage,
) -> Result<usize, FramingError> {
    let bytes = encode(message)?;
    write_frame(stream, &bytes).await?;
    Ok(bytes.len())
}

/// Datagrams carry one bincode payload with no length prefix
pub fn validate_datagram_size(payload: &[u8]) -> Result<(), FramingError> {
    match payload.len() {
        n if n > MAX_DATAGRAM_SIZE => Err(FramingError::MessageTooLarge(n, MAX_DATAGRAM_SIZE)),
        _ => Ok(()),
    }
}
