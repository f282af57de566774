//! Length-prefixed framing.
//!
//! Layout: `[len: u32 BE][payload bytes...]`. The length is checked against
//! the caller's limit before any payload allocation; an oversized prefix
//! means the stream can no longer be trusted and the connection should be
//! dropped.

use crate::ProtocolError;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one frame. Returns `Ok(None)` when the peer closed the stream
/// cleanly on a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: u32) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes);
    if len > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            len: len as usize,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame_bytes: u32) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > max_frame_bytes as usize {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: max_frame_bytes,
        });
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
