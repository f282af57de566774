//! Who is connected.
//!
//! The registry owns one `SessionRecord` per active session: the identity,
//! the write side of its connection, the peer's public key and the color it
//! was assigned. Sessions and the broadcaster only ever hold clones of the
//! shared connection handle.

use log::{debug, info, warn};
use shared::crypto::RsaPublicKey;
use shared::framing::write_frame;
use shared::{Color, Identity, ProtocolError};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

use crate::config::DEFAULT_WRITE_TIMEOUT;
use crate::error::ServerError;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half of a client connection.
///
/// Frames from the session itself and from broadcasts are serialized by the
/// inner lock so they never interleave on the wire. Every write is bounded by
/// the write timeout; a write that times out or fails leaves the stream
/// mid-frame, so the handle is marked broken and refuses further frames.
pub struct ConnectionHandle {
    peer: String,
    max_frame_bytes: u32,
    write_timeout: Duration,
    broken: AtomicBool,
    writer: Mutex<BoxedWriter>,
}

impl ConnectionHandle {
    pub fn new(peer: impl Into<String>, writer: BoxedWriter, max_frame_bytes: u32) -> Self {
        Self {
            peer: peer.into(),
            max_frame_bytes,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            broken: AtomicBool::new(false),
            writer: Mutex::new(writer),
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.lock().await.send(payload).await
    }

    /// Exclusive access to the writer for as long as the guard lives. Nothing
    /// else, broadcasts included, reaches the wire in between.
    pub async fn lock(&self) -> ConnectionWriter<'_> {
        ConnectionWriter {
            handle: self,
            writer: self.writer.lock().await,
        }
    }

    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        match timeout(self.write_timeout, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Shutdown of {} failed: {}", self.peer, e),
            Err(_) => debug!("Shutdown of {} timed out", self.peer),
        }
    }
}

pub struct ConnectionWriter<'a> {
    handle: &'a ConnectionHandle,
    writer: MutexGuard<'a, BoxedWriter>,
}

impl ConnectionWriter<'_> {
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let handle = self.handle;
        if handle.is_broken() {
            return Err(ProtocolError::ConnectionLost(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("connection to {} is broken", handle.peer),
            )));
        }

        let written = timeout(
            handle.write_timeout,
            write_frame(&mut *self.writer, payload, handle.max_frame_bytes),
        )
        .await;
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                if matches!(e, ProtocolError::ConnectionLost(_)) {
                    handle.broken.store(true, Ordering::Release);
                }
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Write to {} stalled for {:?}, dropping connection",
                    handle.peer, handle.write_timeout
                );
                handle.broken.store(true, Ordering::Release);
                Err(ProtocolError::ConnectionLost(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("write to {} timed out", handle.peer),
                )))
            }
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub identity: Identity,
    pub connection: Arc<ConnectionHandle>,
    pub public_key: RsaPublicKey,
    pub color: Color,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<Identity, SessionRecord>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, record: SessionRecord) -> Result<(), ServerError> {
        if self.sessions.contains_key(&record.identity) {
            return Err(ServerError::DuplicateIdentity(record.identity));
        }
        info!(
            "Session {} registered from {}",
            record.identity,
            record.connection.peer()
        );
        self.sessions.insert(record.identity, record);
        Ok(())
    }

    /// Removing an identity that is not present is a no-op.
    pub fn unregister(&mut self, identity: &Identity) -> Option<SessionRecord> {
        let removed = self.sessions.remove(identity);
        if removed.is_some() {
            info!("Session {} unregistered", identity);
        }
        removed
    }

    #[cfg(test)]
    pub fn get(&self, identity: &Identity) -> Option<&SessionRecord> {
        self.sessions.get(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Point-in-time copy in identity order.
    pub fn snapshot(&self) -> Vec<(Identity, SessionRecord)> {
        self.sessions
            .iter()
            .map(|(identity, record)| (*identity, record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
