//! Per-connection session task.
//!
//! A session walks `Handshaking -> Active -> Closing -> Closed`. Once it has
//! been registered, every exit path (quit, EOF, read error, shutdown) runs the
//! same cleanup: leave registry and world together, then close the socket.

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use shared::crypto::{encrypt, seal, RsaPublicKey};
use shared::framing::read_frame;
use shared::{Color, Command, Identity, ProtocolError, ServerPush};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::broadcaster::broadcast;
use crate::channel::handshake;
use crate::context::ArenaContext;
use crate::error::ServerError;
use crate::network::shutdown_requested;
use crate::registry::{ConnectionHandle, SessionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Closing,
    Closed,
}

/// What the loop does after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

pub struct ClientSession<S> {
    context: Arc<ArenaContext>,
    identity: Identity,
    peer: String,
    stream: Option<S>,
    state: SessionState,
    shutdown: watch::Receiver<bool>,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(
        context: Arc<ArenaContext>,
        stream: S,
        peer: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            context,
            identity: Identity::mint(),
            peer: peer.into(),
            stream: Some(stream),
            state: SessionState::Handshaking,
            shutdown,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {:?} -> {:?}", self.identity, self.state, next);
        self.state = next;
    }

    /// Drives the connection to completion. Returns the error that ended the
    /// session, if any; cleanup has already happened either way.
    pub async fn run(mut self) -> Result<(), ServerError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let max_frame_bytes = self.context.config().max_frame_bytes;
        let handshake_timeout = self.context.config().handshake_timeout;
        let (mut reader, writer) = tokio::io::split(stream);
        let connection = Arc::new(
            ConnectionHandle::new(self.peer.clone(), Box::new(writer), max_frame_bytes)
                .with_write_timeout(self.context.config().write_timeout),
        );

        let exchange = timeout(
            handshake_timeout,
            handshake(
                &mut reader,
                &connection,
                self.context.keys(),
                max_frame_bytes,
            ),
        );
        let handshake_result = tokio::select! {
            result = exchange => result.unwrap_or_else(|_| {
                Err(ProtocolError::Handshake("timed out waiting for peer key".into()))
            }),
            _ = shutdown_requested(&mut self.shutdown) => {
                Err(ProtocolError::Handshake("server shutting down".into()))
            }
        };

        let peer_key = match handshake_result {
            Ok(key) => key,
            Err(e) => {
                warn!("Handshake with {} failed: {}", self.peer, e);
                connection.shutdown().await;
                self.transition(SessionState::Closed);
                return Err(e.into());
            }
        };

        let color = Color::PALETTE
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(Color::RED);
        let record = SessionRecord {
            identity: self.identity,
            connection: Arc::clone(&connection),
            public_key: peer_key.clone(),
            color,
        };
        let welcome = match encrypt(self.identity.to_string().as_bytes(), &peer_key) {
            Ok(ciphertext) => ServerPush::Welcome { ciphertext }.encode(),
            Err(e) => {
                warn!("Cannot encrypt welcome for {}: {}", self.peer, e);
                connection.shutdown().await;
                self.transition(SessionState::Closed);
                return Err(e.into());
            }
        };

        // Held from before registration until the welcome is on the wire, so
        // a broadcast that sees the new record queues behind it.
        let mut writer = connection.lock().await;
        if let Err(e) = self.context.join(record).await {
            drop(writer);
            warn!("Rejecting {}: {}", self.peer, e);
            connection.shutdown().await;
            self.transition(SessionState::Closed);
            return Err(e);
        }

        self.transition(SessionState::Active);
        info!("Session {} active for {}", self.identity, self.peer);

        let welcomed = writer.send(&welcome).await;
        drop(writer);
        let outcome = match welcomed {
            Ok(()) => self.serve(&mut reader, &connection, &peer_key).await,
            Err(e) => Err(e.into()),
        };

        self.transition(SessionState::Closing);
        self.context.leave(&self.identity).await;
        connection.shutdown().await;
        self.transition(SessionState::Closed);
        info!("Session {} closed", self.identity);

        outcome
    }

    async fn serve(
        &mut self,
        reader: &mut ReadHalf<S>,
        connection: &ConnectionHandle,
        peer_key: &RsaPublicKey,
    ) -> Result<(), ServerError> {
        let max_frame_bytes = self.context.config().max_frame_bytes;

        loop {
            let frame = tokio::select! {
                frame = read_frame(reader, max_frame_bytes) => frame,
                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Session {} closing for shutdown", self.identity);
                    return Ok(());
                }
            };

            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Session {} disconnected", self.identity);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            match self.handle_request(&frame, connection, peer_key).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!("Session {}: {}", self.identity, e),
            }
        }
    }

    /// Per-message failures come back as non-fatal `ProtocolError`s.
    async fn handle_request(
        &self,
        frame: &[u8],
        connection: &ConnectionHandle,
        peer_key: &RsaPublicKey,
    ) -> Result<Flow, ProtocolError> {
        let plaintext = self.context.keys().decrypt(frame)?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| ProtocolError::Malformed("request is not UTF-8".into()))?;
        let command = Command::parse(&text, &self.context.config().broadcast_triggers)?;

        match command {
            Command::Get => match self.context.latest_state().await {
                Some(encoded) => {
                    let ciphertext = seal(&encoded, peer_key)?;
                    connection
                        .send(&ServerPush::State { ciphertext }.encode())
                        .await?;
                }
                None => debug!("No snapshot yet for {}", self.identity),
            },
            Command::Move(direction) => {
                self.context.intents().submit(self.identity, direction).await;
            }
            Command::Reset => {
                if let Err(e) = self.context.respawn(&self.identity).await {
                    warn!("Reset for {} failed: {}", self.identity, e);
                }
            }
            Command::Quit => return Ok(Flow::Close),
            Command::Announce(message) => {
                broadcast(&self.context, &message).await;
            }
        }
        Ok(Flow::Continue)
    }
}
