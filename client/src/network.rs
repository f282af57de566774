//! Connection to an arena server: key exchange, encrypted commands and
//! decoding of server pushes.

use log::{debug, info, warn};
use shared::crypto::{decode_public_key, encrypt, KeyPair, RsaPublicKey};
use shared::framing::{read_frame, write_frame};
use shared::{Command, Identity, ProtocolError, ServerPush, WorldSnapshot, MAX_FRAME_BYTES};
use std::collections::VecDeque;
use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// A decrypted server push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    State(WorldSnapshot),
    /// An announcement; `identity` is the recipient the envelope was
    /// addressed to.
    Broadcast { identity: Identity, message: String },
}

/// Write side: encrypts commands against the server's public key.
pub struct CommandWriter<W> {
    writer: W,
    server_key: RsaPublicKey,
}

impl<W: AsyncWrite + Unpin> CommandWriter<W> {
    pub async fn send(&mut self, command: &Command) -> Result<(), ProtocolError> {
        let ciphertext = encrypt(command.to_wire().as_bytes(), &self.server_key)?;
        write_frame(&mut self.writer, &ciphertext, MAX_FRAME_BYTES).await
    }

    /// Like `send`, but an error that leaves the connection usable (an
    /// announcement too long to encrypt) is logged and dropped.
    pub async fn send_or_warn(&mut self, command: &Command) -> Result<(), ProtocolError> {
        match self.send(command).await {
            Err(e) if !e.is_fatal() => {
                warn!("Command not sent: {}", e);
                Ok(())
            }
            other => other,
        }
    }
}

/// Read side: owns the private key that pushes are encrypted against.
pub struct PushReader<R> {
    reader: R,
    keys: KeyPair,
}

impl<R: AsyncRead + Unpin> PushReader<R> {
    /// Next push from the server, or `None` once the server closed the
    /// connection.
    pub async fn recv(&mut self) -> Result<Option<Incoming>, ProtocolError> {
        let Some(frame) = read_frame(&mut self.reader, MAX_FRAME_BYTES).await? else {
            return Ok(None);
        };

        match ServerPush::decode(&frame)? {
            ServerPush::State { ciphertext } => {
                let plain = self.keys.open(&ciphertext)?;
                Ok(Some(Incoming::State(WorldSnapshot::decode(&plain)?)))
            }
            ServerPush::Broadcast {
                identity,
                ciphertext,
            } => {
                let plain = self.keys.decrypt(&ciphertext)?;
                let message =
                    String::from_utf8(plain).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
                Ok(Some(Incoming::Broadcast { identity, message }))
            }
            ServerPush::Welcome { .. } => {
                Err(ProtocolError::Malformed("unexpected second welcome".into()))
            }
        }
    }
}

pub struct ArenaClient<S> {
    identity: Identity,
    writer: CommandWriter<WriteHalf<S>>,
    reader: PushReader<ReadHalf<S>>,
    pending: VecDeque<Incoming>,
}

impl ArenaClient<TcpStream> {
    pub async fn connect(address: &str, keys: KeyPair) -> Result<Self, ProtocolError> {
        info!("Connecting to: {}", address);
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, keys).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ArenaClient<S> {
    /// Runs the key exchange over an already open stream and waits for the
    /// welcome push that carries this player's identity.
    pub async fn handshake(stream: S, keys: KeyPair) -> Result<Self, ProtocolError> {
        let (mut reader, mut writer) = split(stream);

        let server_pem = read_frame(&mut reader, MAX_FRAME_BYTES)
            .await?
            .ok_or_else(|| ProtocolError::Handshake("server closed before sending its key".into()))?;
        let server_key = decode_public_key(&server_pem)?;
        write_frame(&mut writer, keys.public_pem()?.as_bytes(), MAX_FRAME_BYTES).await?;

        let welcome = read_frame(&mut reader, MAX_FRAME_BYTES)
            .await?
            .ok_or_else(|| ProtocolError::Handshake("server closed before welcome".into()))?;
        let ServerPush::Welcome { ciphertext } = ServerPush::decode(&welcome)? else {
            return Err(ProtocolError::Handshake("expected welcome push".into()));
        };
        let identity: Identity = std::str::from_utf8(&keys.decrypt(&ciphertext)?)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?
            .parse()?;
        info!("Joined arena as {}", identity);

        Ok(Self {
            identity,
            writer: CommandWriter { writer, server_key },
            reader: PushReader { reader, keys },
            pending: VecDeque::new(),
        })
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub async fn send(&mut self, command: &Command) -> Result<(), ProtocolError> {
        debug!("Sending {:?}", command);
        self.writer.send(command).await
    }

    pub async fn recv(&mut self) -> Result<Option<Incoming>, ProtocolError> {
        if let Some(incoming) = self.pending.pop_front() {
            return Ok(Some(incoming));
        }
        self.reader.recv().await
    }

    /// Sends `get` and waits for the state reply. Announcements that arrive
    /// first are queued for `recv`. The server stays silent until its first
    /// tick, so callers should bound this with a timeout.
    pub async fn request_state(&mut self) -> Result<WorldSnapshot, ProtocolError> {
        self.send(&Command::Get).await?;
        loop {
            match self.reader.recv().await? {
                Some(Incoming::State(snapshot)) => return Ok(snapshot),
                Some(other) => self.pending.push_back(other),
                None => {
                    return Err(ProtocolError::ConnectionLost(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "server closed the connection",
                    )))
                }
            }
        }
    }

    /// Separates both directions so they can be driven from different tasks.
    pub fn into_split(self) -> (Identity, CommandWriter<WriteHalf<S>>, PushReader<ReadHalf<S>>) {
        (self.identity, self.writer, self.reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::parse_line;
    use shared::crypto::{encode_public_key, seal};
    use shared::{Cell, Color, Direction, SnakeView};
    use std::sync::OnceLock;
    use tokio::io::DuplexStream;

    fn server_keys() -> &'static KeyPair {
        static KEYS: OnceLock<KeyPair> = OnceLock::new();
        KEYS.get_or_init(|| KeyPair::generate(2048).unwrap())
    }

    fn client_keys() -> &'static KeyPair {
        static KEYS: OnceLock<KeyPair> = OnceLock::new();
        KEYS.get_or_init(|| KeyPair::generate(2048).unwrap())
    }

    /// Plays the server side of the exchange and returns the client's key.
    async fn accept(stream: &mut DuplexStream, identity: Identity) -> RsaPublicKey {
        let pem = server_keys().public_pem().unwrap();
        write_frame(stream, pem.as_bytes(), MAX_FRAME_BYTES).await.unwrap();
        let client_pem = read_frame(stream, MAX_FRAME_BYTES).await.unwrap().unwrap();
        let client_key = decode_public_key(&client_pem).unwrap();
        let ciphertext = encrypt(identity.to_string().as_bytes(), &client_key).unwrap();
        write_frame(stream, &ServerPush::Welcome { ciphertext }.encode(), MAX_FRAME_BYTES)
            .await
            .unwrap();
        client_key
    }

    fn snapshot(identity: Identity) -> WorldSnapshot {
        WorldSnapshot {
            tick: 3,
            rows: 20,
            snakes: vec![SnakeView {
                identity,
                color: Color::BLUE,
                body: vec![Cell::new(4, 4), Cell::new(5, 4)],
            }],
            snacks: vec![Cell::new(0, 0)],
        }
    }

    #[tokio::test]
    async fn test_handshake_learns_identity() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        let identity = Identity::mint();
        let server = tokio::spawn(async move {
            let key = accept(&mut server_side, identity).await;
            (key, server_side)
        });

        let client = ArenaClient::handshake(client_side, client_keys().clone())
            .await
            .unwrap();
        assert_eq!(client.identity(), identity);
        let (key, _stream) = server.await.unwrap();
        assert_eq!(&key, client_keys().public_key());
    }

    #[tokio::test]
    async fn test_commands_are_encrypted_for_server() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            accept(&mut server_side, Identity::mint()).await;
            let frame = read_frame(&mut server_side, MAX_FRAME_BYTES)
                .await
                .unwrap()
                .unwrap();
            server_keys().decrypt(&frame).unwrap()
        });

        let mut client = ArenaClient::handshake(client_side, client_keys().clone())
            .await
            .unwrap();
        client.send(&Command::Move(Direction::Left)).await.unwrap();
        assert_eq!(server.await.unwrap(), b"left");
    }

    #[tokio::test]
    async fn test_long_announcement_keeps_connection() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            accept(&mut server_side, Identity::mint()).await;
            let frame = read_frame(&mut server_side, MAX_FRAME_BYTES)
                .await
                .unwrap()
                .unwrap();
            server_keys().decrypt(&frame).unwrap()
        });

        let client = ArenaClient::handshake(client_side, client_keys().clone())
            .await
            .unwrap();
        let (_, mut writer, _reader) = client.into_split();

        let long = parse_line(&format!("say {}", "x".repeat(200)))
            .unwrap()
            .unwrap();
        let err = writer.send(&long).await.unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
        assert!(!err.is_fatal());

        writer.send_or_warn(&long).await.unwrap();
        writer.send_or_warn(&Command::Get).await.unwrap();
        assert_eq!(server.await.unwrap(), b"get");
    }

    #[tokio::test]
    async fn test_request_state_queues_announcements() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        let identity = Identity::mint();
        let server = tokio::spawn(async move {
            let client_key = accept(&mut server_side, identity).await;
            let request = read_frame(&mut server_side, MAX_FRAME_BYTES)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(server_keys().decrypt(&request).unwrap(), b"get");

            let ciphertext = encrypt(b"Ready?", &client_key).unwrap();
            let envelope = ServerPush::Broadcast {
                identity,
                ciphertext,
            };
            write_frame(&mut server_side, &envelope.encode(), MAX_FRAME_BYTES)
                .await
                .unwrap();

            let body = snapshot(identity).encode().unwrap();
            let state = ServerPush::State {
                ciphertext: seal(&body, &client_key).unwrap(),
            };
            write_frame(&mut server_side, &state.encode(), MAX_FRAME_BYTES)
                .await
                .unwrap();
            server_side
        });

        let mut client = ArenaClient::handshake(client_side, client_keys().clone())
            .await
            .unwrap();
        let state = client.request_state().await.unwrap();
        assert_eq!(state, snapshot(identity));
        assert_eq!(
            client.recv().await.unwrap(),
            Some(Incoming::Broadcast {
                identity,
                message: "Ready?".into()
            })
        );

        drop(server.await.unwrap());
        assert_eq!(client.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_without_welcome_fails_handshake() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let pem = encode_public_key(server_keys().public_key()).unwrap();
            write_frame(&mut server_side, pem.as_bytes(), MAX_FRAME_BYTES)
                .await
                .unwrap();
            let _ = read_frame(&mut server_side, MAX_FRAME_BYTES).await;
        });

        let result = ArenaClient::handshake(client_side, client_keys().clone()).await;
        assert!(matches!(result, Err(ProtocolError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_push_reader_decodes_scripted_frames() {
        let identity = Identity::mint();
        let body = snapshot(identity).encode().unwrap();
        let state = ServerPush::State {
            ciphertext: seal(&body, client_keys().public_key()).unwrap(),
        }
        .encode();
        let mut wire = (state.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&state);

        let mut reader = PushReader {
            reader: tokio_test::io::Builder::new().read(&wire).build(),
            keys: client_keys().clone(),
        };
        assert_eq!(
            reader.recv().await.unwrap(),
            Some(Incoming::State(snapshot(identity)))
        );
        assert_eq!(reader.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_push_is_malformed() {
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            accept(&mut server_side, Identity::mint()).await;
            write_frame(&mut server_side, b"bogus", MAX_FRAME_BYTES)
                .await
                .unwrap();
            server_side
        });

        let mut client = ArenaClient::handshake(client_side, client_keys().clone())
            .await
            .unwrap();
        let _server_side = server.await.unwrap();
        assert!(matches!(client.recv().await, Err(ProtocolError::Malformed(_))));
    }
}
