//! Wire protocol shared by the arena server and its clients.
//!
//! Everything that crosses the socket lives here: the command vocabulary,
//! push frame tags, the world snapshot format, length-prefixed framing and the
//! RSA-OAEP helpers used to encrypt payloads.

pub mod crypto;
pub mod framing;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_TICK_MS: u64 = 200;
pub const DEFAULT_GRID_ROWS: u16 = 20;
pub const DEFAULT_SNACK_COUNT: usize = 5;
pub const DEFAULT_KEY_BITS: usize = 2048;
pub const MAX_FRAME_BYTES: u32 = 256 * 1024;

/// Trigger strings a client may send to have the server announce them to
/// every connected player.
pub const DEFAULT_BROADCAST_TRIGGERS: [&str; 3] = ["Congratulations!", "It works!", "Ready?"];

pub const WELCOME_TAG: &[u8] = b"welcome:";
pub const STATE_TAG: &[u8] = b"state:";
pub const BROADCAST_TAG: &[u8] = b"msg:";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("payload of {len} bytes exceeds the {max} byte limit for this key")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("unrecognized command: {0:?}")]
    UnrecognizedCommand(String),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: u32 },

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(#[from] std::io::Error),
}

impl ProtocolError {
    /// Stream-level failures end the session; everything else only costs the
    /// offending message.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionLost(_)
                | ProtocolError::FrameTooLarge { .. }
                | ProtocolError::Handshake(_)
        )
    }
}

/// Opaque per-connection token. Minted fresh for every connection and never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(Uuid);

impl Identity {
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Identity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Identity)
            .map_err(|e| ProtocolError::Malformed(format!("bad identity {s:?}: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const RED: Color = Color { r: 255, g: 0, b: 0 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255 };
    pub const YELLOW: Color = Color { r: 255, g: 255, b: 0 };
    pub const ORANGE: Color = Color { r: 255, g: 165, b: 0 };

    pub const PALETTE: [Color; 5] = [
        Color::RED,
        Color::GREEN,
        Color::BLUE,
        Color::YELLOW,
        Color::ORANGE,
    ];
}

/// A decrypted client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get,
    Move(Direction),
    Reset,
    Quit,
    Announce(String),
}

impl Command {
    /// Parses a decrypted request. Announcements are only recognised when the
    /// text is one of `triggers`.
    pub fn parse<S: AsRef<str>>(text: &str, triggers: &[S]) -> Result<Self, ProtocolError> {
        match text {
            "get" => Ok(Command::Get),
            "up" => Ok(Command::Move(Direction::Up)),
            "down" => Ok(Command::Move(Direction::Down)),
            "left" => Ok(Command::Move(Direction::Left)),
            "right" => Ok(Command::Move(Direction::Right)),
            "reset" => Ok(Command::Reset),
            "quit" => Ok(Command::Quit),
            other if triggers.iter().any(|t| t.as_ref() == other) => {
                Ok(Command::Announce(other.to_string()))
            }
            other => Err(ProtocolError::UnrecognizedCommand(other.to_string())),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            Command::Get => "get".to_string(),
            Command::Move(direction) => direction.as_str().to_string(),
            Command::Reset => "reset".to_string(),
            Command::Quit => "quit".to_string(),
            Command::Announce(text) => text.clone(),
        }
    }
}

/// Grid coordinate; row 0 is the top edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub row: u16,
    pub col: u16,
}

impl Cell {
    pub fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }

    /// Neighbouring cell in `direction`, wrapping around the edges of a
    /// `rows` x `rows` grid.
    pub fn step(self, direction: Direction, rows: u16) -> Cell {
        let rows = i32::from(rows);
        let (dr, dc) = match direction {
            Direction::Up => (-1, 0),
            Direction::Down => (1, 0),
            Direction::Left => (0, -1),
            Direction::Right => (0, 1),
        };
        Cell {
            row: (i32::from(self.row) + dr).rem_euclid(rows) as u16,
            col: (i32::from(self.col) + dc).rem_euclid(rows) as u16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnakeView {
    pub identity: Identity,
    pub color: Color,
    /// Head first.
    pub body: Vec<Cell>,
}

/// Body of a `state:` reply, bincode-encoded with default options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub rows: u16,
    pub snakes: Vec<SnakeView>,
    pub snacks: Vec<Cell>,
}

impl WorldSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn snake(&self, identity: &Identity) -> Option<&SnakeView> {
        self.snakes.iter().find(|s| &s.identity == identity)
    }
}

/// A server to client frame, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPush {
    Welcome { ciphertext: Vec<u8> },
    State { ciphertext: Vec<u8> },
    Broadcast { identity: Identity, ciphertext: Vec<u8> },
}

impl ServerPush {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ServerPush::Welcome { ciphertext } => [WELCOME_TAG, ciphertext.as_slice()].concat(),
            ServerPush::State { ciphertext } => [STATE_TAG, ciphertext.as_slice()].concat(),
            ServerPush::Broadcast {
                identity,
                ciphertext,
            } => {
                let mut out = Vec::with_capacity(BROADCAST_TAG.len() + 37 + ciphertext.len());
                out.extend_from_slice(BROADCAST_TAG);
                out.extend_from_slice(identity.to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(ciphertext);
                out
            }
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if let Some(rest) = frame.strip_prefix(WELCOME_TAG) {
            return Ok(ServerPush::Welcome {
                ciphertext: rest.to_vec(),
            });
        }
        if let Some(rest) = frame.strip_prefix(STATE_TAG) {
            return Ok(ServerPush::State {
                ciphertext: rest.to_vec(),
            });
        }
        if let Some(rest) = frame.strip_prefix(BROADCAST_TAG) {
            let split = rest
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| ProtocolError::Malformed("envelope without identity".into()))?;
            let identity = std::str::from_utf8(&rest[..split])
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?
                .parse()?;
            return Ok(ServerPush::Broadcast {
                identity,
                ciphertext: rest[split + 1..].to_vec(),
            });
        }
        Err(ProtocolError::Malformed("unknown push tag".into()))
    }
}
