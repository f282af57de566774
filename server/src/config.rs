//! Runtime configuration for the arena server.

use shared::crypto::SUPPORTED_KEY_BITS;
use shared::{
    DEFAULT_BROADCAST_TRIGGERS, DEFAULT_GRID_ROWS, DEFAULT_HOST, DEFAULT_KEY_BITS, DEFAULT_PORT,
    DEFAULT_SNACK_COUNT, DEFAULT_TICK_MS, MAX_FRAME_BYTES,
};
use std::time::Duration;

use crate::error::ServerError;

/// Upper bound on a single frame write to one peer.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Target wall-clock period between simulation ticks.
    pub tick_period: Duration,
    pub grid_rows: u16,
    pub snack_count: usize,
    pub max_sessions: usize,
    pub key_bits: usize,
    /// Upper bound on how long a peer may take to send its public key.
    pub handshake_timeout: Duration,
    /// A peer that accepts no bytes for this long is dropped.
    pub write_timeout: Duration,
    pub max_frame_bytes: u32,
    /// Exact request strings that are relayed to every player.
    pub broadcast_triggers: Vec<String>,
    /// Seed for the world's RNG; `None` draws one from the OS.
    pub world_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tick_period: Duration::from_millis(DEFAULT_TICK_MS),
            grid_rows: DEFAULT_GRID_ROWS,
            snack_count: DEFAULT_SNACK_COUNT,
            max_sessions: 32,
            key_bits: DEFAULT_KEY_BITS,
            handshake_timeout: Duration::from_secs(10),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_bytes: MAX_FRAME_BYTES,
            broadcast_triggers: DEFAULT_BROADCAST_TRIGGERS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            world_seed: None,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.tick_period.is_zero() {
            return Err(ServerError::Config("tick period must be non-zero".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(ServerError::Config("write timeout must be non-zero".into()));
        }
        if self.grid_rows < 2 {
            return Err(ServerError::Config(format!(
                "grid needs at least 2 rows, got {}",
                self.grid_rows
            )));
        }
        if self.max_sessions == 0 {
            return Err(ServerError::Config("max_sessions must be at least 1".into()));
        }
        if !SUPPORTED_KEY_BITS.contains(&self.key_bits) {
            return Err(ServerError::Config(format!(
                "unsupported key size {}, expected one of {:?}",
                self.key_bits, SUPPORTED_KEY_BITS
            )));
        }
        if let Some(trigger) = self
            .broadcast_triggers
            .iter()
            .find(|t| shared::Command::parse(t, &[] as &[&str]).is_ok())
        {
            return Err(ServerError::Config(format!(
                "broadcast trigger {trigger:?} collides with a built-in command"
            )));
        }
        Ok(())
    }
}
