use shared::crypto::KeyPair;
use shared::{Color, Identity};
use std::sync::{Arc, OnceLock};

use crate::config::ServerConfig;
use crate::context::ArenaContext;
use crate::game::SnakeWorld;
use crate::registry::{ConnectionHandle, SessionRecord};

/// RSA keys are slow to generate, so every test in the crate shares these.
pub fn keys() -> &'static [KeyPair] {
    static KEYS: OnceLock<Vec<KeyPair>> = OnceLock::new();
    KEYS.get_or_init(|| (0..4).map(|_| KeyPair::generate(2048).unwrap()).collect())
}

pub fn server_keys() -> KeyPair {
    keys()[3].clone()
}

pub fn sink_record(identity: Identity, key_index: usize) -> SessionRecord {
    SessionRecord {
        identity,
        connection: Arc::new(ConnectionHandle::new(
            "sink",
            Box::new(tokio::io::sink()),
            shared::MAX_FRAME_BYTES,
        )),
        public_key: keys()[key_index].public_key().clone(),
        color: Color::PALETTE[key_index % Color::PALETTE.len()],
    }
}

pub fn test_context(config: ServerConfig) -> Arc<ArenaContext> {
    let world = SnakeWorld::new(config.grid_rows, config.snack_count, Some(11));
    Arc::new(ArenaContext::new(config, server_keys(), Box::new(world)))
}
