//! Server-wide shared state.
//!
//! One `ArenaContext` is built at startup and handed to every session and to
//! the tick coordinator behind an `Arc`. Registry and world live under the
//! same lock, so an identity is either in both or in neither.

use log::{debug, warn};
use shared::crypto::KeyPair;
use shared::{Identity, WorldSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::game::{GameWorld, WorldError};
use crate::intents::{IntentBatch, IntentBuffer};
use crate::registry::{SessionRecord, SessionRegistry};

pub struct ArenaState {
    pub registry: SessionRegistry,
    pub world: Box<dyn GameWorld>,
}

pub struct ArenaContext {
    config: ServerConfig,
    keys: KeyPair,
    state: Mutex<ArenaState>,
    intents: IntentBuffer,
    /// Encoded snapshot from the most recent successful tick.
    latest_state: RwLock<Option<Arc<Vec<u8>>>>,
    coordinator_started: AtomicBool,
}

impl ArenaContext {
    pub fn new(config: ServerConfig, keys: KeyPair, world: Box<dyn GameWorld>) -> Self {
        Self {
            config,
            keys,
            state: Mutex::new(ArenaState {
                registry: SessionRegistry::new(),
                world,
            }),
            intents: IntentBuffer::new(),
            latest_state: RwLock::new(None),
            coordinator_started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn intents(&self) -> &IntentBuffer {
        &self.intents
    }

    /// Registers the session and spawns its entity as one step.
    pub async fn join(&self, record: SessionRecord) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        if state.registry.len() >= self.config.max_sessions {
            return Err(ServerError::ServerFull(state.registry.len()));
        }
        let identity = record.identity;
        if state.registry.contains(&identity) || state.world.contains(&identity) {
            return Err(ServerError::DuplicateIdentity(identity));
        }
        state.world.join(identity, record.color)?;
        if let Err(e) = state.registry.register(record) {
            state.world.leave(&identity);
            return Err(e);
        }
        Ok(())
    }

    /// Removes the identity from registry and world as one step. Returns
    /// true if anything was removed; repeated calls are harmless.
    pub async fn leave(&self, identity: &Identity) -> bool {
        let removed = {
            let mut state = self.state.lock().await;
            let from_registry = state.registry.unregister(identity).is_some();
            let from_world = state.world.leave(identity);
            if from_registry != from_world {
                warn!(
                    "Membership of {} diverged (registry: {}, world: {})",
                    identity, from_registry, from_world
                );
            }
            from_registry || from_world
        };
        self.intents.discard(identity).await;
        removed
    }

    pub async fn respawn(&self, identity: &Identity) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        if !state.registry.contains(identity) {
            return Err(WorldError::UnknownIdentity(*identity).into());
        }
        state.world.respawn(identity)?;
        Ok(())
    }

    pub async fn sessions(&self) -> Vec<(Identity, SessionRecord)> {
        self.state.lock().await.registry.snapshot()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// `(registered, in_world)` for the identity, read under one lock.
    pub async fn membership(&self, identity: &Identity) -> (bool, bool) {
        let state = self.state.lock().await;
        (
            state.registry.contains(identity),
            state.world.contains(identity),
        )
    }

    pub async fn latest_state(&self) -> Option<Arc<Vec<u8>>> {
        self.latest_state.read().await.clone()
    }

    pub(crate) async fn advance_world(&self, batch: &IntentBatch) -> Result<WorldSnapshot, WorldError> {
        let mut state = self.state.lock().await;
        state.world.advance(batch)?;
        Ok(state.world.snapshot())
    }

    pub(crate) async fn publish_state(&self, encoded: Vec<u8>) {
        debug!("Publishing {} byte snapshot", encoded.len());
        *self.latest_state.write().await = Some(Arc::new(encoded));
    }

    /// Succeeds for the first caller only.
    pub(crate) fn claim_coordinator(&self) -> Result<(), ServerError> {
        self.coordinator_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ServerError::CoordinatorRunning)
    }
}
