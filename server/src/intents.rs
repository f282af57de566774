//! Move intents collected between ticks.
//!
//! Sessions write, the tick coordinator takes. Keyed by identity so a later
//! direction from the same player within one tick window replaces the
//! earlier one.

use shared::{Direction, Identity};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// One tick's worth of intents, iterated in identity order.
pub type IntentBatch = BTreeMap<Identity, Direction>;

#[derive(Debug, Default)]
pub struct IntentBuffer {
    pending: Mutex<IntentBatch>,
}

impl IntentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `direction` as this identity's intent for the next tick and
    /// returns the intent it replaced, if any.
    pub async fn submit(&self, identity: Identity, direction: Direction) -> Option<Direction> {
        self.pending.lock().await.insert(identity, direction)
    }

    /// Swaps the pending set for an empty one.
    pub async fn take(&self) -> IntentBatch {
        std::mem::take(&mut *self.pending.lock().await)
    }

    pub async fn discard(&self, identity: &Identity) {
        self.pending.lock().await.remove(identity);
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
