//! The fixed-period simulation driver.
//!
//! Exactly one coordinator runs per `ArenaContext`. Each tick it takes the
//! pending intents, advances the world under the arena lock and publishes the
//! encoded snapshot that `get` requests are answered from.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::context::ArenaContext;
use crate::error::ServerError;
use crate::network::shutdown_requested;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The world advanced and its snapshot is now what `get` returns.
    Published { tick: u64, applied: usize },
    /// The world could not advance; the previous snapshot stays current.
    Frozen,
}

pub struct TickCoordinator {
    context: Arc<ArenaContext>,
}

impl TickCoordinator {
    /// Spawns the coordinator task. Fails if one was already started for
    /// this context.
    pub fn start(
        context: Arc<ArenaContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, ServerError> {
        context.claim_coordinator()?;
        let coordinator = Self { context };
        Ok(tokio::spawn(coordinator.run(shutdown)))
    }

    /// Runs one tick immediately.
    pub async fn tick(&self) -> TickOutcome {
        let batch = self.context.intents().take().await;
        let applied = batch.len();

        let snapshot = match self.context.advance_world(&batch).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Tick failed, keeping previous state: {}", e);
                return TickOutcome::Frozen;
            }
        };

        match snapshot.encode() {
            Ok(encoded) => {
                self.context.publish_state(encoded).await;
                TickOutcome::Published {
                    tick: snapshot.tick,
                    applied,
                }
            }
            Err(e) => {
                error!("Failed to encode snapshot for tick {}: {}", snapshot.tick, e);
                TickOutcome::Frozen
            }
        }
    }

    /// Ticks on a wall-clock schedule. A tick that overruns the period is
    /// followed immediately by the next one; none are skipped.
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.context.config().tick_period;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        info!("Tick coordinator started ({:?} period)", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let outcome = self.tick().await;
                    let elapsed = started.elapsed();

                    if elapsed > period {
                        warn!("Tick took {:?}, longer than the {:?} period", elapsed, period);
                    }

                    if let TickOutcome::Published { tick, applied } = outcome {
                        if tick % 50 == 0 {
                            debug!(
                                "Tick {}: {} intents, {} sessions, {:?}",
                                tick,
                                applied,
                                self.context.session_count().await,
                                elapsed
                            );
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Tick coordinator stopping");
                    break;
                }
            }
        }
    }
}
