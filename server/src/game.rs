use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::{Cell, Color, Identity, SnakeView, WorldSnapshot};
use std::collections::{BTreeMap, HashSet, VecDeque};
use thiserror::Error;

use crate::intents::IntentBatch;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("no free cell left on the grid")]
    NoFreeCell,

    #[error("unknown identity {0}")]
    UnknownIdentity(Identity),
}

/// The simulation as seen by the networking core.
///
/// Only the tick coordinator calls `advance`; joins, leaves and respawns come
/// from sessions. All calls are serialized by the arena lock, so
/// implementations need no interior synchronization.
pub trait GameWorld: Send {
    fn join(&mut self, identity: Identity, color: Color) -> Result<(), WorldError>;

    /// Returns false if the identity was not present.
    fn leave(&mut self, identity: &Identity) -> bool;

    fn respawn(&mut self, identity: &Identity) -> Result<(), WorldError>;

    fn contains(&self, identity: &Identity) -> bool;

    /// Applies one tick. `intents` holds at most one direction per identity
    /// and is iterated in identity order.
    fn advance(&mut self, intents: &IntentBatch) -> Result<(), WorldError>;

    fn snapshot(&self) -> WorldSnapshot;
}

#[derive(Debug, Clone)]
struct Snake {
    color: Color,
    /// Head at the front.
    body: VecDeque<Cell>,
}

/// Square wrap-around grid of snakes and snacks.
///
/// Snakes only move when their player submitted a direction for the tick.
/// The tick counter and snack supply advance every tick regardless.
pub struct SnakeWorld {
    rows: u16,
    tick: u64,
    snack_count: usize,
    snakes: BTreeMap<Identity, Snake>,
    snacks: Vec<Cell>,
    rng: StdRng,
}

impl SnakeWorld {
    pub fn new(rows: u16, snack_count: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut world = Self {
            rows,
            tick: 0,
            snack_count,
            snakes: BTreeMap::new(),
            snacks: Vec::new(),
            rng,
        };
        world.top_up_snacks();
        world
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.snakes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.snakes.is_empty()
    }

    fn occupied(&self) -> HashSet<Cell> {
        self.snakes
            .values()
            .flat_map(|snake| snake.body.iter().copied())
            .chain(self.snacks.iter().copied())
            .collect()
    }

    fn free_cell(&mut self) -> Option<Cell> {
        let occupied = self.occupied();
        let rows = self.rows;
        let free: Vec<Cell> = (0..rows)
            .flat_map(|row| (0..rows).map(move |col| Cell::new(row, col)))
            .filter(|cell| !occupied.contains(cell))
            .collect();
        free.choose(&mut self.rng).copied()
    }

    fn top_up_snacks(&mut self) {
        while self.snacks.len() < self.snack_count {
            match self.free_cell() {
                Some(cell) => self.snacks.push(cell),
                None => break,
            }
        }
    }

    /// Identities whose head sits on any body cell other than their own head.
    fn crashed(&self) -> Vec<Identity> {
        self.snakes
            .iter()
            .filter(|(identity, snake)| {
                let head = snake.body[0];
                self.snakes.iter().any(|(other_id, other)| {
                    other
                        .body
                        .iter()
                        .enumerate()
                        .any(|(i, cell)| *cell == head && !(other_id == *identity && i == 0))
                })
            })
            .map(|(identity, _)| *identity)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn place(&mut self, identity: Identity, body: &[Cell]) {
        let color = self
            .snakes
            .get(&identity)
            .map(|s| s.color)
            .unwrap_or(Color::RED);
        self.snakes.insert(
            identity,
            Snake {
                color,
                body: body.iter().copied().collect(),
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn set_snacks(&mut self, snacks: Vec<Cell>) {
        self.snacks = snacks;
    }
}

impl GameWorld for SnakeWorld {
    fn join(&mut self, identity: Identity, color: Color) -> Result<(), WorldError> {
        let spawn = self.free_cell().ok_or(WorldError::NoFreeCell)?;
        self.snakes.insert(
            identity,
            Snake {
                color,
                body: VecDeque::from([spawn]),
            },
        );
        info!("Added snake {} at ({}, {})", identity, spawn.row, spawn.col);
        Ok(())
    }

    fn leave(&mut self, identity: &Identity) -> bool {
        let removed = self.snakes.remove(identity).is_some();
        if removed {
            info!("Removed snake {}", identity);
        }
        removed
    }

    fn respawn(&mut self, identity: &Identity) -> Result<(), WorldError> {
        let previous = self
            .snakes
            .remove(identity)
            .ok_or(WorldError::UnknownIdentity(*identity))?;
        let Some(spawn) = self.free_cell() else {
            self.snakes.insert(*identity, previous);
            return Err(WorldError::NoFreeCell);
        };
        self.snakes.insert(
            *identity,
            Snake {
                color: previous.color,
                body: VecDeque::from([spawn]),
            },
        );
        debug!("Respawned snake {} at ({}, {})", identity, spawn.row, spawn.col);
        Ok(())
    }

    fn contains(&self, identity: &Identity) -> bool {
        self.snakes.contains_key(identity)
    }

    fn advance(&mut self, intents: &IntentBatch) -> Result<(), WorldError> {
        self.tick += 1;

        for (identity, direction) in intents {
            let Some(snake) = self.snakes.get_mut(identity) else {
                continue;
            };
            let next = snake.body[0].step(*direction, self.rows);
            if snake.body.get(1) == Some(&next) {
                debug!("Ignoring reversal by {}", identity);
                continue;
            }
            snake.body.push_front(next);
            match self.snacks.iter().position(|snack| *snack == next) {
                Some(eaten) => {
                    self.snacks.swap_remove(eaten);
                }
                None => {
                    snake.body.pop_back();
                }
            }
        }

        for identity in self.crashed() {
            info!("Snake {} crashed", identity);
            self.respawn(&identity)?;
        }

        self.top_up_snacks();
        Ok(())
    }

    fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            rows: self.rows,
            snakes: self
                .snakes
                .iter()
                .map(|(identity, snake)| SnakeView {
                    identity: *identity,
                    color: snake.color,
                    body: snake.body.iter().copied().collect(),
                })
                .collect(),
            snacks: self.snacks.clone(),
        }
    }
}
