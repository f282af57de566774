//! # Arena Server Library
//!
//! Authoritative server for a multiplayer snake arena. Clients connect over
//! TCP, exchange RSA public keys, and then send encrypted commands; the server
//! advances one shared grid on a fixed tick and answers state requests.
//!
//! ## Architecture
//!
//! ### One task per client
//! Every accepted connection is driven by a [`session::ClientSession`] that
//! performs the key exchange, registers the player and then loops over
//! length-prefixed encrypted requests. Bad frames cost one message; a broken
//! stream ends the session, which always removes the player from both the
//! registry and the world before closing the socket.
//!
//! ### One tick coordinator
//! [`coordinator::TickCoordinator`] is started once per server. Every period
//! it swaps out the pending move intents, advances the world and publishes
//! the encoded snapshot that `get` requests read. Sessions never wait for a
//! tick; `reset` and announcements take effect immediately.
//!
//! ### Shared context
//! All shared state hangs off a single [`context::ArenaContext`]: the session
//! registry and the world behind one lock, the intent buffer behind another,
//! and the latest snapshot behind a read-write lock.
//!
//! ## Module Organization
//!
//! - `channel`: key exchange at connection start
//! - `registry`: session records and connection write handles
//! - `intents`: per-tick move aggregation keyed by identity
//! - `game`: the `GameWorld` seam and the bundled `SnakeWorld`
//! - `coordinator`: fixed-period simulation driver
//! - `broadcaster`: per-recipient encrypted announcements
//! - `session`: per-connection request loop
//! - `network`: listener, accept loop and shutdown
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::ArenaServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ArenaServer::bind(ServerConfig::default()).await?;
//!     let shutdown = server.shutdown_handle();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.trigger();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod channel;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod game;
pub mod intents;
pub mod network;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;
