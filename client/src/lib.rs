//! # Arena Client Library
//!
//! Client side of the snake arena protocol. A client generates its own RSA
//! key pair, exchanges public keys with the server, learns its identity from
//! the welcome push, and then sends encrypted commands.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`network::ArenaClient`] owns the connection. It can be used directly for
//! request/response style access (`request_state`) or split into a
//! [`network::CommandWriter`] and a [`network::PushReader`] so input and
//! server pushes can be driven from separate tasks.
//!
//! ### Input Module (`input`)
//! Maps typed lines, including single-letter shortcuts, to commands.
//!
//! ### Rendering Module (`rendering`)
//! Draws snapshots as a text grid, optionally colored with ANSI escapes.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ArenaClient;
//! use shared::crypto::KeyPair;
//! use shared::{Command, Direction};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let keys = KeyPair::generate(2048)?;
//!     let mut client = ArenaClient::connect("localhost:5555", keys).await?;
//!     client.send(&Command::Move(Direction::Up)).await?;
//!     let state = client.request_state().await?;
//!     println!("{} snakes on the grid", state.snakes.len());
//!     client.send(&Command::Quit).await?;
//!     Ok(())
//! }
//! ```

pub mod input;
pub mod network;
pub mod rendering;
