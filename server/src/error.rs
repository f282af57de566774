use shared::{Identity, ProtocolError};
use thiserror::Error;

use crate::game::WorldError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error("identity {0} is already registered")]
    DuplicateIdentity(Identity),

    #[error("server full ({0} sessions)")]
    ServerFull(usize),

    #[error("tick coordinator already running")]
    CoordinatorRunning,

    #[error("invalid configuration: {0}")]
    Config(String),
}
