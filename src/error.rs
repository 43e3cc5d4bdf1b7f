//! Error types for board control

use crate::domain::address::BoardAddress;
use crate::domain::models::{ModuleKind, RouteChannel, SessionState};
use thiserror::Error;

/// Failures reported by the BLE transport, surfaced unchanged
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{operation} failed: {reason}")]
    Failed {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} timed out waiting for the board")]
    Timeout { operation: &'static str },

    #[error("link to the board was lost")]
    LinkLost,
}

impl TransportError {
    pub fn failed(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Failed {
            operation,
            reason: reason.into(),
        }
    }
}

/// Errors returned by the connection, configuration and streaming layers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("could not connect to or initialise board {address}: {cause}")]
    Connect {
        address: BoardAddress,
        #[source]
        cause: TransportError,
    },

    #[error("board {0} is not connected")]
    NotConnected(BoardAddress),

    #[error("board {address} has no {module} module")]
    ModuleUnavailable {
        address: BoardAddress,
        module: ModuleKind,
    },

    #[error("board {address} is already streaming from its {active} module, cannot start {requested}")]
    ModuleConflict {
        address: BoardAddress,
        active: ModuleKind,
        requested: ModuleKind,
    },

    #[error("{route:?} is not an output of the {module} module")]
    InvalidRoute {
        route: RouteChannel,
        module: ModuleKind,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cannot {operation} a session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

/// Malformed board address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("invalid board address {0:?}, expected XX:XX:XX:XX:XX:XX")]
    Malformed(String),

    #[error("{0:#X} does not fit in 48 bits")]
    OutOfRange(u64),
}

pub type Result<T, E = BoardError> = std::result::Result<T, E>;
