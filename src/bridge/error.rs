use crate::infrastructure::bluetooth::{ConnectError, ResolutionError, SubscribeError};
use crate::infrastructure::mqtt::BusError;
use thiserror::Error;

/// Fatal startup failures of the bridge.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl BridgeError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Resolution(ResolutionError::NotFound { .. }) => 2,
            _ => 1,
        }
    }
}
