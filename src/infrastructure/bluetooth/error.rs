//! Link error types.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("no device named '{name}' found within {timeout_secs:.1}s")]
    NotFound { name: String, timeout_secs: f64 },

    #[error("device discovery failed: {0}")]
    Scan(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectError {
    #[error("link already connected")]
    AlreadyConnected,

    #[error("connect to {address} timed out after {timeout_secs:.1}s")]
    Timeout { address: String, timeout_secs: f64 },

    #[error("peripheral {0} not found")]
    DeviceNotFound(String),

    #[error("link transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("link not connected")]
    NotConnected,

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("notification subscription failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("link not connected")]
    NotConnected,

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("characteristic write failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("link not connected")]
    NotConnected,

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("characteristic read failed: {0}")]
    Transport(String),
}

/// Failure while tearing the link down. Only ever logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("link teardown failed: {0}")]
pub struct TeardownError(pub String);
