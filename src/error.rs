//! Unified error type for the provisioning firmware.
//!
//! Every component reports one of a small, closed set of kinds so that the
//! endpoints can translate failures uniformly: the BLE endpoint into protocol
//! failure reports, the HTTP endpoint into 400/500 responses.  All variants
//! are `Copy` so they can be passed through the intake mailbox without
//! allocation.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Caller supplied a malformed or out-of-range argument.
    InvalidArg(&'static str),
    /// The operation is not allowed in the current state.
    InvalidState(&'static str),
    /// An allocation or fixed-capacity buffer was exhausted.
    NoMemory,
    /// The requested item does not exist.
    NotFound,
    /// Persisted data has an impossible shape.
    CorruptStore,
    /// The native Wi-Fi stack returned an error code.
    RadioFailure(i32),
    /// The BLE peer violated the provisioning protocol.
    PeerFailure(&'static str),
    /// A bounded wait expired.
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArg(msg) => write!(f, "invalid argument: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::NoMemory => write!(f, "out of memory"),
            Self::NotFound => write!(f, "not found"),
            Self::CorruptStore => write!(f, "credential store corrupt"),
            Self::RadioFailure(code) => write!(f, "radio failure (esp_err {code})"),
            Self::PeerFailure(msg) => write!(f, "peer failure: {msg}"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Port error conversions
// ---------------------------------------------------------------------------

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => Self::NotFound,
            StorageError::Full => Self::NoMemory,
            StorageError::IoError(_) => Self::InvalidState("key-value store unavailable"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::ValidationFailed(msg) => Self::InvalidArg(msg),
            ConfigError::Corrupted => Self::CorruptStore,
            ConfigError::Storage(inner) => inner.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
