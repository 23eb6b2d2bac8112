//! Error types for the CEC bridge.

use thiserror::Error;

use crate::device::StoreError;

/// Errors raised by the CEC bridge.
#[derive(Debug, Error)]
pub enum CecError {
    #[error("Invalid CEC message '{input}': {reason}")]
    Parse { input: String, reason: String },

    #[error("Invalid physical address '{0}'")]
    PhysicalAddress(String),

    #[error("Invalid logical address {0}")]
    LogicalAddress(u8),

    #[error("Transmit to {destination} failed: {reason}")]
    Transmit { destination: u8, reason: String },

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Device store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CecError>;
