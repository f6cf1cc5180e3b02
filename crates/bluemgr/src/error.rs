//! Error types for the bluemgr library
//!
//! `BleError` is the status enumeration shared by every manager call. Each
//! variant carries the one-byte code used on the controller-facing interface,
//! so a status can travel through a wire message and come back unchanged.

use thiserror::Error;

/// Status code of a successful call on the wire.
pub const BLE_STATUS_OK: u8 = 0x00;

/// Non-OK statuses returned by manager calls and reported in events
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BleError {
    #[error("Generic failure")]
    Failed,

    #[error("Already done")]
    AlreadyDone,

    #[error("Operation already in progress")]
    InProgress,

    #[error("Invalid parameter")]
    InvalidParam,

    #[error("Not allowed")]
    NotAllowed,

    #[error("Not connected")]
    NotConnected,

    #[error("Not supported")]
    NotSupported,

    #[error("Not accepted")]
    NotAccepted,

    #[error("Busy")]
    Busy,

    #[error("Request timed out")]
    Timeout,

    #[error("Not supported by peer")]
    NotSupportedByPeer,

    #[error("Canceled by user")]
    Canceled,

    #[error("Encryption key missing")]
    EncKeyMissing,

    #[error("Insufficient resources")]
    InsufficientResources,

    #[error("Not found")]
    NotFound,

    #[error("No credits available on L2CAP channel")]
    L2capNoCredits,

    #[error("MTU exceeded on L2CAP channel")]
    L2capMtuExceeded,

    #[error("Insufficient bandwidth")]
    InsufficientBandwidth,
}

/// Result type for manager operations
pub type BleResult<T> = std::result::Result<T, BleError>;

impl BleError {
    /// Status byte of this error
    pub fn code(&self) -> u8 {
        match self {
            BleError::Failed => 0x01,
            BleError::AlreadyDone => 0x02,
            BleError::InProgress => 0x03,
            BleError::InvalidParam => 0x04,
            BleError::NotAllowed => 0x05,
            BleError::NotConnected => 0x06,
            BleError::NotSupported => 0x07,
            BleError::NotAccepted => 0x08,
            BleError::Busy => 0x09,
            BleError::Timeout => 0x0A,
            BleError::NotSupportedByPeer => 0x0B,
            BleError::Canceled => 0x0C,
            BleError::EncKeyMissing => 0x0D,
            BleError::InsufficientResources => 0x0E,
            BleError::NotFound => 0x0F,
            BleError::L2capNoCredits => 0x10,
            BleError::L2capMtuExceeded => 0x11,
            BleError::InsufficientBandwidth => 0x12,
        }
    }

    /// Decode a status byte. `0x00` maps to `Ok(())`, unknown codes to `Failed`.
    pub fn from_code(code: u8) -> BleResult<()> {
        let err = match code {
            BLE_STATUS_OK => return Ok(()),
            0x02 => BleError::AlreadyDone,
            0x03 => BleError::InProgress,
            0x04 => BleError::InvalidParam,
            0x05 => BleError::NotAllowed,
            0x06 => BleError::NotConnected,
            0x07 => BleError::NotSupported,
            0x08 => BleError::NotAccepted,
            0x09 => BleError::Busy,
            0x0A => BleError::Timeout,
            0x0B => BleError::NotSupportedByPeer,
            0x0C => BleError::Canceled,
            0x0D => BleError::EncKeyMissing,
            0x0E => BleError::InsufficientResources,
            0x0F => BleError::NotFound,
            0x10 => BleError::L2capNoCredits,
            0x11 => BleError::L2capMtuExceeded,
            0x12 => BleError::InsufficientBandwidth,
            _ => BleError::Failed,
        };
        Err(err)
    }
}

/// Status byte of a result, `0x00` for success
pub fn status_code(result: &BleResult<()>) -> u8 {
    match result {
        Ok(()) => BLE_STATUS_OK,
        Err(e) => e.code(),
    }
}

/// Errors raised while framing or decoding controller messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Invalid parameter length for message {msg_id:#06x}: need {needed}, got {actual}")]
    InvalidParamLength {
        msg_id: u16,
        needed: usize,
        actual: usize,
    },

    #[error("Invalid wire packet format")]
    InvalidPacketFormat,

    #[error("Unknown message category {0:#04x}")]
    UnknownCategory(u8),

    #[error("Unsupported message {0:#06x}")]
    Unsupported(u16),

    #[error("Parameters of message {msg_id:#06x} too large: {len} bytes")]
    PayloadTooLarge { msg_id: u16, len: usize },
}

impl From<std::io::Error> for WireError {
    fn from(_: std::io::Error) -> Self {
        WireError::InvalidPacketFormat
    }
}
