//! Error types for the scale driver.

use thiserror::Error;
use uuid::Uuid;

/// Problems with the bytes of a single frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("bad magic header {0:02x?}")]
    BadMagic([u8; 2]),

    #[error("unknown unit code {0}")]
    UnknownUnit(u16),

    #[error("unknown command opcode {0:#06x}")]
    UnknownCommand(u16),

    #[error("allowed-units mask {0:#06x} has undefined bits set")]
    InvalidUnits(u16),

    #[error("length field says {declared} bytes follow the checksum, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("bluetooth error: {0}")]
    Transport(#[from] btleplug::Error),

    #[error("no bluetooth adapter found")]
    NoAdapter,

    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    #[error("not connected to scale")]
    NotConnected,

    #[error("command queue is closed")]
    QueueClosed,

    #[error("command ended without reporting a result")]
    CommandAborted,

    #[error("timed out waiting for the scale")]
    Timeout,

    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    #[error("revision string is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
