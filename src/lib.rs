//! Host-side driver for the Etekcity ENS-C551S Bluetooth kitchen scale.

pub mod command_queue;
pub mod config;
pub mod constants;
pub mod decoding;
pub mod encoding;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod scale;
pub mod scanner;
pub mod state;
pub mod transport;

pub use command_queue::CommandQueue;
pub use config::{AutoOff, ScaleConfig};
pub use constants::{AllowedUnits, Command, Sign, Unit};
pub use error::{Error, FrameError, Result};
pub use protocol::Protocol;
pub use scale::{Completion, Scale};
pub use scanner::ScaleScanner;
pub use state::{DeviceState, SessionState};
pub use transport::{BleTransport, CharacteristicId, Transport};
