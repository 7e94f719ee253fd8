use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::decoding::Notification;
use crate::state::DeviceState;

/// Installs the fmt subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

impl Notification {
    pub(crate) fn log(&self) {
        match self {
            Notification::Sleep => debug!("notification: sleep"),
            Notification::Weight(reading) => debug!(
                sign = ?reading.sign,
                raw = reading.raw,
                unit = %reading.unit,
                stable = reading.stable,
                grams = reading.grams(),
                "notification: weight"
            ),
            Notification::Unknown { opcode, payload } => debug!(
                "notification: unknown opcode {:#06x}, payload: {:02x?}",
                opcode, payload
            ),
        }
    }
}

impl DeviceState {
    pub fn log(&self) {
        debug!(
            connected = self.connected,
            stable = self.stable,
            unit = %self.unit,
            weight = self.weight,
            "device state"
        );
    }
}
