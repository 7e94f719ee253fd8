use std::time::Duration;

use crate::constants::AllowedUnits;

/// When the scale switches itself off while idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoOff {
    /// Kept awake by re-sending a long timeout before it runs out.
    Never,
    After(u16),
}

impl From<u16> for AutoOff {
    /// Zero seconds means never.
    fn from(seconds: u16) -> Self {
        match seconds {
            0 => AutoOff::Never,
            seconds => AutoOff::After(seconds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScaleConfig {
    pub auto_off: AutoOff,
    pub allowed_units: AllowedUnits,
    /// How often the keep-alive timeout is re-sent while `auto_off` is `Never`.
    pub keepalive_period: Duration,
    /// Timeout, in seconds, written by each keep-alive.
    pub keepalive_timeout: u16,
    /// How long `connect` waits for the first weight report.
    pub first_update_timeout: Duration,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            auto_off: AutoOff::After(30),
            allowed_units: AllowedUnits::all(),
            keepalive_period: Duration::from_secs(140),
            keepalive_timeout: 300,
            first_update_timeout: Duration::from_secs(10),
        }
    }
}
