//! Driver configuration, fixed at construction time.

use std::time::Duration;

#[cfg(feature = "protocol_serde")]
use serde::{Deserialize, Serialize};

/// Optional fields of the basic info register and optional driver features.
///
/// Disabled fields are not stored and their accessors return `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "protocol_serde", serde(default))]
pub struct Options {
    pub production_date: bool,
    pub software_version: bool,
    pub name: bool,
    pub fault_counts: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            production_date: false,
            software_version: false,
            name: false,
            fault_counts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "protocol_serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "protocol_serde", serde(default))]
pub struct Config {
    /// Number of cell voltages kept in the device state.
    pub max_cells: usize,
    /// Number of temperature sensor readings kept in the device state.
    pub max_ntcs: usize,
    /// Size of the receive payload buffer.
    pub max_payload_len: usize,
    #[cfg_attr(feature = "protocol_serde", serde(with = "duration_ms"))]
    pub query_interval: Duration,
    /// Upper bound for the blocking query variants.
    #[cfg_attr(feature = "protocol_serde", serde(with = "duration_ms"))]
    pub timeout: Duration,
    /// Cadence at which pending bytes are fed into the framer.
    #[cfg_attr(feature = "protocol_serde", serde(with = "duration_ms"))]
    pub rx_tick: Duration,
    pub options: Options,
}

impl Config {
    pub const DEFAULT_MAX_CELLS: usize = 8;
    pub const DEFAULT_MAX_NTCS: usize = 2;
    pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 64;
    pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_millis(1000);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const DEFAULT_RX_TICK: Duration = Duration::from_millis(10);

    /// Largest number of cells the balance bitmap can describe.
    pub const BALANCE_BITS: usize = 32;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cells: Self::DEFAULT_MAX_CELLS,
            max_ntcs: Self::DEFAULT_MAX_NTCS,
            max_payload_len: Self::DEFAULT_MAX_PAYLOAD_LEN,
            query_interval: Self::DEFAULT_QUERY_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
            rx_tick: Self::DEFAULT_RX_TICK,
            options: Options::default(),
        }
    }
}

// Durations are written as plain milliseconds in serialized configs.
#[cfg(feature = "protocol_serde")]
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
