//! Field unit tags.

use serde::{Deserialize, Serialize};

/// Physical unit of a logged field.
///
/// The numbering is part of the module ABI; it must match the unit byte the
/// module writes into frame definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Unit {
    Unitless = 0,
    Acceleration = 1,
    Altitude = 2,
    Amperage = 3,
    Boolean = 4,
    FailsafePhase = 5,
    FlightMode = 6,
    GpsCoordinate = 7,
    GpsHeading = 8,
    Rotation = 9,
    State = 10,
    Velocity = 11,
    Voltage = 12,
}

impl Unit {
    /// Decode a raw unit byte. Tags newer than this host knows degrade to
    /// [`Unit::Unitless`] instead of failing, so a module update cannot
    /// break field decoding.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Unitless,
            1 => Self::Acceleration,
            2 => Self::Altitude,
            3 => Self::Amperage,
            4 => Self::Boolean,
            5 => Self::FailsafePhase,
            6 => Self::FlightMode,
            7 => Self::GpsCoordinate,
            8 => Self::GpsHeading,
            9 => Self::Rotation,
            10 => Self::State,
            11 => Self::Velocity,
            12 => Self::Voltage,
            _ => Self::Unitless,
        }
    }
}
