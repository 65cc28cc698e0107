//! Canonical reading model
//!
//! All power values are in watts. Signed channels keep the gateway's sign:
//! battery is negative while charging, grid is negative while exporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Round for display; accumulated state is never passed through this
pub fn round(value: f64, decimals: i32) -> f64 {
    let multiplier = 10_f64.powi(decimals);
    (value * multiplier).round() / multiplier
}

/// Unit the gateway reports power in
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowerUnit {
    #[default]
    Watts,
    Kilowatts,
}

impl PowerUnit {
    /// Convert a value in this unit to watts
    pub fn to_watts(self, value: f64) -> f64 {
        match self {
            PowerUnit::Watts => value,
            PowerUnit::Kilowatts => value * 1000.0,
        }
    }
}

/// Which sign of a channel's power value means energy flows into the site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Negative values are consumption, positive values production
    NegativeIsConsumption,
    /// Positive values are consumption, negative values production
    PositiveIsConsumption,
}

/// A tracked power flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Solar,
    Home,
    Battery,
    Grid,
}

impl Channel {
    // TODO: confirm the grid and battery polarities against a Powerwall 3 gateway;
    // they match the Powerwall 2 local API.
    pub const fn polarity(self) -> Polarity {
        match self {
            Channel::Solar | Channel::Battery => Polarity::NegativeIsConsumption,
            Channel::Home | Channel::Grid => Polarity::PositiveIsConsumption,
        }
    }
}

/// One-sided view of a signed power value.
///
/// At most one of the two sides is non-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSplit {
    pub consumption: f64,
    pub production: f64,
}

impl ChannelSplit {
    pub fn new(value: f64, polarity: Polarity) -> Self {
        let (negative, positive) = ((-value).max(0.0), value.max(0.0));
        match polarity {
            Polarity::NegativeIsConsumption => Self {
                consumption: negative,
                production: positive,
            },
            Polarity::PositiveIsConsumption => Self {
                consumption: positive,
                production: negative,
            },
        }
    }
}

/// One complete set of instantaneous values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub solar_watts: f64,
    pub home_watts: f64,
    pub battery_watts: f64,
    pub grid_watts: f64,
    pub state_of_charge_percent: f64,
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    /// Signed power of a channel in watts
    pub fn power(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Solar => self.solar_watts,
            Channel::Home => self.home_watts,
            Channel::Battery => self.battery_watts,
            Channel::Grid => self.grid_watts,
        }
    }

    pub fn split(&self, channel: Channel) -> ChannelSplit {
        ChannelSplit::new(self.power(channel), channel.polarity())
    }
}
