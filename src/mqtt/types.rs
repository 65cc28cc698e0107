use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::reading::{round, Channel, Reading};

/// Watts to kilowatts, rounded for display
fn kw(watts: f64) -> f64 {
    round(watts / 1000.0, 2)
}

/// Display values of one reading; power in kW
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub time: DateTime<Utc>,
    pub solar: f64,
    pub battery: f64,
    pub home: f64,
    pub grid: f64,
    pub percentage: f64,
    pub battery_charge: f64,
    pub battery_discharge: f64,
    pub grid_import: f64,
    pub grid_export: f64,
    pub update_failed: bool,
}

impl Status {
    pub fn from_reading(reading: &Reading, update_failed: bool) -> Self {
        let battery = reading.split(Channel::Battery);
        let grid = reading.split(Channel::Grid);

        Status {
            time: reading.observed_at,
            solar: kw(reading.solar_watts),
            battery: kw(reading.battery_watts),
            home: kw(reading.home_watts),
            grid: kw(reading.grid_watts),
            percentage: round(reading.state_of_charge_percent, 2),
            battery_charge: kw(battery.consumption),
            battery_discharge: kw(battery.production),
            grid_import: kw(grid.consumption),
            grid_export: kw(grid.production),
            update_failed,
        }
    }
}

/// Static bridge information, published once as JSON
#[derive(Debug, Serialize)]
pub struct SystemInfo<'a> {
    pub version: &'static str,
    pub timezone: &'a str,
    pub interval_seconds: u64,
    pub energy_channels: Vec<&'static str>,
}
