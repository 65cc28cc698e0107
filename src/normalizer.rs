//! Raw gateway payload to canonical [`Reading`]

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::NormalizeError;
use crate::powerwall::RawPayload;
use crate::reading::{PowerUnit, Reading};

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    unit: PowerUnit,
}

fn required(value: Option<f64>, field: &'static str) -> Result<f64, NormalizeError> {
    let value = value.ok_or(NormalizeError::MissingField(field))?;
    if !value.is_finite() {
        return Err(NormalizeError::OutOfRange { field, value });
    }
    Ok(value)
}

fn non_negative(value: f64, field: &'static str) -> f64 {
    if value < 0.0 {
        debug!("Clamping {} of {}W to zero", field, value);
        return 0.0;
    }
    value
}

impl Normalizer {
    pub fn new(unit: PowerUnit) -> Self {
        Self { unit }
    }

    /// Build a reading from a complete payload.
    ///
    /// `fetched_at` is used when the payload carries no device timestamp.
    pub fn normalize(
        &self,
        payload: &RawPayload,
        fetched_at: DateTime<Utc>,
    ) -> Result<Reading, NormalizeError> {
        let watts = |value: f64| self.unit.to_watts(value);

        let solar = watts(required(payload.power.solar, "solar")?);
        let home = watts(required(payload.power.load, "load")?);
        let battery = watts(required(payload.power.battery, "battery")?);
        let grid = watts(required(Some(payload.grid), "grid")?);

        let percentage = required(payload.state_of_charge.percentage, "percentage")?;
        if !(0.0..=100.0).contains(&percentage) {
            return Err(NormalizeError::OutOfRange {
                field: "percentage",
                value: percentage,
            });
        }

        let observed_at = match payload
            .solar
            .as_ref()
            .and_then(|solar| solar.last_communication_time.as_deref())
            .filter(|time| !time.is_empty())
        {
            Some(time) => DateTime::parse_from_rfc3339(time)
                .map_err(|_| NormalizeError::InvalidTimestamp(time.to_string()))?
                .with_timezone(&Utc),
            None => fetched_at,
        };

        Ok(Reading {
            solar_watts: non_negative(solar, "solar"),
            home_watts: non_negative(home, "home"),
            battery_watts: battery,
            grid_watts: grid,
            state_of_charge_percent: percentage,
            observed_at,
        })
    }
}
