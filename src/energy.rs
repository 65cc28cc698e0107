//! Energy integration
//!
//! Converts the power of one channel into a running energy total. The total
//! only advances when a value is requested: energy accumulates in proportion
//! to the wall-clock time between successive reads, not between successive
//! gateway samples. Each interval contributes the power seen at its start.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::coordinator::SnapshotReader;
use crate::reading::{round, Channel, Reading};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// One-sided power flow an integrator tracks
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnergyChannel {
    Solar,
    Home,
    BatteryCharge,
    BatteryDischarge,
    GridImport,
    GridExport,
}

impl EnergyChannel {
    pub const ALL: [EnergyChannel; 6] = [
        EnergyChannel::Solar,
        EnergyChannel::Home,
        EnergyChannel::BatteryCharge,
        EnergyChannel::BatteryDischarge,
        EnergyChannel::GridImport,
        EnergyChannel::GridExport,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EnergyChannel::Solar => "solar",
            EnergyChannel::Home => "home",
            EnergyChannel::BatteryCharge => "battery_charge",
            EnergyChannel::BatteryDischarge => "battery_discharge",
            EnergyChannel::GridImport => "grid_import",
            EnergyChannel::GridExport => "grid_export",
        }
    }

    /// Non-negative power of this flow in watts
    pub fn power(self, reading: &Reading) -> f64 {
        match self {
            EnergyChannel::Solar => reading.split(Channel::Solar).production,
            EnergyChannel::Home => reading.split(Channel::Home).consumption,
            EnergyChannel::BatteryCharge => reading.split(Channel::Battery).consumption,
            EnergyChannel::BatteryDischarge => reading.split(Channel::Battery).production,
            EnergyChannel::GridImport => reading.split(Channel::Grid).consumption,
            EnergyChannel::GridExport => reading.split(Channel::Grid).production,
        }
    }
}

impl std::fmt::Display for EnergyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Running energy total of one channel
#[derive(Debug, Clone)]
pub struct EnergyAccumulator {
    total_wh: f64,
    last_power_w: f64,
    last_sample_at: Option<DateTime<Utc>>,
    last_reported_at: Option<DateTime<Utc>>,
    report_interval: TimeDelta,
}

impl EnergyAccumulator {
    pub fn new(report_interval: TimeDelta) -> Self {
        Self {
            total_wh: 0.0,
            last_power_w: 0.0,
            last_sample_at: None,
            last_reported_at: None,
            report_interval,
        }
    }

    /// Unrounded total in watt-hours
    pub fn total_wh(&self) -> f64 {
        self.total_wh
    }

    /// Record `power_w` at `now` and return the total in kWh if the
    /// reporting gate is open.
    pub fn sample(&mut self, power_w: f64, now: DateTime<Utc>) -> Option<f64> {
        if let Some(previous) = self.last_sample_at {
            let elapsed = (now - previous).num_milliseconds();
            // A clock stepping backwards contributes nothing.
            if elapsed > 0 {
                self.total_wh += self.last_power_w * (elapsed as f64 / MILLIS_PER_HOUR);
            }
        }
        self.last_sample_at = Some(now);
        self.last_power_w = power_w.max(0.0);

        match self.last_reported_at {
            None => {
                self.last_reported_at = Some(now);
                None
            }
            Some(reported) if now - reported >= self.report_interval => {
                self.last_reported_at = Some(now);
                Some(round(self.total_wh / 1000.0, 3))
            }
            Some(_) => None,
        }
    }
}

/// Energy total of one channel, fed from a coordinator snapshot
pub struct EnergyIntegrator {
    channel: EnergyChannel,
    snapshot: SnapshotReader,
    accumulator: EnergyAccumulator,
}

impl EnergyIntegrator {
    pub fn new(channel: EnergyChannel, snapshot: SnapshotReader, report_interval: Duration) -> Self {
        let report_interval = TimeDelta::from_std(report_interval).unwrap_or(TimeDelta::MAX);
        Self {
            channel,
            snapshot,
            accumulator: EnergyAccumulator::new(report_interval),
        }
    }

    pub fn channel(&self) -> EnergyChannel {
        self.channel
    }

    pub fn accumulator(&self) -> &EnergyAccumulator {
        &self.accumulator
    }

    /// Energy in kWh, or `None` when no new value is due
    pub fn current_value(&mut self) -> Option<f64> {
        self.current_value_at(Utc::now())
    }

    pub fn current_value_at(&mut self, now: DateTime<Utc>) -> Option<f64> {
        let power = self
            .snapshot
            .current()
            .map_or(0.0, |reading| self.channel.power(&reading));
        let value = self.accumulator.sample(power, now);
        if let Some(kwh) = value {
            debug!("Energy {}: {:.3} kWh", self.channel, kwh);
        }
        value
    }
}
