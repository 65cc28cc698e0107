//! Raw payloads as returned by the gateway
//!
//! Fields are optional: the normalizer decides what is required.

use serde::Deserialize;

use crate::errors::SourceError;

/// Instantaneous power per meter, in source units
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPower {
    pub solar: Option<f64>,
    pub battery: Option<f64>,
    pub load: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawStateOfCharge {
    pub percentage: Option<f64>,
}

/// Verbose solar meter record, only used for its timestamp
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSolarVerbose {
    pub last_communication_time: Option<String>,
}

/// Power, grid and solar record of one gateway sample
#[derive(Debug, Clone, PartialEq)]
pub struct RawMeters {
    pub power: RawPower,
    pub grid: f64,
    pub solar: Option<RawSolarVerbose>,
}

/// Everything one refresh fetched
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub power: RawPower,
    pub grid: f64,
    pub state_of_charge: RawStateOfCharge,
    pub solar: Option<RawSolarVerbose>,
}

/// One meter in `/api/meters/aggregates`
#[derive(Debug, Clone, Deserialize)]
pub struct MeterAggregate {
    pub instant_power: Option<f64>,
    pub last_communication_time: Option<String>,
}

/// Body of `/api/meters/aggregates`
#[derive(Debug, Clone, Deserialize)]
pub struct Aggregates {
    pub site: Option<MeterAggregate>,
    pub battery: Option<MeterAggregate>,
    pub load: Option<MeterAggregate>,
    pub solar: Option<MeterAggregate>,
}

impl Aggregates {
    pub fn power(&self) -> RawPower {
        let instant = |meter: &Option<MeterAggregate>| meter.as_ref().and_then(|m| m.instant_power);
        RawPower {
            solar: instant(&self.solar),
            battery: instant(&self.battery),
            load: instant(&self.load),
        }
    }

    /// Signed site power; negative while exporting
    pub fn grid(&self) -> Result<f64, SourceError> {
        self.site
            .as_ref()
            .and_then(|site| site.instant_power)
            .ok_or(SourceError::NoData("site meter power"))
    }

    pub fn solar_verbose(&self) -> Option<RawSolarVerbose> {
        self.solar.as_ref().map(|solar| RawSolarVerbose {
            last_communication_time: solar.last_communication_time.clone(),
        })
    }
}
