//! The reading source seen by the coordinator

use super::types::*;
use crate::errors::SourceError;

/// Blocking access to the gateway.
///
/// Every call may block on I/O; the coordinator only invokes these on
/// blocking worker threads.
pub trait ReadingSource: Send + Sync + 'static {
    fn power(&self) -> Result<RawPower, SourceError>;

    /// Signed site power; negative while exporting
    fn grid(&self) -> Result<f64, SourceError>;

    fn state_of_charge(&self) -> Result<RawStateOfCharge, SourceError>;

    /// `Ok(None)` when the gateway has no solar record
    fn solar_verbose(&self) -> Result<Option<RawSolarVerbose>, SourceError>;

    /// Power, grid and (when `with_solar` is set) the solar record, all
    /// taken from the same gateway sample.
    ///
    /// The default asks for each one separately. Sources that serve them
    /// from a single response must override this so that one refresh never
    /// mixes samples.
    fn meters(&self, with_solar: bool) -> Result<RawMeters, SourceError> {
        let power = self.power()?;
        let grid = self.grid()?;
        let solar = if with_solar {
            self.solar_verbose()?
        } else {
            None
        };
        Ok(RawMeters { power, grid, solar })
    }
}

/// Run the fetch sequence of one refresh. Stops at the first failure.
pub fn fetch_payload<S: ReadingSource + ?Sized>(
    source: &S,
    device_timestamp: bool,
) -> Result<RawPayload, SourceError> {
    let meters = source.meters(device_timestamp)?;
    let solar = if device_timestamp {
        Some(meters.solar.ok_or(SourceError::NoData("solar meter record"))?)
    } else {
        None
    };
    let state_of_charge = source.state_of_charge()?;

    Ok(RawPayload {
        power: meters.power,
        grid: meters.grid,
        state_of_charge,
        solar,
    })
}
