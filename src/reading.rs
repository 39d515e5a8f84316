//! Raw light-level readings as produced by mobile devices.

use serde::{Deserialize, Serialize};

/// A single geotagged light-level reading.
///
/// Created once by the device-side collaborator and never mutated afterwards.
/// Latitude/longitude of exactly (0, 0) means the device had no location fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub latitude: f64,
    pub longitude: f64,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Ambient light level in lux.
    pub light_level: f64,
}

impl Reading {
    /// Returns the reason this reading must be dropped, if any.
    ///
    /// Invalid readings are logged and skipped by the aggregation reducer;
    /// they never abort a run.
    pub fn rejection_reason(&self) -> Option<&'static str> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Some("non-finite coordinates");
        }
        if self.latitude == 0.0 && self.longitude == 0.0 {
            return Some("no location fix");
        }
        if !self.light_level.is_finite() {
            return Some("non-finite light level");
        }
        if self.light_level < 0.0 {
            return Some("negative light level");
        }
        None
    }
}
