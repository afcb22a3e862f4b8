//! Top-of-atmosphere reflectance from Landsat 8 OLI digital numbers.
//!
//! `rho = (M * Q + A) / sin(theta_SE)`, with per-band gain `M`, offset `A`
//! and the scene-centre sun elevation `theta_SE`, all read from the scene's
//! MTL metadata. See USGS "Using the Landsat 8 Product".

use crate::cog_reader::DigitalNumber;
use crate::error::{NdviError, PipelineResult};
use crate::metadata::CalibrationRecord;

/// Smallest accepted `sin(sun elevation)`; anything at or below is the sun on
/// or under the horizon.
const MIN_SUN_SINE: f64 = 1e-9;

pub const SUN_ELEVATION_KEY: &str = "SUN_ELEVATION";

#[must_use]
pub fn mult_key(band: u8) -> String {
    format!("REFLECTANCE_MULT_BAND_{band}")
}

#[must_use]
pub fn add_key(band: u8) -> String {
    format!("REFLECTANCE_ADD_BAND_{band}")
}

/// Calibration coefficients for one band of one scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectanceCoefficients {
    pub mult: f64,
    pub add: f64,
    pub sun_elevation_degrees: f64,
}

impl ReflectanceCoefficients {
    /// Typed extraction of a band's coefficients. Missing keys are
    /// [`NdviError::KeyNotFound`], never a silent zero.
    pub fn from_record(band: u8, record: &CalibrationRecord) -> PipelineResult<Self> {
        Ok(Self {
            mult: record.lookup_f64(&mult_key(band))?,
            add: record.lookup_f64(&add_key(band))?,
            sun_elevation_degrees: record.lookup_f64(SUN_ELEVATION_KEY)?,
        })
    }

    /// Sine of the sun elevation, rejected when the sun is not above the horizon.
    pub fn sun_sine(&self) -> PipelineResult<f64> {
        let sine = self.sun_elevation_degrees.to_radians().sin();
        if !sine.is_finite() || sine <= MIN_SUN_SINE {
            return Err(NdviError::InvalidCalibration(format!(
                "sun elevation {} degrees gives sin = {sine}",
                self.sun_elevation_degrees
            )));
        }
        Ok(sine)
    }

    /// Reflectance of `dn`. Zero DNs are fill pixels and yield zero.
    pub fn apply(&self, dn: DigitalNumber) -> PipelineResult<f64> {
        let sine = self.sun_sine()?;
        if dn == 0 {
            return Ok(0.0);
        }
        Ok((self.mult * f64::from(dn) + self.add) / sine)
    }
}

/// Convert a raw digital number of `band` to TOA planetary reflectance.
pub fn calibrate(dn: DigitalNumber, band: u8, record: &CalibrationRecord) -> PipelineResult<f64> {
    ReflectanceCoefficients::from_record(band, record)?.apply(dn)
}
