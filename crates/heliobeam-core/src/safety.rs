//! Beam geometry exposure analysis.
//!
//! A diffraction-limited beam from a circular aperture spreads with half
//! angle `1.22 λ / D`. At distance `L` the spot diameter is `θ · L` and the
//! mean power density over the spot is `P / (π (d/2)²)`. Activation is safe
//! when that density stays within the exposure limit for the carrier
//! frequency (1000 W/m² at 5.8 GHz).

use std::f64::consts::PI;

use thiserror::Error;

/// 5.8 GHz carrier wavelength in meters.
pub const WAVELENGTH_5_8_GHZ_M: f64 = 0.052;

/// Exposure limit at 5.8 GHz in W/m².
pub const EXPOSURE_LIMIT_W_PER_M2: f64 = 1000.0;

/// Transmitter and link geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamGeometry {
    /// Carrier wavelength
    pub wavelength_m: f64,
    /// Transmitter aperture diameter
    pub aperture_m: f64,
    /// Transmitter to receiver distance
    pub distance_m: f64,
}

impl BeamGeometry {
    /// 5.8 GHz beam from a 1 km aperture over `distance_m`.
    #[must_use]
    pub fn at_distance(distance_m: f64) -> Self {
        Self { wavelength_m: WAVELENGTH_5_8_GHZ_M, aperture_m: 1000.0, distance_m }
    }

    /// Divergence angle in radians.
    #[must_use]
    pub fn divergence_rad(&self) -> f64 {
        1.22 * self.wavelength_m / self.aperture_m
    }

    /// Spot diameter at the receiver in meters.
    #[must_use]
    pub fn spot_diameter_m(&self) -> f64 {
        self.divergence_rad() * self.distance_m
    }

    /// Spot area at the receiver in square meters.
    #[must_use]
    pub fn spot_area_m2(&self) -> f64 {
        let radius = self.spot_diameter_m() / 2.0;
        PI * radius * radius
    }

    fn is_physical(&self) -> bool {
        [self.wavelength_m, self.aperture_m, self.distance_m]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

/// Outcome of a passing analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyReport {
    /// Analyzed power
    pub power_w: f64,
    /// Spot diameter in meters
    pub spot_diameter_m: f64,
    /// Mean power density over the spot
    pub power_density_w_per_m2: f64,
    /// Limit it was compared against
    pub limit_w_per_m2: f64,
}

/// Reasons a beam is refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SafetyViolation {
    /// Power density above the exposure limit
    #[error("power density {density_w_per_m2:.3} W/m² exceeds limit {limit_w_per_m2} W/m²")]
    ExposureExceeded {
        /// Computed density
        density_w_per_m2: f64,
        /// Configured limit
        limit_w_per_m2: f64,
    },

    /// Geometry has a zero, negative or non-finite dimension
    #[error("beam geometry is not physical: {0:?}")]
    InvalidGeometry(BeamGeometry),
}

/// Pre-activation safety check.
pub trait SafetyGate: Send + Sync {
    /// Decide whether `requested_power_w` may be beamed.
    ///
    /// # Errors
    ///
    /// Returns the violation that forbids activation.
    fn check(&self, requested_power_w: u64) -> Result<SafetyReport, SafetyViolation>;
}

/// Exposure analysis for a fixed geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyAnalyzer {
    /// Link geometry
    pub geometry: BeamGeometry,
    /// Exposure ceiling in W/m²
    pub exposure_limit_w_per_m2: f64,
}

impl SafetyAnalyzer {
    /// Analyzer with the 5.8 GHz exposure limit.
    #[must_use]
    pub fn new(geometry: BeamGeometry) -> Self {
        Self { geometry, exposure_limit_w_per_m2: EXPOSURE_LIMIT_W_PER_M2 }
    }

    /// Analyze `power_w` over the configured geometry.
    ///
    /// # Errors
    ///
    /// Returns a violation for unphysical geometry or excess density.
    pub fn analyze(&self, power_w: f64) -> Result<SafetyReport, SafetyViolation> {
        if !self.geometry.is_physical() {
            return Err(SafetyViolation::InvalidGeometry(self.geometry));
        }

        let density = power_w / self.geometry.spot_area_m2();
        if density > self.exposure_limit_w_per_m2 {
            return Err(SafetyViolation::ExposureExceeded {
                density_w_per_m2: density,
                limit_w_per_m2: self.exposure_limit_w_per_m2,
            });
        }

        Ok(SafetyReport {
            power_w,
            spot_diameter_m: self.geometry.spot_diameter_m(),
            power_density_w_per_m2: density,
            limit_w_per_m2: self.exposure_limit_w_per_m2,
        })
    }
}

impl SafetyGate for SafetyAnalyzer {
    #[allow(clippy::cast_precision_loss)]
    fn check(&self, requested_power_w: u64) -> Result<SafetyReport, SafetyViolation> {
        self.analyze(requested_power_w as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AU_M: f64 = 1.5e11;

    #[test]
    fn inner_solar_harvester_at_one_au() {
        let analyzer = SafetyAnalyzer::new(BeamGeometry::at_distance(AU_M));
        let report = analyzer.analyze(1e10).unwrap();

        // 63.44 µrad divergence, ~9516 km spot
        assert!((analyzer.geometry.divergence_rad() - 63.44e-6).abs() < 1e-9);
        assert!((report.spot_diameter_m / 1000.0 - 9516.0).abs() < 1.0);
        assert!(report.power_density_w_per_m2 < 1e-3);
    }

    #[test]
    fn short_range_megawatt_beam_is_refused() {
        // 1 MW into a ~6.3 m spot at 100 km
        let analyzer = SafetyAnalyzer::new(BeamGeometry::at_distance(1e5));
        assert!(matches!(analyzer.check(1_000_000), Err(SafetyViolation::ExposureExceeded { .. })));
    }

    #[test]
    fn limit_boundary() {
        let geometry = BeamGeometry::at_distance(1e6);
        let analyzer = SafetyAnalyzer::new(geometry);
        let at_limit = EXPOSURE_LIMIT_W_PER_M2 * geometry.spot_area_m2();

        assert!(analyzer.analyze(at_limit * 0.999).is_ok());
        assert!(analyzer.analyze(at_limit * 1.001).is_err());
    }

    #[test]
    fn zero_distance_is_not_physical() {
        let analyzer = SafetyAnalyzer::new(BeamGeometry::at_distance(0.0));
        assert!(matches!(analyzer.check(1), Err(SafetyViolation::InvalidGeometry(_))));
    }
}
