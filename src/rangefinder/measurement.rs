//! Distance readings with their uncertainty band.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Readings at or below this distance carry a fixed margin.
pub const FIXED_MARGIN_LIMIT_M: f64 = 400.0;

/// Margin applied up to [`FIXED_MARGIN_LIMIT_M`].
pub const FIXED_MARGIN_M: f64 = 1.0;

/// Relative margin applied beyond [`FIXED_MARGIN_LIMIT_M`].
pub const RELATIVE_MARGIN: f64 = 0.003;

/// A single distance reading as a `[min, max]` band in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Raw reading in decimeters as sent by the device
    pub raw_decimeters: u16,
    /// Lower bound in meters (below zero for readings under the margin)
    pub min_m: f64,
    /// Upper bound in meters
    pub max_m: f64,
}

impl Measurement {
    /// Build a measurement from the device's raw decimeter value.
    pub fn from_raw(raw_decimeters: u16) -> Self {
        let distance = f64::from(raw_decimeters) / 10.0;
        let margin = margin_for(distance);
        Self {
            raw_decimeters,
            min_m: distance - margin,
            max_m: distance + margin,
        }
    }

    /// The reading itself in meters.
    pub fn distance_m(&self) -> f64 {
        f64::from(self.raw_decimeters) / 10.0
    }

    /// Half-width of the uncertainty band.
    pub fn margin_m(&self) -> f64 {
        margin_for(self.distance_m())
    }
}

/// Uncertainty for a distance in meters.
pub fn margin_for(distance_m: f64) -> f64 {
    if distance_m <= FIXED_MARGIN_LIMIT_M {
        FIXED_MARGIN_M
    } else {
        distance_m * RELATIVE_MARGIN
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} – {:.1} m", self.min_m, self.max_m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_short_range_margin() {
        let m = Measurement::from_raw(350);
        assert!(approx(m.min_m, 34.0));
        assert!(approx(m.max_m, 36.0));
        assert!(approx(m.margin_m(), 1.0));
    }

    #[test]
    fn test_long_range_margin() {
        let m = Measurement::from_raw(6000);
        assert!(approx(m.min_m, 598.2));
        assert!(approx(m.max_m, 601.8));
    }

    #[test]
    fn test_margin_boundary() {
        // 400.0 m is still in the fixed band, 400.1 m is not.
        assert!(approx(Measurement::from_raw(4000).margin_m(), 1.0));
        assert!(approx(Measurement::from_raw(4001).margin_m(), 400.1 * 0.003));
    }

    #[test]
    fn test_band_contains_reading() {
        for raw in [0u16, 5, 10, 399, 4000, 4001, 12345, u16::MAX] {
            let m = Measurement::from_raw(raw);
            assert!(m.min_m <= m.distance_m());
            assert!(m.distance_m() <= m.max_m);
            assert!(m.margin_m() >= 0.0);
        }
    }

    #[test]
    fn test_band_is_symmetric_near_zero() {
        let m = Measurement::from_raw(0);
        assert!(approx(m.min_m, -1.0));
        assert!(approx(m.max_m, 1.0));

        let m = Measurement::from_raw(5);
        assert!(approx(m.min_m, -0.5));
        assert!(approx(m.max_m - m.min_m, 2.0));
    }

    #[test]
    fn test_display() {
        assert_eq!(Measurement::from_raw(350).to_string(), "34.0 – 36.0 m");
    }
}
