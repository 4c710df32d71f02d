//! Fade curve implementations for channel volume ramps
//!
//! Provides three fade curve types. Every curve maps normalized time
//! `t` in [0, 1] to an interpolation fraction `f(t)` in [0, 1], with
//! `f(0) = 0` and `f(1) = 1` exactly. The resulting volume at `t` is
//! `from + (to - from) * f(t)`, so a single curve serves both fade-in
//! and fade-out ramps.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// Minimum number of points in a sampled curve table
pub const MIN_TABLE_POINTS: usize = 16;

/// Maximum number of points in a sampled curve table
pub const MAX_TABLE_POINTS: usize = 256;

/// Sampled curve resolution, in points per second of ramp duration
pub const TABLE_POINTS_PER_SECOND: f32 = 128.0;

/// 2^-8, the floor of the exponential curve before normalization
const EXP_FLOOR: f32 = 1.0 / 256.0;

/// Fade curve types for volume ramps
///
/// - Linear: Constant rate of change
/// - EqualPower: Constant perceived loudness during a crossfade
/// - Exponential: Slow start, rapid rise near the end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear: f(t) = t
    #[default]
    Linear,

    /// Equal-Power: f(t) = sin(t × π/2)
    #[serde(alias = "equalpower")]
    EqualPower,

    /// Exponential: f(t) = (2^(8(t−1)) − 2⁻⁸) / (1 − 2⁻⁸)
    #[serde(alias = "exp")]
    Exponential,
}

impl FadeCurve {
    /// Interpolation fraction at normalized position `t`
    ///
    /// `t` is clamped to [0, 1]. The endpoints are returned exactly so a
    /// completed ramp always lands on its target.
    pub fn fraction(&self, t: f32) -> f32 {
        if t <= 0.0 || t.is_nan() {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }

        match self {
            FadeCurve::Linear => t,
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
            FadeCurve::Exponential => {
                let shaped = 2f32.powf(8.0 * (t - 1.0));
                (shaped - EXP_FLOOR) / (1.0 - EXP_FLOOR)
            }
        }
    }

    /// Volume at normalized position `t` of a ramp from `from` to `to`
    pub fn volume_at(&self, from: f32, to: f32, t: f32) -> f32 {
        let f = self.fraction(t);
        if f >= 1.0 {
            return to;
        }
        from + (to - from) * f
    }

    /// Number of points used when sampling this curve over `duration`
    ///
    /// Proportional to the ramp length (128 points per second), clamped
    /// to [16, 256].
    pub fn table_len(duration: Duration) -> usize {
        let points = (duration.as_secs_f32() * TABLE_POINTS_PER_SECOND).floor() as usize;
        points.clamp(MIN_TABLE_POINTS, MAX_TABLE_POINTS)
    }

    /// Sample the ramp from `from` to `to` into an evenly spaced value table
    ///
    /// The first entry is exactly `from` and the last exactly `to`.
    pub fn sample_table(&self, from: f32, to: f32, duration: Duration) -> Vec<f32> {
        let points = Self::table_len(duration);
        let last = (points - 1) as f32;
        (0..points)
            .map(|i| self.volume_at(from, to, i as f32 / last))
            .collect()
    }

    /// Convert to the canonical stored string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::EqualPower => "equal_power",
            FadeCurve::Exponential => "exp",
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::EqualPower => "Equal Power",
            FadeCurve::Exponential => "Exponential",
        }
    }

    /// Get all available fade curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[FadeCurve::Linear, FadeCurve::EqualPower, FadeCurve::Exponential]
    }
}

impl FromStr for FadeCurve {
    type Err = Error;

    /// Parse a curve name, accepting the stored aliases
    /// (`linear`, `equal_power`, `equalpower`, `exp`, `exponential`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "equal_power" | "equalpower" | "equal-power" => Ok(FadeCurve::EqualPower),
            "exp" | "exponential" => Ok(FadeCurve::Exponential),
            other => Err(Error::InvalidInput(format!("unknown fade curve: {other:?}"))),
        }
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_are_exact() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.fraction(0.0), 0.0, "{:?} f(0)", curve);
            assert_eq!(curve.fraction(1.0), 1.0, "{:?} f(1)", curve);
        }
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.fraction(-0.5), 0.0);
            assert_eq!(curve.fraction(1.5), 1.0);
            assert_eq!(curve.fraction(f32::NAN), 0.0);
        }
    }

    #[test]
    fn test_curves_are_monotonic() {
        for curve in FadeCurve::all_variants() {
            let mut prev = curve.fraction(0.0);
            for i in 1..=100 {
                let value = curve.fraction(i as f32 / 100.0);
                assert!(value >= prev, "{:?} decreased at step {}", curve, i);
                prev = value;
            }
        }
    }

    #[test]
    fn test_curve_shapes_at_midpoint() {
        assert!((FadeCurve::Linear.fraction(0.5) - 0.5).abs() < 1e-6);
        // sin(π/4)
        assert!((FadeCurve::EqualPower.fraction(0.5) - 0.70710677).abs() < 1e-5);
        // slow start: well below linear at the midpoint
        assert!(FadeCurve::Exponential.fraction(0.5) < 0.1);
    }

    #[test]
    fn test_volume_at_fade_out() {
        let curve = FadeCurve::Linear;
        assert_eq!(curve.volume_at(0.8, 0.0, 0.0), 0.8);
        assert!((curve.volume_at(0.8, 0.0, 0.5) - 0.4).abs() < 1e-6);
        assert_eq!(curve.volume_at(0.8, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_table_len_is_clamped() {
        assert_eq!(FadeCurve::table_len(Duration::from_millis(10)), 16);
        assert_eq!(FadeCurve::table_len(Duration::from_millis(1000)), 128);
        assert_eq!(FadeCurve::table_len(Duration::from_millis(1500)), 192);
        assert_eq!(FadeCurve::table_len(Duration::from_secs(10)), 256);
    }

    #[test]
    fn test_sample_table_endpoints() {
        for curve in FadeCurve::all_variants() {
            let table = curve.sample_table(0.2, 0.9, Duration::from_millis(2500));
            assert_eq!(table.len(), 256);
            assert_eq!(table[0], 0.2);
            assert_eq!(*table.last().unwrap(), 0.9);
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("linear".parse::<FadeCurve>().unwrap(), FadeCurve::Linear);
        assert_eq!("equal_power".parse::<FadeCurve>().unwrap(), FadeCurve::EqualPower);
        assert_eq!("EqualPower".parse::<FadeCurve>().unwrap(), FadeCurve::EqualPower);
        assert_eq!("exp".parse::<FadeCurve>().unwrap(), FadeCurve::Exponential);
        assert_eq!("EXPONENTIAL".parse::<FadeCurve>().unwrap(), FadeCurve::Exponential);
        assert!("cosine".parse::<FadeCurve>().is_err());
        assert!("".parse::<FadeCurve>().is_err());
    }

    #[test]
    fn test_db_string_parses_back() {
        for curve in FadeCurve::all_variants() {
            assert_eq!(curve.to_db_string().parse::<FadeCurve>().unwrap(), *curve);
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&FadeCurve::EqualPower).unwrap();
        assert_eq!(json, "\"equal_power\"");
        let parsed: FadeCurve = serde_json::from_str("\"exp\"").unwrap();
        assert_eq!(parsed, FadeCurve::Exponential);
    }

    #[test]
    fn test_default_and_display() {
        assert_eq!(FadeCurve::default(), FadeCurve::Linear);
        assert_eq!(format!("{}", FadeCurve::EqualPower), "Equal Power");
    }
}
