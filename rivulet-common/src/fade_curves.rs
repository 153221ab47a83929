//! Easing curves for volume ramps
//!
//! A curve maps normalized progress through a ramp (0.0 to 1.0) onto a volume
//! multiplier (0.0 to 1.0). Fade-out is obtained by running the same curve
//! backwards, so a single `value()` covers both directions.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Easing curve types for faders
///
/// Each curve type provides a different perceptual quality:
/// - Linear: Constant rate of change (precise, predictable)
/// - Exponential: Slow start, fast finish (quadratic ease-in)
/// - Logarithmic: Fast start, slow finish (quadratic ease-out)
/// - InOutQuad: Quadratic acceleration then deceleration (used for pause fades)
/// - SCurve: Smooth cosine acceleration and deceleration
/// - EqualPower: Constant perceived loudness during crossfade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear: v(t) = t
    Linear,

    /// Exponential: v(t) = t²
    Exponential,

    /// Logarithmic: v(t) = 1 - (1-t)²
    Logarithmic,

    /// In-out quadratic: 2t² below the midpoint, mirrored above it
    InOutQuad,

    /// S-Curve: v(t) = 0.5 × (1 - cos(π × t))
    SCurve,

    /// Equal-Power: v(t) = sin(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Map normalized progress onto the curve
    ///
    /// # Arguments
    /// * `progress` - Position through the ramp, clamped to 0.0..=1.0
    ///
    /// # Returns
    /// Volume multiplier (0.0 = silence, 1.0 = full volume)
    pub fn value(&self, progress: f64) -> f64 {
        let t = progress.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                1.0 - inv * inv
            }
            FadeCurve::InOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    let inv = -2.0 * t + 2.0;
                    1.0 - inv * inv / 2.0
                }
            }
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Parse curve from a settings string
    ///
    /// Accepts the canonical names plus the aliases `cosine`, `s-curve`,
    /// `in_out_quad` and `equalpower`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "exponential" => Some(FadeCurve::Exponential),
            "logarithmic" => Some(FadeCurve::Logarithmic),
            "inoutquad" | "in_out_quad" | "in-out-quad" => Some(FadeCurve::InOutQuad),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Some(FadeCurve::SCurve),
            "equal_power" | "equalpower" => Some(FadeCurve::EqualPower),
            _ => None,
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::Exponential => "Exponential",
            FadeCurve::Logarithmic => "Logarithmic",
            FadeCurve::InOutQuad => "In-Out Quad",
            FadeCurve::SCurve => "S-Curve",
            FadeCurve::EqualPower => "Equal Power",
        }
    }

    /// Get all available curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::Exponential,
            FadeCurve::Logarithmic,
            FadeCurve::InOutQuad,
            FadeCurve::SCurve,
            FadeCurve::EqualPower,
        ]
    }
}

impl Default for FadeCurve {
    fn default() -> Self {
        FadeCurve::Linear
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
