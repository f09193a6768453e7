//! Fade curves for clip edges
//!
//! Every exported clip gets a fade-in at its head and a fade-out at its tail
//! so slices cut from the middle of a source do not click.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Gain curve applied over a fade region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,

    /// v(t) = t², slow start
    Exponential,

    /// v(t) = √t on fade-in, (1-t)² on fade-out
    Logarithmic,

    /// v(t) = 0.5 × (1 - cos(π × t))
    #[serde(alias = "cosine")]
    SCurve,

    /// v(t) = sin(t × π/2)
    EqualPower,
}

impl FadeCurve {
    /// Fade-in gain at `position` (0.0 = start of fade, 1.0 = end)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Fade-out gain at `position` (1.0 at the start of the fade, 0.0 at the end)
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential | FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// Apply a fade-in over the first `fade_len` samples and a fade-out over
    /// the last `fade_len` samples.
    ///
    /// `fade_len` is clamped to half the buffer so the two regions never overlap.
    pub fn apply_edge_fades(&self, samples: &mut [f32], fade_len: usize) {
        let len = samples.len();
        let fade_len = fade_len.min(len / 2);
        if fade_len == 0 {
            return;
        }

        let denom = fade_len as f32;
        for (i, sample) in samples[..fade_len].iter_mut().enumerate() {
            *sample *= self.calculate_fade_in(i as f32 / denom);
        }
        for (j, sample) in samples[len - fade_len..].iter_mut().enumerate() {
            *sample *= self.calculate_fade_out((j + 1) as f32 / denom);
        }
    }
}
