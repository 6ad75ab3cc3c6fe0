//! Per-dimension descriptions of the feature space.

use serde::{Deserialize, Serialize};

/// Describes one dimension of the feature space.
///
/// A `circular` dimension wraps around `[min, max)`, e.g. an angle measured
/// in degrees. A `non_essential` dimension is carried through clustering but
/// ignored by every statistical test.
///
/// The derived `range`, `half_range` and `mid_range` are computed once at
/// construction so the hot paths never re-derive them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDesc {
    circular: bool,
    non_essential: bool,
    min: f32,
    max: f32,
    range: f32,
    half_range: f32,
    mid_range: f32,
}

impl ParamDesc {
    pub fn new(circular: bool, non_essential: bool, min: f32, max: f32) -> Self {
        let range = max - min;
        ParamDesc {
            circular,
            non_essential,
            min,
            max,
            range,
            half_range: range / 2.,
            mid_range: (max + min) / 2.,
        }
    }

    /// A plain, essential, non-wrapping dimension over `[min, max)`.
    pub fn linear(min: f32, max: f32) -> Self {
        ParamDesc::new(false, false, min, max)
    }

    /// An essential dimension that wraps around `[min, max)`.
    pub fn circular(min: f32, max: f32) -> Self {
        ParamDesc::new(true, false, min, max)
    }

    pub fn is_circular(&self) -> bool {
        self.circular
    }

    pub fn is_non_essential(&self) -> bool {
        self.non_essential
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn range(&self) -> f32 {
        self.range
    }

    pub fn half_range(&self) -> f32 {
        self.half_range
    }

    pub fn mid_range(&self) -> f32 {
        self.mid_range
    }

    /// Deviation of `x` from `reference`, corrected for wraparound.
    ///
    /// For circular dimensions a raw difference larger than half the range
    /// means the short way around crosses the seam, so one full range is
    /// folded back in.
    pub fn deviation(&self, x: f32, reference: f32) -> f32 {
        let mut d = x - reference;
        if self.circular {
            if d > self.half_range {
                d -= self.range;
            } else if d < -self.half_range {
                d += self.range;
            }
        }
        d
    }

    /// Absolute separation between two coordinates along this dimension,
    /// taking the short way around for circular dimensions.
    pub fn separation(&self, x: f32, y: f32) -> f32 {
        let mut d = (x - y).abs();
        if self.circular && d > self.half_range {
            d = self.range - d;
        }
        d
    }
}
