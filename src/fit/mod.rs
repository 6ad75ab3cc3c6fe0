//! Goodness-of-fit machinery: histogram buckets, chi-squared thresholds.

pub(crate) mod buckets;
pub(crate) mod chisq;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-dimension probability model a prototype may assume.
///
/// `Random` is a catch-all for dimensions that carry no information: its
/// density is flat across the dimension's entire range, where `Uniform` is
/// flat only across the span the samples actually occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    Normal,
    Uniform,
    Random,
}

impl Distribution {
    /// Index into per-distribution storage such as the bucket pool.
    pub(crate) fn index(self) -> usize {
        match self {
            Distribution::Normal => 0,
            Distribution::Uniform => 1,
            Distribution::Random => 2,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Distribution::Normal => "normal",
            Distribution::Uniform => "uniform",
            Distribution::Random => "random",
        };
        write!(f, "{name}")
    }
}
