//! Hard-coded constants for the clustering engine.

/// Floor applied to every variance estimate. Keeps magnitudes and weights
/// finite when a dimension collapses to a single value.
pub const MIN_VARIANCE: f32 = 4e-6;

/// Number of cells in the normalized-coordinate lookup table used by the
/// goodness-of-fit histograms.
pub(crate) const BUCKET_TABLE_SIZE: usize = 1024;

/// How many neighbors to request when looking for a cluster's nearest
/// neighbor. The first hit is always the cluster itself.
pub(crate) const MAX_NEIGHBORS: usize = 2;
