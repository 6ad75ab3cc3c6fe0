//! Parametric prototypes summarizing clusters.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::cluster::{Cluster, ClusterId};
use super::config::ProtoStyle;
use super::descriptor::ParamDesc;
use super::statistics::Statistics;
use crate::constants::MIN_VARIANCE;
use crate::fit::Distribution;

/// Shape-specific parameters. Spherical prototypes carry one variance for
/// all dimensions; elliptical and mixed prototypes carry per-dimension
/// vectors, and mixed ones additionally record which distribution each
/// dimension settled on.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum ProtoParams {
    Spherical {
        variance: f32,
        magnitude: f32,
        weight: f32,
    },
    Elliptical {
        variance: Vec<f32>,
        magnitude: Vec<f32>,
        weight: Vec<f32>,
    },
    Mixed {
        distribution: Vec<Distribution>,
        variance: Vec<f32>,
        magnitude: Vec<f32>,
        weight: Vec<f32>,
    },
}

/// A parametric description of the samples beneath one cluster.
///
/// Prototypes own their mean and variance data outright, so they stay
/// queryable after the [`Clusterer`] that produced them is gone; only the
/// [`cluster`] back-reference dangles at that point.
///
/// [`Clusterer`]: crate::Clusterer
/// [`cluster`]: Prototype::cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prototype {
    significant: bool,
    sample_count: u32,
    mean: Vec<f32>,
    params: ProtoParams,
    total_magnitude: f32,
    log_magnitude: f32,
    cluster: ClusterId,
}

fn normal_magnitude(variance: f32) -> f32 {
    (1. / (2. * PI * f64::from(variance)).sqrt()) as f32
}

fn floored_diagonal(stats: &Statistics) -> Vec<f32> {
    (0..stats.min.len())
        .map(|i| (stats.covariance[[i, i]] as f32).max(MIN_VARIANCE))
        .collect()
}

impl Prototype {
    /// One variance for every dimension: the geometric mean of the
    /// per-dimension variances, floored.
    pub(crate) fn spherical(id: ClusterId, cluster: &Cluster, stats: &Statistics) -> Self {
        let n = cluster.mean().len();
        let variance = (stats.avg_variance as f32).max(MIN_VARIANCE);
        let magnitude = normal_magnitude(variance);
        let total_magnitude = magnitude.powi(n as i32);
        Prototype {
            significant: true,
            sample_count: cluster.sample_count(),
            mean: cluster.mean().to_vec(),
            params: ProtoParams::Spherical {
                variance,
                magnitude,
                weight: 1. / variance,
            },
            total_magnitude,
            log_magnitude: total_magnitude.ln(),
            cluster: id,
        }
    }

    /// Independent per-dimension normal variances, each floored.
    pub(crate) fn elliptical(id: ClusterId, cluster: &Cluster, stats: &Statistics) -> Self {
        let variance = floored_diagonal(stats);
        let magnitude: Vec<f32> = variance.iter().map(|&v| normal_magnitude(v)).collect();
        let weight: Vec<f32> = variance.iter().map(|&v| 1. / v).collect();
        let total_magnitude: f32 = magnitude.iter().product();
        Prototype {
            significant: true,
            sample_count: cluster.sample_count(),
            mean: cluster.mean().to_vec(),
            params: ProtoParams::Elliptical {
                variance,
                magnitude,
                weight,
            },
            total_magnitude,
            log_magnitude: total_magnitude.ln(),
            cluster: id,
        }
    }

    /// Starts as an elliptical prototype with every dimension normal; the
    /// mixed fit then re-types dimensions that fail the normal test.
    pub(crate) fn mixed(id: ClusterId, cluster: &Cluster, stats: &Statistics) -> Self {
        let mut proto = Prototype::elliptical(id, cluster, stats);
        let ProtoParams::Elliptical {
            variance,
            magnitude,
            weight,
        } = proto.params
        else {
            unreachable!("elliptical constructor returns elliptical params");
        };
        proto.params = ProtoParams::Mixed {
            distribution: vec![Distribution::Normal; variance.len()],
            variance,
            magnitude,
            weight,
        };
        proto
    }

    /// A prototype for a cluster with too few samples to test: the
    /// requested shape with floored variances, marked insignificant.
    pub(crate) fn degenerate(
        style: ProtoStyle,
        id: ClusterId,
        cluster: &Cluster,
        stats: &Statistics,
    ) -> Self {
        let mut proto = match style {
            ProtoStyle::Spherical | ProtoStyle::Automatic => {
                Prototype::spherical(id, cluster, stats)
            }
            ProtoStyle::Elliptical => Prototype::elliptical(id, cluster, stats),
            ProtoStyle::Mixed => Prototype::mixed(id, cluster, stats),
        };
        proto.significant = false;
        proto
    }

    /// Re-types `dim` as noise spanning the dimension's whole range.
    pub(crate) fn make_dim_random(&mut self, dim: usize, desc: &ParamDesc) {
        let ProtoParams::Mixed {
            distribution,
            variance,
            ..
        } = &mut self.params
        else {
            unreachable!("dimension re-typing applies to mixed prototypes only");
        };
        distribution[dim] = Distribution::Random;
        variance[dim] = desc.half_range();
        self.mean[dim] = desc.mid_range();
        self.update_magnitude(dim, 1. / desc.range());
    }

    /// Re-types `dim` as uniform over the span the samples actually occupy.
    pub(crate) fn make_dim_uniform(&mut self, dim: usize, cluster: &Cluster, stats: &Statistics) {
        let ProtoParams::Mixed {
            distribution,
            variance,
            ..
        } = &mut self.params
        else {
            unreachable!("dimension re-typing applies to mixed prototypes only");
        };
        distribution[dim] = Distribution::Uniform;
        variance[dim] = ((stats.max[dim] - stats.min[dim]) / 2.).max(MIN_VARIANCE);
        self.mean[dim] = cluster.mean()[dim] + (stats.min[dim] + stats.max[dim]) / 2.;
        let new_magnitude = 1. / (2. * variance[dim]);
        self.update_magnitude(dim, new_magnitude);
    }

    fn update_magnitude(&mut self, dim: usize, new_magnitude: f32) {
        let ProtoParams::Mixed { magnitude, .. } = &mut self.params else {
            unreachable!("dimension re-typing applies to mixed prototypes only");
        };
        self.total_magnitude /= magnitude[dim];
        self.total_magnitude *= new_magnitude;
        magnitude[dim] = new_magnitude;
        self.log_magnitude = self.total_magnitude.ln();
    }

    pub fn style(&self) -> ProtoStyle {
        match self.params {
            ProtoParams::Spherical { .. } => ProtoStyle::Spherical,
            ProtoParams::Elliptical { .. } => ProtoStyle::Elliptical,
            ProtoParams::Mixed { .. } => ProtoStyle::Mixed,
        }
    }

    /// Whether the cluster had enough samples for its distribution tests to
    /// mean anything.
    pub fn is_significant(&self) -> bool {
        self.significant
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// The cluster this prototype summarizes. Only meaningful against the
    /// `Clusterer` that emitted the prototype, and only while it is alive.
    pub fn cluster(&self) -> ClusterId {
        self.cluster
    }

    pub fn means(&self) -> &[f32] {
        &self.mean
    }

    pub fn mean(&self, dim: usize) -> f32 {
        self.mean[dim]
    }

    /// The variance assumed for `dim`: the shared value for spherical
    /// prototypes, the per-dimension one otherwise.
    pub fn variance(&self, dim: usize) -> f32 {
        match &self.params {
            ProtoParams::Spherical { variance, .. } => *variance,
            ProtoParams::Elliptical { variance, .. } | ProtoParams::Mixed { variance, .. } => {
                variance[dim]
            }
        }
    }

    pub fn standard_deviation(&self, dim: usize) -> f32 {
        self.variance(dim).sqrt()
    }

    pub fn magnitude(&self, dim: usize) -> f32 {
        match &self.params {
            ProtoParams::Spherical { magnitude, .. } => *magnitude,
            ProtoParams::Elliptical { magnitude, .. } | ProtoParams::Mixed { magnitude, .. } => {
                magnitude[dim]
            }
        }
    }

    pub fn weight(&self, dim: usize) -> f32 {
        match &self.params {
            ProtoParams::Spherical { weight, .. } => *weight,
            ProtoParams::Elliptical { weight, .. } | ProtoParams::Mixed { weight, .. } => {
                weight[dim]
            }
        }
    }

    pub fn total_magnitude(&self) -> f32 {
        self.total_magnitude
    }

    pub fn log_magnitude(&self) -> f32 {
        self.log_magnitude
    }

    /// Per-dimension distributions of a mixed prototype; `None` for the
    /// other shapes.
    pub fn distributions(&self) -> Option<&[Distribution]> {
        match &self.params {
            ProtoParams::Mixed { distribution, .. } => Some(distribution),
            _ => None,
        }
    }
}
