//! Per-cluster summary statistics for prototype fitting.

use ndarray::Array2;

use super::cluster::{Cluster, ClusterId, SampleIter};
use super::descriptor::ParamDesc;

/// Covariance and deviation ranges of the samples beneath one cluster.
///
/// `min` and `max` bound the circular-corrected deviations from the cluster
/// mean, per dimension; they are what the uniform fit reads its span from.
#[derive(Debug)]
pub(crate) struct Statistics {
    /// Geometric mean of the covariance diagonal.
    pub avg_variance: f64,
    pub covariance: Array2<f64>,
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

/// Walks every leaf sample beneath `id`, accumulating deviation extrema and
/// the full sum-of-outer-products, then normalizes with a Bessel correction
/// guarded for single-sample clusters.
pub(crate) fn compute(descs: &[ParamDesc], arena: &[Cluster], id: ClusterId) -> Statistics {
    let n = descs.len();
    let cluster = &arena[id.0];

    let mut min = vec![0f32; n];
    let mut max = vec![0f32; n];
    let mut covariance = Array2::<f64>::zeros((n, n));
    let mut deviation = vec![0f64; n];

    for sample in SampleIter::new(arena, id) {
        for i in 0..n {
            let d = descs[i].deviation(sample.mean[i], cluster.mean[i]);
            if d < min[i] {
                min[i] = d;
            }
            if d > max[i] {
                max[i] = d;
            }
            deviation[i] = f64::from(d);
        }
        for i in 0..n {
            for j in i..n {
                covariance[[i, j]] += deviation[i] * deviation[j];
            }
        }
    }

    let adjusted = (cluster.sample_count.max(2) - 1) as f64;
    for i in 0..n {
        for j in i..n {
            covariance[[i, j]] /= adjusted;
            covariance[[j, i]] = covariance[[i, j]];
        }
    }

    let product: f64 = (0..n).map(|i| covariance[[i, i]]).product();
    Statistics {
        avg_variance: product.powf(1. / n as f64),
        covariance,
        min,
        max,
    }
}
