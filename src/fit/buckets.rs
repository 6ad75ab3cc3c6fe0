//! Histogram buckets for chi-squared goodness-of-fit testing.
//!
//! A `Buckets` divides a fixed 1024-cell normalized coordinate space into a
//! small number of cells of roughly equal probability mass under a target
//! distribution. Samples are normalized into that space, counted, and the
//! observed counts compared against the expected ones with a chi-squared
//! statistic.
//!
//! Construction is the expensive part (the lookup table and the chi-squared
//! threshold), so spent buckets are returned to a per-distribution pool and
//! re-initialized on the next request with a matching bucket count.

use std::f64::consts::PI;

use super::chisq::ChiCache;
use super::Distribution;
use crate::constants::BUCKET_TABLE_SIZE;
use crate::core::descriptor::ParamDesc;
use crate::utils::helpers;

/// Sample counts at which the bucket-count table below is anchored.
const COUNT_TABLE: [u32; 8] = [25, 200, 400, 600, 800, 1000, 1500, 2000];

/// Bucket counts matching `COUNT_TABLE`; intermediate sample counts
/// interpolate linearly.
const BUCKETS_TABLE: [u16; 8] = [5, 16, 20, 24, 27, 30, 35, 39];

/// Discrete parameters of the normal density over the lookup table. The
/// table spans three standard deviations on either side of its midpoint.
const NORMAL_MEAN: f64 = BUCKET_TABLE_SIZE as f64 / 2.;
const NORMAL_STDDEV: f64 = BUCKET_TABLE_SIZE as f64 / 6.;

/// Density of the target distribution at table coordinate `t`.
fn density(distribution: Distribution, t: f64) -> f64 {
    match distribution {
        Distribution::Normal => {
            let magnitude = 6. / ((2. * PI).sqrt() * BUCKET_TABLE_SIZE as f64);
            let z = t - NORMAL_MEAN;
            magnitude * (-(z * z) / (2. * NORMAL_STDDEV * NORMAL_STDDEV)).exp()
        }
        Distribution::Uniform | Distribution::Random => 1. / BUCKET_TABLE_SIZE as f64,
    }
}

/// Bucket count best suited to `sample_count` observations.
fn optimum_bucket_count(sample_count: u32) -> u16 {
    helpers::lerp_table(&COUNT_TABLE, &BUCKETS_TABLE, sample_count)
}

/// Degrees of freedom of the chi-squared statistic for `num_buckets` cells,
/// rounded up to the next even number so the tail-area series applies.
fn degrees_of_freedom(distribution: Distribution, num_buckets: u16) -> usize {
    let deducted = match distribution {
        Distribution::Normal | Distribution::Uniform => 3,
        Distribution::Random => 1,
    };
    let dof = num_buckets as usize - deducted;
    dof + dof % 2
}

#[derive(Debug)]
pub(crate) struct Buckets {
    distribution: Distribution,
    sample_count: u32,
    confidence: f64,
    chi_threshold: f64,
    num_buckets: u16,
    /// Normalized coordinate to bucket index, `BUCKET_TABLE_SIZE` entries.
    bucket: Vec<u16>,
    /// Observed counts, one per bucket.
    count: Vec<u32>,
    /// Expected counts, one per bucket.
    expected: Vec<f32>,
}

impl Buckets {
    /// Builds the lookup table and expected counts for `distribution`.
    ///
    /// The table is symmetric about its midpoint: the upper half is
    /// integrated directly (trapezoidal rule, step 1) with any residual
    /// upper-tail mass folded into the outermost bucket, then mirrored onto
    /// the lower half, with symmetric pairs of cells pooling their mass.
    pub fn new(
        chi: &mut ChiCache,
        distribution: Distribution,
        sample_count: u32,
        confidence: f64,
    ) -> Self {
        let num_buckets = optimum_bucket_count(sample_count);
        let n = num_buckets as usize;
        let half = BUCKET_TABLE_SIZE / 2;

        let mut bucket = vec![0u16; BUCKET_TABLE_SIZE];
        let mut expected = vec![0f32; n];

        let bucket_probability = 1. / f64::from(num_buckets);
        let mut next_boundary = bucket_probability;
        let mut probability = 0.;
        let mut current = 0u16;
        let mut last_density = density(distribution, half as f64);
        for i in half..BUCKET_TABLE_SIZE {
            let next_density = density(distribution, (i + 1) as f64);
            let delta = (last_density + next_density) / 2.;
            probability += delta;
            if probability > next_boundary {
                if current < num_buckets - 1 {
                    current += 1;
                }
                next_boundary += bucket_probability;
            }
            bucket[i] = current;
            expected[current as usize] += (delta * f64::from(sample_count)) as f32;
            last_density = next_density;
        }
        // Mass beyond the end of the table belongs to the outermost bucket.
        expected[current as usize] += ((0.5 - probability) * f64::from(sample_count)) as f32;

        for i in 0..half {
            bucket[i] = num_buckets - 1 - bucket[BUCKET_TABLE_SIZE - 1 - i];
        }
        let (mut i, mut j) = (0, n - 1);
        while i < j {
            let pooled = expected[i] + expected[j];
            expected[i] = pooled;
            expected[j] = pooled;
            i += 1;
            j -= 1;
        }
        if i == j {
            expected[i] *= 2.;
        }

        let chi_threshold = chi.chi_squared(degrees_of_freedom(distribution, num_buckets), confidence);
        Buckets {
            distribution,
            sample_count,
            confidence,
            chi_threshold,
            num_buckets,
            bucket,
            count: vec![0; n],
            expected,
        }
    }

    pub fn num_buckets(&self) -> u16 {
        self.num_buckets
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    #[cfg(test)]
    pub fn expected(&self) -> &[f32] {
        &self.expected
    }

    #[cfg(test)]
    pub fn observed(&self) -> &[u32] {
        &self.count
    }

    /// Re-targets a pooled instance at a new sample count and confidence.
    /// The lookup table depends only on the bucket count and survives as-is.
    fn reinit(&mut self, chi: &mut ChiCache, sample_count: u32, confidence: f64) {
        if sample_count != self.sample_count {
            let ratio = sample_count as f32 / self.sample_count as f32;
            for e in &mut self.expected {
                *e *= ratio;
            }
            self.sample_count = sample_count;
        }
        if confidence != self.confidence {
            self.chi_threshold =
                chi.chi_squared(degrees_of_freedom(self.distribution, self.num_buckets), confidence);
            self.confidence = confidence;
        }
        self.count.fill(0);
    }

    /// Histograms one dimension of a cluster's samples.
    ///
    /// `scale` is the standard deviation for a normal target and the
    /// half-width of the occupied span for a uniform or random target. A
    /// zero scale means every sample should sit exactly at `mean`; rather
    /// than divide by zero, samples above the mean pile into the last
    /// bucket, samples below into the first, and exact matches are dealt
    /// round-robin across all buckets.
    pub fn fill(
        &mut self,
        values: impl Iterator<Item = f32>,
        desc: &ParamDesc,
        mean: f32,
        scale: f32,
    ) {
        self.count.fill(0);

        if scale == 0. {
            let mut next = 0usize;
            for x in values {
                let slot = if x > mean {
                    self.num_buckets as usize - 1
                } else if x < mean {
                    0
                } else {
                    next
                };
                self.count[slot] += 1;
                next += 1;
                if next >= self.num_buckets as usize {
                    next = 0;
                }
            }
            return;
        }

        for x in values {
            let x = mean + desc.deviation(x, mean);
            let t = match self.distribution {
                Distribution::Normal => {
                    f64::from((x - mean) / scale) * NORMAL_STDDEV + NORMAL_MEAN
                }
                Distribution::Uniform | Distribution::Random => {
                    f64::from((x - mean) / (2. * scale)) * BUCKET_TABLE_SIZE as f64
                        + BUCKET_TABLE_SIZE as f64 / 2.
                }
            };
            let t = t.clamp(0., (BUCKET_TABLE_SIZE - 1) as f64);
            self.count[self.bucket[t as usize] as usize] += 1;
        }
    }

    /// Whether the observed counts are consistent with the target
    /// distribution at this instance's confidence level.
    pub fn distribution_ok(&self) -> bool {
        let statistic: f64 = self
            .count
            .iter()
            .zip(self.expected.iter())
            .map(|(&observed, &expected)| {
                let d = f64::from(observed) - f64::from(expected);
                d * d / f64::from(expected)
            })
            .sum();
        statistic <= self.chi_threshold
    }
}

/// Reusable buckets, one free list per target distribution.
#[derive(Debug, Default)]
pub(crate) struct BucketsPool {
    free: [Vec<Buckets>; 3],
}

impl BucketsPool {
    pub fn new() -> Self {
        BucketsPool::default()
    }

    /// A `Buckets` for `(distribution, sample_count, confidence)`, recycled
    /// from the pool when one with the right bucket count is available.
    pub fn get(
        &mut self,
        chi: &mut ChiCache,
        distribution: Distribution,
        sample_count: u32,
        confidence: f64,
    ) -> Buckets {
        let num_buckets = optimum_bucket_count(sample_count);
        let free = &mut self.free[distribution.index()];
        match free.iter().position(|b| b.num_buckets == num_buckets) {
            Some(at) => {
                let mut buckets = free.swap_remove(at);
                buckets.reinit(chi, sample_count, confidence);
                buckets
            }
            None => Buckets::new(chi, distribution, sample_count, confidence),
        }
    }

    pub fn put(&mut self, buckets: Buckets) {
        self.free[buckets.distribution.index()].push(buckets);
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    use super::*;

    #[test]
    fn test_optimum_bucket_count() {
        assert_eq!(optimum_bucket_count(1), 5);
        assert_eq!(optimum_bucket_count(25), 5);
        assert_eq!(optimum_bucket_count(200), 16);
        assert_eq!(optimum_bucket_count(2000), 39);
        assert_eq!(optimum_bucket_count(100_000), 39);
    }

    #[test]
    fn test_degrees_of_freedom() {
        assert_eq!(degrees_of_freedom(Distribution::Normal, 5), 2);
        assert_eq!(degrees_of_freedom(Distribution::Uniform, 16), 14);
        assert_eq!(degrees_of_freedom(Distribution::Random, 5), 4);
    }

    #[test]
    fn test_expected_counts_cover_all_samples() {
        let mut chi = ChiCache::new();
        for distribution in [Distribution::Normal, Distribution::Uniform] {
            let buckets = Buckets::new(&mut chi, distribution, 400, 0.05);
            assert_eq!(buckets.distribution(), distribution);
            assert_eq!(buckets.num_buckets(), 20);
            let total: f32 = buckets.expected().iter().sum();
            assert!(
                (total - 400.).abs() < 1.,
                "{distribution} expected counts sum to {total}"
            );
            assert!(buckets.expected().iter().all(|&e| e > 0.));
        }
    }

    #[test]
    fn test_uniform_data_fits_uniform() {
        let mut chi = ChiCache::new();
        let mut buckets = Buckets::new(&mut chi, Distribution::Uniform, 200, 0.05);
        let desc = ParamDesc::linear(0., 1.);
        // 200 evenly spread values centered on 0.5, half-width 0.2.
        let values: Vec<f32> = (0..200).map(|i| 0.3 + 0.4 * (i as f32 + 0.5) / 200.).collect();
        buckets.fill(values.iter().copied(), &desc, 0.5, 0.2);
        assert_eq!(buckets.observed().iter().sum::<u32>(), 200);
        assert!(buckets.distribution_ok());
    }

    #[test]
    fn test_concentrated_data_rejects_uniform() {
        let mut chi = ChiCache::new();
        let mut buckets = Buckets::new(&mut chi, Distribution::Uniform, 200, 0.05);
        let desc = ParamDesc::linear(0., 1.);
        // Everything in the central fifth of the claimed span.
        let values: Vec<f32> = (0..200).map(|i| 0.48 + 0.04 * (i as f32 + 0.5) / 200.).collect();
        buckets.fill(values.iter().copied(), &desc, 0.5, 0.2);
        assert!(!buckets.distribution_ok());
    }

    #[test]
    fn test_zero_scale_round_robin() {
        let mut chi = ChiCache::new();
        let mut buckets = Buckets::new(&mut chi, Distribution::Normal, 10, 0.05);
        let desc = ParamDesc::linear(0., 1.);
        let values = vec![0.5f32; 10];
        buckets.fill(values.iter().copied(), &desc, 0.5, 0.);
        // Ten identical samples cycle through five buckets twice.
        assert_eq!(buckets.observed(), &[2, 2, 2, 2, 2]);

        // Off-mean samples pile into the extreme buckets; the round-robin
        // cursor still advances on every sample.
        let values = vec![0.4f32, 0.5, 0.6, 0.5];
        buckets.fill(values.iter().copied(), &desc, 0.5, 0.);
        assert_eq!(buckets.observed(), &[1, 1, 0, 1, 1]);
    }

    #[test]
    fn test_pool_round_trip() {
        let mut chi = ChiCache::new();
        let mut pool = BucketsPool::new();
        let desc = ParamDesc::linear(0., 1.);

        let mut buckets = pool.get(&mut chi, Distribution::Normal, 100, 0.05);
        let expected_before = buckets.expected().to_vec();
        buckets.fill([0.1f32, 0.5, 0.9].into_iter(), &desc, 0.5, 0.2);
        assert!(buckets.observed().iter().sum::<u32>() > 0);
        pool.put(buckets);

        let buckets = pool.get(&mut chi, Distribution::Normal, 100, 0.05);
        assert!(buckets.observed().iter().all(|&c| c == 0));
        for (&a, &b) in buckets.expected().iter().zip(expected_before.iter()) {
            assert!(approx_eq!(f32, a, b));
        }
    }

    #[test]
    fn test_pool_rescales_expected_counts() {
        let mut chi = ChiCache::new();
        let mut pool = BucketsPool::new();

        let buckets = pool.get(&mut chi, Distribution::Uniform, 90, 0.05);
        let before = buckets.expected().to_vec();
        pool.put(buckets);

        // 90 and 100 samples both land on the same bucket count, so the
        // pooled entry is reused with its expected counts rescaled.
        assert_eq!(optimum_bucket_count(90), optimum_bucket_count(100));
        let buckets = pool.get(&mut chi, Distribution::Uniform, 100, 0.05);
        for (&a, &b) in buckets.expected().iter().zip(before.iter()) {
            assert!(approx_eq!(f32, a, b * 100. / 90., epsilon = 1e-3));
        }
    }
}
