//! The clustering engine: sample intake, bottom-up tree construction, and
//! top-down prototype extraction.

use std::error::Error;
use std::fmt;

use log::{debug, info};

use super::cluster::{Cluster, ClusterId, SampleIter};
use super::config::{ClusterConfig, ProtoStyle};
use super::descriptor::ParamDesc;
use super::prototype::Prototype;
use super::statistics::{self, Statistics};
use crate::constants::MAX_NEIGHBORS;
use crate::fit::buckets::{Buckets, BucketsPool};
use crate::fit::chisq::ChiCache;
use crate::fit::Distribution;
use crate::search::heap::{MergeHeap, MergePair};
use crate::search::kdtree::KdTree;

/// Samples may not be added once tree construction has begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyClustered;

impl fmt::Display for AlreadyClustered {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "no samples may be added once clustering has begun")
    }
}

impl Error for AlreadyClustered {}

/// Seen-character bookkeeping for the multi-character filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharStatus {
    Unseen,
    Seen,
    Illegal,
}

/// Builds a binary cluster tree over inserted samples and extracts
/// statistical prototypes from it.
///
/// Usage mirrors the two-phase flow of the training pipeline: insert every
/// sample with [`add_sample`], then call [`cluster_samples`] as many times
/// as desired. The tree is built on the first call and reused afterwards,
/// so the same training data can be summarized under several
/// configurations.
///
/// [`add_sample`]: Clusterer::add_sample
/// [`cluster_samples`]: Clusterer::cluster_samples
#[derive(Debug)]
pub struct Clusterer {
    descs: Vec<ParamDesc>,
    arena: Vec<Cluster>,
    /// Present until the tree has been built, then dropped.
    index: Option<KdTree<ClusterId>>,
    root: Option<ClusterId>,
    sample_count: u32,
    /// One greater than the largest character id seen.
    num_char: u32,
    buckets: BucketsPool,
    chi: ChiCache,
}

impl Clusterer {
    /// # Arguments
    ///
    /// * `descs`: one descriptor per feature dimension.
    ///
    /// # Panics
    ///
    /// * If `descs` is empty.
    pub fn new(descs: Vec<ParamDesc>) -> Self {
        assert!(!descs.is_empty(), "at least one dimension is required");
        Clusterer {
            index: Some(KdTree::new(descs.clone())),
            descs,
            arena: Vec::new(),
            root: None,
            sample_count: 0,
            num_char: 0,
            buckets: BucketsPool::new(),
            chi: ChiCache::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.descs.len()
    }

    pub fn descriptors(&self) -> &[ParamDesc] {
        &self.descs
    }

    pub fn num_samples(&self) -> u32 {
        self.sample_count
    }

    /// One greater than the largest character id inserted so far.
    pub fn num_char(&self) -> u32 {
        self.num_char
    }

    /// The root of the cluster tree, once [`cluster_samples`] has run.
    ///
    /// [`cluster_samples`]: Clusterer::cluster_samples
    pub fn root(&self) -> Option<ClusterId> {
        self.root
    }

    pub fn cluster(&self, id: ClusterId) -> &Cluster {
        &self.arena[id.0]
    }

    /// Iterates the leaf samples beneath `id` in depth-first order.
    pub fn samples_in(&self, id: ClusterId) -> SampleIter {
        SampleIter::new(&self.arena, id)
    }

    /// Registers one feature vector drawn from character `char_id`.
    ///
    /// # Panics
    ///
    /// * If `features` does not match the configured dimensionality.
    pub fn add_sample(
        &mut self,
        features: &[f32],
        char_id: u32,
    ) -> Result<ClusterId, AlreadyClustered> {
        assert_eq!(
            features.len(),
            self.descs.len(),
            "sample dimensionality mismatch"
        );
        let Some(index) = self.index.as_mut() else {
            return Err(AlreadyClustered);
        };

        let id = ClusterId(self.arena.len());
        self.arena.push(Cluster::sample(features.to_vec(), char_id));
        index.insert(features, id);
        self.sample_count += 1;
        if char_id >= self.num_char {
            self.num_char = char_id + 1;
        }
        Ok(id)
    }

    /// Builds the cluster tree (first call only) and extracts a fresh
    /// prototype list under `config`.
    pub fn cluster_samples(&mut self, config: &ClusterConfig) -> Vec<Prototype> {
        if self.index.is_some() {
            self.build_tree();
        }
        let prototypes = self.compute_prototypes(config);
        info!(
            "extracted {} prototypes ({}) from {} samples",
            prototypes.len(),
            config.proto_style,
            self.sample_count,
        );
        prototypes
    }

    /// Agglomerates all samples into one binary tree.
    ///
    /// Every unclustered node keeps a pending heap entry pairing it with
    /// its nearest neighbor. Popped entries whose `main` has since been
    /// absorbed are stale and dropped; entries whose neighbor was absorbed
    /// re-pair against the current index. The spatial index is consumed by
    /// the process: the one node left standing is the root.
    fn build_tree(&mut self) {
        let mut index = self.index.take().expect("index lives until the tree is built");
        let mut heap = MergeHeap::new();

        let mut seeds = Vec::with_capacity(index.len());
        index.walk(|id, kind| {
            if kind.is_first_visit() {
                seeds.push(id);
            }
        });
        for id in seeds {
            if let Some((neighbor, distance)) = self.nearest_neighbor(&index, id) {
                heap.push(distance, MergePair { main: id, neighbor });
            }
        }

        while let Some((_, pair)) = heap.pop() {
            if self.arena[pair.main.0].clustered {
                continue;
            }
            if self.arena[pair.neighbor.0].clustered {
                // The neighbor went into an earlier, shorter merge; re-pair
                // the survivor against whoever is nearest now.
                if let Some((neighbor, distance)) = self.nearest_neighbor(&index, pair.main) {
                    heap.push(distance, MergePair { main: pair.main, neighbor });
                }
                continue;
            }

            let merged = Cluster::merge(
                &self.descs,
                pair.main,
                pair.neighbor,
                &self.arena[pair.main.0],
                &self.arena[pair.neighbor.0],
            );
            let merged_id = ClusterId(self.arena.len());
            let main_mean = self.arena[pair.main.0].mean.clone();
            let neighbor_mean = self.arena[pair.neighbor.0].mean.clone();
            self.arena[pair.main.0].clustered = true;
            self.arena[pair.neighbor.0].clustered = true;
            index.delete(&main_mean, pair.main);
            index.delete(&neighbor_mean, pair.neighbor);
            self.arena.push(merged);
            index.insert(&self.arena[merged_id.0].mean, merged_id);

            if let Some((neighbor, distance)) = self.nearest_neighbor(&index, merged_id) {
                heap.push(distance, MergePair { main: merged_id, neighbor });
            }
        }

        let mut survivors = Vec::new();
        index.walk(|id, kind| {
            if kind.is_first_visit() {
                survivors.push(id);
            }
        });
        debug_assert!(survivors.len() <= 1, "unmerged clusters left behind");
        self.root = survivors.pop();
        debug!(
            "cluster tree built: {} samples, {} nodes",
            self.sample_count,
            self.arena.len(),
        );
    }

    /// The closest other cluster still in the index, with its squared
    /// distance. The query point itself is always among the hits and is
    /// discarded by identity, not by distance, so coincident means are
    /// handled correctly.
    fn nearest_neighbor(
        &self,
        index: &KdTree<ClusterId>,
        id: ClusterId,
    ) -> Option<(ClusterId, f32)> {
        index
            .k_nearest(&self.arena[id.0].mean, MAX_NEIGHBORS, f32::MAX)
            .into_iter()
            .find(|&(hit, _)| hit != id)
    }

    /// Depth-first sweep from the root: each cluster either becomes a
    /// prototype or is split into its children for another attempt.
    fn compute_prototypes(&mut self, config: &ClusterConfig) -> Vec<Prototype> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        for cluster in &mut self.arena {
            cluster.prototype = false;
        }

        let mut prototypes = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match self.make_prototype(id, config) {
                Some(proto) => {
                    self.arena[id.0].prototype = true;
                    prototypes.push(proto);
                }
                None => {
                    if let Some((left, right)) = self.arena[id.0].children() {
                        stack.push(right);
                        stack.push(left);
                    }
                }
            }
        }
        prototypes
    }

    /// Tries to summarize one cluster.
    ///
    /// Rejections (`None`) mean the cluster should be split and its
    /// children tried instead: either its samples mix too many repeated
    /// characters, its dimensions are too correlated, or no candidate
    /// distribution survives the goodness-of-fit tests. Clusters too small
    /// to test become insignificant prototypes instead.
    fn make_prototype(&mut self, id: ClusterId, config: &ClusterConfig) -> Option<Prototype> {
        if self.multiple_char_samples(id, config.max_illegal) {
            return None;
        }
        let stats = statistics::compute(&self.descs, &self.arena, id);

        let min_samples = ((config.min_samples * self.num_char as f32) as u32).max(1);
        if self.arena[id.0].sample_count < min_samples {
            return Some(Prototype::degenerate(
                config.proto_style,
                id,
                &self.arena[id.0],
                &stats,
            ));
        }

        if !self.independent(&stats, config.independence) {
            debug!("cluster {}: dimensions too correlated, splitting", id.0);
            return None;
        }

        let sample_count = self.arena[id.0].sample_count;
        let mut normal =
            self.buckets
                .get(&mut self.chi, Distribution::Normal, sample_count, config.confidence);
        let proto = match config.proto_style {
            ProtoStyle::Spherical => self.make_spherical(id, &stats, &mut normal),
            ProtoStyle::Elliptical => self.make_elliptical(id, &stats, &mut normal),
            ProtoStyle::Mixed => self.make_mixed(id, &stats, &mut normal, config.confidence),
            ProtoStyle::Automatic => self
                .make_spherical(id, &stats, &mut normal)
                .or_else(|| self.make_elliptical(id, &stats, &mut normal))
                .or_else(|| self.make_mixed(id, &stats, &mut normal, config.confidence)),
        };
        self.buckets.put(normal);
        proto
    }

    /// Whether too many of the cluster's samples repeat a character that
    /// already appeared in it.
    ///
    /// The denominator starts at the cluster's sample count and shrinks by
    /// one for every repeated sample, so the ratio is re-checked against a
    /// running count of distinct contributors.
    fn multiple_char_samples(&self, id: ClusterId, max_illegal: f32) -> bool {
        let mut flags = vec![CharStatus::Unseen; self.num_char as usize];
        let mut illegal = 0u32;
        let mut char_count = self.arena[id.0].sample_count;

        for sample in SampleIter::new(&self.arena, id) {
            let k = sample.char_id.expect("leaves carry a character id") as usize;
            match flags[k] {
                CharStatus::Unseen => flags[k] = CharStatus::Seen,
                CharStatus::Seen | CharStatus::Illegal => {
                    if flags[k] == CharStatus::Seen {
                        flags[k] = CharStatus::Illegal;
                        illegal += 1;
                    }
                    char_count -= 1;
                    if illegal as f32 / char_count as f32 > max_illegal {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Whether every pair of essential dimensions is sufficiently
    /// uncorrelated for per-dimension fitting to be meaningful.
    fn independent(&self, stats: &Statistics, threshold: f32) -> bool {
        let n = self.descs.len();
        for i in 0..n {
            if self.descs[i].is_non_essential() {
                continue;
            }
            for j in (i + 1)..n {
                if self.descs[j].is_non_essential() {
                    continue;
                }
                let sii = stats.covariance[[i, i]];
                let sjj = stats.covariance[[j, j]];
                let correlation = if sii == 0. || sjj == 0. {
                    0.
                } else {
                    let sij = stats.covariance[[i, j]];
                    ((sij * sij) / (sii * sjj)).sqrt().sqrt()
                };
                if correlation > f64::from(threshold) {
                    return false;
                }
            }
        }
        true
    }

    fn make_spherical(
        &self,
        id: ClusterId,
        stats: &Statistics,
        buckets: &mut Buckets,
    ) -> Option<Prototype> {
        let cluster = &self.arena[id.0];
        let stddev = stats.avg_variance.sqrt() as f32;
        for (dim, desc) in self.descs.iter().enumerate() {
            if desc.is_non_essential() {
                continue;
            }
            buckets.fill(dim_values(&self.arena, id, dim), desc, cluster.mean[dim], stddev);
            if !buckets.distribution_ok() {
                return None;
            }
        }
        Some(Prototype::spherical(id, cluster, stats))
    }

    fn make_elliptical(
        &self,
        id: ClusterId,
        stats: &Statistics,
        buckets: &mut Buckets,
    ) -> Option<Prototype> {
        let cluster = &self.arena[id.0];
        for (dim, desc) in self.descs.iter().enumerate() {
            if desc.is_non_essential() {
                continue;
            }
            let stddev = stats.covariance[[dim, dim]].sqrt() as f32;
            buckets.fill(dim_values(&self.arena, id, dim), desc, cluster.mean[dim], stddev);
            if !buckets.distribution_ok() {
                return None;
            }
        }
        Some(Prototype::elliptical(id, cluster, stats))
    }

    /// Per-dimension fitting: each essential dimension keeps the first of
    /// Normal, Random, Uniform that its samples are consistent with. Any
    /// dimension exhausting all three sinks the whole attempt.
    fn make_mixed(
        &mut self,
        id: ClusterId,
        stats: &Statistics,
        normal: &mut Buckets,
        confidence: f64,
    ) -> Option<Prototype> {
        let descs = &self.descs;
        let arena = &self.arena;
        let pool = &mut self.buckets;
        let chi = &mut self.chi;
        let cluster = &arena[id.0];

        let mut proto = Prototype::mixed(id, cluster, stats);
        let mut random: Option<Buckets> = None;
        let mut uniform: Option<Buckets> = None;
        let mut fits = true;

        for (dim, desc) in descs.iter().enumerate() {
            if desc.is_non_essential() {
                continue;
            }

            let stddev = proto.variance(dim).sqrt();
            normal.fill(dim_values(arena, id, dim), desc, proto.mean(dim), stddev);
            if normal.distribution_ok() {
                continue;
            }

            proto.make_dim_random(dim, desc);
            let buckets = random.get_or_insert_with(|| {
                pool.get(chi, Distribution::Random, cluster.sample_count, confidence)
            });
            buckets.fill(dim_values(arena, id, dim), desc, proto.mean(dim), proto.variance(dim));
            if buckets.distribution_ok() {
                continue;
            }

            proto.make_dim_uniform(dim, cluster, stats);
            let buckets = uniform.get_or_insert_with(|| {
                pool.get(chi, Distribution::Uniform, cluster.sample_count, confidence)
            });
            buckets.fill(dim_values(arena, id, dim), desc, proto.mean(dim), proto.variance(dim));
            if buckets.distribution_ok() {
                continue;
            }

            fits = false;
            break;
        }

        if let Some(buckets) = random {
            pool.put(buckets);
        }
        if let Some(buckets) = uniform {
            pool.put(buckets);
        }
        fits.then_some(proto)
    }
}

/// One dimension of every leaf sample beneath `id`.
fn dim_values<'a>(arena: &'a [Cluster], id: ClusterId, dim: usize) -> impl Iterator<Item = f32> + 'a {
    SampleIter::new(arena, id).map(move |sample| sample.mean[dim])
}
