//! End-to-end clustering scenarios.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use protoclust::{ClusterConfig, Clusterer, Distribution, ParamDesc, ProtoStyle};

mod common;

use common::normal_atoms;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two well-separated blobs under a spherical fit come back as exactly two
/// significant prototypes centered on the seeds.
#[test]
fn two_separable_blobs() {
    init_logging();
    let mut clusterer = Clusterer::new(vec![
        ParamDesc::linear(0., 1.),
        ParamDesc::linear(0., 1.),
    ]);

    // Each blob is a 10x10 product grid of stratified normal deviates, so
    // the marginals are normal and the dimensions exactly uncorrelated.
    let atoms = normal_atoms(10);
    let mut char_id = 0;
    for &center in &[0.2f32, 0.8] {
        for i in 0..100usize {
            let x = center + 0.02 * atoms[i % 10] as f32;
            let y = center + 0.02 * atoms[i / 10] as f32;
            clusterer.add_sample(&[x, y], char_id).unwrap();
            char_id += 1;
        }
    }

    let config = ClusterConfig::default()
        .with_style(ProtoStyle::Spherical)
        .with_min_samples(0.05)
        .with_max_illegal(1.)
        .with_independence(0.5)
        .with_confidence(1e-3);
    let prototypes = clusterer.cluster_samples(&config);

    assert_eq!(prototypes.len(), 2, "expected one prototype per blob");
    let mut centers_seen = Vec::new();
    for proto in &prototypes {
        assert_eq!(proto.style(), ProtoStyle::Spherical);
        assert!(proto.is_significant());
        assert_eq!(proto.sample_count(), 100);
        let center = if proto.mean(0) < 0.5 { 0.2f32 } else { 0.8 };
        assert!((proto.mean(0) - center).abs() < 0.05);
        assert!((proto.mean(1) - center).abs() < 0.05);
        centers_seen.push(center);
    }
    centers_seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(centers_seen, vec![0.2, 0.8]);
}

/// Samples straddling the seam of a circular dimension merge to a mean at
/// the seam, not at the far side of the circle.
#[test]
fn circular_dimension_wraps_at_seam() {
    let mut clusterer = Clusterer::new(vec![ParamDesc::circular(0., 360.)]);
    for (i, &angle) in [358f32, 359., 0., 1., 2.].iter().enumerate() {
        clusterer.add_sample(&[angle], i as u32).unwrap();
    }
    clusterer.cluster_samples(&ClusterConfig::default());

    let root = clusterer.root().expect("tree was built");
    let mean = clusterer.cluster(root).mean()[0];
    assert!(
        mean < 0.5 || mean > 359.5,
        "root mean should sit at the seam, got {mean}"
    );

    // Every cluster mean stays inside the declared range.
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let cluster = clusterer.cluster(id);
        let m = cluster.mean()[0];
        assert!((0. ..360.).contains(&m), "cluster mean {m} out of range");
        if let Some((left, right)) = cluster.children() {
            stack.push(left);
            stack.push(right);
        }
    }
}

/// A cluster with too few samples for its tests yields a single prototype
/// flagged as insignificant.
#[test]
fn degenerate_cluster_is_insignificant() {
    let mut clusterer = Clusterer::new(vec![
        ParamDesc::linear(0., 1.),
        ParamDesc::linear(0., 1.),
    ]);
    clusterer.add_sample(&[0.4, 0.4], 0).unwrap();
    clusterer.add_sample(&[0.5, 0.5], 1).unwrap();
    clusterer.add_sample(&[0.6, 0.6], 2).unwrap();

    // Three characters at min_samples 3.5 asks for at least ten samples.
    let config = ClusterConfig::default()
        .with_style(ProtoStyle::Spherical)
        .with_min_samples(3.5)
        .with_max_illegal(1.)
        .with_independence(1.)
        .with_confidence(0.05);
    let prototypes = clusterer.cluster_samples(&config);

    assert_eq!(prototypes.len(), 1);
    assert!(!prototypes[0].is_significant());
    assert_eq!(prototypes[0].sample_count(), 3);
    assert_eq!(prototypes[0].style(), ProtoStyle::Spherical);
}

/// A normal dimension and a uniform dimension under a mixed fit settle on
/// `[Normal, Uniform]`, with the uniform mean at the middle of the span.
#[test]
fn mixed_fit_detects_uniform_dimension() {
    let mut clusterer = Clusterer::new(vec![
        ParamDesc::linear(0., 1.),
        ParamDesc::linear(0., 1.),
    ]);

    // 200 samples: stratified normal in dimension 0, evenly spread over
    // [0.3, 0.7] in dimension 1. The span deliberately covers less than the
    // descriptor range so the random fallback cannot pass either.
    let atoms = normal_atoms(200);
    for i in 0..200usize {
        let x = 0.5 + 0.05 * atoms[i] as f32;
        let y = 0.3 + 0.4 * (i as f32 + 0.5) / 200.;
        clusterer.add_sample(&[x, y], i as u32).unwrap();
    }

    let config = ClusterConfig::default()
        .with_style(ProtoStyle::Mixed)
        .with_min_samples(0.01)
        .with_max_illegal(1.)
        .with_independence(1.)
        .with_confidence(0.05);
    let prototypes = clusterer.cluster_samples(&config);

    assert_eq!(prototypes.len(), 1);
    let proto = &prototypes[0];
    assert_eq!(proto.style(), ProtoStyle::Mixed);
    assert_eq!(
        proto.distributions(),
        Some(&[Distribution::Normal, Distribution::Uniform][..])
    );
    assert!((proto.mean(1) - 0.5).abs() < 0.01, "uniform mean should sit mid-span");
    assert!((proto.mean(0) - 0.5).abs() < 0.01);
}

/// Heavily repeated characters force the root to be rejected and the tree
/// recursively split; the surviving prototypes still cover every sample
/// exactly once.
#[test]
fn repeated_characters_split_the_tree() {
    let mut clusterer = Clusterer::new(vec![
        ParamDesc::linear(0., 1.),
        ParamDesc::linear(0., 1.),
    ]);
    for i in 0..50usize {
        let x = 0.1 + 0.08 * (i % 10) as f32;
        let y = 0.1 + 0.15 * (i / 10) as f32;
        clusterer.add_sample(&[x, y], (i % 5) as u32).unwrap();
    }

    let config = ClusterConfig::default()
        .with_style(ProtoStyle::Spherical)
        .with_min_samples(0.)
        .with_max_illegal(0.1)
        .with_independence(1.)
        .with_confidence(0.05);
    let prototypes = clusterer.cluster_samples(&config);

    let root = clusterer.root().expect("tree was built");
    assert!(!clusterer.cluster(root).is_prototype(), "root should be rejected");
    assert!(prototypes.len() > 1, "rejection should split the tree");

    // Tree cover: every leaf sits beneath exactly one emitted prototype.
    let mut covered = 0usize;
    let mut stack = vec![(root, false)];
    while let Some((id, above_covered)) = stack.pop() {
        let cluster = clusterer.cluster(id);
        let here = cluster.is_prototype();
        assert!(
            !(here && above_covered),
            "prototype nested beneath another prototype"
        );
        let below = here || above_covered;
        match cluster.children() {
            Some((left, right)) => {
                stack.push((left, below));
                stack.push((right, below));
            }
            None => {
                assert!(below, "leaf not covered by any prototype");
                covered += 1;
            }
        }
    }
    assert_eq!(covered, 50);
    let total: u32 = prototypes.iter().map(|p| p.sample_count()).sum();
    assert_eq!(total, 50);
}

/// Re-running extraction with the same configuration reproduces the same
/// prototype list; the tree is only built once.
#[test]
fn reclustering_reproduces_prototypes() {
    let mut clusterer = Clusterer::new(vec![
        ParamDesc::linear(0., 1.),
        ParamDesc::linear(0., 1.),
    ]);
    let atoms = normal_atoms(10);
    for i in 0..100usize {
        let x = 0.5 + 0.03 * atoms[i % 10] as f32;
        let y = 0.5 + 0.03 * atoms[i / 10] as f32;
        clusterer.add_sample(&[x, y], i as u32).unwrap();
    }

    let config = ClusterConfig::default()
        .with_style(ProtoStyle::Automatic)
        .with_min_samples(0.05)
        .with_max_illegal(1.)
        .with_independence(0.9)
        .with_confidence(1e-3);
    let first = clusterer.cluster_samples(&config);
    let second = clusterer.cluster_samples(&config);

    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.style(), b.style());
        assert_eq!(a.cluster(), b.cluster());
        assert_eq!(a.is_significant(), b.is_significant());
        for dim in 0..2 {
            assert_eq!(a.mean(dim), b.mean(dim));
            assert_eq!(a.variance(dim), b.variance(dim));
        }
    }
}

/// Shuffling the insertion order changes the tree shape but never loses
/// samples: the leaf set and the count invariant are order-independent.
#[test]
fn insertion_order_preserves_every_sample() {
    init_logging();
    let mut points = Vec::new();
    for i in 0..60usize {
        points.push([
            0.05 + 0.015 * (i % 10) as f32,
            0.05 + 0.15 * (i / 10) as f32,
        ]);
    }
    points.shuffle(&mut ChaCha8Rng::seed_from_u64(42));

    let mut clusterer = Clusterer::new(vec![
        ParamDesc::linear(0., 1.),
        ParamDesc::linear(0., 1.),
    ]);
    for (i, p) in points.iter().enumerate() {
        clusterer.add_sample(p, i as u32).unwrap();
    }
    clusterer.cluster_samples(&ClusterConfig::default());

    let root = clusterer.root().expect("tree was built");
    assert_eq!(clusterer.samples_in(root).count(), 60);
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if let Some((left, right)) = clusterer.cluster(id).children() {
            assert_eq!(
                clusterer.cluster(id).sample_count(),
                clusterer.cluster(left).sample_count() + clusterer.cluster(right).sample_count()
            );
            stack.push(left);
            stack.push(right);
        }
    }
}

/// Prototypes keep answering attribute queries after the clusterer that
/// produced them is gone.
#[test]
fn prototypes_outlive_the_clusterer() {
    let mut clusterer = Clusterer::new(vec![ParamDesc::linear(0., 1.)]);
    clusterer.add_sample(&[0.25], 0).unwrap();
    clusterer.add_sample(&[0.3], 1).unwrap();
    let prototypes = clusterer.cluster_samples(
        &ClusterConfig::default().with_style(ProtoStyle::Spherical).with_min_samples(0.),
    );
    drop(clusterer);

    assert!(!prototypes.is_empty());
    for proto in &prototypes {
        assert!(proto.mean(0) > 0.);
        assert!(proto.standard_deviation(0) >= 0.);
        assert!(proto.total_magnitude() > 0.);
    }
}
