//! Agglomerative clustering and statistical prototype fitting for character
//! feature vectors.
//!
//! Training a character classifier starts with a pile of feature vectors,
//! each tagged with the character it was extracted from. This crate turns
//! that pile into a compact set of parametric *prototypes*:
//!
//! 1. Samples are merged bottom-up into a binary cluster tree, nearest
//!    neighbors first, with circular dimensions (angles) averaged the short
//!    way around.
//! 2. The tree is walked top-down; each cluster is either summarized as a
//!    spherical, elliptical or mixed-distribution prototype, or split into
//!    its children when its samples mix too many repeated characters, its
//!    dimensions are too correlated, or no candidate distribution survives
//!    a chi-squared goodness-of-fit test.
//!
//! The tree is built once per [`Clusterer`]; prototype extraction can be
//! re-run under different [`ClusterConfig`]s without re-training.
//!
//! ```
//! use protoclust::{ClusterConfig, Clusterer, ParamDesc, ProtoStyle};
//!
//! let mut clusterer = Clusterer::new(vec![
//!     ParamDesc::linear(0., 1.),
//!     ParamDesc::circular(0., 360.),
//! ]);
//! clusterer.add_sample(&[0.3, 15.], 0).unwrap();
//! clusterer.add_sample(&[0.7, 345.], 1).unwrap();
//!
//! let config = ClusterConfig::default().with_style(ProtoStyle::Spherical);
//! let prototypes = clusterer.cluster_samples(&config);
//! assert!(!prototypes.is_empty());
//! ```

mod core;
mod fit;
mod search;

pub mod constants;
pub mod utils;

pub use crate::core::cluster::{Cluster, ClusterId, SampleIter};
pub use crate::core::clusterer::{AlreadyClustered, Clusterer};
pub use crate::core::config::{ClusterConfig, ProtoStyle};
pub use crate::core::descriptor::ParamDesc;
pub use crate::core::prototype::Prototype;
pub use crate::fit::Distribution;
