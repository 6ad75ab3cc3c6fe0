//! Clusters and the arithmetic for merging them.
//!
//! Clusters live in an arena owned by the [`Clusterer`]; a [`ClusterId`] is
//! the handle everything else carries around. Leaves are the original
//! samples; interior nodes are merges whose mean is the sample-count
//! weighted average of their children, corrected for circular wraparound.
//!
//! [`Clusterer`]: crate::Clusterer

use serde::{Deserialize, Serialize};

use super::descriptor::ParamDesc;

/// Handle to a cluster in a [`Clusterer`]'s arena.
///
/// Ids are only meaningful against the `Clusterer` that issued them.
///
/// [`Clusterer`]: crate::Clusterer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub(crate) usize);

/// A node of the cluster tree: a single sample at the leaves, a merge of
/// two subtrees everywhere else.
#[derive(Debug)]
pub struct Cluster {
    /// Set once this cluster has been absorbed into a parent. Clustered
    /// nodes no longer participate in merging and are absent from the
    /// spatial index.
    pub(crate) clustered: bool,
    /// Set while an emitted prototype refers to this cluster.
    pub(crate) prototype: bool,
    /// Source character for leaves; `None` for interior nodes.
    pub(crate) char_id: Option<u32>,
    pub(crate) sample_count: u32,
    pub(crate) mean: Vec<f32>,
    pub(crate) left: Option<ClusterId>,
    pub(crate) right: Option<ClusterId>,
}

impl Cluster {
    /// A leaf holding one inserted sample.
    pub(crate) fn sample(mean: Vec<f32>, char_id: u32) -> Self {
        Cluster {
            clustered: false,
            prototype: false,
            char_id: Some(char_id),
            sample_count: 1,
            mean,
            left: None,
            right: None,
        }
    }

    /// An interior node merging `left` and `right`.
    pub(crate) fn merge(
        descs: &[ParamDesc],
        left_id: ClusterId,
        right_id: ClusterId,
        left: &Cluster,
        right: &Cluster,
    ) -> Self {
        Cluster {
            clustered: false,
            prototype: false,
            char_id: None,
            sample_count: left.sample_count + right.sample_count,
            mean: merged_mean(descs, left, right),
            left: Some(left_id),
            right: Some(right_id),
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    /// The source character of a leaf sample; interior nodes have none.
    pub fn char_id(&self) -> Option<u32> {
        self.char_id
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none()
    }

    /// Whether a prototype from the most recent extraction refers to this
    /// cluster.
    pub fn is_prototype(&self) -> bool {
        self.prototype
    }

    /// Left and right children of an interior node.
    pub fn children(&self) -> Option<(ClusterId, ClusterId)> {
        match (self.left, self.right) {
            (Some(left), Some(right)) => Some((left, right)),
            _ => None,
        }
    }
}

/// Sample-count weighted average of the two child means.
///
/// On a circular dimension the children may sit on opposite sides of the
/// seam; whichever child is more than half the range ahead is pulled back
/// by one full range before averaging, and a result that lands below the
/// dimension minimum is pushed back up into `[min, max)`.
fn merged_mean(descs: &[ParamDesc], left: &Cluster, right: &Cluster) -> Vec<f32> {
    let n_left = left.sample_count as f32;
    let n_right = right.sample_count as f32;
    let n = n_left + n_right;

    descs
        .iter()
        .enumerate()
        .map(|(i, desc)| {
            let l = left.mean[i];
            let r = right.mean[i];
            let mut mean = if desc.is_circular() && r - l > desc.half_range() {
                (n_left * l + n_right * (r - desc.range())) / n
            } else if desc.is_circular() && l - r > desc.half_range() {
                (n_left * (l - desc.range()) + n_right * r) / n
            } else {
                (n_left * l + n_right * r) / n
            };
            if desc.is_circular() && mean < desc.min() {
                mean += desc.range();
            }
            mean
        })
        .collect()
}

/// Depth-first iterator over the leaf samples beneath a cluster: always
/// descend left, stack the right siblings.
pub struct SampleIter<'a> {
    arena: &'a [Cluster],
    stack: Vec<ClusterId>,
}

impl<'a> SampleIter<'a> {
    pub(crate) fn new(arena: &'a [Cluster], root: ClusterId) -> Self {
        SampleIter {
            arena,
            stack: vec![root],
        }
    }
}

impl<'a> Iterator for SampleIter<'a> {
    type Item = &'a Cluster;

    fn next(&mut self) -> Option<&'a Cluster> {
        let mut id = self.stack.pop()?;
        loop {
            let cluster = &self.arena[id.0];
            match cluster.children() {
                Some((left, right)) => {
                    self.stack.push(right);
                    id = left;
                }
                None => return Some(cluster),
            }
        }
    }
}
