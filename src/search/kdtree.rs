//! A k-d tree over feature vectors with per-dimension wraparound.
//!
//! The tree backs nearest-neighbor lookups during agglomerative merging, so
//! unlike a build-once index it supports interleaved inserts and deletes.
//! Distances are squared Euclidean with each circular dimension measured the
//! short way around.
//!
//! All traversals use explicit stacks; merge trees make for unbalanced
//! shapes and the call stack is not a safe place to put them.

use crate::core::descriptor::ParamDesc;

/// How a node was reached during a [`KdTree::walk`] traversal. Leaves are
/// reported exactly once; interior nodes once per traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VisitKind {
    Preorder,
    Inorder,
    Postorder,
    Leaf,
}

impl VisitKind {
    /// True for the visit kinds that report a node for the first time,
    /// i.e. exactly once per stored entry.
    pub fn is_first_visit(self) -> bool {
        matches!(self, VisitKind::Preorder | VisitKind::Leaf)
    }
}

#[derive(Debug)]
struct Node<P> {
    key: Vec<f32>,
    payload: P,
    left: Option<Box<Node<P>>>,
    right: Option<Box<Node<P>>>,
}

#[derive(Debug)]
pub(crate) struct KdTree<P> {
    descs: Vec<ParamDesc>,
    root: Option<Box<Node<P>>>,
    len: usize,
}

impl<P: Copy + PartialEq> KdTree<P> {
    pub fn new(descs: Vec<ParamDesc>) -> Self {
        KdTree {
            descs,
            root: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn dims(&self) -> usize {
        self.descs.len()
    }

    /// Squared Euclidean distance with circular correction per dimension.
    pub fn distance(&self, x: &[f32], y: &[f32]) -> f32 {
        self.descs
            .iter()
            .zip(x.iter().zip(y.iter()))
            .map(|(desc, (&a, &b))| {
                let d = desc.separation(a, b);
                d * d
            })
            .sum()
    }

    pub fn insert(&mut self, key: &[f32], payload: P) {
        debug_assert_eq!(key.len(), self.dims());
        let node = Box::new(Node {
            key: key.to_vec(),
            payload,
            left: None,
            right: None,
        });
        let dims = self.dims();
        insert_node(&mut self.root, 0, dims, node);
        self.len += 1;
    }

    /// Removes the entry holding exactly this `(key, payload)` pair.
    ///
    /// The node is located by retracing the insertion path (ties descend
    /// right on both paths, so they stay aligned), then its slot is rebuilt
    /// by re-inserting the survivors of its subtree.
    pub fn delete(&mut self, key: &[f32], payload: P) -> bool {
        let dims = self.dims();
        let mut link = &mut self.root;
        let mut axis = 0;
        loop {
            let found = match link.as_deref() {
                None => return false,
                Some(node) => node.payload == payload && node.key == key,
            };
            if found {
                break;
            }
            let node = link.as_mut().expect("checked non-empty above");
            link = if key[axis] < node.key[axis] {
                &mut node.left
            } else {
                &mut node.right
            };
            axis = (axis + 1) % dims;
        }
        let mut removed = link.take().expect("loop breaks on a match");

        let mut orphans = Vec::new();
        if let Some(left) = removed.left.take() {
            orphans.push(left);
        }
        if let Some(right) = removed.right.take() {
            orphans.push(right);
        }
        while let Some(mut node) = orphans.pop() {
            if let Some(left) = node.left.take() {
                orphans.push(left);
            }
            if let Some(right) = node.right.take() {
                orphans.push(right);
            }
            insert_node(link, axis, dims, node);
        }
        self.len -= 1;
        true
    }

    /// Visits every node, reporting the traversal position of each visit.
    /// Interior nodes are seen at their preorder, inorder and postorder
    /// positions; leaves are seen once.
    pub fn walk(&self, mut visitor: impl FnMut(P, VisitKind)) {
        let mut stack: Vec<(&Node<P>, u8)> = Vec::new();
        if let Some(root) = self.root.as_deref() {
            stack.push((root, 0));
        }
        while let Some((node, stage)) = stack.pop() {
            if node.left.is_none() && node.right.is_none() {
                visitor(node.payload, VisitKind::Leaf);
                continue;
            }
            match stage {
                0 => {
                    visitor(node.payload, VisitKind::Preorder);
                    stack.push((node, 1));
                    if let Some(left) = node.left.as_deref() {
                        stack.push((left, 0));
                    }
                }
                1 => {
                    visitor(node.payload, VisitKind::Inorder);
                    stack.push((node, 2));
                    if let Some(right) = node.right.as_deref() {
                        stack.push((right, 0));
                    }
                }
                _ => visitor(node.payload, VisitKind::Postorder),
            }
        }
    }

    /// Up to `k` stored entries closest to `query` within `max_distance`,
    /// sorted by ascending squared distance.
    ///
    /// Pruning by splitting plane only applies to non-circular axes: a
    /// linear plane does not bound the wraparound distance, so circular
    /// axes always descend both children.
    pub fn k_nearest(&self, query: &[f32], k: usize, max_distance: f32) -> Vec<(P, f32)> {
        let mut best: Vec<(P, f32)> = Vec::with_capacity(k + 1);
        if k == 0 {
            return best;
        }
        let mut stack: Vec<(&Node<P>, usize)> = Vec::new();
        if let Some(root) = self.root.as_deref() {
            stack.push((root, 0));
        }
        while let Some((node, axis)) = stack.pop() {
            let d = self.distance(query, &node.key);
            if d <= max_distance {
                let at = best.partition_point(|&(_, kept)| kept <= d);
                best.insert(at, (node.payload, d));
                best.truncate(k);
            }

            let worst = if best.len() == k {
                best[k - 1].1
            } else {
                max_distance
            };
            let next_axis = (axis + 1) % self.dims();
            let (near, far) = if query[axis] < node.key[axis] {
                (&node.left, &node.right)
            } else {
                (&node.right, &node.left)
            };
            if let Some(far) = far.as_deref() {
                let gap = query[axis] - node.key[axis];
                if self.descs[axis].is_circular() || gap * gap <= worst {
                    stack.push((far, next_axis));
                }
            }
            if let Some(near) = near.as_deref() {
                stack.push((near, next_axis));
            }
        }
        best
    }
}

fn insert_node<P>(mut link: &mut Option<Box<Node<P>>>, mut axis: usize, dims: usize, node: Box<Node<P>>) {
    loop {
        match link {
            None => {
                *link = Some(node);
                return;
            }
            Some(current) => {
                link = if node.key[axis] < current.key[axis] {
                    &mut current.left
                } else {
                    &mut current.right
                };
                axis = (axis + 1) % dims;
            }
        }
    }
}
