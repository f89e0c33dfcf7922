//! A k-d tree over directory metadata.
//!
//! Each indexed directory contributes a 4-dimensional [`MetadataPoint`]
//! (size, modified time, created time, permission bits). The index answers
//! radius and k-nearest queries by squared Euclidean distance. It is read-only
//! once built; [`SpatialIndex::insert`] rebuilds the whole tree.

use crate::metadata::{Metadata, MetadataError};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Number of dimensions in a [`MetadataPoint`].
pub const DIMENSIONS: usize = 4;

/// A point in metadata space: `[size, modified, created, permissions]`.
///
/// Timestamps are unix seconds; a missing creation time maps to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetadataPoint(pub [f64; DIMENSIONS]);

impl MetadataPoint {
    pub fn new(size: u64, modified_secs: i64, created_secs: i64, permissions: u32) -> Self {
        Self([
            size as f64,
            modified_secs as f64,
            created_secs as f64,
            f64::from(permissions),
        ])
    }

    /// Projects validated metadata into metadata space.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self, MetadataError> {
        metadata.validate()?;
        let modified = metadata
            .modified_at
            .map(|t| t.timestamp())
            .ok_or(MetadataError::MissingModifiedTime)?;
        let created = metadata.created_at.map(|t| t.timestamp()).unwrap_or(0);
        Ok(Self::new(metadata.size, modified, created, metadata.permissions))
    }

    #[inline]
    pub fn distance_squared(&self, other: &MetadataPoint) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

#[derive(Debug, Clone)]
struct KdNode {
    entry: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Static k-d tree mapping points to caller-defined items.
#[derive(Debug, Clone)]
pub struct SpatialIndex<T> {
    entries: Vec<(MetadataPoint, T)>,
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

impl<T: Copy> SpatialIndex<T> {
    pub fn build(entries: Vec<(MetadataPoint, T)>) -> Self {
        let mut index = Self {
            entries,
            nodes: Vec::new(),
            root: None,
        };
        index.rebuild();
        index
    }

    /// Adds one entry and rebuilds the tree from scratch.
    pub fn insert(&mut self, point: MetadataPoint, item: T) {
        self.entries.push((point, item));
        self.rebuild();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rebuild(&mut self) {
        self.nodes.clear();
        self.nodes.reserve(self.entries.len());
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        self.root = self.build_subtree(&mut order, 0);
    }

    fn build_subtree(&mut self, order: &mut [usize], depth: usize) -> Option<usize> {
        if order.is_empty() {
            return None;
        }

        let axis = depth % DIMENSIONS;
        let median = order.len() / 2;
        {
            let entries = &self.entries;
            order.select_nth_unstable_by(median, |&a, &b| {
                entries[a].0.0[axis].total_cmp(&entries[b].0.0[axis])
            });
        }

        let slot = self.nodes.len();
        self.nodes.push(KdNode {
            entry: order[median],
            axis,
            left: None,
            right: None,
        });

        let (lower, rest) = order.split_at_mut(median);
        let upper = &mut rest[1..];
        let left = self.build_subtree(lower, depth + 1);
        let right = self.build_subtree(upper, depth + 1);
        self.nodes[slot].left = left;
        self.nodes[slot].right = right;
        Some(slot)
    }

    /// Returns every item within `radius` of `query`, nearest first.
    pub fn range_query(&self, query: &MetadataPoint, radius: f64) -> Vec<T> {
        if radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }
        let radius_sq = radius * radius;
        let mut hits = Vec::new();
        if let Some(root) = self.root {
            self.range_from(root, query, radius_sq, &mut hits);
        }
        hits.sort();
        hits.into_iter().map(|c| self.entries[c.entry].1).collect()
    }

    fn range_from(&self, slot: usize, query: &MetadataPoint, radius_sq: f64, hits: &mut Vec<Candidate>) {
        let node = &self.nodes[slot];
        let point = &self.entries[node.entry].0;
        let distance = query.distance_squared(point);
        if distance <= radius_sq {
            hits.push(Candidate {
                distance,
                entry: node.entry,
            });
        }

        let diff = query.0[node.axis] - point.0[node.axis];
        let (near, far) = if diff <= 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if let Some(near) = near {
            self.range_from(near, query, radius_sq, hits);
        }
        if diff * diff <= radius_sq {
            if let Some(far) = far {
                self.range_from(far, query, radius_sq, hits);
            }
        }
    }

    /// Returns the `k` items closest to `query`, nearest first.
    pub fn nearest_neighbors(&self, query: &MetadataPoint, k: usize) -> Vec<T> {
        if k == 0 {
            return Vec::new();
        }
        let mut best = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = self.root {
            self.nearest_from(root, query, k, &mut best);
        }
        best.into_sorted_vec()
            .into_iter()
            .map(|c| self.entries[c.entry].1)
            .collect()
    }

    fn nearest_from(
        &self,
        slot: usize,
        query: &MetadataPoint,
        k: usize,
        best: &mut BinaryHeap<Candidate>,
    ) {
        let node = &self.nodes[slot];
        let point = &self.entries[node.entry].0;
        let candidate = Candidate {
            distance: query.distance_squared(point),
            entry: node.entry,
        };
        if best.len() < k {
            best.push(candidate);
        } else if best.peek().is_some_and(|worst| candidate < *worst) {
            best.pop();
            best.push(candidate);
        }

        let diff = query.0[node.axis] - point.0[node.axis];
        let (near, far) = if diff <= 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if let Some(near) = near {
            self.nearest_from(near, query, k, best);
        }
        let must_visit_far = best.len() < k
            || best.peek().is_some_and(|worst| diff * diff <= worst.distance);
        if must_visit_far {
            if let Some(far) = far {
                self.nearest_from(far, query, k, best);
            }
        }
    }
}

/// Heap entry ordered by distance, then by insertion order for ties.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    entry: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.entry.cmp(&other.entry))
    }
}
