//! ## Tree Arena and Builder
//!
//! A tree owns a flat arena of nodes and a permutation of the dataset
//! indices. Building recursively partitions a slice of that permutation:
//! the splitting dimension is drawn uniformly at random among the
//! highest-variance dimensions, the threshold is the sample mean or median
//! of the slice along that dimension, and slices that cannot be split
//! become leaves. A second, post-build traversal assigns every node the
//! axis interval implied by its ancestors' thresholds, which the query
//! engine needs for its lower-bound arithmetic.

use ordered_float::OrderedFloat;
use rand::RngCore;

use crate::distance::Scalar;
use crate::forest::ThresholdingMethod;
use crate::heap::{heap_push, heap_update, HeapOrd};

/// Number of top-variance split candidates kept while choosing a dimension.
pub(crate) const SPLIT_HEAP_CAPACITY: usize = 5;

/// Fixed-size node record of the arena.
///
/// Children are signed: negative values mark a leaf, whose two child fields
/// then encode a half-open range into the tree's permutation as
/// `begin = -lower_child - 1`, `end = -upper_child - 1`. The offset keeps
/// `begin == 0` distinguishable from an internal child index.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Node {
    pub(crate) parent: usize,
    pub(crate) lower_child: isize,
    pub(crate) upper_child: isize,
    pub(crate) split_dimension: usize,
    pub(crate) split_threshold: f64,
    pub(crate) lower_bound: f64,
    pub(crate) upper_bound: f64,
}

impl Node {
    pub(crate) fn is_leaf(&self) -> bool {
        self.lower_child < 0
    }

    /// Permutation range covered by this leaf.
    pub(crate) fn leaf_range(&self) -> (usize, usize) {
        debug_assert!(self.lower_child < 0 && self.upper_child < 0);
        ((-self.lower_child - 1) as usize, (-self.upper_child - 1) as usize)
    }
}

/// Permutation entry; `value` holds the split-axis coordinate of the entry's
/// point while a slice is being sorted.
#[derive(Clone, Copy, Debug)]
pub(crate) struct IndexEntry {
    pub(crate) index: usize,
    pub(crate) value: f64,
}

/// Split-dimension candidate; the heap keeps the smallest variance among the
/// retained candidates at its root so a better candidate can replace it.
#[derive(Clone, Copy, Debug)]
struct SplitCandidate {
    dimension: usize,
    mean: f64,
    variance: f64,
}

impl HeapOrd for SplitCandidate {
    fn heap_before(&self, other: &Self) -> bool {
        self.variance < other.variance
    }
}

/// One KD-tree of a forest: node arena, dataset permutation, observed depth.
#[derive(Debug)]
pub(crate) struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) data_index: Vec<IndexEntry>,
    pub(crate) depth: usize,
}

impl Tree {
    fn with_num_data(num_data: usize) -> Self {
        Tree {
            // a binary tree with at most num_data leaves has at most
            // 2 * num_data - 1 nodes
            nodes: Vec::with_capacity(2 * num_data - 1),
            data_index: (0..num_data).map(|index| IndexEntry { index, value: 0.0 }).collect(),
            depth: 0,
        }
    }

    pub(crate) fn num_used_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Allocates a fresh node from the arena and returns its index.
    fn node_new(&mut self, parent: usize) -> usize {
        debug_assert!(self.nodes.len() < self.nodes.capacity());
        let node_index = self.nodes.len();
        self.nodes.push(Node {
            parent,
            lower_child: 0,
            upper_child: 0,
            split_dimension: 0,
            split_threshold: 0.0,
            lower_bound: 0.0,
            upper_bound: 0.0,
        });
        node_index
    }

    /// Turns `node_index` into a leaf covering `[begin, end)`.
    fn make_leaf(&mut self, node_index: usize, begin: usize, end: usize, depth: usize) {
        let node = &mut self.nodes[node_index];
        node.lower_child = -(begin as isize) - 1;
        node.upper_child = -(end as isize) - 1;
        if self.depth < depth {
            self.depth = depth;
        }
    }

    /// Assigns every node the axis interval implied by its ancestors'
    /// thresholds. `bounds` holds one `(lower, upper)` pair per dimension,
    /// `(-inf, +inf)` on entry at the root; each pair is narrowed on the way
    /// down and restored on the way back up.
    pub(crate) fn calc_bounds_recursively(
        &mut self,
        node_index: usize,
        bounds: &mut [(f64, f64)],
    ) {
        let (i, t, lower_child, upper_child) = {
            let node = &mut self.nodes[node_index];
            let i = node.split_dimension;
            node.lower_bound = bounds[i].0;
            node.upper_bound = bounds[i].1;
            (i, node.split_threshold, node.lower_child, node.upper_child)
        };

        if lower_child > 0 {
            let saved = bounds[i].1;
            bounds[i].1 = t;
            self.calc_bounds_recursively(lower_child as usize, bounds);
            bounds[i].1 = saved;
        }
        if upper_child > 0 {
            let saved = bounds[i].0;
            bounds[i].0 = t;
            self.calc_bounds_recursively(upper_child as usize, bounds);
            bounds[i].0 = saved;
        }
    }
}

/// Build-time state shared by all trees of one forest: the dataset, the
/// split-candidate heap, and the injected random stream.
pub(crate) struct TreeBuilder<'d, 'r, T, R: ?Sized> {
    data: &'d [T],
    dimension: usize,
    method: ThresholdingMethod,
    split_heap: Vec<SplitCandidate>,
    split_heap_capacity: usize,
    rng: &'r mut R,
}

impl<'d, 'r, T: Scalar, R: RngCore + ?Sized> TreeBuilder<'d, 'r, T, R> {
    pub(crate) fn new(
        data: &'d [T],
        dimension: usize,
        num_trees: usize,
        method: ThresholdingMethod,
        rng: &'r mut R,
    ) -> Self {
        let split_heap_capacity = num_trees.min(SPLIT_HEAP_CAPACITY);
        TreeBuilder {
            data,
            dimension,
            method,
            split_heap: Vec::with_capacity(split_heap_capacity),
            split_heap_capacity,
            rng,
        }
    }

    fn datum(&self, di: usize, d: usize) -> f64 {
        self.data[di * self.dimension + d].widen()
    }

    pub(crate) fn build_tree(&mut self, num_data: usize) -> Tree {
        let mut tree = Tree::with_num_data(num_data);
        let root = tree.node_new(0);
        self.build_recursively(&mut tree, root, 0, num_data, 0);
        tree
    }

    fn build_recursively(
        &mut self,
        tree: &mut Tree,
        node_index: usize,
        begin: usize,
        end: usize,
        depth: usize,
    ) {
        // base case: a single data point
        if end - begin <= 1 {
            tree.make_leaf(node_index, begin, end, depth);
            return;
        }

        // keep the highest-variance dimensions as split candidates
        let num_points = (end - begin) as f64;
        self.split_heap.clear();
        let mut heap_count = 0;
        for d in 0..self.dimension {
            let mut mean = 0.0;
            let mut second_moment = 0.0;
            for entry in &tree.data_index[begin..end] {
                let datum = self.datum(entry.index, d);
                mean += datum;
                second_moment += datum * datum;
            }
            mean /= num_points;
            second_moment /= num_points;
            let variance = second_moment - mean * mean;

            if variance == 0.0 {
                continue;
            }

            let candidate = SplitCandidate { dimension: d, mean, variance };
            if heap_count < self.split_heap_capacity {
                self.split_heap.push(candidate);
                heap_push(&mut self.split_heap, &mut heap_count);
            } else if self.split_heap[0].variance < variance {
                self.split_heap[0] = candidate;
                heap_update(&mut self.split_heap, heap_count, 0);
            }
        }

        // additional base case: every dimension is numerically constant
        if heap_count == 0 {
            tree.make_leaf(node_index, begin, end, depth);
            return;
        }

        // toss a dice among the retained candidates
        let pick = self.rng.next_u32() as usize % self.split_heap_capacity.min(heap_count);
        let chosen = self.split_heap[pick];
        tree.nodes[node_index].split_dimension = chosen.dimension;

        // sort the slice along the chosen dimension
        for entry in &mut tree.data_index[begin..end] {
            entry.value = self.data[entry.index * self.dimension + chosen.dimension].widen();
        }
        tree.data_index[begin..end].sort_unstable_by_key(|entry| OrderedFloat(entry.value));

        let (split_index, threshold) =
            choose_threshold(&tree.data_index, begin, end, self.method, chosen.mean);
        tree.nodes[node_index].split_threshold = threshold;

        let lower_child = tree.node_new(node_index);
        tree.nodes[node_index].lower_child = lower_child as isize;
        self.build_recursively(tree, lower_child, begin, split_index + 1, depth + 1);

        let upper_child = tree.node_new(node_index);
        tree.nodes[node_index].upper_child = upper_child as isize;
        self.build_recursively(tree, upper_child, split_index + 1, end, depth + 1);
    }
}

/// Picks the split position and threshold for a sorted slice.
///
/// Mean mode uses the sample mean when it leaves at least one point on each
/// side. When every point lands on one side (all values equal up to
/// floating-point noise that slipped past the zero-variance test, with the
/// mean rounding outside the value range) it falls back to the median. The
/// lower median keeps `|lower| <= |upper| + 1` for even slices.
fn choose_threshold(
    data_index: &[IndexEntry],
    begin: usize,
    end: usize,
    method: ThresholdingMethod,
    mean: f64,
) -> (usize, f64) {
    if method == ThresholdingMethod::Mean {
        let mut first_upper = begin;
        while first_upper < end && data_index[first_upper].value <= mean {
            first_upper += 1;
        }
        if first_upper > begin && first_upper < end {
            return (first_upper - 1, mean);
        }
    }
    let median = (begin + end - 1) / 2;
    (median, data_index[median].value)
}
