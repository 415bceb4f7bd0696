//! ## Searcher and Query Engine
//!
//! A searcher owns the per-thread query state: the best-bin-first frontier,
//! the per-point visited book that deduplicates leaf points across trees,
//! and the effort counters. Queries descend the most promising pending
//! partition first, pushing the sibling partition back onto the frontier
//! with a lower bound on the distance of anything it can still contain, and
//! stop as soon as no pending partition can improve the current k-best (or
//! the comparison budget runs out).

use tracing::debug;

use crate::distance::Scalar;
use crate::errors::KdForestError;
use crate::forest::KdForest;
use crate::heap::{heap_pop, heap_push, heap_update, HeapOrd};

/// A neighbor returned by a query: the dataset index of the point and its
/// distance to the query (squared under [`Distance::L2`]).
///
/// When a query returns fewer than `k` neighbors (dataset smaller than `k`),
/// the unfilled tail slots carry `index = None` and a NaN distance.
///
/// [`Distance::L2`]: crate::distance::Distance::L2
#[derive(Clone, Copy, Debug)]
pub struct Neighbor {
    /// Index of the neighbor in the indexed dataset, or `None` for an
    /// unfilled slot.
    pub index: Option<usize>,
    /// Distance to the query point.
    pub distance: f64,
}

impl Default for Neighbor {
    fn default() -> Self {
        Neighbor {
            index: None,
            distance: f64::NAN,
        }
    }
}

impl HeapOrd for Neighbor {
    // max-heap on distance: the worst accepted neighbor sits at the root
    fn heap_before(&self, other: &Self) -> bool {
        self.distance > other.distance
    }
}

/// Pending partition on the query frontier.
#[derive(Clone, Copy, Debug, Default)]
struct SearchState {
    tree: usize,
    node_index: usize,
    distance_lower_bound: f64,
}

impl HeapOrd for SearchState {
    fn heap_before(&self, other: &Self) -> bool {
        self.distance_lower_bound < other.distance_lower_bound
    }
}

/// Per-thread query state bound to a forest.
///
/// Searchers are independent: any number of them may query the same forest
/// concurrently from different threads. A searcher performs no allocation
/// during [`query`](Searcher::query); the frontier and the visited book are
/// sized once at creation.
pub struct Searcher<'f, 'a, T: Scalar> {
    forest: &'f KdForest<'a, T>,
    frontier: Vec<SearchState>,
    frontier_len: usize,
    /// Most recent search id that visited each point; bumping `search_id`
    /// invalidates every mark at once.
    id_book: Vec<u64>,
    search_id: u64,
    num_comparisons: usize,
    num_recursions: usize,
    num_simplifications: usize,
}

impl<'f, 'a, T: Scalar> Searcher<'f, 'a, T> {
    pub(crate) fn new(forest: &'f KdForest<'a, T>) -> Self {
        Searcher {
            forest,
            // a node enters the frontier at most once per query, so the
            // total node count over all trees is a safe capacity
            frontier: vec![SearchState::default(); forest.max_num_nodes],
            frontier_len: 0,
            id_book: vec![0; forest.num_data],
            search_id: 0,
            num_comparisons: 0,
            num_recursions: 0,
            num_simplifications: 0,
        }
    }

    /// Returns the forest this searcher queries.
    pub fn forest(&self) -> &'f KdForest<'a, T> {
        self.forest
    }

    /// Number of full-vector comparisons performed by the last query.
    pub fn num_comparisons(&self) -> usize {
        self.num_comparisons
    }

    /// Number of tree nodes visited by the last query.
    pub fn num_recursions(&self) -> usize {
        self.num_recursions
    }

    /// Number of times the last query stopped early because no pending
    /// partition could improve the result.
    pub fn num_simplifications(&self) -> usize {
        self.num_simplifications
    }

    /// Finds the `neighbors.len()` nearest neighbors of `point`.
    ///
    /// Fills `neighbors` ascending by distance and returns the number of
    /// full-vector comparisons performed. With a nonzero comparison budget
    /// on the forest the result may be approximate; unfilled tail slots (a
    /// dataset smaller than `neighbors.len()`) carry `index = None` and a
    /// NaN distance.
    ///
    /// # Errors
    ///
    /// Returns `KdForestError::EmptyNeighborBuffer` if `neighbors` is empty
    /// and `KdForestError::QueryDimensionMismatch` if `point` is not
    /// `dimension` scalars long.
    pub fn query(
        &mut self,
        neighbors: &mut [Neighbor],
        point: &[T],
    ) -> Result<usize, KdForestError> {
        if neighbors.is_empty() {
            return Err(KdForestError::EmptyNeighborBuffer);
        }
        if point.len() != self.forest.dimension {
            return Err(KdForestError::QueryDimensionMismatch {
                expected: self.forest.dimension,
                actual: point.len(),
            });
        }

        let max_num_comparisons = self.forest.search_max_num_comparisons;
        let exact = max_num_comparisons == 0;

        // differentiates this query's marks from every previous query's
        self.search_id += 1;
        self.num_comparisons = 0;
        self.num_recursions = 0;
        self.num_simplifications = 0;

        let mut num_added = 0;

        // seed the frontier with every tree root
        self.frontier_len = 0;
        for ti in 0..self.forest.num_trees {
            self.frontier[self.frontier_len] = SearchState {
                tree: ti,
                node_index: 0,
                distance_lower_bound: 0.0,
            };
            heap_push(&mut self.frontier, &mut self.frontier_len);
        }

        while exact || self.num_comparisons < max_num_comparisons {
            if self.frontier_len == 0 {
                break;
            }
            let slot = heap_pop(&mut self.frontier, &mut self.frontier_len);
            let state = self.frontier[slot];

            // no pending partition can beat the current worst-best
            if num_added == neighbors.len()
                && neighbors[0].distance < state.distance_lower_bound
            {
                self.num_simplifications += 1;
                break;
            }

            self.descend(state, neighbors, &mut num_added, point);
        }

        debug!(
            "Query done: {} comparisons over {} node visits, {} early stops",
            self.num_comparisons, self.num_recursions, self.num_simplifications
        );

        // drain the max-heap: each pop moves the current worst to the tail,
        // leaving the filled prefix ascending by distance
        let mut remaining = num_added;
        while remaining > 0 {
            heap_pop(neighbors, &mut remaining);
        }
        for slot in neighbors[num_added..].iter_mut() {
            *slot = Neighbor::default();
        }

        Ok(self.num_comparisons)
    }

    /// Walks from `state` down to a leaf, collecting leaf points into the
    /// neighbor heap and pushing each bypassed sibling partition onto the
    /// frontier with its distance lower bound.
    fn descend(
        &mut self,
        state: SearchState,
        neighbors: &mut [Neighbor],
        num_added: &mut usize,
        point: &[T],
    ) {
        let forest = self.forest;
        let tree = &forest.trees[state.tree];
        let distance = forest.distance;
        let max_num_comparisons = forest.search_max_num_comparisons;
        let dist = state.distance_lower_bound;
        let mut node_index = state.node_index;

        loop {
            self.num_recursions += 1;
            let node = &tree.nodes[node_index];

            if node.is_leaf() {
                let (begin, end) = node.leaf_range();
                for entry in &tree.data_index[begin..end] {
                    if max_num_comparisons != 0 && self.num_comparisons >= max_num_comparisons {
                        break;
                    }
                    let di = entry.index;

                    // the trees share the dataset; compare each point at
                    // most once per query
                    if self.id_book[di] == self.search_id {
                        continue;
                    }
                    self.id_book[di] = self.search_id;

                    let row = &forest.data[di * forest.dimension..(di + 1) * forest.dimension];
                    let point_distance = distance.between(point, row);
                    self.num_comparisons += 1;

                    if *num_added < neighbors.len() {
                        neighbors[*num_added] = Neighbor {
                            index: Some(di),
                            distance: point_distance,
                        };
                        heap_push(neighbors, num_added);
                    } else if neighbors[0].distance > point_distance {
                        neighbors[0] = Neighbor {
                            index: Some(di),
                            distance: point_distance,
                        };
                        heap_update(neighbors, *num_added, 0);
                    }
                }
                return;
            }

            let i = node.split_dimension;
            let x = point[i].widen();
            let x1 = node.lower_bound;
            let x2 = node.split_threshold;
            let x3 = node.upper_bound;

            // Lower bound for the partition not taken: the inherited bound
            // plus the gap to the threshold along this axis. When the query
            // lies outside the node's own interval, an ancestor already
            // charged this axis; replace its contribution with the tighter
            // gap to the interval edge.
            let mut save_dist = dist + distance.axis_gap(x - x2);
            let next_child;
            let save_child;
            if x <= x2 {
                next_child = node.lower_child;
                save_child = node.upper_child;
                if x <= x1 {
                    save_dist -= distance.axis_gap(x - x1);
                }
            } else {
                next_child = node.upper_child;
                save_child = node.lower_child;
                if x > x3 {
                    save_dist -= distance.axis_gap(x - x3);
                }
            }

            if *num_added < neighbors.len() || neighbors[0].distance > save_dist {
                self.frontier[self.frontier_len] = SearchState {
                    tree: state.tree,
                    node_index: save_child as usize,
                    distance_lower_bound: save_dist,
                };
                heap_push(&mut self.frontier, &mut self.frontier_len);
            }

            node_index = next_child as usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Distance;

    #[test]
    fn test_default_neighbor_is_sentinel() {
        let neighbor = Neighbor::default();
        assert_eq!(neighbor.index, None);
        assert!(neighbor.distance.is_nan());
    }

    #[test]
    fn test_query_argument_validation() {
        let data = [0.0_f64, 0.0, 1.0, 1.0];
        let mut forest = KdForest::new(2, 1, Distance::L2).unwrap();
        forest.build(&data).unwrap();
        let mut searcher = forest.new_searcher().unwrap();

        let mut empty: [Neighbor; 0] = [];
        assert!(matches!(
            searcher.query(&mut empty, &[0.0, 0.0]),
            Err(KdForestError::EmptyNeighborBuffer)
        ));

        let mut neighbors = [Neighbor::default(); 1];
        assert!(matches!(
            searcher.query(&mut neighbors, &[0.0]),
            Err(KdForestError::QueryDimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_each_point_compared_at_most_once_across_trees() {
        // many trees over few points: without the visited book the same
        // point would be compared once per tree
        let data = [0.0_f64, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut forest = KdForest::new(2, 8, Distance::L2).unwrap();
        forest.build(&data).unwrap();
        let mut searcher = forest.new_searcher().unwrap();

        let mut neighbors = [Neighbor::default(); 2];
        let comparisons = searcher.query(&mut neighbors, &[0.4, 0.4]).unwrap();
        assert!(comparisons <= 4);
    }

    #[test]
    fn test_counters_reset_between_queries() {
        let data = [0.0_f64, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let mut forest = KdForest::new(1, 2, Distance::L2).unwrap();
        forest.build(&data).unwrap();
        let mut searcher = forest.new_searcher().unwrap();

        let mut neighbors = [Neighbor::default(); 1];
        searcher.query(&mut neighbors, &[3.1]).unwrap();
        let first = searcher.num_comparisons();
        searcher.query(&mut neighbors, &[3.1]).unwrap();
        assert_eq!(searcher.num_comparisons(), first);
        assert!(searcher.num_recursions() > 0);
    }
}
