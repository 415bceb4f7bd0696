//! ## Randomized KD-tree Forest
//!
//! A forest indexes a borrowed, row-major dataset of `N` vectors with `T`
//! independently randomized KD-trees. With one tree the structure behaves as
//! a classic best-bin-first KD-tree; with several trees the randomized split
//! choice makes them diverse, which is what turns a comparison budget into a
//! useful approximate-nearest-neighbor knob. The forest never copies the
//! dataset, so the data must outlive it and must not change.
//!
//! ### Example
//!
//! ```
//! use kdforest::distance::Distance;
//! use kdforest::forest::KdForest;
//! use kdforest::search::Neighbor;
//!
//! // four 2-d points, row-major
//! let data: Vec<f64> = vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 3.0, 3.0];
//! let mut forest = KdForest::new(2, 2, Distance::L2).unwrap();
//! forest.build(&data).unwrap();
//!
//! let mut searcher = forest.new_searcher().unwrap();
//! let mut neighbors = [Neighbor::default(); 2];
//! searcher.query(&mut neighbors, &[0.1, 0.1]).unwrap();
//! assert_eq!(neighbors[0].index, Some(0));
//! ```

use rand::RngCore;
use tracing::info;

use crate::distance::{Distance, Scalar, ScalarType};
use crate::errors::KdForestError;
use crate::search::Searcher;
use crate::tree::{Tree, TreeBuilder};

/// How the split threshold of an internal node is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThresholdingMethod {
    /// Sample median of the split-axis coordinates (the default).
    #[default]
    Median,
    /// Sample mean, falling back to the median whenever the mean fails to
    /// separate the points.
    Mean,
}

/// A forest of randomized KD-trees over a borrowed dataset.
///
/// The dataset is a flat `&[T]` of `N * dimension` scalars in row-major
/// order. After [`build`](KdForest::build) the forest is immutable and may
/// be shared across threads; each thread queries through its own
/// [`Searcher`].
pub struct KdForest<'a, T: Scalar> {
    pub(crate) dimension: usize,
    pub(crate) num_trees: usize,
    pub(crate) distance: Distance,
    pub(crate) thresholding_method: ThresholdingMethod,
    pub(crate) search_max_num_comparisons: usize,
    pub(crate) data: &'a [T],
    pub(crate) num_data: usize,
    pub(crate) trees: Vec<Tree>,
    pub(crate) max_num_nodes: usize,
}

impl<'a, T: Scalar> KdForest<'a, T> {
    /// Creates a new, unbuilt forest.
    ///
    /// The thresholding method defaults to the median and the comparison
    /// budget to `0` (exact search).
    ///
    /// # Errors
    ///
    /// Returns `KdForestError::InvalidDimension` if `dimension` is zero and
    /// `KdForestError::InvalidNumTrees` if `num_trees` is zero.
    pub fn new(
        dimension: usize,
        num_trees: usize,
        distance: Distance,
    ) -> Result<Self, KdForestError> {
        if dimension == 0 {
            return Err(KdForestError::InvalidDimension { dimension });
        }
        if num_trees == 0 {
            return Err(KdForestError::InvalidNumTrees { num_trees });
        }
        Ok(KdForest {
            dimension,
            num_trees,
            distance,
            thresholding_method: ThresholdingMethod::default(),
            search_max_num_comparisons: 0,
            data: &[],
            num_data: 0,
            trees: Vec::new(),
            max_num_nodes: 0,
        })
    }

    /// Overrides the thresholding method.
    ///
    /// # Panics
    ///
    /// Panics if the forest has already been built; the method shapes the
    /// trees and cannot be changed afterwards.
    pub fn set_thresholding_method(&mut self, method: ThresholdingMethod) {
        assert!(
            !self.is_built(),
            "the thresholding method must be chosen before the forest is built"
        );
        self.thresholding_method = method;
    }

    /// Returns the thresholding method.
    pub fn thresholding_method(&self) -> ThresholdingMethod {
        self.thresholding_method
    }

    /// Sets the per-query comparison budget; `0` means unbounded (exact
    /// search). A nonzero budget bounds the number of full-vector distance
    /// computations per query, trading accuracy for time.
    pub fn set_max_num_comparisons(&mut self, n: usize) {
        self.search_max_num_comparisons = n;
    }

    /// Returns the per-query comparison budget (`0` = exact).
    pub fn max_num_comparisons(&self) -> usize {
        self.search_max_num_comparisons
    }

    /// Indexes `data`, building all trees and their node bounds.
    ///
    /// Equivalent to [`build_with_rng`](KdForest::build_with_rng) with the
    /// thread-local generator.
    ///
    /// # Errors
    ///
    /// Returns `KdForestError::InvalidDataShape` if `data` is empty or its
    /// length is not a multiple of the forest dimension.
    pub fn build(&mut self, data: &'a [T]) -> Result<(), KdForestError> {
        self.build_with_rng(data, &mut rand::rng())
    }

    /// Indexes `data` using the given random stream for the split-dimension
    /// choices, so a seeded generator reproduces the same forest.
    ///
    /// The dataset is borrowed, not copied, and must not change for the
    /// lifetime of the forest. Building again replaces the previous trees.
    ///
    /// # Errors
    ///
    /// Returns `KdForestError::InvalidDataShape` if `data` is empty or its
    /// length is not a multiple of the forest dimension.
    pub fn build_with_rng<R: RngCore + ?Sized>(
        &mut self,
        data: &'a [T],
        rng: &mut R,
    ) -> Result<(), KdForestError> {
        if data.is_empty() || data.len() % self.dimension != 0 {
            return Err(KdForestError::InvalidDataShape {
                len: data.len(),
                dimension: self.dimension,
            });
        }
        let num_data = data.len() / self.dimension;
        self.data = data;
        self.num_data = num_data;
        self.trees.clear();

        let mut builder = TreeBuilder::new(
            data,
            self.dimension,
            self.num_trees,
            self.thresholding_method,
            rng,
        );
        let mut max_num_nodes = 0;
        let mut bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); self.dimension];
        for ti in 0..self.num_trees {
            let mut tree = builder.build_tree(num_data);
            max_num_nodes += tree.num_used_nodes();

            bounds.fill((f64::NEG_INFINITY, f64::INFINITY));
            tree.calc_bounds_recursively(0, &mut bounds);

            info!(
                "Built tree {} of {}: {} nodes, depth {}",
                ti + 1,
                self.num_trees,
                tree.num_used_nodes(),
                tree.depth
            );
            self.trees.push(tree);
        }
        self.max_num_nodes = max_num_nodes;
        Ok(())
    }

    /// Creates a searcher bound to this forest. Any number of searchers may
    /// be alive at once, each running queries on its own thread.
    ///
    /// # Errors
    ///
    /// Returns `KdForestError::NotBuilt` if called before
    /// [`build`](KdForest::build).
    pub fn new_searcher(&self) -> Result<Searcher<'_, 'a, T>, KdForestError> {
        if !self.is_built() {
            return Err(KdForestError::NotBuilt);
        }
        Ok(Searcher::new(self))
    }

    /// Returns true once the forest has indexed a dataset.
    pub fn is_built(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Returns the dimensionality of the indexed vectors.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the number of trees in the forest.
    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    /// Returns the number of indexed points (zero before build).
    pub fn num_data(&self) -> usize {
        self.num_data
    }

    /// Returns the scalar element type of the indexed data.
    pub fn scalar_type(&self) -> ScalarType {
        T::TYPE
    }

    /// Returns the distance used to compare vectors.
    pub fn distance(&self) -> Distance {
        self.distance
    }

    /// Returns the observed depth of a tree.
    ///
    /// # Panics
    ///
    /// Panics if the forest is unbuilt or `tree_index >= num_trees()`.
    pub fn tree_depth(&self, tree_index: usize) -> usize {
        self.trees[tree_index].depth
    }

    /// Returns the number of used nodes of a tree.
    ///
    /// # Panics
    ///
    /// Panics if the forest is unbuilt or `tree_index >= num_trees()`.
    pub fn tree_num_nodes(&self, tree_index: usize) -> usize {
        self.trees[tree_index].num_used_nodes()
    }
}
