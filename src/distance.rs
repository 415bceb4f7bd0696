//! ## Scalar Types and Distance Kernels
//!
//! This module defines the scalar element types a forest can index (`f32` and
//! `f64`) and the vector distances used to compare points. Distances are
//! accumulated in `f64` regardless of the element type.

use std::fmt::Debug;

mod private {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Runtime tag for the scalar element type of a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    /// 32-bit floating point elements.
    F32,
    /// 64-bit floating point elements.
    F64,
}

/// Scalar element of an indexed vector.
///
/// This trait is sealed; it is implemented for `f32` and `f64` only.
pub trait Scalar: Copy + Debug + Send + Sync + private::Sealed + 'static {
    /// Runtime tag for this element type.
    const TYPE: ScalarType;
    /// Widens the scalar to `f64`.
    fn widen(self) -> f64;
}

impl Scalar for f32 {
    const TYPE: ScalarType = ScalarType::F32;
    fn widen(self) -> f64 {
        f64::from(self)
    }
}

impl Scalar for f64 {
    const TYPE: ScalarType = ScalarType::F64;
    fn widen(self) -> f64 {
        self
    }
}

/// Distance used to compare vectors.
///
/// `L2` reports *squared* Euclidean distances: the square root is monotone,
/// so nearest-neighbor ranking is unaffected and the root is left to the
/// caller. `L1` reports the sum of absolute coordinate differences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Distance {
    /// Manhattan distance.
    L1,
    /// Squared Euclidean distance.
    L2,
}

impl Distance {
    /// Computes the distance between two vectors of equal length.
    pub fn between<T: Scalar>(self, x: &[T], y: &[T]) -> f64 {
        debug_assert_eq!(x.len(), y.len());
        match self {
            Distance::L1 => x
                .iter()
                .zip(y.iter())
                .map(|(&a, &b)| (a.widen() - b.widen()).abs())
                .sum(),
            Distance::L2 => x
                .iter()
                .zip(y.iter())
                .map(|(&a, &b)| {
                    let d = a.widen() - b.widen();
                    d * d
                })
                .sum(),
        }
    }

    /// Contribution of a single-axis gap to a lower-bound distance in this
    /// metric. Must accumulate in the same units as [`Distance::between`].
    pub(crate) fn axis_gap(self, delta: f64) -> f64 {
        match self {
            Distance::L1 => delta.abs(),
            Distance::L2 => delta * delta,
        }
    }
}
