//! Shapes and the restricted broadcast resolver.
//!
//! A [`Shape`] is an immutable ordered list of dimension sizes. Rank 0 is a
//! scalar (one element). The broadcast rule implemented here is deliberately
//! narrow: a smaller operand participates in a binary operation only when its
//! flattened storage is an exact repeating tile of the output, which holds
//! when one shape is a trailing suffix of the other or one operand is a
//! scalar. Under that precondition the storage position of the smaller
//! operand for output position `i` is simply `i % count(smaller)`.
//!
//! This is *not* general per-axis NumPy broadcasting and is not meant to be;
//! shapes that repeat along a leading axis without the suffix property are
//! rejected at the call site.

use std::fmt;
use std::ops::Index;

/// Ordered sequence of dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// A rank-0 (scalar) shape.
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total element count: the product of all dimensions (1 for rank 0).
    pub fn count(&self) -> usize {
        self.dims.iter().product()
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Maps a position in a larger operand's flattened index space to a
    /// position in this shape's flattened storage.
    ///
    /// Only meaningful when this shape tiles the larger one (see module
    /// docs); the mapping is periodic with period `count()`.
    pub fn broadcast_index(&self, global: usize) -> usize {
        global % self.count()
    }

    /// True if `self` equals the trailing dimensions of `other`.
    pub fn is_suffix_of(&self, other: &Shape) -> bool {
        let r = self.rank();
        other.rank() >= r && other.dims[other.rank() - r..] == self.dims[..]
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self { dims }
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self { dims: dims.to_vec() }
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self { dims: dims.to_vec() }
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, axis: usize) -> &usize {
        &self.dims[axis]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

/// Resolved layout of a broadcasting binary operation.
///
/// `output` is the larger operand's shape; `lhs_count`/`rhs_count` are the
/// periods used to fold each operand's storage index out of the output index.
#[derive(Debug, Clone)]
pub struct BroadcastLayout {
    pub output: Shape,
    pub lhs_count: usize,
    pub rhs_count: usize,
}

/// Determines the output shape of a broadcasting binary op.
///
/// The operand with rank >= the other's rank determines the output shape;
/// ties go to the left operand.
///
/// # Panics
/// Panics if neither operand is a scalar and neither shape is a trailing
/// suffix of the other (broadcast infeasible under the restricted rule).
pub fn resolve_broadcast(lhs: &Shape, rhs: &Shape) -> BroadcastLayout {
    let compatible = lhs.rank() == 0
        || rhs.rank() == 0
        || lhs.is_suffix_of(rhs)
        || rhs.is_suffix_of(lhs);
    assert!(
        compatible,
        "cannot broadcast {lhs} with {rhs}: one shape must be a trailing suffix of the other, or a scalar"
    );

    let output = if lhs.rank() >= rhs.rank() { lhs.clone() } else { rhs.clone() };
    BroadcastLayout {
        output,
        lhs_count: lhs.count(),
        rhs_count: rhs.count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_and_rank() {
        let s = Shape::from(vec![2, 3, 4]);
        assert_eq!(s.rank(), 3);
        assert_eq!(s.count(), 24);
        assert_eq!(s[1], 3);
        assert_eq!(Shape::scalar().count(), 1);
    }

    #[test]
    fn broadcast_index_is_periodic() {
        let s = Shape::from(vec![3, 4]);
        for i in 0..48 {
            assert_eq!(s.broadcast_index(i), s.broadcast_index(i + 12));
        }
    }

    #[test]
    fn suffix_detection() {
        let big = Shape::from(vec![5, 3, 4]);
        assert!(Shape::from(vec![3, 4]).is_suffix_of(&big));
        assert!(Shape::from(vec![4]).is_suffix_of(&big));
        assert!(!Shape::from(vec![5, 3]).is_suffix_of(&big));
    }

    #[test]
    fn higher_rank_wins_ties_go_left() {
        let a = Shape::from(vec![2, 3]);
        let b = Shape::from(vec![3]);
        assert_eq!(resolve_broadcast(&a, &b).output, a);
        assert_eq!(resolve_broadcast(&b, &a).output, a);

        let c = Shape::from(vec![2, 3]);
        assert_eq!(resolve_broadcast(&a, &c).output, a);
    }

    #[test]
    fn incompatible_shapes_panic() {
        let a = Shape::from(vec![5, 3]);
        let b = Shape::from(vec![5, 4]);
        let result = std::panic::catch_unwind(|| resolve_broadcast(&a, &b));
        assert!(result.is_err());
    }
}
