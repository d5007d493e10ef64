//! Index functions: composable maps from index tuples to element offsets
//!
//! An index function describes how a multi-dimensional index is turned
//! into a linear element offset into a one-dimensional memory block. It is
//! a small term language; passes compose terms rather than computing
//! strides eagerly, so that structural queries (`is_direct`,
//! `linear_with_offset`, `rearrange_with_offset`) stay exact.
//!
//! Offsets are counted in *elements*; the code generator multiplies by the
//! element size.

use crate::ir::prim::PrimValue;
use crate::ir::types::SubExp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An index function term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IxFun {
    /// Row-major layout over the given (base) shape with zero offset
    Iota(Vec<SubExp>),
    /// The underlying function shifted by a linear element offset
    Offset(Box<IxFun>, SubExp),
    /// The underlying function with result dimensions permuted
    Permute(Box<IxFun>, Vec<usize>),
    /// The underlying function viewed through a different shape; element
    /// count must be preserved
    Reshape(Box<IxFun>, Vec<SubExp>),
    /// The underlying function with the leading indices fixed
    Index(Box<IxFun>, Vec<SubExp>),
}

impl IxFun {
    /// A direct row-major function over `shape`
    pub fn iota(shape: Vec<SubExp>) -> IxFun {
        IxFun::Iota(shape)
    }

    /// Shift by a linear element offset
    pub fn offset(self, off: SubExp) -> IxFun {
        IxFun::Offset(Box::new(self), off)
    }

    /// Permute result dimensions; `perm` must be a permutation of the rank
    pub fn permute(self, perm: Vec<usize>) -> IxFun {
        IxFun::Permute(Box::new(self), perm)
    }

    /// View through a new shape
    pub fn reshape(self, shape: Vec<SubExp>) -> IxFun {
        IxFun::Reshape(Box::new(self), shape)
    }

    /// Fix the leading `idxs.len()` indices
    pub fn index(self, idxs: Vec<SubExp>) -> IxFun {
        IxFun::Index(Box::new(self), idxs)
    }

    /// The result shape
    pub fn shape(&self) -> Vec<SubExp> {
        match self {
            IxFun::Iota(shape) => shape.clone(),
            IxFun::Offset(base, _) => base.shape(),
            IxFun::Permute(base, perm) => {
                let s = base.shape();
                perm.iter().map(|&i| s[i].clone()).collect()
            }
            IxFun::Reshape(_, shape) => shape.clone(),
            IxFun::Index(base, idxs) => base.shape().split_off(idxs.len()),
        }
    }

    /// The shape of the underlying base block
    pub fn base_shape(&self) -> Vec<SubExp> {
        match self {
            IxFun::Iota(shape) => shape.clone(),
            IxFun::Offset(base, _)
            | IxFun::Permute(base, _)
            | IxFun::Reshape(base, _)
            | IxFun::Index(base, _) => base.base_shape(),
        }
    }

    /// The result rank
    pub fn rank(&self) -> usize {
        match self {
            IxFun::Iota(shape) => shape.len(),
            IxFun::Offset(base, _) => base.rank(),
            IxFun::Permute(_, perm) => perm.len(),
            IxFun::Reshape(_, shape) => shape.len(),
            IxFun::Index(base, idxs) => base.rank() - idxs.len(),
        }
    }

    /// Row-major with zero offset?
    pub fn is_direct(&self) -> bool {
        match self {
            IxFun::Iota(_) => true,
            IxFun::Offset(base, off) => off.is_zero() && base.is_direct(),
            IxFun::Reshape(base, _) => base.is_direct(),
            IxFun::Permute(base, perm) => {
                perm.iter().enumerate().all(|(i, &p)| i == p) && base.is_direct()
            }
            IxFun::Index(_, _) => false,
        }
    }

    /// The linear element offset, if the layout is a contiguous row-major
    /// slice of its base.
    ///
    /// Returns `None` when the layout is not contiguous row-major, and
    /// also when the offset exists but is not representable as a single
    /// sub-expression (two symbolic offsets cannot be combined without
    /// emitting arithmetic; callers that need that emit it themselves).
    pub fn linear_with_offset(&self) -> Option<SubExp> {
        match self {
            IxFun::Iota(_) => Some(SubExp::int32(0)),
            IxFun::Offset(base, off) => {
                let inner = base.linear_with_offset()?;
                add_offsets(&inner, off)
            }
            IxFun::Reshape(base, _) => base.linear_with_offset(),
            IxFun::Permute(base, perm) => {
                if perm.iter().enumerate().all(|(i, &p)| i == p) {
                    base.linear_with_offset()
                } else {
                    None
                }
            }
            IxFun::Index(_, _) => None,
        }
    }

    /// Offset plus permutation for a transposed-but-otherwise-contiguous
    /// view of the base.
    pub fn rearrange_with_offset(&self) -> Option<(SubExp, Vec<usize>)> {
        match self {
            IxFun::Permute(base, perm) => {
                let off = base.linear_with_offset()?;
                Some((off, perm.clone()))
            }
            _ => {
                let off = self.linear_with_offset()?;
                Some((off, (0..self.rank()).collect()))
            }
        }
    }
}

/// Add two element offsets when the sum is representable without emitting
/// arithmetic: either side zero, or both constant.
fn add_offsets(a: &SubExp, b: &SubExp) -> Option<SubExp> {
    if a.is_zero() {
        return Some(b.clone());
    }
    if b.is_zero() {
        return Some(a.clone());
    }
    match (a.constant(), b.constant()) {
        (Some(PrimValue::Int(x)), Some(PrimValue::Int(y))) => Some(SubExp::Constant(
            PrimValue::Int(crate::ir::prim::IntValue::from_i64(
                x.int_type(),
                x.as_i64().wrapping_add(y.as_i64()),
            )),
        )),
        _ => None,
    }
}

impl fmt::Display for IxFun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IxFun::Iota(shape) => {
                write!(f, "iota(")?;
                for (i, d) in shape.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, ")")
            }
            IxFun::Offset(base, off) => write!(f, "offset({}, {})", base, off),
            IxFun::Permute(base, perm) => write!(f, "permute({}, {:?})", base, perm),
            IxFun::Reshape(base, shape) => {
                write!(f, "reshape({}, [", base)?;
                for (i, d) in shape.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "])")
            }
            IxFun::Index(base, idxs) => {
                write!(f, "index({}, [", base)?;
                for (i, d) in idxs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "])")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(v: i32) -> SubExp {
        SubExp::int32(v)
    }

    #[test]
    fn test_iota_is_direct() {
        let ix = IxFun::iota(vec![c(10), c(20)]);
        assert!(ix.is_direct());
        assert_eq!(ix.linear_with_offset(), Some(c(0)));
    }

    #[test]
    fn test_offset_breaks_directness_but_stays_linear() {
        let ix = IxFun::iota(vec![c(10)]).offset(c(5));
        assert!(!ix.is_direct());
        assert_eq!(ix.linear_with_offset(), Some(c(5)));
    }

    #[test]
    fn test_constant_offsets_combine() {
        let ix = IxFun::iota(vec![c(10)]).offset(c(3)).offset(c(4));
        assert_eq!(ix.linear_with_offset(), Some(c(7)));
    }

    #[test]
    fn test_permute_is_not_linear() {
        let ix = IxFun::iota(vec![c(10), c(20)]).permute(vec![1, 0]);
        assert_eq!(ix.linear_with_offset(), None);
        let (off, perm) = ix.rearrange_with_offset().unwrap();
        assert_eq!(off, c(0));
        assert_eq!(perm, vec![1, 0]);
    }

    #[test]
    fn test_identity_permute_stays_direct() {
        let ix = IxFun::iota(vec![c(10), c(20)]).permute(vec![0, 1]);
        assert!(ix.is_direct());
    }

    #[test]
    fn test_permute_shape() {
        let ix = IxFun::iota(vec![c(10), c(20)]).permute(vec![1, 0]);
        assert_eq!(ix.shape(), vec![c(20), c(10)]);
        assert_eq!(ix.base_shape(), vec![c(10), c(20)]);
    }

    #[test]
    fn test_reshape_of_direct_is_direct() {
        let ix = IxFun::iota(vec![c(10), c(20)]).reshape(vec![c(200)]);
        assert!(ix.is_direct());
        assert_eq!(ix.rank(), 1);
    }

    #[test]
    fn test_index_fixes_leading_dims() {
        let ix = IxFun::iota(vec![c(10), c(20)]).index(vec![c(3)]);
        assert_eq!(ix.rank(), 1);
        assert_eq!(ix.shape(), vec![c(20)]);
        assert_eq!(ix.linear_with_offset(), None);
    }
}
