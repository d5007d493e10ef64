//! Types, shapes, and uniqueness annotations
//!
//! Every IR value has a type in the lattice scalar / array / memory. Array
//! shapes are sequences of sub-expressions; in function-return and branch
//! types the dimensions may be existential (`Ext i`), to be instantiated by
//! a shape context at the use site.

use crate::ir::prim::{PrimType, PrimValue};
use crate::names::VName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A sub-expression: a constant or a variable reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubExp {
    Constant(PrimValue),
    Var(VName),
}

impl SubExp {
    /// Shorthand for an i32 constant, the canonical size type
    pub fn int32(v: i32) -> SubExp {
        SubExp::Constant(PrimValue::int32(v))
    }

    /// The variable, if this is one
    pub fn var(&self) -> Option<&VName> {
        match self {
            SubExp::Var(v) => Some(v),
            SubExp::Constant(_) => None,
        }
    }

    /// The constant, if this is one
    pub fn constant(&self) -> Option<PrimValue> {
        match self {
            SubExp::Constant(v) => Some(*v),
            SubExp::Var(_) => None,
        }
    }

    /// Is this the constant zero?
    pub fn is_zero(&self) -> bool {
        self.constant().map(PrimValue::is_zero).unwrap_or(false)
    }

    /// Is this the constant one?
    pub fn is_one(&self) -> bool {
        self.constant().map(PrimValue::is_one).unwrap_or(false)
    }
}

impl From<VName> for SubExp {
    fn from(v: VName) -> Self {
        SubExp::Var(v)
    }
}

impl From<PrimValue> for SubExp {
    fn from(v: PrimValue) -> Self {
        SubExp::Constant(v)
    }
}

impl fmt::Display for SubExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubExp::Constant(v) => write!(f, "{}", v),
            SubExp::Var(v) => write!(f, "{}", v),
        }
    }
}

/// A fully known array shape: outermost dimension first
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<SubExp>,
}

impl Shape {
    pub fn new(dims: Vec<SubExp>) -> Self {
        Self { dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The outermost dimension
    pub fn outer_dim(&self) -> Option<&SubExp> {
        self.dims.first()
    }

    /// Drop the outermost dimension
    pub fn strip_outer(&self) -> Shape {
        Shape::new(self.dims.iter().skip(1).cloned().collect())
    }

    /// Prepend a dimension
    pub fn with_outer(&self, d: SubExp) -> Shape {
        let mut dims = Vec::with_capacity(self.rank() + 1);
        dims.push(d);
        dims.extend(self.dims.iter().cloned());
        Shape::new(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.dims {
            write!(f, "[{}]", d)?;
        }
        Ok(())
    }
}

/// One dimension of an existential shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtDim {
    /// A known size
    Free(SubExp),
    /// The `i`-th existential, bound by a position in the shape context
    Ext(usize),
}

impl fmt::Display for ExtDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtDim::Free(se) => write!(f, "{}", se),
            ExtDim::Ext(i) => write!(f, "?{}", i),
        }
    }
}

/// A possibly-existential shape
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtShape {
    pub dims: Vec<ExtDim>,
}

impl ExtShape {
    pub fn new(dims: Vec<ExtDim>) -> Self {
        Self { dims }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// All existential indices mentioned, in order of appearance
    pub fn ext_indices(&self) -> Vec<usize> {
        self.dims
            .iter()
            .filter_map(|d| match d {
                ExtDim::Ext(i) => Some(*i),
                ExtDim::Free(_) => None,
            })
            .collect()
    }
}

impl From<Shape> for ExtShape {
    fn from(s: Shape) -> Self {
        ExtShape::new(s.dims.into_iter().map(ExtDim::Free).collect())
    }
}

impl fmt::Display for ExtShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.dims {
            write!(f, "[{}]", d)?;
        }
        Ok(())
    }
}

/// Uniqueness annotation; only unique arrays may be consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Uniqueness {
    Unique,
    #[default]
    Nonunique,
}

impl fmt::Display for Uniqueness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uniqueness::Unique => write!(f, "*"),
            Uniqueness::Nonunique => Ok(()),
        }
    }
}

/// How a function uses an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diet {
    /// The argument is consumed; the caller may not use it afterwards
    Consume,
    /// The argument is only read
    Observe,
}

/// Address space of a memory block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Space {
    /// Host-side default space
    #[default]
    Default,
    /// Device global memory (inside kernels)
    Global,
    /// Workgroup-local memory (reduce accumulators)
    Local,
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Space::Default => write!(f, "default"),
            Space::Global => write!(f, "global"),
            Space::Local => write!(f, "local"),
        }
    }
}

/// A value type with fully known shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Prim(PrimType),
    Array {
        elem: PrimType,
        shape: Shape,
        uniqueness: Uniqueness,
    },
    Mem {
        size: SubExp,
        space: Space,
    },
}

impl Type {
    /// A nonunique array type
    pub fn array(elem: PrimType, dims: Vec<SubExp>) -> Type {
        Type::Array {
            elem,
            shape: Shape::new(dims),
            uniqueness: Uniqueness::Nonunique,
        }
    }

    /// A unique array type
    pub fn unique_array(elem: PrimType, dims: Vec<SubExp>) -> Type {
        Type::Array {
            elem,
            shape: Shape::new(dims),
            uniqueness: Uniqueness::Unique,
        }
    }

    /// Number of array dimensions (zero for scalars and memory)
    pub fn rank(&self) -> usize {
        match self {
            Type::Array { shape, .. } => shape.rank(),
            _ => 0,
        }
    }

    /// The element type of an array, or the scalar type itself
    pub fn elem_type(&self) -> Option<PrimType> {
        match self {
            Type::Prim(pt) => Some(*pt),
            Type::Array { elem, .. } => Some(*elem),
            Type::Mem { .. } => None,
        }
    }

    /// The shape, when this is an array
    pub fn shape(&self) -> Option<&Shape> {
        match self {
            Type::Array { shape, .. } => Some(shape),
            _ => None,
        }
    }

    /// Is this type unique?
    pub fn unique(&self) -> bool {
        matches!(
            self,
            Type::Array {
                uniqueness: Uniqueness::Unique,
                ..
            }
        )
    }

    /// The same type with the given uniqueness (no-op on scalars/memory)
    pub fn with_uniqueness(&self, u: Uniqueness) -> Type {
        match self {
            Type::Array { elem, shape, .. } => Type::Array {
                elem: *elem,
                shape: shape.clone(),
                uniqueness: u,
            },
            other => other.clone(),
        }
    }

    /// Peel off the outermost array dimension
    pub fn row_type(&self) -> Option<Type> {
        match self {
            Type::Array {
                elem,
                shape,
                uniqueness,
            } if shape.rank() > 1 => Some(Type::Array {
                elem: *elem,
                shape: shape.strip_outer(),
                uniqueness: *uniqueness,
            }),
            Type::Array { elem, shape, .. } if shape.rank() == 1 => Some(Type::Prim(*elem)),
            _ => None,
        }
    }

    /// Add an outer dimension of the given size
    pub fn array_of(&self, d: SubExp) -> Option<Type> {
        match self {
            Type::Prim(pt) => Some(Type::array(*pt, vec![d])),
            Type::Array {
                elem,
                shape,
                uniqueness,
            } => Some(Type::Array {
                elem: *elem,
                shape: shape.with_outer(d),
                uniqueness: *uniqueness,
            }),
            Type::Mem { .. } => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prim(pt) => write!(f, "{}", pt),
            Type::Array {
                elem,
                shape,
                uniqueness,
            } => write!(f, "{}{}{}", uniqueness, shape, elem),
            Type::Mem { size, space } => write!(f, "mem({})@{}", size, space),
        }
    }
}

/// A value type whose shape may contain existentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtType {
    Prim(PrimType),
    Array {
        elem: PrimType,
        shape: ExtShape,
        uniqueness: Uniqueness,
    },
    Mem {
        size: ExtDim,
        space: Space,
    },
}

impl ExtType {
    /// Number of array dimensions
    pub fn rank(&self) -> usize {
        match self {
            ExtType::Array { shape, .. } => shape.rank(),
            _ => 0,
        }
    }

    /// All existential indices in this type
    pub fn ext_indices(&self) -> Vec<usize> {
        match self {
            ExtType::Array { shape, .. } => shape.ext_indices(),
            ExtType::Mem {
                size: ExtDim::Ext(i),
                ..
            } => vec![*i],
            _ => Vec::new(),
        }
    }

    /// Does this type mention any existential?
    pub fn has_ext(&self) -> bool {
        !self.ext_indices().is_empty()
    }

    /// Instantiate existentials from a shape context.
    ///
    /// `ctx[i]` supplies the value for `Ext i`. Returns `None` if some
    /// existential is out of range.
    pub fn instantiate(&self, ctx: &[SubExp]) -> Option<Type> {
        match self {
            ExtType::Prim(pt) => Some(Type::Prim(*pt)),
            ExtType::Array {
                elem,
                shape,
                uniqueness,
            } => {
                let mut dims = Vec::with_capacity(shape.rank());
                for d in &shape.dims {
                    match d {
                        ExtDim::Free(se) => dims.push(se.clone()),
                        ExtDim::Ext(i) => dims.push(ctx.get(*i)?.clone()),
                    }
                }
                Some(Type::Array {
                    elem: *elem,
                    shape: Shape::new(dims),
                    uniqueness: *uniqueness,
                })
            }
            ExtType::Mem { size, space } => {
                let size = match size {
                    ExtDim::Free(se) => se.clone(),
                    ExtDim::Ext(i) => ctx.get(*i)?.clone(),
                };
                Some(Type::Mem {
                    size,
                    space: *space,
                })
            }
        }
    }
}

impl From<Type> for ExtType {
    fn from(t: Type) -> Self {
        match t {
            Type::Prim(pt) => ExtType::Prim(pt),
            Type::Array {
                elem,
                shape,
                uniqueness,
            } => ExtType::Array {
                elem,
                shape: shape.into(),
                uniqueness,
            },
            Type::Mem { size, space } => ExtType::Mem {
                size: ExtDim::Free(size),
                space,
            },
        }
    }
}

impl fmt::Display for ExtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtType::Prim(pt) => write!(f, "{}", pt),
            ExtType::Array {
                elem,
                shape,
                uniqueness,
            } => write!(f, "{}{}{}", uniqueness, shape, elem),
            ExtType::Mem { size, space } => write!(f, "mem({})@{}", size, space),
        }
    }
}

/// Lift a list of concrete types to existential-free `ExtType`s
pub fn static_shapes(ts: Vec<Type>) -> Vec<ExtType> {
    ts.into_iter().map(ExtType::from).collect()
}

/// Generalize two branch result types, introducing existentials where the
/// branches disagree on a dimension.
pub fn generalize_types(a: &[Type], b: &[Type]) -> Option<Vec<ExtType>> {
    if a.len() != b.len() {
        return None;
    }
    let mut next_ext = 0;
    let mut out = Vec::with_capacity(a.len());
    for (ta, tb) in a.iter().zip(b) {
        match (ta, tb) {
            (Type::Prim(pa), Type::Prim(pb)) if pa == pb => out.push(ExtType::Prim(*pa)),
            (
                Type::Array {
                    elem: ea,
                    shape: sa,
                    uniqueness: ua,
                },
                Type::Array {
                    elem: eb,
                    shape: sb,
                    uniqueness: ub,
                },
            ) if ea == eb && ua == ub && sa.rank() == sb.rank() => {
                let mut dims = Vec::with_capacity(sa.rank());
                for (da, db) in sa.dims.iter().zip(&sb.dims) {
                    if da == db {
                        dims.push(ExtDim::Free(da.clone()));
                    } else {
                        dims.push(ExtDim::Ext(next_ext));
                        next_ext += 1;
                    }
                }
                out.push(ExtType::Array {
                    elem: *ea,
                    shape: ExtShape::new(dims),
                    uniqueness: *ua,
                });
            }
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{FloatType, IntType};

    #[test]
    fn test_row_type_peels_outer_dim() {
        let t = Type::array(
            PrimType::Int(IntType::I32),
            vec![SubExp::int32(10), SubExp::int32(20)],
        );
        let row = t.row_type().unwrap();
        assert_eq!(row.rank(), 1);
        assert_eq!(
            row.shape().unwrap().dims,
            vec![SubExp::int32(20)]
        );
        let scalar = row.row_type().unwrap();
        assert_eq!(scalar, Type::Prim(PrimType::Int(IntType::I32)));
    }

    #[test]
    fn test_instantiate_discharges_ext() {
        let et = ExtType::Array {
            elem: PrimType::Int(IntType::I32),
            shape: ExtShape::new(vec![ExtDim::Ext(0), ExtDim::Free(SubExp::int32(3))]),
            uniqueness: Uniqueness::Nonunique,
        };
        let t = et.instantiate(&[SubExp::int32(7)]).unwrap();
        assert_eq!(
            t.shape().unwrap().dims,
            vec![SubExp::int32(7), SubExp::int32(3)]
        );
    }

    #[test]
    fn test_instantiate_fails_on_unbound_ext() {
        let et = ExtType::Array {
            elem: PrimType::Bool,
            shape: ExtShape::new(vec![ExtDim::Ext(2)]),
            uniqueness: Uniqueness::Nonunique,
        };
        assert!(et.instantiate(&[SubExp::int32(1)]).is_none());
    }

    #[test]
    fn test_generalize_introduces_ext_on_disagreement() {
        let a = vec![Type::array(
            PrimType::Int(IntType::I32),
            vec![SubExp::int32(3)],
        )];
        let b = vec![Type::array(
            PrimType::Int(IntType::I32),
            vec![SubExp::int32(4)],
        )];
        let gen = generalize_types(&a, &b).unwrap();
        assert!(gen[0].has_ext());

        let same = generalize_types(&a, &a).unwrap();
        assert!(!same[0].has_ext());
    }

    #[test]
    fn test_type_display() {
        let t = Type::unique_array(PrimType::Float(FloatType::F64), vec![SubExp::int32(8)]);
        assert_eq!(t.to_string(), "*[8i32]f64");
    }
}
