//! The simplifier's symbol table
//!
//! Maps every in-scope name to what is known about it: its type, how it
//! was bound, the nesting depth it entered at, and — for let-bound names —
//! its defining expression. Rebuilt at the start of every simplifier pass
//! and discarded at the end; never shared across passes.

use crate::ir::prim::PrimValue;
use crate::ir::types::{SubExp, Type};
use crate::ir::{BasicOp, Exp, Pattern};
use crate::names::VName;
use rustc_hash::FxHashMap;

/// How a name entered scope
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Bound by a single-value let; the defining expression is known
    LetBound(Exp),
    /// Bound by a multi-value or context-carrying let
    LetBoundMulti,
    /// A function parameter
    FunParam,
    /// A loop merge parameter or loop index
    LoopParam,
    /// A lambda parameter or kernel thread index
    LambdaParam,
}

/// What the symbol table knows about one name
#[derive(Debug, Clone)]
pub struct Entry {
    pub ty: Type,
    pub binding: Binding,
    /// Nesting depth at the binding point (0 = function top level)
    pub depth: usize,
}

/// The in-scope environment for rule application
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: FxHashMap<VName, Entry>,
    depth: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current nesting depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A copy one nesting level deeper, for sub-body simplification
    pub fn deepened(&self) -> SymbolTable {
        let mut st = self.clone();
        st.depth += 1;
        st
    }

    pub fn insert(&mut self, name: VName, ty: Type, binding: Binding) {
        let depth = self.depth;
        self.entries.insert(name, Entry { ty, binding, depth });
    }

    /// Record every name a pattern binds, remembering the defining
    /// expression for single-value patterns
    pub fn insert_stm(&mut self, pattern: &Pattern, exp: &Exp) {
        for pe in &pattern.context {
            self.insert(pe.name.clone(), pe.ty.clone(), Binding::LetBoundMulti);
        }
        let single = pattern.context.is_empty() && pattern.values.len() == 1;
        for pe in &pattern.values {
            let binding = if single {
                Binding::LetBound(exp.clone())
            } else {
                Binding::LetBoundMulti
            };
            self.insert(pe.name.clone(), pe.ty.clone(), binding);
        }
    }

    pub fn lookup(&self, v: &VName) -> Option<&Entry> {
        self.entries.get(v)
    }

    pub fn lookup_type(&self, v: &VName) -> Option<&Type> {
        self.entries.get(v).map(|e| &e.ty)
    }

    /// The defining expression of a let-bound name
    pub fn lookup_exp(&self, v: &VName) -> Option<&Exp> {
        match self.entries.get(v) {
            Some(Entry {
                binding: Binding::LetBound(e),
                ..
            }) => Some(e),
            _ => None,
        }
    }

    /// The defining basic operation of a let-bound name
    pub fn lookup_basic_op(&self, v: &VName) -> Option<&BasicOp> {
        match self.lookup_exp(v) {
            Some(Exp::BasicOp(op)) => Some(op),
            _ => None,
        }
    }

    /// Resolve a sub-expression to a constant, chasing variables bound to
    /// bare constants
    pub fn as_constant(&self, se: &SubExp) -> Option<PrimValue> {
        match se {
            SubExp::Constant(v) => Some(*v),
            SubExp::Var(v) => match self.lookup_basic_op(v) {
                Some(BasicOp::SubExp(SubExp::Constant(c))) => Some(*c),
                _ => None,
            },
        }
    }

    /// Was the name bound strictly outside the current nesting level?
    pub fn bound_outside(&self, v: &VName) -> bool {
        self.entries
            .get(v)
            .map(|e| e.depth < self.depth)
            .unwrap_or(false)
    }

    pub fn contains(&self, v: &VName) -> bool {
        self.entries.contains_key(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{IntType, PrimType};

    #[test]
    fn test_lookup_defining_exp() {
        let mut st = SymbolTable::new();
        let x = VName::new("x", 1);
        let exp = Exp::BasicOp(BasicOp::SubExp(SubExp::int32(5)));
        st.insert_stm(
            &Pattern::single(x.clone(), Type::Prim(PrimType::Int(IntType::I32))),
            &exp,
        );
        assert_eq!(st.lookup_exp(&x), Some(&exp));
        assert_eq!(
            st.as_constant(&SubExp::Var(x)),
            Some(PrimValue::int32(5))
        );
    }

    #[test]
    fn test_depth_tracking() {
        let mut st = SymbolTable::new();
        let outer = VName::new("o", 1);
        st.insert(
            outer.clone(),
            Type::Prim(PrimType::Bool),
            Binding::FunParam,
        );
        let mut deeper = st.deepened();
        let inner = VName::new("i", 2);
        deeper.insert(
            inner.clone(),
            Type::Prim(PrimType::Bool),
            Binding::LambdaParam,
        );
        assert!(deeper.bound_outside(&outer));
        assert!(!deeper.bound_outside(&inner));
    }
}
