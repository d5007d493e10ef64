//! Free-variable computation
//!
//! `free_in_*` returns the set of names a term references but does not
//! bind. Name tags are globally unique, so traversal order within a term
//! cannot confuse a binder with an outer use of the same name.

use crate::ir::traverse::{walk_exp, Walker};
use crate::ir::{Body, Exp, Lambda, Stm};
use crate::names::VName;
use rustc_hash::FxHashSet;

#[derive(Default)]
struct FreeCollector {
    bound: FxHashSet<VName>,
    free: FxHashSet<VName>,
}

impl Walker for FreeCollector {
    fn walk_vname(&mut self, v: &VName) {
        if !self.bound.contains(v) {
            self.free.insert(v.clone());
        }
    }

    fn walk_binder(&mut self, v: &VName) {
        self.bound.insert(v.clone());
    }
}

/// Names free in a body
pub fn free_in_body(body: &Body) -> FxHashSet<VName> {
    let mut c = FreeCollector::default();
    c.walk_body(body);
    c.free
}

/// Names free in an expression
pub fn free_in_exp(exp: &Exp) -> FxHashSet<VName> {
    let mut c = FreeCollector::default();
    walk_exp(&mut c, exp);
    c.free
}

/// Names free in a statement (pattern shape references count, the bound
/// names themselves do not)
pub fn free_in_stm(stm: &Stm) -> FxHashSet<VName> {
    let mut c = FreeCollector::default();
    c.walk_pattern(&stm.pattern);
    walk_exp(&mut c, &stm.exp);
    c.free
}

/// Names free in a lambda
pub fn free_in_lambda(lambda: &Lambda) -> FxHashSet<VName> {
    let mut c = FreeCollector::default();
    c.walk_lambda(lambda);
    c.free
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{BinOp, IntType, PrimType};
    use crate::ir::types::{SubExp, Type};
    use crate::ir::{BasicOp, Body, Exp, Param, Pattern, Stm};
    use crate::names::VName;

    fn v(base: &str, tag: u64) -> VName {
        VName::new(base, tag)
    }

    #[test]
    fn test_free_in_exp_sees_operands() {
        let e = Exp::BasicOp(BasicOp::BinOp(
            BinOp::Add(IntType::I32),
            SubExp::Var(v("x", 1)),
            SubExp::Var(v("y", 2)),
        ));
        let free = free_in_exp(&e);
        assert!(free.contains(&v("x", 1)));
        assert!(free.contains(&v("y", 2)));
        assert_eq!(free.len(), 2);
    }

    #[test]
    fn test_body_bindings_are_not_free() {
        // let a = x + 1 in result (a, y)
        let a = v("a", 10);
        let body = Body::new(
            vec![Stm::new(
                Pattern::single(a.clone(), Type::Prim(PrimType::Int(IntType::I32))),
                Exp::BasicOp(BasicOp::BinOp(
                    BinOp::Add(IntType::I32),
                    SubExp::Var(v("x", 1)),
                    SubExp::int32(1),
                )),
            )],
            vec![SubExp::Var(a.clone()), SubExp::Var(v("y", 2))],
        );
        let free = free_in_body(&body);
        assert!(free.contains(&v("x", 1)));
        assert!(free.contains(&v("y", 2)));
        assert!(!free.contains(&a));
    }

    #[test]
    fn test_lambda_params_are_not_free() {
        let p = v("p", 5);
        let lam = crate::ir::Lambda::new(
            vec![Param::new(p.clone(), Type::Prim(PrimType::Int(IntType::I32)))],
            Body::result_only(vec![SubExp::Var(p.clone()), SubExp::Var(v("outer", 9))]),
            vec![Type::Prim(PrimType::Int(IntType::I32))],
        );
        let free = free_in_lambda(&lam);
        assert!(!free.contains(&p));
        assert!(free.contains(&v("outer", 9)));
    }

    #[test]
    fn test_shape_variables_are_free() {
        let n = v("n", 3);
        let arr = v("arr", 4);
        let stm = Stm::new(
            Pattern::single(
                v("out", 7),
                Type::array(PrimType::Int(IntType::I32), vec![SubExp::Var(n.clone())]),
            ),
            Exp::BasicOp(BasicOp::Copy(arr.clone())),
        );
        let free = free_in_stm(&stm);
        assert!(free.contains(&n));
        assert!(free.contains(&arr));
        assert!(!free.contains(&v("out", 7)));
    }
}
