//! Name substitution
//!
//! Replaces names throughout a term, at uses and binding occurrences
//! alike. Because tags are globally unique, a substitution whose targets
//! are fresh can never capture; this is what the renamer and CSE rely on.

use crate::error::Result;
use crate::ir::traverse::{map_exp, Mapper};
use crate::ir::types::SubExp;
use crate::ir::{Body, Exp, Lambda, Stm};
use crate::names::VName;
use rustc_hash::FxHashMap;

struct Substituter<'a> {
    subst: &'a FxHashMap<VName, VName>,
}

impl Mapper for Substituter<'_> {
    fn map_vname(&mut self, v: VName) -> Result<VName> {
        Ok(self.subst.get(&v).cloned().unwrap_or(v))
    }
}

// Substitution rebuilds through the fallible mapper interface but cannot
// itself fail.
fn infallible<T>(r: Result<T>) -> T {
    match r {
        Ok(v) => v,
        Err(e) => unreachable!("substitution failed: {}", e),
    }
}

/// Substitute names in an expression
pub fn substitute_names_exp(subst: &FxHashMap<VName, VName>, e: Exp) -> Exp {
    infallible(map_exp(&mut Substituter { subst }, e))
}

/// Substitute names in a body
pub fn substitute_names_body(subst: &FxHashMap<VName, VName>, b: Body) -> Body {
    infallible(Substituter { subst }.map_body(b))
}

/// Substitute names in a statement
pub fn substitute_names_stm(subst: &FxHashMap<VName, VName>, stm: Stm) -> Stm {
    Stm {
        pattern: infallible(crate::ir::traverse::map_pattern(
            &mut Substituter { subst },
            stm.pattern,
        )),
        exp: substitute_names_exp(subst, stm.exp),
    }
}

/// Substitute names in a lambda
pub fn substitute_names_lambda(subst: &FxHashMap<VName, VName>, l: Lambda) -> Lambda {
    infallible(Substituter { subst }.map_lambda(l))
}

/// Substitute names in a sub-expression
pub fn substitute_names_subexp(subst: &FxHashMap<VName, VName>, se: SubExp) -> SubExp {
    infallible(Substituter { subst }.map_subexp(se))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{BinOp, IntType};
    use crate::ir::BasicOp;

    fn v(base: &str, tag: u64) -> VName {
        VName::new(base, tag)
    }

    #[test]
    fn test_substitutes_uses() {
        let mut subst = FxHashMap::default();
        subst.insert(v("x", 1), v("y", 2));
        let e = Exp::BasicOp(BasicOp::BinOp(
            BinOp::Add(IntType::I32),
            SubExp::Var(v("x", 1)),
            SubExp::Var(v("z", 3)),
        ));
        let e2 = substitute_names_exp(&subst, e);
        match e2 {
            Exp::BasicOp(BasicOp::BinOp(_, SubExp::Var(a), SubExp::Var(b))) => {
                assert_eq!(a, v("y", 2));
                assert_eq!(b, v("z", 3));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_unmapped_names_unchanged() {
        let subst = FxHashMap::default();
        let se = SubExp::Var(v("q", 9));
        assert_eq!(substitute_names_subexp(&subst, se.clone()), se);
    }
}
