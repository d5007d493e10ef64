//! Statement builders
//!
//! Passes that synthesize code own an explicit [`StmBuilder`]: a name
//! source plus an accumulated statement vector. Builder methods push
//! statements and return the produced name.
//!
//! [`checked_stm`] enforces the local arity invariant: a pattern whose
//! value arity disagrees with its expression's return arity is a compiler
//! bug and aborts with a diagnostic naming the invariant.

use crate::error::{Error, Result};
use crate::ir::prim::{BinOp, IntType, PrimType};
use crate::ir::types::{SubExp, Type};
use crate::ir::{BasicOp, Exp, KernelOp, Op, Pattern, Soac, Stm};
use crate::names::{NameSource, VName};

/// The number of values an expression produces, where this is determined
/// by the expression alone
pub fn exp_arity(e: &Exp) -> usize {
    match e {
        Exp::BasicOp(BasicOp::Split { sizes, .. }) => sizes.len(),
        Exp::BasicOp(_) => 1,
        Exp::Apply { rettype, .. } => rettype.len(),
        Exp::If { rettype, .. } => rettype.len(),
        Exp::DoLoop {
            ctx_merge,
            val_merge,
            ..
        } => ctx_merge.len() + val_merge.len(),
        Exp::Op(Op::Soac(soac)) => match soac {
            Soac::Map { lambda, .. } => lambda.rettype.len(),
            Soac::Reduce { inputs, .. } | Soac::Scan { inputs, .. } => inputs.len(),
            Soac::Redomap { red_lambda, .. } => red_lambda.rettype.len(),
            Soac::Stream { accs, .. } => accs.len(),
            Soac::Write { dests, .. } => dests.len(),
        },
        Exp::Op(Op::Kernel(kop)) => match kop {
            KernelOp::Kernel(k) => k.returns.len(),
            KernelOp::ReduceKernel(k) => k.neutrals.len(),
        },
    }
}

/// Build a statement, checking the pattern-arity invariant
pub fn checked_stm(pattern: Pattern, exp: Exp) -> Result<Stm> {
    let want = exp_arity(&exp);
    let got = pattern.values.len();
    if got != want {
        return Err(Error::internal(
            "ir-builder",
            format!(
                "pattern arity violated: pattern binds {} values, expression returns {}",
                got, want
            ),
        ));
    }
    Ok(Stm::new(pattern, exp))
}

/// An explicit statement accumulator threaded through lowering passes
pub struct StmBuilder<'a> {
    ns: &'a mut NameSource,
    stms: Vec<Stm>,
}

impl<'a> StmBuilder<'a> {
    pub fn new(ns: &'a mut NameSource) -> Self {
        Self {
            ns,
            stms: Vec::new(),
        }
    }

    /// The underlying name source
    pub fn names(&mut self) -> &mut NameSource {
        self.ns
    }

    /// Append an already-built statement
    pub fn push(&mut self, stm: Stm) {
        self.stms.push(stm);
    }

    /// Bind `exp` to the given name at the given type
    pub fn let_into(&mut self, name: VName, ty: Type, exp: Exp) {
        self.stms.push(Stm::new(Pattern::single(name, ty), exp));
    }

    /// Bind `exp` to a fresh name at the given type
    pub fn let_bind(&mut self, base: &str, ty: Type, exp: Exp) -> VName {
        let name = self.ns.fresh(base);
        self.let_into(name.clone(), ty, exp);
        name
    }

    /// Bind a binary operation to a fresh name
    pub fn binop(&mut self, base: &str, op: BinOp, x: SubExp, y: SubExp) -> VName {
        let ty = Type::Prim(op.operand_type());
        self.let_bind(base, ty, Exp::BasicOp(BasicOp::BinOp(op, x, y)))
    }

    /// Emit the product of `factors` as i32 arithmetic.
    ///
    /// Constants are not pre-folded here; the simplifier takes care of it.
    pub fn product(&mut self, base: &str, factors: &[SubExp]) -> SubExp {
        match factors {
            [] => SubExp::int32(1),
            [single] => single.clone(),
            [first, rest @ ..] => {
                let mut acc = first.clone();
                for f in rest {
                    let name = self.binop(base, BinOp::Mul(IntType::I32), acc, f.clone());
                    acc = SubExp::Var(name);
                }
                acc
            }
        }
    }

    /// Emit the byte size of an array: dim product times element size
    pub fn byte_size(&mut self, base: &str, dims: &[SubExp], elem: PrimType) -> SubExp {
        let count = self.product(base, dims);
        let size = SubExp::int32(elem.bytes() as i32);
        let name = self.binop(base, BinOp::Mul(IntType::I32), count, size);
        SubExp::Var(name)
    }

    /// Finish, yielding the accumulated statements
    pub fn into_stms(self) -> Vec<Stm> {
        self.stms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::PatElem;

    #[test]
    fn test_checked_stm_rejects_arity_mismatch() {
        let mut ns = NameSource::new(0);
        let a = ns.fresh("a");
        let b = ns.fresh("b");
        let pat = Pattern::of_values(vec![
            PatElem::new(a, Type::Prim(PrimType::Int(IntType::I32))),
            PatElem::new(b, Type::Prim(PrimType::Int(IntType::I32))),
        ]);
        let exp = Exp::BasicOp(BasicOp::SubExp(SubExp::int32(1)));
        let err = checked_stm(pat, exp).unwrap_err();
        assert_eq!(err.kind(), "InternalError");
    }

    #[test]
    fn test_product_of_empty_is_one() {
        let mut ns = NameSource::new(0);
        let mut b = StmBuilder::new(&mut ns);
        assert_eq!(b.product("p", &[]), SubExp::int32(1));
        assert!(b.into_stms().is_empty());
    }

    #[test]
    fn test_product_chains_multiplies() {
        let mut ns = NameSource::new(0);
        let mut b = StmBuilder::new(&mut ns);
        let p = b.product(
            "p",
            &[SubExp::int32(2), SubExp::int32(3), SubExp::int32(4)],
        );
        let stms = b.into_stms();
        assert_eq!(stms.len(), 2);
        assert!(matches!(p, SubExp::Var(_)));
    }
}
