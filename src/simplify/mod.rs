//! The rewrite-rule simplifier
//!
//! One round descends to the innermost statements applying top-down rules
//! until none fires, then ascends applying bottom-up rules under usage
//! information; rounds repeat until a full traversal changes nothing.
//! Copy propagation, CSE, and hoisting out of loops, branch arms, and
//! SOAC bodies are engine-level, driven by the same symbol table the
//! rules consult.
//!
//! The symbol table is rebuilt at the beginning of each round and
//! discarded at the end; it is never shared across passes.
//!
//! The engine descends on its own rather than through the statement
//! rewriter: its traversal is interleaved with the symbol table, the
//! copy-propagation substitution, and the CSE map, all scoped per body.

pub mod rules;
pub mod symbol_table;
pub mod usage;

use crate::error::Result;
use crate::ir::free::free_in_stm;
use crate::ir::kernel::KernelOp;
use crate::ir::prim::PrimType;
use crate::ir::types::{SubExp, Type};
use crate::ir::{BasicOp, Body, Exp, FunDef, Lambda, LoopForm, Lore, Op, Program, Soac, Stm};
use crate::names::{NameSource, VName};
use crate::pass::Pass;
use rules::RuleContext;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use symbol_table::{Binding, SymbolTable};
use tracing::trace;
use usage::UsageTable;

/// Configuration for the simplifier
#[derive(Debug, Clone)]
pub struct SimplifyConfig {
    /// Enable common-subexpression elimination
    pub cse: bool,
    /// Enable hoisting out of loops, branches, and SOAC bodies
    pub hoisting: bool,
    /// Upper bound on full fixed-point rounds
    pub max_rounds: usize,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            cse: true,
            hoisting: true,
            max_rounds: 10,
        }
    }
}

/// Simplify with the default configuration
pub fn simplify_program(prog: Program, ns: &mut NameSource) -> Result<Program> {
    simplify_program_with(prog, ns, &SimplifyConfig::default())
}

/// Simplify until a full round fires no rule (or `max_rounds` is
/// reached)
pub fn simplify_program_with(
    mut prog: Program,
    ns: &mut NameSource,
    cfg: &SimplifyConfig,
) -> Result<Program> {
    for _round in 0..cfg.max_rounds {
        let mut engine = Engine {
            ns: &mut *ns,
            cfg,
            changed: false,
        };
        prog.funs = prog
            .funs
            .into_iter()
            .map(|f| engine.simplify_fun(f))
            .collect();
        if !engine.changed {
            break;
        }
    }
    Ok(prog)
}

/// The simplifier as a pipeline pass over the SOACS lore
pub fn soacs_pass() -> Pass {
    Pass::new("simplify", Lore::Soacs, Lore::Soacs, simplify_program)
}

/// The simplifier as a pipeline pass over the kernels lore
pub fn kernels_pass() -> Pass {
    Pass::new("simplify-kernels", Lore::Kernels, Lore::Kernels, simplify_program)
}

/// The simplifier as a pipeline pass over the explicit-memory lore
pub fn memory_pass() -> Pass {
    Pass::new(
        "simplify-memory",
        Lore::ExplicitMemory,
        Lore::ExplicitMemory,
        simplify_program,
    )
}

const MAX_RULE_APPLICATIONS: usize = 100;

struct Engine<'a> {
    ns: &'a mut NameSource,
    cfg: &'a SimplifyConfig,
    changed: bool,
}

impl Engine<'_> {
    fn simplify_fun(&mut self, fun: FunDef) -> FunDef {
        let FunDef {
            name,
            rettype,
            params,
            body,
        } = fun;
        let mut st = SymbolTable::new();
        for p in &params {
            st.insert(p.name.clone(), p.ty.clone(), Binding::FunParam);
        }
        let body = self.simplify_body(st, body);
        FunDef {
            name,
            rettype,
            params,
            body,
        }
    }

    fn simplify_body(&mut self, mut st: SymbolTable, body: Body) -> Body {
        let mut out: Vec<Stm> = Vec::new();
        let mut subst: FxHashMap<VName, SubExp> = FxHashMap::default();
        let mut cse_map: FxHashMap<String, Vec<VName>> = FxHashMap::default();
        let mut work: VecDeque<Stm> = body.stms.into();

        while let Some(next) = work.pop_front() {
            let mut stm = rules::substitute_subexps_stm(&subst, next);

            // Top-down rules, to a per-statement fixed point.
            let mut spliced = false;
            let mut applications = 0;
            loop {
                applications += 1;
                if applications > MAX_RULE_APPLICATIONS {
                    break;
                }
                let mut fired = false;
                for (name, rule) in rules::top_down_rules() {
                    let replacement = {
                        let mut ctx = RuleContext {
                            st: &st,
                            ns: &mut *self.ns,
                        };
                        rule(&mut ctx, &stm)
                    };
                    if let Some(mut new) = replacement {
                        trace!(rule = name, "top-down rule fired");
                        self.changed = true;
                        fired = true;
                        if new.len() == 1 {
                            if let Some(s) = new.pop() {
                                stm = s;
                            }
                        } else {
                            for s in new.into_iter().rev() {
                                work.push_front(s);
                            }
                            spliced = true;
                        }
                        break;
                    }
                }
                if spliced || !fired {
                    break;
                }
            }
            if spliced {
                continue;
            }

            // Copy propagation: a bare sub-expression binding dissolves
            // into a substitution over everything downstream.
            if let Exp::BasicOp(BasicOp::SubExp(se)) = &stm.exp {
                if stm.pattern.context.is_empty() && stm.pattern.values.len() == 1 {
                    let pe = &stm.pattern.values[0];
                    subst.insert(pe.name.clone(), se.clone());
                    self.changed = true;
                    continue;
                }
            }

            // Sub-bodies are simplified in a deeper scope; what can leave
            // them is hoisted in front of this statement.
            let stm = self.simplify_subterms(&mut st, stm, &mut out);

            // CSE: scalar-only, pure statements; arrays are excluded
            // because they may be consumed later.
            if self.cfg.cse
                && stm.exp.is_safe()
                && stm.pattern.context.is_empty()
                && !stm.pattern.values.is_empty()
                && stm
                    .pattern
                    .values
                    .iter()
                    .all(|pe| matches!(pe.ty, Type::Prim(_)))
                && !matches!(stm.exp, Exp::BasicOp(BasicOp::SubExp(_)))
            {
                // Structural key; derived Debug is injective on scalar
                // expressions.
                let key = format!("{:?}", stm.exp);
                if let Some(prior) = cse_map.get(&key) {
                    if prior.len() == stm.pattern.values.len() {
                        trace!("cse hit");
                        self.changed = true;
                        for (pe, pv) in stm.pattern.values.iter().zip(prior) {
                            subst.insert(pe.name.clone(), SubExp::Var(pv.clone()));
                        }
                        continue;
                    }
                }
                cse_map.insert(
                    key,
                    stm.pattern.values.iter().map(|pe| pe.name.clone()).collect(),
                );
            }

            st.insert_stm(&stm.pattern, &stm.exp);
            out.push(stm);
        }

        let result = body
            .result
            .into_iter()
            .map(|se| rules::substitute_subexps_subexp(&subst, se))
            .collect();

        self.bottom_up(&st, out, result)
    }

    /// Simplify the bodies nested inside one statement, hoisting what can
    /// move out into `out`
    fn simplify_subterms(&mut self, st: &mut SymbolTable, stm: Stm, out: &mut Vec<Stm>) -> Stm {
        let Stm { pattern, exp } = stm;
        let exp = match exp {
            Exp::If {
                cond,
                tbranch,
                fbranch,
                rettype,
            } => {
                let tbranch = self.simplify_body(st.deepened(), tbranch);
                let fbranch = self.simplify_body(st.deepened(), fbranch);
                let (tbranch, fbranch) = if self.cfg.hoisting {
                    self.hoist_common_branch_stms(st, tbranch, fbranch, out)
                } else {
                    (tbranch, fbranch)
                };
                Exp::If {
                    cond,
                    tbranch,
                    fbranch,
                    rettype,
                }
            }
            Exp::DoLoop {
                ctx_merge,
                val_merge,
                form,
                body,
            } => {
                let mut inner = st.deepened();
                for (p, _) in ctx_merge.iter().chain(val_merge.iter()) {
                    inner.insert(p.name.clone(), p.ty.clone(), Binding::LoopParam);
                }
                if let LoopForm::For { var, .. } = &form {
                    inner.insert(
                        var.clone(),
                        Type::Prim(PrimType::INDEX),
                        Binding::LoopParam,
                    );
                }
                let mut body = self.simplify_body(inner, body);
                if self.cfg.hoisting {
                    body = self.hoist_out(st, body, out);
                }
                Exp::DoLoop {
                    ctx_merge,
                    val_merge,
                    form,
                    body,
                }
            }
            Exp::Op(Op::Soac(soac)) => Exp::Op(Op::Soac(self.simplify_soac(st, soac, out))),
            Exp::Op(Op::Kernel(kop)) => {
                Exp::Op(Op::Kernel(self.simplify_kernel_op(st, kop, out)))
            }
            other => other,
        };
        Stm::new(pattern, exp)
    }

    fn simplify_lambda(&mut self, st: &mut SymbolTable, lambda: Lambda, out: &mut Vec<Stm>) -> Lambda {
        let mut inner = st.deepened();
        for p in &lambda.params {
            inner.insert(p.name.clone(), p.ty.clone(), Binding::LambdaParam);
        }
        let mut body = self.simplify_body(inner, lambda.body);
        if self.cfg.hoisting {
            body = self.hoist_out(st, body, out);
        }
        Lambda {
            params: lambda.params,
            body,
            rettype: lambda.rettype,
        }
    }

    fn simplify_soac(&mut self, st: &mut SymbolTable, soac: Soac, out: &mut Vec<Stm>) -> Soac {
        match soac {
            Soac::Map {
                width,
                lambda,
                arrays,
            } => Soac::Map {
                width,
                lambda: self.simplify_lambda(st, lambda, out),
                arrays,
            },
            Soac::Reduce {
                width,
                lambda,
                inputs,
            } => Soac::Reduce {
                width,
                lambda: self.simplify_lambda(st, lambda, out),
                inputs,
            },
            Soac::Scan {
                width,
                lambda,
                inputs,
            } => Soac::Scan {
                width,
                lambda: self.simplify_lambda(st, lambda, out),
                inputs,
            },
            Soac::Redomap {
                width,
                red_lambda,
                map_lambda,
                neutrals,
                arrays,
            } => Soac::Redomap {
                width,
                red_lambda: self.simplify_lambda(st, red_lambda, out),
                map_lambda: self.simplify_lambda(st, map_lambda, out),
                neutrals,
                arrays,
            },
            Soac::Stream {
                width,
                accs,
                lambda,
                arrays,
            } => Soac::Stream {
                width,
                accs,
                lambda: self.simplify_lambda(st, lambda, out),
                arrays,
            },
            Soac::Write {
                width,
                lambda,
                arrays,
                dests,
            } => Soac::Write {
                width,
                lambda: self.simplify_lambda(st, lambda, out),
                arrays,
                dests,
            },
        }
    }

    fn simplify_kernel_op(
        &mut self,
        st: &mut SymbolTable,
        kop: KernelOp,
        out: &mut Vec<Stm>,
    ) -> KernelOp {
        match kop {
            KernelOp::Kernel(mut k) => {
                let mut inner = st.deepened();
                for (v, _) in &k.space.dims {
                    inner.insert(
                        v.clone(),
                        Type::Prim(PrimType::INDEX),
                        Binding::LambdaParam,
                    );
                }
                inner.insert(
                    k.space.flat_id.clone(),
                    Type::Prim(PrimType::INDEX),
                    Binding::LambdaParam,
                );
                for inp in &k.inputs {
                    inner.insert(
                        inp.param.name.clone(),
                        inp.param.ty.clone(),
                        Binding::LambdaParam,
                    );
                }
                let mut body = self.simplify_body(inner, k.body);
                if self.cfg.hoisting {
                    body = self.hoist_out(st, body, out);
                }
                k.body = body;
                KernelOp::Kernel(k)
            }
            KernelOp::ReduceKernel(mut k) => {
                k.red_lambda = self.simplify_lambda(st, k.red_lambda, out);
                k.fold_lambda = self.simplify_lambda(st, k.fold_lambda, out);
                KernelOp::ReduceKernel(k)
            }
        }
    }

    /// Move pure statements whose free names are all bound outside the
    /// construct into the enclosing body. The blocking predicate is
    /// `Exp::is_safe`: asserts, allocations, in-place updates, and whole
    /// sub-programs stay put.
    fn hoist_out(&mut self, st: &mut SymbolTable, body: Body, out: &mut Vec<Stm>) -> Body {
        let mut kept = Vec::with_capacity(body.stms.len());
        for stm in body.stms {
            let hoistable =
                stm.exp.is_safe() && free_in_stm(&stm).iter().all(|v| st.contains(v));
            if hoistable {
                trace!("hoisted a statement out of a nested body");
                self.changed = true;
                st.insert_stm(&stm.pattern, &stm.exp);
                out.push(stm);
            } else {
                kept.push(stm);
            }
        }
        Body::new(kept, body.result)
    }

    /// A statement computed identically in both branch arms moves in
    /// front of the conditional; the else-arm's names collapse into the
    /// then-arm's.
    fn hoist_common_branch_stms(
        &mut self,
        st: &mut SymbolTable,
        tbranch: Body,
        fbranch: Body,
        out: &mut Vec<Stm>,
    ) -> (Body, Body) {
        let mut t_kept = Vec::with_capacity(tbranch.stms.len());
        let mut f_stms: Vec<Option<Stm>> = fbranch.stms.into_iter().map(Some).collect();
        let mut rename: FxHashMap<VName, SubExp> = FxHashMap::default();

        for tstm in tbranch.stms {
            let tstm = rules::substitute_subexps_stm(&rename, tstm);
            let candidate = tstm.exp.is_safe()
                && free_in_stm(&tstm).iter().all(|v| st.contains(v));
            let twin = if candidate {
                f_stms.iter_mut().find(|slot| {
                    slot.as_ref()
                        .map(|f| {
                            let f_sub = rules::substitute_subexps_stm(&rename, f.clone());
                            f_sub.exp == tstm.exp
                                && f_sub.pattern.values.len() == tstm.pattern.values.len()
                        })
                        .unwrap_or(false)
                })
            } else {
                None
            };
            match twin {
                Some(slot) => {
                    if let Some(fstm) = slot.take() {
                        trace!("hoisted a branch-invariant statement");
                        self.changed = true;
                        for (fpe, tpe) in fstm.pattern.values.iter().zip(&tstm.pattern.values) {
                            rename
                                .insert(fpe.name.clone(), SubExp::Var(tpe.name.clone()));
                        }
                        st.insert_stm(&tstm.pattern, &tstm.exp);
                        out.push(tstm);
                    }
                }
                None => t_kept.push(tstm),
            }
        }

        let f_kept = f_stms
            .into_iter()
            .flatten()
            .map(|s| rules::substitute_subexps_stm(&rename, s))
            .collect();
        let f_result = fbranch
            .result
            .into_iter()
            .map(|se| rules::substitute_subexps_subexp(&rename, se))
            .collect();
        (
            Body::new(t_kept, tbranch.result),
            Body::new(f_kept, f_result),
        )
    }

    /// The ascent: usage accumulates from the result upwards, and
    /// bottom-up rules prune what nothing needs.
    fn bottom_up(
        &mut self,
        st: &SymbolTable,
        stms: Vec<Stm>,
        result: Vec<SubExp>,
    ) -> Body {
        let mut usage = UsageTable::new();
        for se in &result {
            if let SubExp::Var(v) = se {
                usage.in_result(v.clone());
            }
        }

        let mut kept_rev: Vec<Stm> = Vec::with_capacity(stms.len());
        for stm in stms.into_iter().rev() {
            let mut replaced = None;
            for (name, rule) in rules::bottom_up_rules() {
                if let Some(new) = rule(st, &usage, self.ns, &stm) {
                    trace!(rule = name, "bottom-up rule fired");
                    self.changed = true;
                    replaced = Some(new);
                    break;
                }
            }
            let keep = match replaced {
                Some(new) => new,
                None => vec![stm],
            };
            for s in keep.into_iter().rev() {
                for v in free_in_stm(&s) {
                    usage.observe(v);
                }
                kept_rev.push(s);
            }
        }
        kept_rev.reverse();
        Body::new(kept_rev, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{BinOp, IntType, PrimValue};
    use crate::ir::types::static_shapes;
    use crate::ir::Pattern;
    use crate::names::VName;

    fn i32t() -> Type {
        Type::Prim(PrimType::Int(IntType::I32))
    }

    fn simple_fun(stms: Vec<Stm>, result: Vec<SubExp>) -> Program {
        Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![i32t()]),
                params: vec![],
                body: Body::new(stms, result),
            }],
        )
    }

    #[test]
    fn test_scalar_constant_folding_to_zero() {
        // let x = 1 + 2 in x * 0  ==>  0
        let mut ns = NameSource::new(10);
        let x = ns.fresh("x");
        let y = ns.fresh("y");
        let prog = simple_fun(
            vec![
                Stm::new(
                    Pattern::single(x.clone(), i32t()),
                    Exp::BasicOp(BasicOp::BinOp(
                        BinOp::Add(IntType::I32),
                        SubExp::int32(1),
                        SubExp::int32(2),
                    )),
                ),
                Stm::new(
                    Pattern::single(y.clone(), i32t()),
                    Exp::BasicOp(BasicOp::BinOp(
                        BinOp::Mul(IntType::I32),
                        SubExp::Var(x),
                        SubExp::int32(0),
                    )),
                ),
            ],
            vec![SubExp::Var(y)],
        );
        let out = simplify_program(prog, &mut ns).unwrap();
        let body = &out.funs[0].body;
        assert!(body.stms.is_empty());
        assert_eq!(
            body.result,
            vec![SubExp::Constant(PrimValue::int32(0))]
        );
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let mut ns = NameSource::new(10);
        let x = ns.fresh("x");
        let prog = simple_fun(
            vec![Stm::new(
                Pattern::single(x.clone(), i32t()),
                Exp::BasicOp(BasicOp::BinOp(
                    BinOp::SDiv(IntType::I32),
                    SubExp::int32(1),
                    SubExp::int32(0),
                )),
            )],
            vec![SubExp::Var(x)],
        );
        let out = simplify_program(prog, &mut ns).unwrap();
        let body = &out.funs[0].body;
        assert_eq!(body.stms.len(), 1);
        assert!(matches!(
            body.stms[0].exp,
            Exp::BasicOp(BasicOp::BinOp(BinOp::SDiv(_), _, _))
        ));
    }

    #[test]
    fn test_simplifier_is_idempotent() {
        let mut ns = NameSource::new(10);
        let x = ns.fresh("x");
        let y = ns.fresh("y");
        let prog = simple_fun(
            vec![
                Stm::new(
                    Pattern::single(x.clone(), i32t()),
                    Exp::BasicOp(BasicOp::BinOp(
                        BinOp::Add(IntType::I32),
                        SubExp::int32(3),
                        SubExp::int32(4),
                    )),
                ),
                Stm::new(
                    Pattern::single(y.clone(), i32t()),
                    Exp::BasicOp(BasicOp::BinOp(
                        BinOp::Mul(IntType::I32),
                        SubExp::Var(x),
                        SubExp::int32(2),
                    )),
                ),
            ],
            vec![SubExp::Var(y)],
        );
        let once = simplify_program(prog, &mut ns).unwrap();
        let twice = simplify_program(once.clone(), &mut ns).unwrap();
        assert_eq!(once.funs[0].body, twice.funs[0].body);
    }
}
