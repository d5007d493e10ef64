//! Alias and consumption analysis
//!
//! A single forward pass over a body maintains an environment mapping each
//! in-scope name to the set of names whose memory it may alias. Alias sets
//! are stored pre-expanded: when a binding aliases `src`, it records `src`
//! plus everything `src` already aliased, so queries are one lookup.
//!
//! Consumption is what in-place updates, unique-argument calls, and
//! scatter destinations do: a consumed name (and everything aliased to it)
//! is unusable afterwards. The typechecker enforces that; this module only
//! computes the facts. As an analysis returning per-construct facts
//! rather than rebuilding terms, it matches the structure directly
//! instead of going through the rewriting traversals.

use crate::ir::types::{Diet, SubExp, Type, Uniqueness};
use crate::ir::{BasicOp, Body, Exp, Op, Pattern, Soac, Stm};
use crate::names::VName;
use rustc_hash::{FxHashMap, FxHashSet};

/// The forward-pass environment: name to (expanded) alias set
#[derive(Debug, Clone, Default)]
pub struct AliasEnv {
    aliases: FxHashMap<VName, FxHashSet<VName>>,
}

impl AliasEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name with no aliases (fresh storage, or a parameter)
    pub fn bind_fresh(&mut self, name: VName) {
        self.aliases.insert(name, FxHashSet::default());
    }

    /// Bind a name with the given (already expanded) alias set
    pub fn bind(&mut self, name: VName, als: FxHashSet<VName>) {
        self.aliases.insert(name, als);
    }

    /// The names `v` may share memory with, including `v` itself
    pub fn closure(&self, v: &VName) -> FxHashSet<VName> {
        let mut set = self.aliases.get(v).cloned().unwrap_or_default();
        set.insert(v.clone());
        set
    }

    /// The recorded alias set of `v`, not including `v`
    pub fn aliases_of(&self, v: &VName) -> FxHashSet<VName> {
        self.aliases.get(v).cloned().unwrap_or_default()
    }

    fn subexp_aliases(&self, se: &SubExp) -> FxHashSet<VName> {
        match se {
            SubExp::Var(v) => self.closure(v),
            SubExp::Constant(_) => FxHashSet::default(),
        }
    }
}

/// Alias sets and consumption of one expression
#[derive(Debug, Clone, Default)]
pub struct ExpAliases {
    /// One set per value result, in result order
    pub results: Vec<FxHashSet<VName>>,
    /// Names rendered unusable by executing the expression, expanded
    /// through the environment
    pub consumed: FxHashSet<VName>,
}

/// Apply the per-construct rules to one expression.
///
/// `env` must already contain every free name of the expression.
pub fn analyze_exp(env: &AliasEnv, exp: &Exp) -> ExpAliases {
    match exp {
        Exp::BasicOp(op) => analyze_basic_op(env, op),
        Exp::Apply { args, rettype, .. } => {
            let mut consumed = FxHashSet::default();
            let mut observed = FxHashSet::default();
            for (se, diet) in args {
                match diet {
                    Diet::Consume => consumed.extend(env.subexp_aliases(se)),
                    Diet::Observe => observed.extend(env.subexp_aliases(se)),
                }
            }
            // Unique returns are fresh; non-unique returns may alias any
            // observed argument.
            let results = rettype
                .iter()
                .map(|t| match t {
                    crate::ir::types::ExtType::Array {
                        uniqueness: Uniqueness::Unique,
                        ..
                    } => FxHashSet::default(),
                    crate::ir::types::ExtType::Array { .. } => observed.clone(),
                    _ => FxHashSet::default(),
                })
                .collect();
            ExpAliases { results, consumed }
        }
        Exp::If {
            tbranch, fbranch, ..
        } => {
            let (t_res, t_cons) = analyze_body(env, tbranch);
            let (f_res, f_cons) = analyze_body(env, fbranch);
            let mut consumed = t_cons;
            consumed.extend(f_cons);
            let results = t_res
                .into_iter()
                .zip(f_res)
                .map(|(mut a, b)| {
                    a.extend(b);
                    for c in &consumed {
                        a.remove(c);
                    }
                    a
                })
                .collect();
            ExpAliases { results, consumed }
        }
        Exp::DoLoop {
            ctx_merge,
            val_merge,
            body,
            ..
        } => {
            // Merge parameters isolate the loop interior from the outside.
            let mut inner = env.clone();
            let merge_names: FxHashSet<VName> = ctx_merge
                .iter()
                .chain(val_merge.iter())
                .map(|(p, _)| p.name.clone())
                .collect();
            for name in &merge_names {
                inner.bind_fresh(name.clone());
            }
            let (body_res, body_cons) = analyze_body(&inner, body);

            // The value results follow the context results in the body.
            let val_res = body_res
                .into_iter()
                .skip(ctx_merge.len())
                .map(|mut als| {
                    for m in &merge_names {
                        als.remove(m);
                    }
                    als
                })
                .collect();

            // A unique merge parameter consumes its initial value; names
            // free in the loop consumed by the body stay consumed.
            let mut consumed: FxHashSet<VName> = body_cons
                .into_iter()
                .filter(|v| !merge_names.contains(v))
                .collect();
            for (p, init) in val_merge {
                if p.ty.unique() {
                    consumed.extend(env.subexp_aliases(init));
                }
            }
            ExpAliases {
                results: val_res,
                consumed,
            }
        }
        Exp::Op(Op::Soac(soac)) => analyze_soac(env, soac),
        // Kernel results are written to fresh storage.
        Exp::Op(Op::Kernel(kop)) => ExpAliases {
            results: vec![
                FxHashSet::default();
                crate::ir::build::exp_arity(&Exp::Op(Op::Kernel(kop.clone())))
            ],
            consumed: FxHashSet::default(),
        },
    }
}

fn analyze_basic_op(env: &AliasEnv, op: &BasicOp) -> ExpAliases {
    let fresh = |n: usize| ExpAliases {
        results: vec![FxHashSet::default(); n],
        consumed: FxHashSet::default(),
    };
    match op {
        BasicOp::SubExp(se) => ExpAliases {
            results: vec![env.subexp_aliases(se)],
            consumed: FxHashSet::default(),
        },
        BasicOp::Index { array, .. } => ExpAliases {
            results: vec![env.closure(array)],
            consumed: FxHashSet::default(),
        },
        BasicOp::Reshape { array, .. }
        | BasicOp::Rearrange { array, .. }
        | BasicOp::Rotate { array, .. } => ExpAliases {
            results: vec![env.closure(array)],
            consumed: FxHashSet::default(),
        },
        BasicOp::Split { sizes, array } => ExpAliases {
            results: vec![env.closure(array); sizes.len()],
            consumed: FxHashSet::default(),
        },
        BasicOp::Update { array, .. } => ExpAliases {
            results: vec![FxHashSet::default()],
            consumed: env.closure(array),
        },
        // Fresh storage.
        BasicOp::Copy(_)
        | BasicOp::Replicate { .. }
        | BasicOp::ArrayLit { .. }
        | BasicOp::Iota { .. }
        | BasicOp::Scratch { .. }
        | BasicOp::Concat { .. }
        | BasicOp::Alloc { .. } => fresh(1),
        BasicOp::UnOp(..)
        | BasicOp::BinOp(..)
        | BasicOp::CmpOp(..)
        | BasicOp::ConvOp(..)
        | BasicOp::Assert { .. } => fresh(1),
    }
}

fn analyze_soac(env: &AliasEnv, soac: &Soac) -> ExpAliases {
    let arity = crate::ir::build::exp_arity(&Exp::Op(Op::Soac(soac.clone())));
    let mut consumed = FxHashSet::default();
    // Scatter destinations are updated in place.
    if let Soac::Write { dests, .. } = soac {
        for d in dests {
            consumed.extend(env.closure(d));
        }
    }
    // SOAC outputs are written to fresh storage.
    ExpAliases {
        results: vec![FxHashSet::default(); arity],
        consumed,
    }
}

/// Analyze a body: bind every statement forward, then report the result
/// alias sets (filtered of local bindings) and everything consumed.
pub fn analyze_body(env: &AliasEnv, body: &Body) -> (Vec<FxHashSet<VName>>, FxHashSet<VName>) {
    let mut inner = env.clone();
    let mut locals = FxHashSet::default();
    let mut consumed = FxHashSet::default();

    for stm in &body.stms {
        let info = analyze_exp(&inner, &stm.exp);
        consumed.extend(info.consumed);
        bind_pattern(&mut inner, &stm.pattern, &info.results);
        for name in stm.pattern.names() {
            locals.insert(name);
        }
    }

    let results = body
        .result
        .iter()
        .map(|se| {
            let mut als = inner.subexp_aliases(se);
            als.retain(|v| !locals.contains(v));
            als
        })
        .collect();
    consumed.retain(|v| !locals.contains(v));
    (results, consumed)
}

/// Bind a pattern given the per-result alias sets of its expression.
///
/// Context elements (sizes, memory blocks) are fresh; value elements take
/// the corresponding result set. When the expression also returned a
/// shape context (leading result positions), the value sets follow it.
pub fn bind_pattern(env: &mut AliasEnv, pattern: &Pattern, results: &[FxHashSet<VName>]) {
    for pe in &pattern.context {
        env.bind_fresh(pe.name.clone());
    }
    let offset = results.len().saturating_sub(pattern.values.len());
    for (i, pe) in pattern.values.iter().enumerate() {
        let als = results.get(offset + i).cloned().unwrap_or_default();
        env.bind(pe.name.clone(), als);
    }
}

/// Names consumed by executing a statement
pub fn stm_consumed(env: &AliasEnv, stm: &Stm) -> FxHashSet<VName> {
    analyze_exp(env, &stm.exp).consumed
}

/// Does this expression consume anything at all?
pub fn exp_consumes(env: &AliasEnv, exp: &Exp) -> bool {
    !analyze_exp(env, exp).consumed.is_empty()
}

/// Convenience: seed an environment from typed parameters
pub fn env_from_params<'a>(params: impl Iterator<Item = (&'a VName, &'a Type)>) -> AliasEnv {
    let mut env = AliasEnv::new();
    for (name, _) in params {
        env.bind_fresh(name.clone());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{IntType, PrimType};
    use crate::ir::types::{static_shapes, Type};
    use crate::ir::{Param, PatElem, Pattern};
    use crate::names::VName;

    fn v(base: &str, tag: u64) -> VName {
        VName::new(base, tag)
    }

    fn arr_ty(n: i32) -> Type {
        Type::array(PrimType::Int(IntType::I32), vec![SubExp::int32(n)])
    }

    #[test]
    fn test_index_aliases_source() {
        let mut env = AliasEnv::new();
        env.bind_fresh(v("a", 1));
        let info = analyze_exp(
            &env,
            &Exp::BasicOp(BasicOp::Index {
                array: v("a", 1),
                indices: vec![SubExp::int32(0)],
            }),
        );
        assert!(info.results[0].contains(&v("a", 1)));
        assert!(info.consumed.is_empty());
    }

    #[test]
    fn test_copy_is_fresh() {
        let mut env = AliasEnv::new();
        env.bind_fresh(v("a", 1));
        let info = analyze_exp(&env, &Exp::BasicOp(BasicOp::Copy(v("a", 1))));
        assert!(info.results[0].is_empty());
    }

    #[test]
    fn test_update_consumes_through_aliases() {
        let mut env = AliasEnv::new();
        env.bind_fresh(v("a", 1));
        // b = reshape a; b aliases a
        let mut b_als = FxHashSet::default();
        b_als.insert(v("a", 1));
        env.bind(v("b", 2), b_als);

        let info = analyze_exp(
            &env,
            &Exp::BasicOp(BasicOp::Update {
                array: v("b", 2),
                indices: vec![SubExp::int32(0)],
                value: SubExp::int32(7),
            }),
        );
        assert!(info.consumed.contains(&v("b", 2)));
        assert!(info.consumed.contains(&v("a", 1)));
        assert!(info.results[0].is_empty());
    }

    #[test]
    fn test_if_unions_branches_minus_consumed() {
        let mut env = AliasEnv::new();
        env.bind_fresh(v("a", 1));
        env.bind_fresh(v("b", 2));
        let e = Exp::If {
            cond: SubExp::Constant(crate::ir::prim::PrimValue::Bool(true)),
            tbranch: Body::result_only(vec![SubExp::Var(v("a", 1))]),
            fbranch: Body::result_only(vec![SubExp::Var(v("b", 2))]),
            rettype: static_shapes(vec![arr_ty(3)]),
        };
        let info = analyze_exp(&env, &e);
        assert!(info.results[0].contains(&v("a", 1)));
        assert!(info.results[0].contains(&v("b", 2)));
    }

    #[test]
    fn test_loop_merge_params_isolate() {
        let mut env = AliasEnv::new();
        env.bind_fresh(v("init", 1));
        let p = v("acc", 2);
        let e = Exp::DoLoop {
            ctx_merge: vec![],
            val_merge: vec![(
                Param::new(p.clone(), arr_ty(3)),
                SubExp::Var(v("init", 1)),
            )],
            form: crate::ir::LoopForm::For {
                var: v("i", 3),
                bound: SubExp::int32(10),
            },
            body: Body::result_only(vec![SubExp::Var(p.clone())]),
        };
        let info = analyze_exp(&env, &e);
        // The result aliases nothing outside: the merge parameter is cut.
        assert!(info.results[0].is_empty());
    }

    #[test]
    fn test_unique_loop_init_is_consumed() {
        let mut env = AliasEnv::new();
        env.bind_fresh(v("init", 1));
        let p = v("acc", 2);
        let e = Exp::DoLoop {
            ctx_merge: vec![],
            val_merge: vec![(
                Param::new(
                    p.clone(),
                    Type::unique_array(PrimType::Int(IntType::I32), vec![SubExp::int32(3)]),
                ),
                SubExp::Var(v("init", 1)),
            )],
            form: crate::ir::LoopForm::For {
                var: v("i", 3),
                bound: SubExp::int32(10),
            },
            body: Body::result_only(vec![SubExp::Var(p)]),
        };
        let info = analyze_exp(&env, &e);
        assert!(info.consumed.contains(&v("init", 1)));
    }

    #[test]
    fn test_body_filters_locals_from_result_aliases() {
        let mut env = AliasEnv::new();
        env.bind_fresh(v("a", 1));
        // let b = reshape a in (b)  -- escaping aliases must name a, not b
        let body = Body::new(
            vec![Stm::new(
                Pattern::of_values(vec![PatElem::new(v("b", 2), arr_ty(3))]),
                Exp::BasicOp(BasicOp::Reshape {
                    array: v("a", 1),
                    new_dims: vec![SubExp::int32(3)],
                }),
            )],
            vec![SubExp::Var(v("b", 2))],
        );
        let (results, consumed) = analyze_body(&env, &body);
        assert!(results[0].contains(&v("a", 1)));
        assert!(!results[0].contains(&v("b", 2)));
        assert!(consumed.is_empty());
    }

    #[test]
    fn test_write_consumes_destinations() {
        let mut env = AliasEnv::new();
        env.bind_fresh(v("dst", 1));
        env.bind_fresh(v("is", 2));
        env.bind_fresh(v("vs", 3));
        let lam = crate::ir::Lambda::new(
            vec![],
            Body::result_only(vec![]),
            vec![],
        );
        let e = Exp::Op(Op::Soac(Soac::Write {
            width: SubExp::int32(4),
            lambda: lam,
            arrays: vec![v("is", 2), v("vs", 3)],
            dests: vec![v("dst", 1)],
        }));
        let info = analyze_exp(&env, &e);
        assert!(info.consumed.contains(&v("dst", 1)));
    }
}
