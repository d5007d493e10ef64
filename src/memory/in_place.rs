//! In-place update lowering
//!
//! When a loop produces an array `r` whose only subsequent use is a
//! single in-place update `x = y with [k] <- r`, the loop is rewritten to
//! carry the whole of `y` and perform the update once per iteration,
//! eliminating the post-loop copy of `r` into `x`.
//!
//! The rewrite is proposed while ascending through the body and committed
//! in the body where both statements live, once every precondition is
//! established from the alias analysis:
//!
//! 1. `r` is not consumed after the update (its use count is one).
//! 2. `k` and `y` are available before the loop.
//! 3. `x` and `r` are bound in the same body.
//! 4. `r` is not used after the update point.
//! 5. The size of `r` is loop-invariant.
//! 6. `r` comes from a loop, which we can replace.
//! 7. Neither `y` nor anything aliasing it is used inside the loop body.
//!
//! Any violation cancels the rewrite for that candidate.

use crate::alias::{self, AliasEnv};
use crate::error::Result;
use crate::ir::free::{free_in_exp, free_in_stm};
use crate::ir::traverse::{rewrite_body_inner, StmRewriter};
use crate::ir::types::{SubExp, Type, Uniqueness};
use crate::ir::{BasicOp, Body, Exp, FunDef, Lore, Param, PatElem, Pattern, Program, Stm};
use crate::names::{NameSource, VName};
use crate::pass::Pass;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// The pass over the SOACS lore
pub fn pass() -> Pass {
    Pass::new("in-place-lowering", Lore::Soacs, Lore::Soacs, in_place_lowering)
}

/// The pass over the kernels lore
pub fn kernels_pass() -> Pass {
    Pass::new(
        "in-place-lowering-kernels",
        Lore::Kernels,
        Lore::Kernels,
        in_place_lowering,
    )
}

/// Forward qualifying post-loop updates into their loops
pub fn in_place_lowering(prog: Program, ns: &mut NameSource) -> Result<Program> {
    let lore = prog.lore;
    let funs = prog
        .funs
        .into_iter()
        .map(|f| {
            let FunDef {
                name,
                rettype,
                params,
                body,
            } = f;
            Ok(FunDef {
                name,
                rettype,
                params,
                body: lower_body(body, ns)?,
            })
        })
        .collect::<Result<_>>()?;
    Ok(Program::new(lore, funs))
}

fn lower_body(body: Body, ns: &mut NameSource) -> Result<Body> {
    Lowerer { ns }.rewrite_body(body)
}

/// Statement rewriter that, after the generic descent has handled every
/// nested body, forwards this body's qualifying updates into their loops
struct Lowerer<'a> {
    ns: &'a mut NameSource,
}

impl StmRewriter for Lowerer<'_> {
    fn rewrite_body(&mut self, body: Body) -> Result<Body> {
        // Inner bodies first, so a nested loop's own updates are already
        // forwarded when the enclosing body is examined.
        let mut body = rewrite_body_inner(self, body)?;
        while let Some(rewrite) = find_forwarding(&body) {
            debug!("forwarding an in-place update into its loop");
            body = apply_forwarding(body, rewrite, self.ns)?;
        }
        Ok(body)
    }
}

/// A committed forwarding: loop statement index, update statement index,
/// and the loop pattern position of `r`
struct Forwarding {
    loop_idx: usize,
    update_idx: usize,
    r_pos: usize,
}

fn find_forwarding(body: &Body) -> Option<Forwarding> {
    let counts = use_counts(body);

    // Names bound by each statement, for availability checks.
    let bound_at: Vec<FxHashSet<VName>> = body
        .stms
        .iter()
        .map(|s| s.pattern.names().into_iter().collect())
        .collect();

    for (loop_idx, loop_stm) in body.stms.iter().enumerate() {
        let Exp::DoLoop {
            ctx_merge,
            val_merge,
            body: loop_body,
            ..
        } = &loop_stm.exp
        else {
            continue;
        };
        let n_ctx = ctx_merge.len();

        for (update_idx, upd_stm) in body.stms.iter().enumerate().skip(loop_idx + 1) {
            let Exp::BasicOp(BasicOp::Update {
                array: y,
                indices: k,
                value: SubExp::Var(r),
            }) = &upd_stm.exp
            else {
                continue;
            };
            // r must be one of the loop's value results...
            let Some(r_pos) = loop_stm
                .pattern
                .values
                .iter()
                .position(|pe| pe.name == *r)
            else {
                continue;
            };
            if r_pos < n_ctx || val_merge.get(r_pos - n_ctx).is_none() {
                continue;
            }
            // ...used exactly once, here (conditions 1 and 4).
            if counts.get(r).copied().unwrap_or(0) != 1 {
                continue;
            }
            // k and y must be available before the loop (condition 2).
            let available = |v: &VName| {
                !bound_at[loop_idx..].iter().any(|names| names.contains(v))
            };
            if !available(y) {
                continue;
            }
            if !k.iter().all(|se| se.var().map(available).unwrap_or(true)) {
                continue;
            }
            // The size of r must be loop-invariant (condition 5).
            let r_ty = &loop_stm.pattern.values[r_pos].ty;
            let size_invariant = r_ty
                .shape()
                .map(|s| {
                    s.dims
                        .iter()
                        .all(|d| d.var().map(available).unwrap_or(true))
                })
                .unwrap_or(false);
            if !size_invariant {
                continue;
            }
            // Neither y nor its aliases may appear in the loop (condition
            // 7), established from the alias analysis of this body.
            let y_closure = closure_at(body, loop_idx, y);
            let loop_free = free_in_exp(&loop_stm.exp);
            if y_closure.iter().any(|a| loop_free.contains(a)) {
                continue;
            }
            if loop_body.result.len() != n_ctx + val_merge.len() {
                continue;
            }
            return Some(Forwarding {
                loop_idx,
                update_idx,
                r_pos,
            });
        }
    }
    None
}

/// Alias closure of `y` as known just before statement `at`
fn closure_at(body: &Body, at: usize, y: &VName) -> FxHashSet<VName> {
    let mut env = AliasEnv::new();
    for v in crate::ir::free::free_in_body(body) {
        env.bind_fresh(v);
    }
    for stm in body.stms.iter().take(at) {
        let info = alias::analyze_exp(&env, &stm.exp);
        alias::bind_pattern(&mut env, &stm.pattern, &info.results);
    }
    env.closure(y)
}

fn use_counts(body: &Body) -> FxHashMap<VName, usize> {
    let mut counts: FxHashMap<VName, usize> = FxHashMap::default();
    for stm in &body.stms {
        for v in free_in_stm(stm) {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    for se in &body.result {
        if let SubExp::Var(v) = se {
            *counts.entry(v.clone()).or_insert(0) += 1;
        }
    }
    counts
}

fn apply_forwarding(mut body: Body, fwd: Forwarding, ns: &mut NameSource) -> Result<Body> {
    let upd_stm = body.stms.remove(fwd.update_idx);
    let Exp::BasicOp(BasicOp::Update {
        array: y,
        indices: k,
        value: SubExp::Var(_),
    }) = upd_stm.exp
    else {
        return Err(crate::error::Error::internal(
            "in-place-lowering",
            "forwarding target is not an update".to_string(),
        ));
    };
    let x_elem = &upd_stm.pattern.values[0];

    let loop_stm = body.stms.remove(fwd.loop_idx);
    let Exp::DoLoop {
        ctx_merge,
        mut val_merge,
        form,
        body: mut loop_body,
    } = loop_stm.exp
    else {
        return Err(crate::error::Error::internal(
            "in-place-lowering",
            "forwarding source is not a loop".to_string(),
        ));
    };
    let n_ctx = ctx_merge.len();
    let val_idx = fwd.r_pos - n_ctx;

    let (old_param, old_init) = val_merge[val_idx].clone();
    let y_ty = x_elem.ty.with_uniqueness(Uniqueness::Unique);

    // Seed the destination slot with the old initial value, once, before
    // the loop.
    let seeded = ns.newname(&y);
    let seed_stm = Stm::new(
        Pattern::single(seeded.clone(), x_elem.ty.clone()),
        Exp::BasicOp(BasicOp::Update {
            array: y,
            indices: k.clone(),
            value: old_init,
        }),
    );

    // The loop now carries the whole destination array.
    let carried = ns.newname(&x_elem.name);
    val_merge[val_idx] = (
        Param::new(carried.clone(), y_ty),
        SubExp::Var(seeded),
    );

    // The old merge parameter becomes a read of the carried slot.
    loop_body.stms.insert(
        0,
        Stm::new(
            Pattern::single(old_param.name.clone(), old_param.ty.clone()),
            Exp::BasicOp(BasicOp::Index {
                array: carried.clone(),
                indices: k.clone(),
            }),
        ),
    );

    // Each iteration lands its value directly in the destination.
    let res_pos = n_ctx + val_idx;
    let produced = loop_body.result[res_pos].clone();
    let landed = ns.fresh("lowered_upd");
    loop_body.stms.push(Stm::new(
        Pattern::single(landed.clone(), x_elem.ty.clone()),
        Exp::BasicOp(BasicOp::Update {
            array: carried,
            indices: k,
            value: produced,
        }),
    ));
    loop_body.result[res_pos] = SubExp::Var(landed);

    // The loop's pattern now binds x where it bound r.
    let mut pattern = loop_stm.pattern;
    pattern.values[fwd.r_pos] = PatElem::new(x_elem.name.clone(), x_elem.ty.clone());

    let new_loop = Stm::new(
        pattern,
        Exp::DoLoop {
            ctx_merge,
            val_merge,
            form,
            body: loop_body,
        },
    );
    body.stms.insert(fwd.loop_idx, new_loop);
    body.stms.insert(fwd.loop_idx, seed_stm);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{BinOp, IntType, PrimType};
    use crate::ir::types::static_shapes;
    use crate::ir::LoopForm;
    use crate::names::NameSource;

    fn i32t() -> Type {
        Type::Prim(PrimType::Int(IntType::I32))
    }

    /// let r = loop {acc = init} for i < 10 do (acc-ish row) in
    /// let x = y with [3] <- r
    fn candidate_program(ns: &mut NameSource) -> (Program, VName, VName) {
        let row_ty = Type::array(PrimType::Int(IntType::I32), vec![SubExp::int32(4)]);
        let mat_ty = Type::array(
            PrimType::Int(IntType::I32),
            vec![SubExp::int32(8), SubExp::int32(4)],
        );
        let y = ns.fresh("y");
        let init = ns.fresh("init");
        let acc = ns.fresh("acc");
        let i = ns.fresh("i");
        let next = ns.fresh("next");
        let r = ns.fresh("r");
        let x = ns.fresh("x");

        let loop_body = Body::new(
            vec![Stm::new(
                Pattern::single(next.clone(), row_ty.clone()),
                Exp::BasicOp(BasicOp::Copy(acc.clone())),
            )],
            vec![SubExp::Var(next)],
        );
        let loop_stm = Stm::new(
            Pattern::single(r.clone(), row_ty.clone()),
            Exp::DoLoop {
                ctx_merge: vec![],
                val_merge: vec![(
                    Param::new(acc.clone(), row_ty.clone()),
                    SubExp::Var(init.clone()),
                )],
                form: LoopForm::For {
                    var: i,
                    bound: SubExp::int32(10),
                },
                body: loop_body,
            },
        );
        let upd_stm = Stm::new(
            Pattern::single(x.clone(), mat_ty.clone()),
            Exp::BasicOp(BasicOp::Update {
                array: y.clone(),
                indices: vec![SubExp::int32(3)],
                value: SubExp::Var(r.clone()),
            }),
        );
        let prog = Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![mat_ty.clone()]),
                params: vec![
                    Param::new(y.clone(), Type::Array {
                        elem: PrimType::Int(IntType::I32),
                        shape: crate::ir::types::Shape::new(vec![
                            SubExp::int32(8),
                            SubExp::int32(4),
                        ]),
                        uniqueness: Uniqueness::Unique,
                    }),
                    Param::new(init.clone(), row_ty),
                ],
                body: Body::new(vec![loop_stm, upd_stm], vec![SubExp::Var(x.clone())]),
            }],
        );
        (prog, x, r)
    }

    fn count_updates(body: &Body) -> usize {
        body.stms
            .iter()
            .filter(|s| matches!(s.exp, Exp::BasicOp(BasicOp::Update { .. })))
            .count()
    }

    #[test]
    fn test_update_moves_into_loop() {
        let mut ns = NameSource::new(1000);
        let (prog, x, _) = candidate_program(&mut ns);
        let out = in_place_lowering(prog, &mut ns).unwrap();
        let body = &out.funs[0].body;
        // The post-loop update is gone; only the pre-loop seed remains at
        // this level, and the loop's pattern now binds x.
        assert_eq!(count_updates(body), 1);
        let loop_stm = body
            .stms
            .iter()
            .find(|s| matches!(s.exp, Exp::DoLoop { .. }))
            .unwrap();
        assert_eq!(loop_stm.pattern.values[0].name, x);
        let Exp::DoLoop { body: lb, .. } = &loop_stm.exp else {
            unreachable!()
        };
        assert!(lb
            .stms
            .iter()
            .any(|s| matches!(s.exp, Exp::BasicOp(BasicOp::Update { .. }))));
    }

    #[test]
    fn test_second_use_of_r_cancels_rewrite() {
        let mut ns = NameSource::new(1000);
        let (mut prog, _, r) = candidate_program(&mut ns);
        // Make r escape through the result as well.
        prog.funs[0].body.result.push(SubExp::Var(r));
        let stms_before = prog.funs[0].body.stms.len();
        let out = in_place_lowering(prog, &mut ns).unwrap();
        assert_eq!(out.funs[0].body.stms.len(), stms_before);
    }

    #[test]
    fn test_y_used_inside_loop_cancels_rewrite() {
        let mut ns = NameSource::new(1000);
        let row_ty = Type::array(PrimType::Int(IntType::I32), vec![SubExp::int32(4)]);
        let mat_ty = Type::array(
            PrimType::Int(IntType::I32),
            vec![SubExp::int32(8), SubExp::int32(4)],
        );
        let y = ns.fresh("y");
        let init = ns.fresh("init");
        let acc = ns.fresh("acc");
        let i = ns.fresh("i");
        let next = ns.fresh("next");
        let r = ns.fresh("r");
        let x = ns.fresh("x");

        // The loop body reads y, violating condition 7.
        let loop_body = Body::new(
            vec![Stm::new(
                Pattern::single(next.clone(), row_ty.clone()),
                Exp::BasicOp(BasicOp::Index {
                    array: y.clone(),
                    indices: vec![SubExp::Var(i.clone())],
                }),
            )],
            vec![SubExp::Var(next)],
        );
        let loop_stm = Stm::new(
            Pattern::single(r.clone(), row_ty.clone()),
            Exp::DoLoop {
                ctx_merge: vec![],
                val_merge: vec![(Param::new(acc, row_ty.clone()), SubExp::Var(init.clone()))],
                form: LoopForm::For {
                    var: i,
                    bound: SubExp::int32(8),
                },
                body: loop_body,
            },
        );
        let upd_stm = Stm::new(
            Pattern::single(x.clone(), mat_ty.clone()),
            Exp::BasicOp(BasicOp::Update {
                array: y.clone(),
                indices: vec![SubExp::int32(3)],
                value: SubExp::Var(r),
            }),
        );
        let prog = Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![mat_ty.clone()]),
                params: vec![Param::new(y, mat_ty), Param::new(init, row_ty)],
                body: Body::new(vec![loop_stm, upd_stm], vec![SubExp::Var(x)]),
            }],
        );
        let out = in_place_lowering(prog, &mut ns).unwrap();
        // Both statements survive untouched.
        assert_eq!(out.funs[0].body.stms.len(), 2);
        assert!(matches!(
            out.funs[0].body.stms[1].exp,
            Exp::BasicOp(BasicOp::Update { .. })
        ));
    }

    #[test]
    fn test_body_without_loops_unchanged() {
        let mut ns = NameSource::new(0);
        let a = ns.fresh("a");
        let b = ns.fresh("b");
        let prog = Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![i32t()]),
                params: vec![Param::new(a.clone(), i32t())],
                body: Body::new(
                    vec![Stm::new(
                        Pattern::single(b.clone(), i32t()),
                        Exp::BasicOp(BasicOp::BinOp(
                            BinOp::Add(IntType::I32),
                            SubExp::Var(a),
                            SubExp::int32(1),
                        )),
                    )],
                    vec![SubExp::Var(b)],
                ),
            }],
        );
        let out = in_place_lowering(prog, &mut ns).unwrap();
        assert_eq!(out.funs[0].body.stms.len(), 1);
    }
}
