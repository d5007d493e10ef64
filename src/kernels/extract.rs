//! The distribution walk
//!
//! Walks each body outside-in. A map whose interior can be represented
//! with per-thread slices grows the kernel nest and recurses; an interior
//! that still contains sequential work is sequentialized in place and
//! becomes the per-thread body; consumption anywhere in the interior
//! cancels distribution and the whole SOAC is sequentialized instead.

use crate::error::Result;
use crate::firstorder;
use crate::ir::kernel::{KernelOp, KernelSpace, ReduceKernel};
use crate::ir::traverse::{rewrite_stm_inner, StmRewriter};
use crate::ir::types::{SubExp, Type};
use crate::ir::{Body, Exp, FunDef, Lambda, Lore, Op, Pattern, Program, Soac, Stm};
use crate::kernels::nest::{
    body_consumes, construct_kernel, expand_target, KernelNest, MapNesting, Target,
};
use crate::kernels::KernelConfig;
use crate::names::{NameSource, VName};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Extract kernels in every function
pub fn extract_kernels_with(
    prog: Program,
    ns: &mut NameSource,
    cfg: &KernelConfig,
) -> Result<Program> {
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
                body: Extractor { ns: &mut *ns, cfg }.rewrite_body(body)?,
            })
        })
        .collect::<Result<_>>()?;
    Ok(Program::new(Lore::Kernels, funs))
}

/// Statement rewriter replacing each distributable SOAC statement with
/// its kernel (or its sequentialization); everything else descends
/// generically
struct Extractor<'a> {
    ns: &'a mut NameSource,
    cfg: &'a KernelConfig,
}

impl StmRewriter for Extractor<'_> {
    fn rewrite_stm(&mut self, stm: Stm) -> Result<Vec<Stm>> {
        match stm.exp {
            Exp::Op(Op::Soac(Soac::Map {
                width,
                lambda,
                arrays,
            })) => distribute_map(self, stm.pattern, width, lambda, arrays),
            Exp::Op(Op::Soac(Soac::Reduce {
                width,
                lambda,
                inputs,
            })) => {
                let (neutrals, arrays): (Vec<_>, Vec<_>) = inputs.into_iter().unzip();
                let fold = identity_fold(&lambda, self.ns);
                emit_reduce_kernel(
                    stm.pattern,
                    width,
                    lambda,
                    fold,
                    neutrals,
                    arrays,
                    self.ns,
                    self.cfg,
                )
            }
            Exp::Op(Op::Soac(Soac::Redomap {
                width,
                red_lambda,
                map_lambda,
                neutrals,
                arrays,
            })) => emit_reduce_kernel(
                stm.pattern,
                width,
                red_lambda,
                map_lambda,
                neutrals,
                arrays,
                self.ns,
                self.cfg,
            ),
            // Scans, scatters, and streams stay sequential on this
            // backend.
            exp @ Exp::Op(Op::Soac(_)) => {
                let seq = firstorder::sequentialize_body(
                    Body::new(vec![Stm::new(stm.pattern, exp)], vec![]),
                    self.ns,
                )?;
                let mut out = Vec::with_capacity(seq.stms.len());
                for s in seq.stms {
                    out.extend(self.rewrite_stm(s)?);
                }
                Ok(out)
            }
            _ => rewrite_stm_inner(self, stm),
        }
    }
}

/// Grow a nest through the map and its interior, then build the kernel
fn distribute_map(
    ext: &mut Extractor,
    pattern: Pattern,
    width: SubExp,
    lambda: Lambda,
    arrays: Vec<VName>,
) -> Result<Vec<Stm>> {
    let mut nest = KernelNest::new();
    let mut current_lambda = lambda;
    let mut current_arrays = arrays;
    let mut current_width = width;

    let inner = loop {
        let index_var = ext.ns.fresh("gtid");
        nest.push(MapNesting {
            index_var,
            width: current_width.clone(),
            inputs: current_lambda
                .params
                .iter()
                .cloned()
                .zip(current_arrays.iter().cloned())
                .collect(),
        });

        // A body that is exactly one further map whose inputs are
        // per-thread slices extends the nest by one dimension.
        match single_inner_map(&current_lambda.body, &nest) {
            Some((w, l, a)) => {
                current_width = w;
                current_lambda = l;
                current_arrays = a;
            }
            None => break current_lambda,
        }
    };

    // Consumption anywhere in the interior cancels distribution.
    if body_consumes(&inner.body) {
        debug!("interior consumes; sequentializing the whole nest");
        return sequentialize_whole(ext, pattern, nest, inner);
    }

    // Any remaining interior SOACs run sequentially inside each thread.
    let body = if contains_soac(&inner.body) {
        firstorder::sequentialize_body(inner.body.clone(), ext.ns)?
    } else {
        inner.body.clone()
    };

    // Identity-mapped outputs (results invariant to the nest) are elided
    // from the kernel and expanded back at the use site.
    let target = Target {
        pattern: pattern.clone(),
    };
    let mut elided: FxHashMap<usize, SubExp> = FxHashMap::default();
    let mut kept_results = Vec::new();
    let mut kept_returns = Vec::new();
    for (i, (se, rt)) in body.result.iter().zip(&inner.rettype).enumerate() {
        let invariant = match se {
            SubExp::Constant(_) => true,
            SubExp::Var(v) => {
                nest.param_level(v).is_none()
                    && !body.stms.iter().any(|s| s.pattern.names().contains(v))
            }
        };
        if invariant {
            elided.insert(i, se.clone());
        } else {
            kept_results.push(se.clone());
            kept_returns.push(rt.clone());
        }
    }

    let widths: Vec<SubExp> = nest.nestings().iter().map(|n| n.width.clone()).collect();
    let (rep_stms, kept_elems) = expand_target(&target, &elided, &widths, ext.ns)?;

    if kept_elems.is_empty() {
        // Everything was invariant; no kernel needed at all.
        return Ok(rep_stms);
    }

    let kernel_body = Body::new(body.stms, kept_results);
    let (prologue, kernel) = construct_kernel(&nest, kernel_body, kept_returns, ext.ns)?;
    let mut out = prologue;

    let kernel_exp = match super::peephole(&kernel) {
        Some(basic) => {
            debug!("kernel degenerated to a host operation");
            Exp::BasicOp(basic)
        }
        None => Exp::Op(Op::Kernel(kernel)),
    };
    out.push(Stm::new(Pattern::of_values(kept_elems), kernel_exp));
    out.extend(rep_stms);
    Ok(out)
}

/// The interior, when it is exactly one further distributable map
fn single_inner_map(body: &Body, nest: &KernelNest) -> Option<(SubExp, Lambda, Vec<VName>)> {
    let [stm] = body.stms.as_slice() else {
        return None;
    };
    let Exp::Op(Op::Soac(Soac::Map {
        width,
        lambda,
        arrays,
    })) = &stm.exp
    else {
        return None;
    };
    // The result must be the inner map's outputs, in order.
    let names = stm.pattern.names();
    if body.result.len() != names.len() {
        return None;
    }
    for (se, n) in body.result.iter().zip(&names) {
        if se.var() != Some(n) {
            return None;
        }
    }
    // Every dependency is a per-thread slice here by construction: the
    // interior holds nothing but this map, so its arrays are either
    // enclosing lambda parameters or bound outside the nest. The width,
    // however, must not vary per thread.
    let width_ok = match width.var() {
        Some(v) => nest.param_level(v).is_none(),
        None => true,
    };
    if width_ok {
        Some((width.clone(), lambda.clone(), arrays.clone()))
    } else {
        None
    }
}

fn contains_soac(body: &Body) -> bool {
    body.stms.iter().any(|s| match &s.exp {
        Exp::Op(Op::Soac(_)) => true,
        Exp::If {
            tbranch, fbranch, ..
        } => contains_soac(tbranch) || contains_soac(fbranch),
        Exp::DoLoop { body, .. } => contains_soac(body),
        _ => false,
    })
}

/// Rebuild the original nested map and run it through the first-order
/// transform
fn sequentialize_whole(
    ext: &mut Extractor,
    pattern: Pattern,
    nest: KernelNest,
    inner: Lambda,
) -> Result<Vec<Stm>> {
    // Reconstruct the nested map from the nest stack, innermost first.
    let mut lambda = inner;
    let nestings = nest.nestings();
    for level in (1..nestings.len()).rev() {
        let n = &nestings[level];
        let rettype = lambda
            .rettype
            .iter()
            .map(|t| {
                t.array_of(n.width.clone()).ok_or_else(|| {
                    crate::error::Error::internal(
                        "kernel-extraction",
                        "nested map over memory blocks".to_string(),
                    )
                })
            })
            .collect::<Result<Vec<Type>>>()?;
        let out_names: Vec<VName> = rettype.iter().map(|_| ext.ns.fresh("seq_out")).collect();
        let inner_pattern = Pattern::of_values(
            out_names
                .iter()
                .cloned()
                .zip(rettype.iter().cloned())
                .map(|(name, ty)| crate::ir::PatElem::new(name, ty))
                .collect(),
        );
        let result = out_names.into_iter().map(SubExp::Var).collect();
        let body = Body::new(
            vec![Stm::new(
                inner_pattern,
                Exp::Op(Op::Soac(Soac::Map {
                    width: n.width.clone(),
                    lambda,
                    arrays: n.inputs.iter().map(|(_, a)| a.clone()).collect(),
                })),
            )],
            result,
        );
        lambda = Lambda::new(
            nestings[level - 1]
                .inputs
                .iter()
                .map(|(p, _)| p.clone())
                .collect(),
            body,
            rettype,
        );
    }
    let outermost = &nestings[0];
    let rebuilt = Stm::new(
        pattern,
        Exp::Op(Op::Soac(Soac::Map {
            width: outermost.width.clone(),
            lambda,
            arrays: outermost.inputs.iter().map(|(_, a)| a.clone()).collect(),
        })),
    );
    let seq = firstorder::sequentialize_body(Body::new(vec![rebuilt], vec![]), ext.ns)?;
    let mut out = Vec::with_capacity(seq.stms.len());
    for s in seq.stms {
        out.extend(ext.rewrite_stm(s)?);
    }
    Ok(out)
}

/// Emit a reduction kernel with the workgroup/wave template
#[allow(clippy::too_many_arguments)]
fn emit_reduce_kernel(
    pattern: Pattern,
    width: SubExp,
    red_lambda: Lambda,
    fold_lambda: Lambda,
    neutrals: Vec<SubExp>,
    arrays: Vec<VName>,
    ns: &mut NameSource,
    cfg: &KernelConfig,
) -> Result<Vec<Stm>> {
    let mut uses: Vec<VName> = crate::ir::free::free_in_lambda(&red_lambda)
        .into_iter()
        .chain(crate::ir::free::free_in_lambda(&fold_lambda))
        .collect();
    uses.extend(arrays.iter().cloned());
    for se in neutrals.iter().chain(std::iter::once(&width)) {
        if let SubExp::Var(v) = se {
            uses.push(v.clone());
        }
    }
    uses.sort();
    uses.dedup();

    let space = KernelSpace {
        dims: vec![(ns.fresh("gtid"), width.clone())],
        flat_id: ns.fresh("flat_tid"),
        num_threads: width,
    };
    Ok(vec![Stm::new(
        pattern,
        Exp::Op(Op::Kernel(KernelOp::ReduceKernel(ReduceKernel {
            space,
            uses,
            red_lambda,
            fold_lambda,
            neutrals,
            arrays,
            workgroup_size: SubExp::int32(cfg.workgroup_size),
            wave_width: SubExp::int32(cfg.wave_width),
        }))),
    )])
}

/// The identity per-element transformation for a plain reduce
fn identity_fold(red_lambda: &Lambda, ns: &mut NameSource) -> Lambda {
    let n_acc = red_lambda.params.len() / 2;
    let params: Vec<_> = red_lambda.params[n_acc..]
        .iter()
        .map(|p| crate::ir::Param::new(ns.newname(&p.name), p.ty.clone()))
        .collect();
    let result = params.iter().map(|p| SubExp::Var(p.name.clone())).collect();
    let rettype = params.iter().map(|p| p.ty.clone()).collect();
    Lambda::new(params, Body::result_only(result), rettype)
}
