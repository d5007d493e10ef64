//! The first-order transform
//!
//! Rewrites every SOAC into an equivalent `DoLoop` nest: maps become
//! element-wise update loops over scratch destinations, reductions and
//! scans become accumulating loops, scatters become guarded-update loops.
//! The output is a SOACS-lore program with no `Op` nodes, suitable for
//! sequential code generation.

use crate::error::{Error, Result};
use crate::ir::build::StmBuilder;
use crate::ir::prim::{BinOp, CmpOp, IntType, PrimType, PrimValue};
use crate::ir::traverse::{rewrite_stm_inner, StmRewriter};
use crate::ir::types::{static_shapes, SubExp, Type};
use crate::ir::{
    BasicOp, Body, Exp, FunDef, Lambda, LoopForm, Lore, Op, Param, PatElem, Pattern, Program,
    Soac, Stm,
};
use crate::names::{NameSource, VName};
use crate::pass::Pass;

const PASS: &str = "first-order-transform";

/// The transform as a pipeline pass
pub fn pass() -> Pass {
    Pass::new(PASS, Lore::Soacs, Lore::Soacs, first_order_transform)
}

/// Rewrite every SOAC in the program into loops
pub fn first_order_transform(prog: Program, ns: &mut NameSource) -> Result<Program> {
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
                body: FirstOrder { ns: &mut *ns }.rewrite_body(body)?,
            })
        })
        .collect::<Result<_>>()?;
    Ok(Program::new(Lore::Soacs, funs))
}

/// Rewrite the SOACs of one body into loops; used by kernel extraction
/// to sequentialize interiors it cannot distribute
pub fn sequentialize_body(body: Body, ns: &mut NameSource) -> Result<Body> {
    FirstOrder { ns }.rewrite_body(body)
}

/// Statement rewriter replacing each SOAC statement with its loop
/// expansion; everything else descends generically
struct FirstOrder<'a> {
    ns: &'a mut NameSource,
}

impl StmRewriter for FirstOrder<'_> {
    fn rewrite_stm(&mut self, stm: Stm) -> Result<Vec<Stm>> {
        match stm.exp {
            Exp::Op(Op::Soac(soac)) => {
                let expanded = expand_soac(&stm.pattern, soac, self.ns)?;
                // Spliced lambda bodies may contain further SOACs.
                let mut out = Vec::with_capacity(expanded.len());
                for s in expanded {
                    out.extend(self.rewrite_stm(s)?);
                }
                Ok(out)
            }
            _ => rewrite_stm_inner(self, stm),
        }
    }
}

fn expand_soac(pattern: &Pattern, soac: Soac, ns: &mut NameSource) -> Result<Vec<Stm>> {
    match soac {
        Soac::Map {
            width,
            lambda,
            arrays,
        } => expand_map(pattern, width, lambda, arrays, ns),
        Soac::Reduce {
            width,
            lambda,
            inputs,
        } => expand_reduce(pattern, width, lambda, inputs, ns),
        Soac::Scan {
            width,
            lambda,
            inputs,
        } => expand_scan(pattern, width, lambda, inputs, ns),
        Soac::Redomap {
            width,
            red_lambda,
            map_lambda,
            neutrals,
            arrays,
        } => expand_redomap(pattern, width, red_lambda, map_lambda, neutrals, arrays, ns),
        Soac::Stream {
            width,
            accs,
            lambda,
            arrays,
        } => expand_stream(pattern, width, accs, lambda, arrays),
        Soac::Write {
            width,
            lambda,
            arrays,
            dests,
        } => expand_write(pattern, width, lambda, arrays, dests, ns),
    }
}

/// Bind the lambda's element parameters to the current input elements
fn bind_input_elems(
    stms: &mut Vec<Stm>,
    params: &[Param],
    arrays: &[VName],
    i: &VName,
) -> Result<()> {
    if params.len() != arrays.len() {
        return Err(Error::internal(
            PASS,
            format!(
                "lambda takes {} element parameters but the SOAC has {} inputs",
                params.len(),
                arrays.len()
            ),
        ));
    }
    for (p, arr) in params.iter().zip(arrays) {
        stms.push(Stm::new(
            Pattern::single(p.name.clone(), p.ty.clone()),
            Exp::BasicOp(BasicOp::Index {
                array: arr.clone(),
                indices: vec![SubExp::Var(i.clone())],
            }),
        ));
    }
    Ok(())
}

fn scratch_for(ty: &Type, width: &SubExp) -> Result<BasicOp> {
    let (elem, mut dims) = match ty {
        Type::Prim(pt) => (*pt, Vec::new()),
        Type::Array { elem, shape, .. } => (*elem, shape.dims.clone()),
        Type::Mem { .. } => {
            return Err(Error::internal(PASS, "scratch of a memory block".to_string()))
        }
    };
    dims.insert(0, width.clone());
    Ok(BasicOp::Scratch { elem, dims })
}

fn expand_map(
    pattern: &Pattern,
    width: SubExp,
    lambda: Lambda,
    arrays: Vec<VName>,
    ns: &mut NameSource,
) -> Result<Vec<Stm>> {
    let mut b = StmBuilder::new(ns);

    // One scratch destination per output, updated element by element.
    let mut merge = Vec::with_capacity(lambda.rettype.len());
    for rt in &lambda.rettype {
        let scratch = scratch_for(rt, &width)?;
        let dest_ty = rt
            .array_of(width.clone())
            .ok_or_else(|| Error::internal(PASS, "map produces a memory block".to_string()))?;
        let dest = b.let_bind("map_dest", dest_ty.clone(), Exp::BasicOp(scratch));
        let acc = b.names().fresh("map_acc");
        merge.push((Param::new(acc, dest_ty), SubExp::Var(dest)));
    }

    let i = b.names().fresh("i");
    let mut body_stms = Vec::new();
    bind_input_elems(&mut body_stms, &lambda.params, &arrays, &i)?;
    body_stms.extend(lambda.body.stms);

    let mut body_result = Vec::with_capacity(merge.len());
    for ((acc_param, _), value) in merge.iter().zip(&lambda.body.result) {
        let upd = b.names().fresh("map_upd");
        body_stms.push(Stm::new(
            Pattern::single(upd.clone(), acc_param.ty.clone()),
            Exp::BasicOp(BasicOp::Update {
                array: acc_param.name.clone(),
                indices: vec![SubExp::Var(i.clone())],
                value: value.clone(),
            }),
        ));
        body_result.push(SubExp::Var(upd));
    }

    b.push(Stm::new(
        pattern.clone(),
        Exp::DoLoop {
            ctx_merge: vec![],
            val_merge: merge,
            form: LoopForm::For { var: i, bound: width },
            body: Body::new(body_stms, body_result),
        },
    ));
    Ok(b.into_stms())
}

fn expand_reduce(
    pattern: &Pattern,
    width: SubExp,
    lambda: Lambda,
    inputs: Vec<(SubExp, VName)>,
    ns: &mut NameSource,
) -> Result<Vec<Stm>> {
    let n_acc = inputs.len();
    if lambda.params.len() != n_acc * 2 {
        return Err(Error::internal(
            PASS,
            "reduction operator arity disagrees with its inputs".to_string(),
        ));
    }
    let i = ns.fresh("i");

    // The accumulator parameters become the merge parameters directly.
    let merge: Vec<(Param, SubExp)> = lambda.params[..n_acc]
        .iter()
        .cloned()
        .zip(inputs.iter().map(|(ne, _)| ne.clone()))
        .collect();
    let arrays: Vec<VName> = inputs.into_iter().map(|(_, a)| a).collect();

    let mut body_stms = Vec::new();
    bind_input_elems(&mut body_stms, &lambda.params[n_acc..], &arrays, &i)?;
    body_stms.extend(lambda.body.stms);

    Ok(vec![Stm::new(
        pattern.clone(),
        Exp::DoLoop {
            ctx_merge: vec![],
            val_merge: merge,
            form: LoopForm::For { var: i, bound: width },
            body: Body::new(body_stms, lambda.body.result),
        },
    )])
}

fn expand_scan(
    pattern: &Pattern,
    width: SubExp,
    lambda: Lambda,
    inputs: Vec<(SubExp, VName)>,
    ns: &mut NameSource,
) -> Result<Vec<Stm>> {
    let n_acc = inputs.len();
    if lambda.params.len() != n_acc * 2 {
        return Err(Error::internal(
            PASS,
            "scan operator arity disagrees with its inputs".to_string(),
        ));
    }
    let mut b = StmBuilder::new(ns);

    // Running accumulators plus one destination array per input.
    let mut dest_merge = Vec::with_capacity(n_acc);
    for (acc_param, _) in lambda.params[..n_acc].iter().zip(&inputs) {
        let scratch = scratch_for(&acc_param.ty, &width)?;
        let dest_ty = acc_param
            .ty
            .array_of(width.clone())
            .ok_or_else(|| Error::internal(PASS, "scan of memory blocks".to_string()))?;
        let dest = b.let_bind("scan_dest", dest_ty.clone(), Exp::BasicOp(scratch));
        let acc = b.names().fresh("scan_out");
        dest_merge.push((Param::new(acc, dest_ty), SubExp::Var(dest)));
    }

    let i = b.names().fresh("i");
    let acc_merge: Vec<(Param, SubExp)> = lambda.params[..n_acc]
        .iter()
        .cloned()
        .zip(inputs.iter().map(|(ne, _)| ne.clone()))
        .collect();
    let arrays: Vec<VName> = inputs.into_iter().map(|(_, a)| a).collect();

    let mut body_stms = Vec::new();
    bind_input_elems(&mut body_stms, &lambda.params[n_acc..], &arrays, &i)?;
    body_stms.extend(lambda.body.stms);

    let mut body_result: Vec<SubExp> = lambda.body.result.clone();
    for ((dest_param, _), new_acc) in dest_merge.iter().zip(&lambda.body.result) {
        let upd = b.names().fresh("scan_upd");
        body_stms.push(Stm::new(
            Pattern::single(upd.clone(), dest_param.ty.clone()),
            Exp::BasicOp(BasicOp::Update {
                array: dest_param.name.clone(),
                indices: vec![SubExp::Var(i.clone())],
                value: new_acc.clone(),
            }),
        ));
        body_result.push(SubExp::Var(upd));
    }

    // The loop yields accumulators then arrays; the pattern only wants
    // the arrays, so the accumulators land in fresh throwaway names.
    let mut loop_values = Vec::with_capacity(n_acc * 2);
    for (p, _) in &acc_merge {
        let final_acc = b.names().fresh("scan_final");
        loop_values.push(PatElem::new(final_acc, p.ty.clone()));
    }
    loop_values.extend(pattern.values.iter().cloned());

    let mut merge = acc_merge;
    merge.extend(dest_merge);
    b.push(Stm::new(
        Pattern::new(pattern.context.clone(), loop_values),
        Exp::DoLoop {
            ctx_merge: vec![],
            val_merge: merge,
            form: LoopForm::For { var: i, bound: width },
            body: Body::new(body_stms, body_result),
        },
    ));
    Ok(b.into_stms())
}

#[allow(clippy::too_many_arguments)]
fn expand_redomap(
    pattern: &Pattern,
    width: SubExp,
    red_lambda: Lambda,
    map_lambda: Lambda,
    neutrals: Vec<SubExp>,
    arrays: Vec<VName>,
    ns: &mut NameSource,
) -> Result<Vec<Stm>> {
    let n_acc = neutrals.len();
    if red_lambda.params.len() != n_acc * 2 {
        return Err(Error::internal(
            PASS,
            "redomap operator arity disagrees with its neutral elements".to_string(),
        ));
    }
    let i = ns.fresh("i");

    let merge: Vec<(Param, SubExp)> = red_lambda.params[..n_acc]
        .iter()
        .cloned()
        .zip(neutrals)
        .collect();

    let mut body_stms = Vec::new();
    bind_input_elems(&mut body_stms, &map_lambda.params, &arrays, &i)?;
    body_stms.extend(map_lambda.body.stms);
    // Feed the mapped values into the second half of the reduction
    // operator's parameters.
    for (p, se) in red_lambda.params[n_acc..]
        .iter()
        .zip(&map_lambda.body.result)
    {
        body_stms.push(Stm::new(
            Pattern::single(p.name.clone(), p.ty.clone()),
            Exp::BasicOp(BasicOp::SubExp(se.clone())),
        ));
    }
    body_stms.extend(red_lambda.body.stms);

    Ok(vec![Stm::new(
        pattern.clone(),
        Exp::DoLoop {
            ctx_merge: vec![],
            val_merge: merge,
            form: LoopForm::For { var: i, bound: width },
            body: Body::new(body_stms, red_lambda.body.result),
        },
    )])
}

fn expand_stream(
    pattern: &Pattern,
    width: SubExp,
    accs: Vec<SubExp>,
    lambda: Lambda,
    arrays: Vec<VName>,
) -> Result<Vec<Stm>> {
    // Sequentially, the stream runs as one maximal chunk: bind the chunk
    // size to the full width, the accumulator parameters to their initial
    // values, and the chunk arrays to the whole inputs.
    let n_acc = accs.len();
    if lambda.params.len() != 1 + n_acc + arrays.len() {
        return Err(Error::internal(
            PASS,
            "stream lambda arity disagrees with its inputs".to_string(),
        ));
    }
    let mut stms = Vec::new();
    let chunk_param = &lambda.params[0];
    stms.push(Stm::new(
        Pattern::single(chunk_param.name.clone(), chunk_param.ty.clone()),
        Exp::BasicOp(BasicOp::SubExp(width)),
    ));
    for (p, se) in lambda.params[1..1 + n_acc].iter().zip(&accs) {
        stms.push(Stm::new(
            Pattern::single(p.name.clone(), p.ty.clone()),
            Exp::BasicOp(BasicOp::SubExp(se.clone())),
        ));
    }
    for (p, arr) in lambda.params[1 + n_acc..].iter().zip(&arrays) {
        // The chunk parameter's type names the chunk size, so the input
        // is viewed through that shape rather than bound directly.
        let dims = match &p.ty {
            Type::Array { shape, .. } => shape.dims.clone(),
            _ => {
                return Err(Error::internal(
                    PASS,
                    "stream chunk parameter is not an array".to_string(),
                ))
            }
        };
        stms.push(Stm::new(
            Pattern::single(p.name.clone(), p.ty.clone()),
            Exp::BasicOp(BasicOp::Reshape {
                array: arr.clone(),
                new_dims: dims,
            }),
        ));
    }
    stms.extend(lambda.body.stms);
    for (pe, se) in pattern.values.iter().zip(&lambda.body.result) {
        stms.push(Stm::new(
            Pattern::single(pe.name.clone(), pe.ty.clone()),
            Exp::BasicOp(BasicOp::SubExp(se.clone())),
        ));
    }
    Ok(stms)
}

fn expand_write(
    pattern: &Pattern,
    width: SubExp,
    lambda: Lambda,
    arrays: Vec<VName>,
    dests: Vec<VName>,
    ns: &mut NameSource,
) -> Result<Vec<Stm>> {
    let n_dest = dests.len();
    if lambda.rettype.len() != n_dest * 2 {
        return Err(Error::internal(
            PASS,
            "scatter lambda arity disagrees with its destinations".to_string(),
        ));
    }
    let i = ns.fresh("i");

    // Destinations ride along as merge parameters; each iteration lands a
    // guarded in-place update (out-of-bounds indices write nothing).
    let mut merge = Vec::with_capacity(n_dest);
    for (pe, dest) in pattern.values.iter().zip(&dests) {
        let acc = ns.newname(dest);
        merge.push((Param::new(acc, pe.ty.clone()), SubExp::Var(dest.clone())));
    }

    let mut body_stms = Vec::new();
    bind_input_elems(&mut body_stms, &lambda.params, &arrays, &i)?;
    body_stms.extend(lambda.body.stms);

    let mut body_result = Vec::with_capacity(n_dest);
    for (j, (acc_param, _)) in merge.iter().enumerate() {
        let idx = lambda.body.result[j].clone();
        let val = lambda.body.result[n_dest + j].clone();
        let len = acc_param
            .ty
            .shape()
            .and_then(|s| s.outer_dim())
            .cloned()
            .ok_or_else(|| Error::internal(PASS, "scatter into a non-array".to_string()))?;

        let bool_ty = Type::Prim(PrimType::Bool);
        let nonneg = ns.fresh("write_nonneg");
        body_stms.push(Stm::new(
            Pattern::single(nonneg.clone(), bool_ty.clone()),
            Exp::BasicOp(BasicOp::CmpOp(
                CmpOp::CmpSle(IntType::I32),
                SubExp::Constant(PrimValue::int32(0)),
                idx.clone(),
            )),
        ));
        let below = ns.fresh("write_below");
        body_stms.push(Stm::new(
            Pattern::single(below.clone(), bool_ty.clone()),
            Exp::BasicOp(BasicOp::CmpOp(
                CmpOp::CmpSlt(IntType::I32),
                idx.clone(),
                len,
            )),
        ));
        let in_bounds = ns.fresh("write_in_bounds");
        body_stms.push(Stm::new(
            Pattern::single(in_bounds.clone(), bool_ty),
            Exp::BasicOp(BasicOp::BinOp(
                BinOp::LogAnd,
                SubExp::Var(nonneg),
                SubExp::Var(below),
            )),
        ));

        let upd = ns.fresh("write_upd");
        let tbranch = Body::new(
            vec![Stm::new(
                Pattern::single(upd.clone(), acc_param.ty.clone()),
                Exp::BasicOp(BasicOp::Update {
                    array: acc_param.name.clone(),
                    indices: vec![idx],
                    value: val,
                }),
            )],
            vec![SubExp::Var(upd)],
        );
        let fbranch = Body::result_only(vec![SubExp::Var(acc_param.name.clone())]);
        let landed = ns.fresh("write_landed");
        body_stms.push(Stm::new(
            Pattern::single(landed.clone(), acc_param.ty.clone()),
            Exp::If {
                cond: SubExp::Var(in_bounds),
                tbranch,
                fbranch,
                rettype: static_shapes(vec![acc_param.ty.clone()]),
            },
        ));
        body_result.push(SubExp::Var(landed));
    }

    Ok(vec![Stm::new(
        pattern.clone(),
        Exp::DoLoop {
            ctx_merge: vec![],
            val_merge: merge,
            form: LoopForm::For { var: i, bound: width },
            body: Body::new(body_stms, body_result),
        },
    )])
}
