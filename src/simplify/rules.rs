//! The canonical rewrite-rule book
//!
//! Top-down rules fire while descending into a body, seeing what is in
//! scope through the symbol table. Bottom-up rules fire while ascending,
//! knowing how each bound name is used afterwards. A rule returns `None`
//! to refuse — that is the only locally handled non-error — or the
//! replacement statements.
//!
//! When several rules could fire on a statement, the one registered
//! earlier in the book wins; this keeps the simplifier deterministic.

use crate::error::Result;
use crate::ir::free::{free_in_exp, free_in_stm};
use crate::ir::prim::{self, BinOp, PrimType, PrimValue, UnOp};
use crate::ir::traverse::{map_exp, Mapper};
use crate::ir::types::{ExtType, SubExp, Type};
use crate::ir::{BasicOp, Body, Exp, LoopForm, Param, PatElem, Pattern, Stm};
use crate::names::{NameSource, VName};
use crate::simplify::symbol_table::SymbolTable;
use crate::simplify::usage::UsageTable;
use rustc_hash::{FxHashMap, FxHashSet};

/// What a top-down rule gets to see
pub struct RuleContext<'a> {
    pub st: &'a SymbolTable,
    pub ns: &'a mut NameSource,
}

/// A top-down rule; `None` means "does not apply"
pub type TopDownRule = fn(&mut RuleContext, &Stm) -> Option<Vec<Stm>>;

/// A bottom-up rule
pub type BottomUpRule = fn(&SymbolTable, &UsageTable, &mut NameSource, &Stm) -> Option<Vec<Stm>>;

/// The top-down rule book, in priority order
pub fn top_down_rules() -> &'static [(&'static str, TopDownRule)] {
    &[
        ("fold-constants", fold_constants),
        ("algebraic-identities", algebraic_identities),
        ("evaluate-assert", evaluate_assert),
        ("evaluate-branch", evaluate_branch),
        ("simplify-branch-context", simplify_branch_context),
        ("hackily-simplify-branch", hackily_simplify_branch),
        ("flatten-bool-branch", flatten_bool_branch),
        ("simplify-index", simplify_index),
        ("fuse-reshape", fuse_reshape),
        ("simplify-rearrange", simplify_rearrange),
        ("simplify-copy", simplify_copy),
        ("unroll-trivial-loop", unroll_trivial_loop),
        ("remove-invariant-merge", remove_invariant_merge),
        ("simplify-split", simplify_split),
        ("simplify-concat", simplify_concat),
    ]
}

/// The bottom-up rule book, in priority order
pub fn bottom_up_rules() -> &'static [(&'static str, BottomUpRule)] {
    &[
        ("remove-dead-stm", remove_dead_stm),
        ("remove-dead-merge-params", remove_dead_merge_params),
        ("remove-dead-branch-results", remove_dead_branch_results),
    ]
}

fn rebind(stm: &Stm, exp: Exp) -> Option<Vec<Stm>> {
    Some(vec![Stm::new(stm.pattern.clone(), exp)])
}

fn rebind_subexp(stm: &Stm, se: SubExp) -> Option<Vec<Stm>> {
    rebind(stm, Exp::BasicOp(BasicOp::SubExp(se)))
}

// ---------------------------------------------------------------------------
// Top-down rules
// ---------------------------------------------------------------------------

/// Evaluate operators whose operands resolve to constants. Folds that the
/// primitive contract refuses (zero divisors, negative exponents) simply
/// do not fire.
fn fold_constants(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let folded = match &stm.exp {
        Exp::BasicOp(BasicOp::BinOp(op, x, y)) => {
            prim::do_bin_op(*op, ctx.st.as_constant(x)?, ctx.st.as_constant(y)?)?
        }
        Exp::BasicOp(BasicOp::CmpOp(op, x, y)) => PrimValue::Bool(prim::do_cmp_op(
            *op,
            ctx.st.as_constant(x)?,
            ctx.st.as_constant(y)?,
        )?),
        Exp::BasicOp(BasicOp::UnOp(op, x)) => prim::do_un_op(*op, ctx.st.as_constant(x)?)?,
        Exp::BasicOp(BasicOp::ConvOp(op, x)) => prim::do_conv_op(*op, ctx.st.as_constant(x)?)?,
        _ => return None,
    };
    rebind_subexp(stm, SubExp::Constant(folded))
}

/// Identity and absorption laws on binary operators
fn algebraic_identities(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::BasicOp(BasicOp::BinOp(op, x, y)) = &stm.exp else {
        return None;
    };
    let xc = ctx.st.as_constant(x);
    let yc = ctx.st.as_constant(y);
    let x_zero = xc.map(PrimValue::is_zero).unwrap_or(false);
    let y_zero = yc.map(PrimValue::is_zero).unwrap_or(false);
    let x_one = xc.map(PrimValue::is_one).unwrap_or(false);
    let y_one = yc.map(PrimValue::is_one).unwrap_or(false);

    let keep_x = |stm: &Stm| rebind_subexp(stm, x.clone());
    let keep_y = |stm: &Stm| rebind_subexp(stm, y.clone());
    let zero = |stm: &Stm, pt: PrimType| rebind_subexp(stm, SubExp::Constant(PrimValue::zero(pt)?));

    match op {
        BinOp::Add(_) if y_zero => keep_x(stm),
        BinOp::Add(_) if x_zero => keep_y(stm),
        BinOp::Sub(_) if y_zero => keep_x(stm),
        BinOp::Mul(_) if y_one => keep_x(stm),
        BinOp::Mul(_) if x_one => keep_y(stm),
        BinOp::Mul(t) if x_zero || y_zero => zero(stm, PrimType::Int(*t)),
        BinOp::SDiv(_) | BinOp::UDiv(_) | BinOp::SQuot(_) if y_one => keep_x(stm),
        BinOp::SMod(t) | BinOp::UMod(t) | BinOp::SRem(t) if y_one => zero(stm, PrimType::Int(*t)),
        BinOp::Shl(_) | BinOp::LShr(_) | BinOp::AShr(_) if y_zero => keep_x(stm),
        BinOp::Shl(t) | BinOp::LShr(t) | BinOp::AShr(t) if x_zero => zero(stm, PrimType::Int(*t)),
        BinOp::And(t) if x_zero || y_zero => zero(stm, PrimType::Int(*t)),
        BinOp::Or(_) | BinOp::Xor(_) if y_zero => keep_x(stm),
        BinOp::Or(_) | BinOp::Xor(_) if x_zero => keep_y(stm),
        BinOp::Pow(_) if y_one => keep_x(stm),
        BinOp::FAdd(_) if y_zero => keep_x(stm),
        BinOp::FAdd(_) if x_zero => keep_y(stm),
        BinOp::FSub(_) if y_zero => keep_x(stm),
        BinOp::FMul(_) if y_one => keep_x(stm),
        BinOp::FMul(_) if x_one => keep_y(stm),
        BinOp::FDiv(_) if y_one => keep_x(stm),
        BinOp::LogAnd => match (xc, yc) {
            (_, Some(PrimValue::Bool(true))) => keep_x(stm),
            (Some(PrimValue::Bool(true)), _) => keep_y(stm),
            (_, Some(PrimValue::Bool(false))) | (Some(PrimValue::Bool(false)), _) => {
                rebind_subexp(stm, SubExp::Constant(PrimValue::Bool(false)))
            }
            _ => None,
        },
        BinOp::LogOr => match (xc, yc) {
            (_, Some(PrimValue::Bool(false))) => keep_x(stm),
            (Some(PrimValue::Bool(false)), _) => keep_y(stm),
            (_, Some(PrimValue::Bool(true))) | (Some(PrimValue::Bool(true)), _) => {
                rebind_subexp(stm, SubExp::Constant(PrimValue::Bool(true)))
            }
            _ => None,
        },
        _ => None,
    }
}

/// A proven assertion becomes the certificate constant
fn evaluate_assert(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::BasicOp(BasicOp::Assert { cond, .. }) = &stm.exp else {
        return None;
    };
    match ctx.st.as_constant(cond)? {
        PrimValue::Bool(true) => rebind_subexp(stm, SubExp::Constant(PrimValue::Checked)),
        // A constant-false assertion is a guaranteed runtime failure;
        // folding it away would change observable behavior.
        _ => None,
    }
}

/// Inline the taken branch of a conditional with a constant condition
fn evaluate_branch(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::If {
        cond,
        tbranch,
        fbranch,
        ..
    } = &stm.exp
    else {
        return None;
    };
    let taken = match ctx.st.as_constant(cond)? {
        PrimValue::Bool(true) => tbranch,
        PrimValue::Bool(false) => fbranch,
        _ => return None,
    };
    let mut stms = taken.stms.clone();
    let pat = &stm.pattern;
    let n_ctx = pat.context.len();
    if taken.result.len() != n_ctx + pat.values.len() {
        return None;
    }
    for (pe, se) in pat
        .context
        .iter()
        .chain(pat.values.iter())
        .zip(&taken.result)
    {
        stms.push(Stm::new(
            Pattern::single(pe.name.clone(), pe.ty.clone()),
            Exp::BasicOp(BasicOp::SubExp(se.clone())),
        ));
    }
    Some(stms)
}

/// When both branches return the same outer-visible values (and neither
/// branch does anything else), the conditional is redundant. This also
/// discharges existential-only results that agree in both branches.
fn simplify_branch_context(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::If {
        tbranch, fbranch, ..
    } = &stm.exp
    else {
        return None;
    };
    if !tbranch.stms.iter().all(|s| s.exp.is_safe())
        || !fbranch.stms.iter().all(|s| s.exp.is_safe())
    {
        return None;
    }
    if tbranch.result != fbranch.result {
        return None;
    }
    // Every returned value must be visible outside the branches.
    let outer_visible = tbranch.result.iter().all(|se| match se {
        SubExp::Constant(_) => true,
        SubExp::Var(v) => ctx.st.contains(v),
    });
    if !outer_visible {
        return None;
    }
    let pat = &stm.pattern;
    if tbranch.result.len() != pat.context.len() + pat.values.len() {
        return None;
    }
    let stms = pat
        .context
        .iter()
        .chain(pat.values.iter())
        .zip(&tbranch.result)
        .map(|(pe, se)| {
            Stm::new(
                Pattern::single(pe.name.clone(), pe.ty.clone()),
                Exp::BasicOp(BasicOp::SubExp(se.clone())),
            )
        })
        .collect();
    Some(stms)
}

/// `if c then true else false` is `c`; `if c then false else true` is
/// `!c`.
///
/// TODO: replace this and the boolean-branch flattening below with proper
/// value numbering over branch conditions.
fn hackily_simplify_branch(_ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::If {
        cond,
        tbranch,
        fbranch,
        rettype,
    } = &stm.exp
    else {
        return None;
    };
    if !tbranch.stms.is_empty() || !fbranch.stms.is_empty() {
        return None;
    }
    if rettype.len() != 1 || rettype[0] != ExtType::Prim(PrimType::Bool) {
        return None;
    }
    match (tbranch.result.as_slice(), fbranch.result.as_slice()) {
        ([SubExp::Constant(PrimValue::Bool(true))], [SubExp::Constant(PrimValue::Bool(false))]) => {
            rebind_subexp(stm, cond.clone())
        }
        ([SubExp::Constant(PrimValue::Bool(false))], [SubExp::Constant(PrimValue::Bool(true))]) => {
            rebind(stm, Exp::BasicOp(BasicOp::UnOp(UnOp::Not, cond.clone())))
        }
        _ => None,
    }
}

/// A boolean conditional over outer-visible values flattens to
/// `(c && x) || (!c && y)`
fn flatten_bool_branch(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::If {
        cond,
        tbranch,
        fbranch,
        rettype,
    } = &stm.exp
    else {
        return None;
    };
    if !tbranch.stms.is_empty() || !fbranch.stms.is_empty() {
        return None;
    }
    if rettype.len() != 1 || rettype[0] != ExtType::Prim(PrimType::Bool) {
        return None;
    }
    let (x, y) = match (tbranch.result.as_slice(), fbranch.result.as_slice()) {
        ([x], [y]) => (x.clone(), y.clone()),
        _ => return None,
    };
    let visible = |se: &SubExp| match se {
        SubExp::Constant(_) => true,
        SubExp::Var(v) => ctx.st.contains(v),
    };
    if !visible(&x) || !visible(&y) {
        return None;
    }
    let bool_ty = Type::Prim(PrimType::Bool);
    let not_c = ctx.ns.fresh("not_c");
    let then_val = ctx.ns.fresh("then_val");
    let else_val = ctx.ns.fresh("else_val");
    Some(vec![
        Stm::new(
            Pattern::single(not_c.clone(), bool_ty.clone()),
            Exp::BasicOp(BasicOp::UnOp(UnOp::Not, cond.clone())),
        ),
        Stm::new(
            Pattern::single(then_val.clone(), bool_ty.clone()),
            Exp::BasicOp(BasicOp::BinOp(BinOp::LogAnd, cond.clone(), x)),
        ),
        Stm::new(
            Pattern::single(else_val.clone(), bool_ty.clone()),
            Exp::BasicOp(BasicOp::BinOp(BinOp::LogAnd, SubExp::Var(not_c), y)),
        ),
        Stm::new(
            stm.pattern.clone(),
            Exp::BasicOp(BasicOp::BinOp(
                BinOp::LogOr,
                SubExp::Var(then_val),
                SubExp::Var(else_val),
            )),
        ),
    ])
}

/// Index into a known constructor
fn simplify_index(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::BasicOp(BasicOp::Index { array, indices }) = &stm.exp else {
        return None;
    };
    match ctx.st.lookup_basic_op(array)? {
        // iota(n)[i] is i
        BasicOp::Iota { .. } if indices.len() == 1 => rebind_subexp(stm, indices[0].clone()),
        // replicate(n, v)[i] is v; deeper indexing proceeds into v
        BasicOp::Replicate { value, .. } => {
            if indices.len() == 1 {
                rebind_subexp(stm, value.clone())
            } else if let SubExp::Var(inner) = value {
                rebind(
                    stm,
                    Exp::BasicOp(BasicOp::Index {
                        array: inner.clone(),
                        indices: indices[1..].to_vec(),
                    }),
                )
            } else {
                None
            }
        }
        BasicOp::ArrayLit { elems, .. } if indices.len() == 1 => {
            let i = match ctx.st.as_constant(&indices[0])? {
                PrimValue::Int(iv) => iv.as_i64(),
                _ => return None,
            };
            let elem = elems.get(usize::try_from(i).ok()?)?;
            rebind_subexp(stm, elem.clone())
        }
        // Indexing a transposition permutes the indices instead
        BasicOp::Rearrange { array: src, perm } if indices.len() == perm.len() => {
            let mut new_indices = vec![SubExp::int32(0); indices.len()];
            for (j, idx) in indices.iter().enumerate() {
                new_indices[perm[j]] = idx.clone();
            }
            rebind(
                stm,
                Exp::BasicOp(BasicOp::Index {
                    array: src.clone(),
                    indices: new_indices,
                }),
            )
        }
        // Reading through a copy reads the original
        BasicOp::Copy(src) => rebind(
            stm,
            Exp::BasicOp(BasicOp::Index {
                array: src.clone(),
                indices: indices.clone(),
            }),
        ),
        // Collapse nested indexing
        BasicOp::Index {
            array: src,
            indices: outer,
        } => {
            let mut all = outer.clone();
            all.extend(indices.iter().cloned());
            rebind(
                stm,
                Exp::BasicOp(BasicOp::Index {
                    array: src.clone(),
                    indices: all,
                }),
            )
        }
        _ => None,
    }
}

/// Reshape-of-reshape fuses; an identity reshape disappears
fn fuse_reshape(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::BasicOp(BasicOp::Reshape { array, new_dims }) = &stm.exp else {
        return None;
    };
    if let Some(BasicOp::Reshape { array: src, .. }) = ctx.st.lookup_basic_op(array) {
        return rebind(
            stm,
            Exp::BasicOp(BasicOp::Reshape {
                array: src.clone(),
                new_dims: new_dims.clone(),
            }),
        );
    }
    let src_ty = ctx.st.lookup_type(array)?;
    if src_ty.shape().map(|s| &s.dims) == Some(new_dims) {
        return rebind_subexp(stm, SubExp::Var(array.clone()));
    }
    None
}

/// An identity permutation disappears; stacked permutations compose
fn simplify_rearrange(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::BasicOp(BasicOp::Rearrange { array, perm }) = &stm.exp else {
        return None;
    };
    if perm.iter().enumerate().all(|(i, &p)| i == p) {
        return rebind_subexp(stm, SubExp::Var(array.clone()));
    }
    if let Some(BasicOp::Rearrange {
        array: src,
        perm: inner,
    }) = ctx.st.lookup_basic_op(array)
    {
        let composed = perm.iter().map(|&j| inner[j]).collect();
        return rebind(
            stm,
            Exp::BasicOp(BasicOp::Rearrange {
                array: src.clone(),
                perm: composed,
            }),
        );
    }
    None
}

/// Copying a fresh constructor re-emits the constructor. A copy of a
/// rearrangement is deliberately kept: materializing the transposition is
/// what makes later accesses coalesce.
fn simplify_copy(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::BasicOp(BasicOp::Copy(src)) = &stm.exp else {
        return None;
    };
    match ctx.st.lookup_basic_op(src)? {
        op @ (BasicOp::Scratch { .. }
        | BasicOp::Iota { .. }
        | BasicOp::Replicate { .. }
        | BasicOp::ArrayLit { .. }) => rebind(stm, Exp::BasicOp(op.clone())),
        BasicOp::Copy(inner) => rebind(stm, Exp::BasicOp(BasicOp::Copy(inner.clone()))),
        _ => None,
    }
}

/// Unroll loops that run zero or one time into straight-line code
fn unroll_trivial_loop(_ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::DoLoop {
        ctx_merge,
        val_merge,
        form,
        body,
    } = &stm.exp
    else {
        return None;
    };
    let LoopForm::For { var, bound } = form else {
        return None;
    };
    let trips = match bound {
        SubExp::Constant(PrimValue::Int(iv)) => iv.as_i64(),
        _ => return None,
    };
    let merge: Vec<_> = ctx_merge.iter().chain(val_merge.iter()).collect();
    let pat_elems: Vec<_> = stm.pattern.values.iter().collect();
    if pat_elems.len() != merge.len() {
        return None;
    }
    match trips {
        0 => {
            // The merge initializers are the final values.
            let stms = pat_elems
                .iter()
                .zip(&merge)
                .map(|(pe, (_, init))| {
                    Stm::new(
                        Pattern::single(pe.name.clone(), pe.ty.clone()),
                        Exp::BasicOp(BasicOp::SubExp(init.clone())),
                    )
                })
                .collect();
            Some(stms)
        }
        1 => {
            let mut stms = Vec::new();
            for (p, init) in &merge {
                stms.push(Stm::new(
                    Pattern::single(p.name.clone(), p.ty.clone()),
                    Exp::BasicOp(BasicOp::SubExp(init.clone())),
                ));
            }
            stms.push(Stm::new(
                Pattern::single(var.clone(), Type::Prim(PrimType::INDEX)),
                Exp::BasicOp(BasicOp::SubExp(SubExp::int32(0))),
            ));
            stms.extend(body.stms.iter().cloned());
            for (pe, se) in pat_elems.iter().zip(&body.result) {
                stms.push(Stm::new(
                    Pattern::single(pe.name.clone(), pe.ty.clone()),
                    Exp::BasicOp(BasicOp::SubExp(se.clone())),
                ));
            }
            Some(stms)
        }
        _ => None,
    }
}

/// Remove value merge parameters the loop never changes, substituting
/// their initial value throughout the body
fn remove_invariant_merge(_ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::DoLoop {
        ctx_merge,
        val_merge,
        form,
        body,
    } = &stm.exp
    else {
        return None;
    };
    let n_ctx = ctx_merge.len();
    if body.result.len() != n_ctx + val_merge.len()
        || stm.pattern.values.len() != n_ctx + val_merge.len()
    {
        return None;
    }
    let mut invariant = Vec::new();
    for (i, (p, init)) in val_merge.iter().enumerate() {
        // The while-condition must stay a merge parameter.
        if matches!(form, LoopForm::While { cond } if *cond == p.name) {
            continue;
        }
        let res = &body.result[n_ctx + i];
        let unchanged = *res == SubExp::Var(p.name.clone()) || res == init;
        if unchanged {
            invariant.push(i);
        }
    }
    if invariant.is_empty() {
        return None;
    }

    let mut subst = FxHashMap::default();
    let mut out = Vec::new();
    let mut kept_merge = Vec::new();
    for (i, (p, init)) in val_merge.iter().enumerate() {
        if invariant.contains(&i) {
            subst.insert(p.name.clone(), init.clone());
            // The loop's final value for this position is the initializer.
            let pe = &stm.pattern.values[n_ctx + i];
            out.push(Stm::new(
                Pattern::single(pe.name.clone(), pe.ty.clone()),
                Exp::BasicOp(BasicOp::SubExp(init.clone())),
            ));
        } else {
            kept_merge.push((p.clone(), init.clone()));
        }
    }

    let mut new_result = Vec::new();
    for (i, se) in body.result.iter().enumerate() {
        if i < n_ctx || !invariant.contains(&(i - n_ctx)) {
            new_result.push(se.clone());
        }
    }
    let new_body = substitute_subexps_body(
        &subst,
        Body::new(body.stms.clone(), new_result),
    );

    let mut new_values = Vec::new();
    for (i, pe) in stm.pattern.values.iter().enumerate() {
        if i < n_ctx || !invariant.contains(&(i - n_ctx)) {
            new_values.push(pe.clone());
        }
    }
    let new_loop = substitute_subexps_exp(
        &subst,
        Exp::DoLoop {
            ctx_merge: ctx_merge.clone(),
            val_merge: kept_merge,
            form: form.clone(),
            body: new_body,
        },
    );
    out.push(Stm::new(
        Pattern::new(stm.pattern.context.clone(), new_values),
        new_loop,
    ));
    Some(out)
}

/// A split that takes the whole array is the array
fn simplify_split(ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::BasicOp(BasicOp::Split { sizes, array }) = &stm.exp else {
        return None;
    };
    let [only] = sizes.as_slice() else {
        return None;
    };
    let src_ty = ctx.st.lookup_type(array)?;
    if src_ty.shape()?.outer_dim()? == only {
        return rebind_subexp(stm, SubExp::Var(array.clone()));
    }
    None
}

/// A concatenation of one operand is that operand
fn simplify_concat(_ctx: &mut RuleContext, stm: &Stm) -> Option<Vec<Stm>> {
    let Exp::BasicOp(BasicOp::Concat { first, rest, .. }) = &stm.exp else {
        return None;
    };
    if rest.is_empty() {
        return rebind_subexp(stm, SubExp::Var(first.clone()));
    }
    None
}

// ---------------------------------------------------------------------------
// Bottom-up rules
// ---------------------------------------------------------------------------

/// Drop a safe statement none of whose bindings are used
fn remove_dead_stm(
    _st: &SymbolTable,
    usage: &UsageTable,
    _ns: &mut NameSource,
    stm: &Stm,
) -> Option<Vec<Stm>> {
    if !stm.exp.is_safe() {
        return None;
    }
    if stm.pattern.elems().any(|pe| usage.is_used(&pe.name)) {
        return None;
    }
    Some(Vec::new())
}

/// Remove loop merge parameters whose final value nothing reads.
///
/// A parameter survives if its pattern element is used afterwards, if a
/// surviving result depends on it inside the body, or if it appears in
/// the shape of a surviving parameter's type. The statements that only
/// fed removed results are dropped with them, so the loop stays closed.
fn remove_dead_merge_params(
    _st: &SymbolTable,
    usage: &UsageTable,
    _ns: &mut NameSource,
    stm: &Stm,
) -> Option<Vec<Stm>> {
    let Exp::DoLoop {
        ctx_merge,
        val_merge,
        form,
        body,
    } = &stm.exp
    else {
        return None;
    };
    let n_ctx = ctx_merge.len();
    let n = n_ctx + val_merge.len();
    if stm.pattern.values.len() != n || body.result.len() != n {
        return None;
    }

    // Per result position: the merge parameters its value depends on.
    let param_names: FxHashSet<VName> = ctx_merge
        .iter()
        .chain(val_merge.iter())
        .map(|(p, _)| p.name.clone())
        .collect();
    let supports: Vec<FxHashSet<VName>> = body
        .result
        .iter()
        .map(|se| backward_slice_names(body, se, &param_names))
        .collect();

    // Keep context positions and the while-condition unconditionally,
    // then saturate.
    let mut needed = vec![false; n];
    for flag in needed.iter_mut().take(n_ctx) {
        *flag = true;
    }
    if let LoopForm::While { cond } = form {
        for (i, (p, _)) in ctx_merge.iter().chain(val_merge.iter()).enumerate() {
            if p.name == *cond {
                needed[i] = true;
            }
        }
    }
    for (i, pe) in stm.pattern.values.iter().enumerate() {
        if usage.is_used(&pe.name) {
            needed[i] = true;
        }
    }
    loop {
        let mut grew = false;
        let all_params: Vec<&Param> = ctx_merge
            .iter()
            .chain(val_merge.iter())
            .map(|(p, _)| p)
            .collect();
        for i in 0..n {
            if !needed[i] {
                continue;
            }
            for (j, p) in all_params.iter().enumerate() {
                if needed[j] {
                    continue;
                }
                if supports[i].contains(&p.name) || shape_mentions(&all_params[i].ty, &p.name) {
                    needed[j] = true;
                    grew = true;
                }
            }
        }
        if !grew {
            break;
        }
    }
    if needed.iter().all(|&k| k) {
        return None;
    }

    // Slice the body down to what surviving results require.
    let kept_results: Vec<SubExp> = body
        .result
        .iter()
        .enumerate()
        .filter(|(i, _)| needed[*i])
        .map(|(_, se)| se.clone())
        .collect();
    let mut live: FxHashSet<VName> = FxHashSet::default();
    for se in &kept_results {
        if let SubExp::Var(v) = se {
            live.insert(v.clone());
        }
    }
    let mut kept_stms_rev = Vec::new();
    for s in body.stms.iter().rev() {
        let binds_live = s.pattern.elems().any(|pe| live.contains(&pe.name));
        if binds_live || !s.exp.is_safe() {
            for v in free_in_stm(s) {
                live.insert(v);
            }
            kept_stms_rev.push(s.clone());
        }
    }
    kept_stms_rev.reverse();

    // A removed parameter still referenced by a surviving statement means
    // the slice was too aggressive; refuse rather than break scoping.
    for (i, p) in ctx_merge.iter().chain(val_merge.iter()).enumerate() {
        if !needed[i] && live.contains(&p.0.name) {
            return None;
        }
    }

    let filter_merge = |merge: &[(Param, SubExp)], offset: usize| {
        merge
            .iter()
            .enumerate()
            .filter(|(i, _)| needed[offset + *i])
            .map(|(_, pi)| pi.clone())
            .collect::<Vec<_>>()
    };
    let new_ctx = filter_merge(ctx_merge, 0);
    let new_val = filter_merge(val_merge, n_ctx);
    let new_values: Vec<PatElem> = stm
        .pattern
        .values
        .iter()
        .enumerate()
        .filter(|(i, _)| needed[*i])
        .map(|(_, pe)| pe.clone())
        .collect();

    Some(vec![Stm::new(
        Pattern::new(stm.pattern.context.clone(), new_values),
        Exp::DoLoop {
            ctx_merge: new_ctx,
            val_merge: new_val,
            form: form.clone(),
            body: Body::new(kept_stms_rev, kept_results),
        },
    )])
}

/// Drop branch results nothing reads (only when no existentials are in
/// play, so indices need no renumbering)
fn remove_dead_branch_results(
    _st: &SymbolTable,
    usage: &UsageTable,
    _ns: &mut NameSource,
    stm: &Stm,
) -> Option<Vec<Stm>> {
    let Exp::If {
        cond,
        tbranch,
        fbranch,
        rettype,
    } = &stm.exp
    else {
        return None;
    };
    if rettype.iter().any(ExtType::has_ext) || !stm.pattern.context.is_empty() {
        return None;
    }
    if tbranch.result.len() != rettype.len() || fbranch.result.len() != rettype.len() {
        return None;
    }
    let keep: Vec<bool> = stm
        .pattern
        .values
        .iter()
        .map(|pe| usage.is_used(&pe.name))
        .collect();
    if keep.iter().all(|&k| k) || keep.iter().all(|&k| !k) {
        // All dead is the dead-statement rule's job.
        return None;
    }
    let filter_seq = |xs: &[SubExp]| {
        xs.iter()
            .zip(&keep)
            .filter(|(_, &k)| k)
            .map(|(x, _)| x.clone())
            .collect::<Vec<_>>()
    };
    let new_rettype = rettype
        .iter()
        .zip(&keep)
        .filter(|(_, &k)| k)
        .map(|(t, _)| t.clone())
        .collect();
    let new_values = stm
        .pattern
        .values
        .iter()
        .zip(&keep)
        .filter(|(_, &k)| k)
        .map(|(pe, _)| pe.clone())
        .collect();
    Some(vec![Stm::new(
        Pattern::of_values(new_values),
        Exp::If {
            cond: cond.clone(),
            tbranch: Body::new(tbranch.stms.clone(), filter_seq(&tbranch.result)),
            fbranch: Body::new(fbranch.stms.clone(), filter_seq(&fbranch.result)),
            rettype: new_rettype,
        },
    )])
}

// ---------------------------------------------------------------------------
// Substitution of names by sub-expressions
// ---------------------------------------------------------------------------

struct SubstSubExp<'a> {
    map: &'a FxHashMap<VName, SubExp>,
}

impl Mapper for SubstSubExp<'_> {
    fn map_vname(&mut self, v: VName) -> Result<VName> {
        // Name positions (array operands) can only take variables.
        match self.map.get(&v) {
            Some(SubExp::Var(w)) => Ok(w.clone()),
            _ => Ok(v),
        }
    }

    fn map_subexp(&mut self, se: SubExp) -> Result<SubExp> {
        match se {
            SubExp::Var(v) => Ok(self.map.get(&v).cloned().unwrap_or(SubExp::Var(v))),
            c => Ok(c),
        }
    }
}

/// Replace variables by sub-expressions throughout an expression
pub fn substitute_subexps_exp(map: &FxHashMap<VName, SubExp>, e: Exp) -> Exp {
    match map_exp(&mut SubstSubExp { map }, e) {
        Ok(e) => e,
        Err(err) => unreachable!("substitution failed: {}", err),
    }
}

/// Replace variables by sub-expressions throughout a body
pub fn substitute_subexps_body(map: &FxHashMap<VName, SubExp>, b: Body) -> Body {
    match (SubstSubExp { map }).map_body(b) {
        Ok(b) => b,
        Err(err) => unreachable!("substitution failed: {}", err),
    }
}

/// Replace variables by sub-expressions throughout a statement
pub fn substitute_subexps_stm(map: &FxHashMap<VName, SubExp>, stm: Stm) -> Stm {
    let pattern = match crate::ir::traverse::map_pattern(&mut SubstSubExp { map }, stm.pattern) {
        Ok(p) => p,
        Err(err) => unreachable!("substitution failed: {}", err),
    };
    Stm {
        pattern,
        exp: substitute_subexps_exp(map, stm.exp),
    }
}

/// Replace a variable by its sub-expression, if mapped
pub fn substitute_subexps_subexp(map: &FxHashMap<VName, SubExp>, se: SubExp) -> SubExp {
    match se {
        SubExp::Var(v) => map.get(&v).cloned().unwrap_or(SubExp::Var(v)),
        c => c,
    }
}

/// The merge parameters the computation of `se` transitively depends on,
/// sliced backwards over the body's statements
fn backward_slice_names(
    body: &Body,
    se: &SubExp,
    of_interest: &FxHashSet<VName>,
) -> FxHashSet<VName> {
    let mut live = FxHashSet::default();
    if let SubExp::Var(v) = se {
        live.insert(v.clone());
    }
    for stm in body.stms.iter().rev() {
        if stm.pattern.elems().any(|pe| live.contains(&pe.name)) {
            live.extend(free_in_exp(&stm.exp));
        }
    }
    live.retain(|v| of_interest.contains(v));
    live
}

fn shape_mentions(ty: &Type, v: &VName) -> bool {
    match ty.shape() {
        Some(shape) => shape.dims.iter().any(|d| d.var() == Some(v)),
        None => false,
    }
}
