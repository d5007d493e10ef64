//! Generic traversal of the IR
//!
//! Three recursors, all defaulting to a deep traversal: every hook's
//! default implementation recurses through the corresponding `_inner`
//! helper, so a client overrides exactly the slots it cares about and
//! inherits full recursion everywhere else.
//!
//! - [`Mapper`] rebuilds terms one sub-term at a time (substitution, the
//!   renamer).
//! - [`Walker`] visits terms without rebuilding (free variables).
//! - [`StmRewriter`] rebuilds at statement granularity: a hook may
//!   replace one statement with several, which is what per-construct
//!   lowering needs. The transformation passes descend through this.
//!
//! Binding occurrences (pattern names, parameter names, loop variables)
//! flow through `map_vname`/`walk_vname` like uses do; clients that care
//! about the distinction (the free-variable computation, the renamer)
//! override the body/lambda hooks to manage scope themselves.

use crate::error::Result;
use crate::ir::kernel::{Kernel, KernelInput, KernelOp, KernelSpace, ReduceKernel};
use crate::ir::types::{ExtDim, ExtShape, ExtType, Shape, SubExp, Type};
use crate::ir::{BasicOp, Body, Exp, Lambda, LoopForm, Op, Param, PatElem, Pattern, Soac, Stm};
use crate::memory::{IxFun, MemSummary};
use crate::names::VName;

/// Rebuilding traversal
pub trait Mapper {
    fn map_vname(&mut self, v: VName) -> Result<VName> {
        Ok(v)
    }

    fn map_subexp(&mut self, se: SubExp) -> Result<SubExp> {
        map_subexp_inner(self, se)
    }

    fn map_type(&mut self, t: Type) -> Result<Type> {
        map_type_inner(self, t)
    }

    fn map_ext_type(&mut self, t: ExtType) -> Result<ExtType> {
        map_ext_type_inner(self, t)
    }

    fn map_summary(&mut self, s: MemSummary) -> Result<MemSummary> {
        map_summary_inner(self, s)
    }

    fn map_body(&mut self, b: Body) -> Result<Body> {
        map_body_inner(self, b)
    }

    fn map_lambda(&mut self, l: Lambda) -> Result<Lambda> {
        map_lambda_inner(self, l)
    }

    fn map_op(&mut self, op: Op) -> Result<Op> {
        map_op_inner(self, op)
    }
}

pub fn map_subexp_inner<M: Mapper + ?Sized>(m: &mut M, se: SubExp) -> Result<SubExp> {
    match se {
        SubExp::Var(v) => Ok(SubExp::Var(m.map_vname(v)?)),
        c @ SubExp::Constant(_) => Ok(c),
    }
}

pub fn map_type_inner<M: Mapper + ?Sized>(m: &mut M, t: Type) -> Result<Type> {
    match t {
        Type::Prim(pt) => Ok(Type::Prim(pt)),
        Type::Array {
            elem,
            shape,
            uniqueness,
        } => {
            let dims = shape
                .dims
                .into_iter()
                .map(|d| m.map_subexp(d))
                .collect::<Result<_>>()?;
            Ok(Type::Array {
                elem,
                shape: Shape::new(dims),
                uniqueness,
            })
        }
        Type::Mem { size, space } => Ok(Type::Mem {
            size: m.map_subexp(size)?,
            space,
        }),
    }
}

pub fn map_ext_type_inner<M: Mapper + ?Sized>(m: &mut M, t: ExtType) -> Result<ExtType> {
    match t {
        ExtType::Prim(pt) => Ok(ExtType::Prim(pt)),
        ExtType::Array {
            elem,
            shape,
            uniqueness,
        } => {
            let dims = shape
                .dims
                .into_iter()
                .map(|d| match d {
                    ExtDim::Free(se) => Ok(ExtDim::Free(m.map_subexp(se)?)),
                    e @ ExtDim::Ext(_) => Ok(e),
                })
                .collect::<Result<_>>()?;
            Ok(ExtType::Array {
                elem,
                shape: ExtShape::new(dims),
                uniqueness,
            })
        }
        ExtType::Mem { size, space } => {
            let size = match size {
                ExtDim::Free(se) => ExtDim::Free(m.map_subexp(se)?),
                e @ ExtDim::Ext(_) => e,
            };
            Ok(ExtType::Mem { size, space })
        }
    }
}

pub fn map_ixfun<M: Mapper + ?Sized>(m: &mut M, ix: IxFun) -> Result<IxFun> {
    let map_dims = |m: &mut M, dims: Vec<SubExp>| -> Result<Vec<SubExp>> {
        dims.into_iter().map(|d| m.map_subexp(d)).collect()
    };
    match ix {
        IxFun::Iota(shape) => Ok(IxFun::Iota(map_dims(m, shape)?)),
        IxFun::Offset(base, off) => Ok(IxFun::Offset(
            Box::new(map_ixfun(m, *base)?),
            m.map_subexp(off)?,
        )),
        IxFun::Permute(base, perm) => Ok(IxFun::Permute(Box::new(map_ixfun(m, *base)?), perm)),
        IxFun::Reshape(base, shape) => Ok(IxFun::Reshape(
            Box::new(map_ixfun(m, *base)?),
            map_dims(m, shape)?,
        )),
        IxFun::Index(base, idxs) => Ok(IxFun::Index(
            Box::new(map_ixfun(m, *base)?),
            map_dims(m, idxs)?,
        )),
    }
}

pub fn map_summary_inner<M: Mapper + ?Sized>(m: &mut M, s: MemSummary) -> Result<MemSummary> {
    match s {
        MemSummary::Scalar => Ok(MemSummary::Scalar),
        MemSummary::Array { mem, ixfun } => Ok(MemSummary::Array {
            mem: m.map_vname(mem)?,
            ixfun: map_ixfun(m, ixfun)?,
        }),
    }
}

pub fn map_pat_elem<M: Mapper + ?Sized>(m: &mut M, pe: PatElem) -> Result<PatElem> {
    Ok(PatElem {
        name: m.map_vname(pe.name)?,
        ty: m.map_type(pe.ty)?,
        summary: pe.summary.map(|s| m.map_summary(s)).transpose()?,
    })
}

pub fn map_pattern<M: Mapper + ?Sized>(m: &mut M, p: Pattern) -> Result<Pattern> {
    Ok(Pattern {
        context: p
            .context
            .into_iter()
            .map(|pe| map_pat_elem(m, pe))
            .collect::<Result<_>>()?,
        values: p
            .values
            .into_iter()
            .map(|pe| map_pat_elem(m, pe))
            .collect::<Result<_>>()?,
    })
}

pub fn map_param<M: Mapper + ?Sized>(m: &mut M, p: Param) -> Result<Param> {
    Ok(Param {
        name: m.map_vname(p.name)?,
        ty: m.map_type(p.ty)?,
        summary: p.summary.map(|s| m.map_summary(s)).transpose()?,
    })
}

pub fn map_body_inner<M: Mapper + ?Sized>(m: &mut M, b: Body) -> Result<Body> {
    let stms = b
        .stms
        .into_iter()
        .map(|stm| {
            Ok(Stm {
                pattern: map_pattern(m, stm.pattern)?,
                exp: map_exp(m, stm.exp)?,
            })
        })
        .collect::<Result<_>>()?;
    let result = b
        .result
        .into_iter()
        .map(|se| m.map_subexp(se))
        .collect::<Result<_>>()?;
    Ok(Body { stms, result })
}

pub fn map_lambda_inner<M: Mapper + ?Sized>(m: &mut M, l: Lambda) -> Result<Lambda> {
    Ok(Lambda {
        params: l
            .params
            .into_iter()
            .map(|p| map_param(m, p))
            .collect::<Result<_>>()?,
        body: m.map_body(l.body)?,
        rettype: l
            .rettype
            .into_iter()
            .map(|t| m.map_type(t))
            .collect::<Result<_>>()?,
    })
}

/// Map one level of an expression's children
pub fn map_exp<M: Mapper + ?Sized>(m: &mut M, e: Exp) -> Result<Exp> {
    match e {
        Exp::BasicOp(op) => Ok(Exp::BasicOp(map_basic_op(m, op)?)),
        Exp::Apply {
            func,
            args,
            rettype,
        } => Ok(Exp::Apply {
            func,
            args: args
                .into_iter()
                .map(|(se, d)| Ok((m.map_subexp(se)?, d)))
                .collect::<Result<_>>()?,
            rettype: rettype
                .into_iter()
                .map(|t| m.map_ext_type(t))
                .collect::<Result<_>>()?,
        }),
        Exp::If {
            cond,
            tbranch,
            fbranch,
            rettype,
        } => Ok(Exp::If {
            cond: m.map_subexp(cond)?,
            tbranch: m.map_body(tbranch)?,
            fbranch: m.map_body(fbranch)?,
            rettype: rettype
                .into_iter()
                .map(|t| m.map_ext_type(t))
                .collect::<Result<_>>()?,
        }),
        Exp::DoLoop {
            ctx_merge,
            val_merge,
            form,
            body,
        } => {
            let map_merge = |m: &mut M, merge: Vec<(Param, SubExp)>| -> Result<Vec<(Param, SubExp)>> {
                merge
                    .into_iter()
                    .map(|(p, se)| Ok((map_param(m, p)?, m.map_subexp(se)?)))
                    .collect()
            };
            let ctx_merge = map_merge(m, ctx_merge)?;
            let val_merge = map_merge(m, val_merge)?;
            let form = match form {
                LoopForm::For { var, bound } => LoopForm::For {
                    var: m.map_vname(var)?,
                    bound: m.map_subexp(bound)?,
                },
                LoopForm::While { cond } => LoopForm::While {
                    cond: m.map_vname(cond)?,
                },
            };
            Ok(Exp::DoLoop {
                ctx_merge,
                val_merge,
                form,
                body: m.map_body(body)?,
            })
        }
        Exp::Op(op) => Ok(Exp::Op(m.map_op(op)?)),
    }
}

pub fn map_basic_op<M: Mapper + ?Sized>(m: &mut M, op: BasicOp) -> Result<BasicOp> {
    let map_dims = |m: &mut M, dims: Vec<SubExp>| -> Result<Vec<SubExp>> {
        dims.into_iter().map(|d| m.map_subexp(d)).collect()
    };
    match op {
        BasicOp::SubExp(se) => Ok(BasicOp::SubExp(m.map_subexp(se)?)),
        BasicOp::ArrayLit { elems, elem_ty } => Ok(BasicOp::ArrayLit {
            elems: map_dims(m, elems)?,
            elem_ty: m.map_type(elem_ty)?,
        }),
        BasicOp::UnOp(op, x) => Ok(BasicOp::UnOp(op, m.map_subexp(x)?)),
        BasicOp::BinOp(op, x, y) => Ok(BasicOp::BinOp(op, m.map_subexp(x)?, m.map_subexp(y)?)),
        BasicOp::CmpOp(op, x, y) => Ok(BasicOp::CmpOp(op, m.map_subexp(x)?, m.map_subexp(y)?)),
        BasicOp::ConvOp(op, x) => Ok(BasicOp::ConvOp(op, m.map_subexp(x)?)),
        BasicOp::Index { array, indices } => Ok(BasicOp::Index {
            array: m.map_vname(array)?,
            indices: map_dims(m, indices)?,
        }),
        BasicOp::Update {
            array,
            indices,
            value,
        } => Ok(BasicOp::Update {
            array: m.map_vname(array)?,
            indices: map_dims(m, indices)?,
            value: m.map_subexp(value)?,
        }),
        BasicOp::Iota { n } => Ok(BasicOp::Iota {
            n: m.map_subexp(n)?,
        }),
        BasicOp::Replicate { n, value } => Ok(BasicOp::Replicate {
            n: m.map_subexp(n)?,
            value: m.map_subexp(value)?,
        }),
        BasicOp::Scratch { elem, dims } => Ok(BasicOp::Scratch {
            elem,
            dims: map_dims(m, dims)?,
        }),
        BasicOp::Reshape { array, new_dims } => Ok(BasicOp::Reshape {
            array: m.map_vname(array)?,
            new_dims: map_dims(m, new_dims)?,
        }),
        BasicOp::Rearrange { array, perm } => Ok(BasicOp::Rearrange {
            array: m.map_vname(array)?,
            perm,
        }),
        BasicOp::Rotate { array, offsets } => Ok(BasicOp::Rotate {
            array: m.map_vname(array)?,
            offsets: map_dims(m, offsets)?,
        }),
        BasicOp::Split { sizes, array } => Ok(BasicOp::Split {
            sizes: map_dims(m, sizes)?,
            array: m.map_vname(array)?,
        }),
        BasicOp::Concat { first, rest, total } => Ok(BasicOp::Concat {
            first: m.map_vname(first)?,
            rest: rest
                .into_iter()
                .map(|v| m.map_vname(v))
                .collect::<Result<_>>()?,
            total: m.map_subexp(total)?,
        }),
        BasicOp::Copy(v) => Ok(BasicOp::Copy(m.map_vname(v)?)),
        BasicOp::Assert { cond, msg, loc } => Ok(BasicOp::Assert {
            cond: m.map_subexp(cond)?,
            msg,
            loc,
        }),
        BasicOp::Alloc { size, space } => Ok(BasicOp::Alloc {
            size: m.map_subexp(size)?,
            space,
        }),
    }
}

pub fn map_op_inner<M: Mapper + ?Sized>(m: &mut M, op: Op) -> Result<Op> {
    match op {
        Op::Soac(soac) => Ok(Op::Soac(map_soac(m, soac)?)),
        Op::Kernel(k) => Ok(Op::Kernel(map_kernel_op(m, k)?)),
    }
}

pub fn map_soac<M: Mapper + ?Sized>(m: &mut M, soac: Soac) -> Result<Soac> {
    let map_arrays = |m: &mut M, arrs: Vec<VName>| -> Result<Vec<VName>> {
        arrs.into_iter().map(|v| m.map_vname(v)).collect()
    };
    let map_inputs = |m: &mut M, inputs: Vec<(SubExp, VName)>| -> Result<Vec<(SubExp, VName)>> {
        inputs
            .into_iter()
            .map(|(ne, arr)| Ok((m.map_subexp(ne)?, m.map_vname(arr)?)))
            .collect()
    };
    match soac {
        Soac::Map {
            width,
            lambda,
            arrays,
        } => Ok(Soac::Map {
            width: m.map_subexp(width)?,
            lambda: m.map_lambda(lambda)?,
            arrays: map_arrays(m, arrays)?,
        }),
        Soac::Reduce {
            width,
            lambda,
            inputs,
        } => Ok(Soac::Reduce {
            width: m.map_subexp(width)?,
            lambda: m.map_lambda(lambda)?,
            inputs: map_inputs(m, inputs)?,
        }),
        Soac::Scan {
            width,
            lambda,
            inputs,
        } => Ok(Soac::Scan {
            width: m.map_subexp(width)?,
            lambda: m.map_lambda(lambda)?,
            inputs: map_inputs(m, inputs)?,
        }),
        Soac::Redomap {
            width,
            red_lambda,
            map_lambda,
            neutrals,
            arrays,
        } => Ok(Soac::Redomap {
            width: m.map_subexp(width)?,
            red_lambda: m.map_lambda(red_lambda)?,
            map_lambda: m.map_lambda(map_lambda)?,
            neutrals: neutrals
                .into_iter()
                .map(|se| m.map_subexp(se))
                .collect::<Result<_>>()?,
            arrays: map_arrays(m, arrays)?,
        }),
        Soac::Stream {
            width,
            accs,
            lambda,
            arrays,
        } => Ok(Soac::Stream {
            width: m.map_subexp(width)?,
            accs: accs
                .into_iter()
                .map(|se| m.map_subexp(se))
                .collect::<Result<_>>()?,
            lambda: m.map_lambda(lambda)?,
            arrays: map_arrays(m, arrays)?,
        }),
        Soac::Write {
            width,
            lambda,
            arrays,
            dests,
        } => Ok(Soac::Write {
            width: m.map_subexp(width)?,
            lambda: m.map_lambda(lambda)?,
            arrays: map_arrays(m, arrays)?,
            dests: map_arrays(m, dests)?,
        }),
    }
}

pub fn map_kernel_op<M: Mapper + ?Sized>(m: &mut M, kop: KernelOp) -> Result<KernelOp> {
    let map_space = |m: &mut M, space: KernelSpace| -> Result<KernelSpace> {
        Ok(KernelSpace {
            dims: space
                .dims
                .into_iter()
                .map(|(v, w)| Ok((m.map_vname(v)?, m.map_subexp(w)?)))
                .collect::<Result<_>>()?,
            flat_id: m.map_vname(space.flat_id)?,
            num_threads: m.map_subexp(space.num_threads)?,
        })
    };
    let map_uses = |m: &mut M, uses: Vec<VName>| -> Result<Vec<VName>> {
        uses.into_iter().map(|v| m.map_vname(v)).collect()
    };
    match kop {
        KernelOp::Kernel(k) => Ok(KernelOp::Kernel(Kernel {
            space: map_space(m, k.space)?,
            uses: map_uses(m, k.uses)?,
            inputs: k
                .inputs
                .into_iter()
                .map(|inp| {
                    Ok(KernelInput {
                        param: map_param(m, inp.param)?,
                        array: m.map_vname(inp.array)?,
                        indices: inp
                            .indices
                            .into_iter()
                            .map(|se| m.map_subexp(se))
                            .collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
            returns: k
                .returns
                .into_iter()
                .map(|t| m.map_type(t))
                .collect::<Result<_>>()?,
            body: m.map_body(k.body)?,
            workgroup_size: k.workgroup_size.map(|se| m.map_subexp(se)).transpose()?,
        })),
        KernelOp::ReduceKernel(k) => Ok(KernelOp::ReduceKernel(ReduceKernel {
            space: map_space(m, k.space)?,
            uses: map_uses(m, k.uses)?,
            red_lambda: m.map_lambda(k.red_lambda)?,
            fold_lambda: m.map_lambda(k.fold_lambda)?,
            neutrals: k
                .neutrals
                .into_iter()
                .map(|se| m.map_subexp(se))
                .collect::<Result<_>>()?,
            arrays: map_uses(m, k.arrays)?,
            workgroup_size: m.map_subexp(k.workgroup_size)?,
            wave_width: m.map_subexp(k.wave_width)?,
        })),
    }
}

/// Visiting traversal
pub trait Walker {
    fn walk_vname(&mut self, _v: &VName) {}

    /// A binding occurrence: pattern names, parameter names, loop and
    /// thread-index variables. Defaults to `walk_vname`; scope-sensitive
    /// clients override this to register the binder instead.
    fn walk_binder(&mut self, v: &VName) {
        self.walk_vname(v)
    }

    fn walk_subexp(&mut self, se: &SubExp) {
        walk_subexp_inner(self, se)
    }

    fn walk_type(&mut self, t: &Type) {
        walk_type_inner(self, t)
    }

    fn walk_ext_type(&mut self, t: &ExtType) {
        walk_ext_type_inner(self, t)
    }

    fn walk_summary(&mut self, s: &MemSummary) {
        walk_summary_inner(self, s)
    }

    fn walk_pattern(&mut self, p: &Pattern) {
        walk_pattern_inner(self, p)
    }

    fn walk_param(&mut self, p: &Param) {
        walk_param_inner(self, p)
    }

    fn walk_body(&mut self, b: &Body) {
        walk_body_inner(self, b)
    }

    fn walk_lambda(&mut self, l: &Lambda) {
        walk_lambda_inner(self, l)
    }

    fn walk_op(&mut self, op: &Op) {
        walk_op_inner(self, op)
    }
}

pub fn walk_subexp_inner<W: Walker + ?Sized>(w: &mut W, se: &SubExp) {
    if let SubExp::Var(v) = se {
        w.walk_vname(v);
    }
}

pub fn walk_type_inner<W: Walker + ?Sized>(w: &mut W, t: &Type) {
    match t {
        Type::Prim(_) => {}
        Type::Array { shape, .. } => {
            for d in &shape.dims {
                w.walk_subexp(d);
            }
        }
        Type::Mem { size, .. } => w.walk_subexp(size),
    }
}

pub fn walk_ext_type_inner<W: Walker + ?Sized>(w: &mut W, t: &ExtType) {
    match t {
        ExtType::Prim(_) => {}
        ExtType::Array { shape, .. } => {
            for d in &shape.dims {
                if let ExtDim::Free(se) = d {
                    w.walk_subexp(se);
                }
            }
        }
        ExtType::Mem {
            size: ExtDim::Free(se),
            ..
        } => w.walk_subexp(se),
        ExtType::Mem { .. } => {}
    }
}

pub fn walk_ixfun<W: Walker + ?Sized>(w: &mut W, ix: &IxFun) {
    match ix {
        IxFun::Iota(shape) => {
            for d in shape {
                w.walk_subexp(d);
            }
        }
        IxFun::Offset(base, off) => {
            walk_ixfun(w, base);
            w.walk_subexp(off);
        }
        IxFun::Permute(base, _) => walk_ixfun(w, base),
        IxFun::Reshape(base, shape) => {
            walk_ixfun(w, base);
            for d in shape {
                w.walk_subexp(d);
            }
        }
        IxFun::Index(base, idxs) => {
            walk_ixfun(w, base);
            for d in idxs {
                w.walk_subexp(d);
            }
        }
    }
}

pub fn walk_summary_inner<W: Walker + ?Sized>(w: &mut W, s: &MemSummary) {
    if let MemSummary::Array { mem, ixfun } = s {
        w.walk_vname(mem);
        walk_ixfun(w, ixfun);
    }
}

pub fn walk_pattern_inner<W: Walker + ?Sized>(w: &mut W, p: &Pattern) {
    for pe in p.elems() {
        w.walk_binder(&pe.name);
        w.walk_type(&pe.ty);
        if let Some(s) = &pe.summary {
            w.walk_summary(s);
        }
    }
}

pub fn walk_param_inner<W: Walker + ?Sized>(w: &mut W, p: &Param) {
    w.walk_binder(&p.name);
    w.walk_type(&p.ty);
    if let Some(s) = &p.summary {
        w.walk_summary(s);
    }
}

pub fn walk_body_inner<W: Walker + ?Sized>(w: &mut W, b: &Body) {
    for stm in &b.stms {
        w.walk_pattern(&stm.pattern);
        walk_exp(w, &stm.exp);
    }
    for se in &b.result {
        w.walk_subexp(se);
    }
}

pub fn walk_lambda_inner<W: Walker + ?Sized>(w: &mut W, l: &Lambda) {
    for p in &l.params {
        w.walk_param(p);
    }
    w.walk_body(&l.body);
    for t in &l.rettype {
        w.walk_type(t);
    }
}

/// Walk one level of an expression's children
pub fn walk_exp<W: Walker + ?Sized>(w: &mut W, e: &Exp) {
    match e {
        Exp::BasicOp(op) => walk_basic_op(w, op),
        Exp::Apply { args, rettype, .. } => {
            for (se, _) in args {
                w.walk_subexp(se);
            }
            for t in rettype {
                w.walk_ext_type(t);
            }
        }
        Exp::If {
            cond,
            tbranch,
            fbranch,
            rettype,
        } => {
            w.walk_subexp(cond);
            w.walk_body(tbranch);
            w.walk_body(fbranch);
            for t in rettype {
                w.walk_ext_type(t);
            }
        }
        Exp::DoLoop {
            ctx_merge,
            val_merge,
            form,
            body,
        } => {
            for (p, se) in ctx_merge.iter().chain(val_merge) {
                w.walk_param(p);
                w.walk_subexp(se);
            }
            match form {
                LoopForm::For { var, bound } => {
                    w.walk_binder(var);
                    w.walk_subexp(bound);
                }
                // The while-condition is a merge parameter, hence a use
                LoopForm::While { cond } => w.walk_vname(cond),
            }
            w.walk_body(body);
        }
        Exp::Op(op) => w.walk_op(op),
    }
}

pub fn walk_basic_op<W: Walker + ?Sized>(w: &mut W, op: &BasicOp) {
    match op {
        BasicOp::SubExp(se) => w.walk_subexp(se),
        BasicOp::ArrayLit { elems, elem_ty } => {
            for se in elems {
                w.walk_subexp(se);
            }
            w.walk_type(elem_ty);
        }
        BasicOp::UnOp(_, x) | BasicOp::ConvOp(_, x) => w.walk_subexp(x),
        BasicOp::BinOp(_, x, y) | BasicOp::CmpOp(_, x, y) => {
            w.walk_subexp(x);
            w.walk_subexp(y);
        }
        BasicOp::Index { array, indices } => {
            w.walk_vname(array);
            for se in indices {
                w.walk_subexp(se);
            }
        }
        BasicOp::Update {
            array,
            indices,
            value,
        } => {
            w.walk_vname(array);
            for se in indices {
                w.walk_subexp(se);
            }
            w.walk_subexp(value);
        }
        BasicOp::Iota { n } => w.walk_subexp(n),
        BasicOp::Replicate { n, value } => {
            w.walk_subexp(n);
            w.walk_subexp(value);
        }
        BasicOp::Scratch { dims, .. } => {
            for se in dims {
                w.walk_subexp(se);
            }
        }
        BasicOp::Reshape { array, new_dims } => {
            w.walk_vname(array);
            for se in new_dims {
                w.walk_subexp(se);
            }
        }
        BasicOp::Rearrange { array, .. } => w.walk_vname(array),
        BasicOp::Rotate { array, offsets } => {
            w.walk_vname(array);
            for se in offsets {
                w.walk_subexp(se);
            }
        }
        BasicOp::Split { sizes, array } => {
            for se in sizes {
                w.walk_subexp(se);
            }
            w.walk_vname(array);
        }
        BasicOp::Concat { first, rest, total } => {
            w.walk_vname(first);
            for v in rest {
                w.walk_vname(v);
            }
            w.walk_subexp(total);
        }
        BasicOp::Copy(v) => w.walk_vname(v),
        BasicOp::Assert { cond, .. } => w.walk_subexp(cond),
        BasicOp::Alloc { size, .. } => w.walk_subexp(size),
    }
}

pub fn walk_op_inner<W: Walker + ?Sized>(w: &mut W, op: &Op) {
    match op {
        Op::Soac(soac) => walk_soac(w, soac),
        Op::Kernel(k) => walk_kernel_op(w, k),
    }
}

pub fn walk_soac<W: Walker + ?Sized>(w: &mut W, soac: &Soac) {
    match soac {
        Soac::Map {
            width,
            lambda,
            arrays,
        } => {
            w.walk_subexp(width);
            w.walk_lambda(lambda);
            for v in arrays {
                w.walk_vname(v);
            }
        }
        Soac::Reduce {
            width,
            lambda,
            inputs,
        }
        | Soac::Scan {
            width,
            lambda,
            inputs,
        } => {
            w.walk_subexp(width);
            w.walk_lambda(lambda);
            for (ne, arr) in inputs {
                w.walk_subexp(ne);
                w.walk_vname(arr);
            }
        }
        Soac::Redomap {
            width,
            red_lambda,
            map_lambda,
            neutrals,
            arrays,
        } => {
            w.walk_subexp(width);
            w.walk_lambda(red_lambda);
            w.walk_lambda(map_lambda);
            for se in neutrals {
                w.walk_subexp(se);
            }
            for v in arrays {
                w.walk_vname(v);
            }
        }
        Soac::Stream {
            width,
            accs,
            lambda,
            arrays,
        } => {
            w.walk_subexp(width);
            for se in accs {
                w.walk_subexp(se);
            }
            w.walk_lambda(lambda);
            for v in arrays {
                w.walk_vname(v);
            }
        }
        Soac::Write {
            width,
            lambda,
            arrays,
            dests,
        } => {
            w.walk_subexp(width);
            w.walk_lambda(lambda);
            for v in arrays.iter().chain(dests) {
                w.walk_vname(v);
            }
        }
    }
}

pub fn walk_kernel_op<W: Walker + ?Sized>(w: &mut W, kop: &KernelOp) {
    let walk_space = |w: &mut W, space: &KernelSpace| {
        for (v, width) in &space.dims {
            w.walk_binder(v);
            w.walk_subexp(width);
        }
        w.walk_binder(&space.flat_id);
        w.walk_subexp(&space.num_threads);
    };
    match kop {
        KernelOp::Kernel(k) => {
            walk_space(w, &k.space);
            for v in &k.uses {
                w.walk_vname(v);
            }
            for inp in &k.inputs {
                w.walk_param(&inp.param);
                w.walk_vname(&inp.array);
                for se in &inp.indices {
                    w.walk_subexp(se);
                }
            }
            for t in &k.returns {
                w.walk_type(t);
            }
            w.walk_body(&k.body);
            if let Some(se) = &k.workgroup_size {
                w.walk_subexp(se);
            }
        }
        KernelOp::ReduceKernel(k) => {
            walk_space(w, &k.space);
            for v in &k.uses {
                w.walk_vname(v);
            }
            w.walk_lambda(&k.red_lambda);
            w.walk_lambda(&k.fold_lambda);
            for se in &k.neutrals {
                w.walk_subexp(se);
            }
            for v in &k.arrays {
                w.walk_vname(v);
            }
            w.walk_subexp(&k.workgroup_size);
            w.walk_subexp(&k.wave_width);
        }
    }
}

/// Statement-granularity rewriting traversal
///
/// `rewrite_stm` may replace one statement with several — the shape
/// per-construct lowering needs when a single statement expands into a
/// prologue plus its replacement. The default implementations recurse
/// into every nested body (branch arms, loop bodies, SOAC lambdas,
/// kernel interiors), so a pass overrides only the constructors it
/// lowers and inherits the descent everywhere else.
pub trait StmRewriter {
    fn rewrite_stm(&mut self, stm: Stm) -> Result<Vec<Stm>> {
        rewrite_stm_inner(self, stm)
    }

    fn rewrite_body(&mut self, body: Body) -> Result<Body> {
        rewrite_body_inner(self, body)
    }

    fn rewrite_lambda(&mut self, lambda: Lambda) -> Result<Lambda> {
        let Lambda {
            params,
            body,
            rettype,
        } = lambda;
        Ok(Lambda {
            params,
            body: self.rewrite_body(body)?,
            rettype,
        })
    }

    fn rewrite_op(&mut self, op: Op) -> Result<Op> {
        rewrite_op_inner(self, op)
    }
}

pub fn rewrite_body_inner<R: StmRewriter + ?Sized>(r: &mut R, body: Body) -> Result<Body> {
    let Body { stms, result } = body;
    let mut out = Vec::with_capacity(stms.len());
    for stm in stms {
        out.extend(r.rewrite_stm(stm)?);
    }
    Ok(Body::new(out, result))
}

/// Rewrite the bodies nested one level inside a statement
pub fn rewrite_stm_inner<R: StmRewriter + ?Sized>(r: &mut R, stm: Stm) -> Result<Vec<Stm>> {
    let Stm { pattern, exp } = stm;
    let exp = match exp {
        Exp::If {
            cond,
            tbranch,
            fbranch,
            rettype,
        } => Exp::If {
            cond,
            tbranch: r.rewrite_body(tbranch)?,
            fbranch: r.rewrite_body(fbranch)?,
            rettype,
        },
        Exp::DoLoop {
            ctx_merge,
            val_merge,
            form,
            body,
        } => Exp::DoLoop {
            ctx_merge,
            val_merge,
            form,
            body: r.rewrite_body(body)?,
        },
        Exp::Op(op) => Exp::Op(r.rewrite_op(op)?),
        other => other,
    };
    Ok(vec![Stm::new(pattern, exp)])
}

pub fn rewrite_op_inner<R: StmRewriter + ?Sized>(r: &mut R, op: Op) -> Result<Op> {
    match op {
        Op::Soac(soac) => Ok(Op::Soac(match soac {
            Soac::Map {
                width,
                lambda,
                arrays,
            } => Soac::Map {
                width,
                lambda: r.rewrite_lambda(lambda)?,
                arrays,
            },
            Soac::Reduce {
                width,
                lambda,
                inputs,
            } => Soac::Reduce {
                width,
                lambda: r.rewrite_lambda(lambda)?,
                inputs,
            },
            Soac::Scan {
                width,
                lambda,
                inputs,
            } => Soac::Scan {
                width,
                lambda: r.rewrite_lambda(lambda)?,
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
                red_lambda: r.rewrite_lambda(red_lambda)?,
                map_lambda: r.rewrite_lambda(map_lambda)?,
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
                lambda: r.rewrite_lambda(lambda)?,
                arrays,
            },
            Soac::Write {
                width,
                lambda,
                arrays,
                dests,
            } => Soac::Write {
                width,
                lambda: r.rewrite_lambda(lambda)?,
                arrays,
                dests,
            },
        })),
        Op::Kernel(KernelOp::Kernel(mut k)) => {
            k.body = r.rewrite_body(k.body)?;
            Ok(Op::Kernel(KernelOp::Kernel(k)))
        }
        Op::Kernel(KernelOp::ReduceKernel(mut k)) => {
            k.red_lambda = r.rewrite_lambda(k.red_lambda)?;
            k.fold_lambda = r.rewrite_lambda(k.fold_lambda)?;
            Ok(Op::Kernel(KernelOp::ReduceKernel(k)))
        }
    }
}
