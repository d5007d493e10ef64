//! The explicit-allocations pass
//!
//! Lowers abstract arrays to memory blocks paired with index functions.
//! Fresh constructors get an `Alloc` (byte size = dimension product times
//! element size) emitted before their statement; shape manipulations
//! derive their index function from the source; conditionals write both
//! arms into a pre-allocated destination through an inserted `Copy`; loop
//! array merge parameters gain a memory merge parameter in the context
//! part. Kernel interiors allocate in the global space, and reduction
//! accumulators get local-memory blocks of `workgroup_size × elem_size`.
//!
//! The pass assumes a fully inlined program: `Apply` has no memory
//! calling convention here and is rejected.
//!
//! The allocator descends on its own rather than through the statement
//! rewriter: every constructor needs its own lowering, and the descent
//! threads the address space and the summary map through it.

use crate::error::{Error, Result};
use crate::ir::build::StmBuilder;
use crate::ir::kernel::KernelOp;
use crate::ir::prim::{BinOp, IntType, PrimType};
use crate::ir::types::{Space, SubExp, Type};
use crate::ir::{
    BasicOp, Body, Exp, FunDef, Lore, Op, Param, PatElem, Pattern, Program, Stm,
};
use crate::memory::{IxFun, MemSummary};
use crate::names::{NameSource, VName};
use crate::pass::Pass;
use rustc_hash::FxHashMap;

const PASS: &str = "explicit-allocations";

/// The pass over extracted kernels
pub fn pass() -> Pass {
    Pass::new(PASS, Lore::Kernels, Lore::ExplicitMemory, explicit_allocations)
}

/// The pass over first-order (sequential) programs
pub fn soacs_pass() -> Pass {
    Pass::new(PASS, Lore::Soacs, Lore::ExplicitMemory, explicit_allocations)
}

/// Lower every function to explicit memory
pub fn explicit_allocations(prog: Program, ns: &mut NameSource) -> Result<Program> {
    let funs = prog
        .funs
        .into_iter()
        .map(|f| allocate_fun(f, ns))
        .collect::<Result<_>>()?;
    Ok(Program::new(Lore::ExplicitMemory, funs))
}

struct Allocator<'a> {
    ns: &'a mut NameSource,
    summaries: FxHashMap<VName, MemSummary>,
}

fn allocate_fun(fun: FunDef, ns: &mut NameSource) -> Result<FunDef> {
    let FunDef {
        name,
        rettype,
        params: old_params,
        body,
    } = fun;
    let mut alloc = Allocator {
        ns,
        summaries: FxHashMap::default(),
    };

    // Every array parameter becomes a memory-block parameter followed by
    // the original parameter, now pointing into that block with a direct
    // index function.
    let mut params = Vec::with_capacity(old_params.len() * 2);
    for p in old_params {
        match &p.ty {
            Type::Array { elem, shape, .. } => {
                let mem = alloc.ns.fresh(format!("{}_mem", p.name.base()));
                // The block is exactly as large as the array it carries.
                let size = SubExp::int32(elem.bytes() as i32);
                params.push(Param::new(
                    mem.clone(),
                    Type::Mem {
                        size,
                        space: Space::Default,
                    },
                ));
                let summary = MemSummary::Array {
                    mem,
                    ixfun: IxFun::iota(shape.dims.clone()),
                };
                alloc.summaries.insert(p.name.clone(), summary.clone());
                params.push(Param {
                    summary: Some(summary),
                    ..p
                });
            }
            _ => {
                alloc.summaries.insert(p.name.clone(), MemSummary::Scalar);
                params.push(Param {
                    summary: Some(MemSummary::Scalar),
                    ..p
                });
            }
        }
    }

    let body = alloc.allocate_body(body, Space::Default)?;
    Ok(FunDef {
        name,
        rettype,
        params,
        body,
    })
}

impl Allocator<'_> {
    fn allocate_body(&mut self, body: Body, space: Space) -> Result<Body> {
        let mut out = Vec::with_capacity(body.stms.len());
        for stm in body.stms {
            self.allocate_stm(stm, space, &mut out)?;
        }
        Ok(Body::new(out, body.result))
    }

    /// The summary of an already-processed array name
    fn summary_of(&self, v: &VName) -> Result<MemSummary> {
        self.summaries.get(v).cloned().ok_or_else(|| {
            Error::internal(PASS, format!("no memory summary recorded for {}", v))
        })
    }

    /// Allocate a block big enough for `dims` of `elem`, in `space`
    fn alloc_block(
        &mut self,
        base: &str,
        dims: &[SubExp],
        elem: PrimType,
        space: Space,
        out: &mut Vec<Stm>,
    ) -> VName {
        let mut b = StmBuilder::new(self.ns);
        let bytes = b.byte_size(&format!("{}_bytes", base), dims, elem);
        let mem = b.names().fresh(format!("{}_mem", base));
        b.let_into(
            mem.clone(),
            Type::Mem {
                size: bytes.clone(),
                space,
            },
            Exp::BasicOp(BasicOp::Alloc { size: bytes, space }),
        );
        out.extend(b.into_stms());
        mem
    }

    /// Record summaries for a pattern whose array values live in fresh
    /// direct blocks
    fn bind_fresh_pattern(
        &mut self,
        pattern: &Pattern,
        space: Space,
        out: &mut Vec<Stm>,
    ) -> Result<Pattern> {
        let mut values = Vec::with_capacity(pattern.values.len());
        for pe in &pattern.values {
            let summary = match &pe.ty {
                Type::Array { elem, shape, .. } => {
                    let mem =
                        self.alloc_block(pe.name.base(), &shape.dims, *elem, space, out);
                    MemSummary::Array {
                        mem,
                        ixfun: IxFun::iota(shape.dims.clone()),
                    }
                }
                _ => MemSummary::Scalar,
            };
            self.summaries.insert(pe.name.clone(), summary.clone());
            values.push(PatElem {
                summary: Some(summary),
                ..pe.clone()
            });
        }
        Ok(Pattern::new(pattern.context.clone(), values))
    }

    /// Record summaries for a pattern that aliases an existing block
    fn bind_aliased_pattern(
        &mut self,
        pattern: &Pattern,
        summaries: Vec<MemSummary>,
    ) -> Result<Pattern> {
        if pattern.values.len() != summaries.len() {
            return Err(Error::internal(
                PASS,
                "pattern arity disagrees with derived summaries".to_string(),
            ));
        }
        let mut values = Vec::with_capacity(pattern.values.len());
        for (pe, summary) in pattern.values.iter().zip(summaries) {
            self.summaries.insert(pe.name.clone(), summary.clone());
            values.push(PatElem {
                summary: Some(summary),
                ..pe.clone()
            });
        }
        Ok(Pattern::new(pattern.context.clone(), values))
    }

    fn allocate_stm(&mut self, stm: Stm, space: Space, out: &mut Vec<Stm>) -> Result<()> {
        match stm.exp {
            Exp::BasicOp(ref op) => {
                let pattern = match op {
                    // Storage-producing constructors.
                    BasicOp::Iota { .. }
                    | BasicOp::Replicate { .. }
                    | BasicOp::Scratch { .. }
                    | BasicOp::ArrayLit { .. }
                    | BasicOp::Copy(_)
                    | BasicOp::Concat { .. }
                    | BasicOp::Rotate { .. } => {
                        // A copy whose destination was pre-chosen (branch
                        // lowering) keeps that summary.
                        if stm.pattern.values.iter().all(|pe| pe.summary.is_some()) {
                            stm.pattern.clone()
                        } else {
                            self.bind_fresh_pattern(&stm.pattern, space, out)?
                        }
                    }
                    // Shape manipulations derive their index function.
                    BasicOp::SubExp(SubExp::Var(src)) => {
                        let s = self.summary_of(src)?;
                        self.bind_aliased_pattern(&stm.pattern, vec![s])?
                    }
                    BasicOp::Reshape { array, new_dims } => {
                        let s = self.derive(array, |ix| ix.reshape(new_dims.clone()))?;
                        self.bind_aliased_pattern(&stm.pattern, vec![s])?
                    }
                    BasicOp::Rearrange { array, perm } => {
                        let s = self.derive(array, |ix| ix.permute(perm.clone()))?;
                        self.bind_aliased_pattern(&stm.pattern, vec![s])?
                    }
                    BasicOp::Index { array, indices } => {
                        let is_array = stm
                            .pattern
                            .values
                            .first()
                            .map(|pe| pe.ty.rank() > 0)
                            .unwrap_or(false);
                        if is_array {
                            let idxs = indices.clone();
                            let s = self.derive(array, |ix| ix.index(idxs))?;
                            self.bind_aliased_pattern(&stm.pattern, vec![s])?
                        } else {
                            self.bind_scalars(&stm.pattern)?
                        }
                    }
                    BasicOp::Split { sizes, array } => {
                        let base = self.summary_of(array)?;
                        let mut offset = SubExp::int32(0);
                        let mut summaries = Vec::with_capacity(sizes.len());
                        let mut b = StmBuilder::new(self.ns);
                        for (chunk, pe) in sizes.iter().zip(&stm.pattern.values) {
                            let (mem, ixfun) = match &base {
                                MemSummary::Array { mem, ixfun } => (mem.clone(), ixfun.clone()),
                                MemSummary::Scalar => {
                                    return Err(Error::internal(
                                        PASS,
                                        "split of a scalar".to_string(),
                                    ))
                                }
                            };
                            let dims = pe
                                .ty
                                .shape()
                                .map(|s| s.dims.clone())
                                .unwrap_or_default();
                            summaries.push(MemSummary::Array {
                                mem,
                                ixfun: ixfun
                                    .offset(offset.clone())
                                    .reshape(dims.clone()),
                            });
                            // Advance by the element count of this chunk.
                            let count = b.product("split_off", &dims);
                            let next = b.binop(
                                "split_off",
                                BinOp::Add(IntType::I32),
                                offset.clone(),
                                count,
                            );
                            offset = SubExp::Var(next);
                        }
                        out.extend(b.into_stms());
                        self.bind_aliased_pattern(&stm.pattern, summaries)?
                    }
                    // An in-place update stays in its operand's block.
                    BasicOp::Update { array, .. } => {
                        let s = self.summary_of(array)?;
                        self.bind_aliased_pattern(&stm.pattern, vec![s])?
                    }
                    // Scalar producers.
                    _ => self.bind_scalars(&stm.pattern)?,
                };
                out.push(Stm::new(pattern, stm.exp));
                Ok(())
            }
            Exp::If {
                cond,
                tbranch,
                fbranch,
                rettype,
            } => {
                // Array results land in pre-allocated destinations; each
                // arm copies its value in before returning.
                let pattern = self.bind_fresh_pattern(&stm.pattern, space, out)?;
                let tbranch = self.allocate_branch(tbranch, &pattern, space)?;
                let fbranch = self.allocate_branch(fbranch, &pattern, space)?;
                out.push(Stm::new(
                    pattern,
                    Exp::If {
                        cond,
                        tbranch,
                        fbranch,
                        rettype,
                    },
                ));
                Ok(())
            }
            Exp::DoLoop {
                ctx_merge,
                val_merge,
                form,
                body,
            } => self.allocate_loop(stm.pattern, ctx_merge, val_merge, form, body, space, out),
            Exp::Op(Op::Kernel(kop)) => self.allocate_kernel(stm.pattern, kop, out),
            Exp::Op(Op::Soac(_)) => Err(Error::unsupported(
                PASS,
                "SOACs must be lowered (first-order transform or kernel extraction) before allocation"
                    .to_string(),
            )),
            Exp::Apply { .. } => Err(Error::unsupported(
                PASS,
                "function calls must be inlined before allocation".to_string(),
            )),
        }
    }

    fn bind_scalars(&mut self, pattern: &Pattern) -> Result<Pattern> {
        let summaries = pattern
            .values
            .iter()
            .map(|_| MemSummary::Scalar)
            .collect();
        self.bind_aliased_pattern(pattern, summaries)
    }

    fn derive(
        &mut self,
        src: &VName,
        f: impl FnOnce(IxFun) -> IxFun,
    ) -> Result<MemSummary> {
        match self.summary_of(src)? {
            MemSummary::Array { mem, ixfun } => Ok(MemSummary::Array {
                mem,
                ixfun: f(ixfun),
            }),
            MemSummary::Scalar => Err(Error::internal(
                PASS,
                format!("shape manipulation of scalar {}", src),
            )),
        }
    }

    /// Process a branch arm, then copy its array results into the
    /// destinations the pattern pre-allocated
    fn allocate_branch(
        &mut self,
        body: Body,
        pattern: &Pattern,
        space: Space,
    ) -> Result<Body> {
        let mut body = self.allocate_body(body, space)?;
        let n_ctx = pattern.context.len();
        for (i, pe) in pattern.values.iter().enumerate() {
            let Some(MemSummary::Array { mem, ixfun }) = &pe.summary else {
                continue;
            };
            let pos = n_ctx + i;
            let Some(SubExp::Var(res)) = body.result.get(pos).cloned() else {
                continue;
            };
            // Already in the right block with the right layout: no copy.
            if self.summary_of(&res)? == (MemSummary::Array { mem: mem.clone(), ixfun: ixfun.clone() }) {
                continue;
            }
            let copied = self.ns.newname(&res);
            let summary = MemSummary::Array {
                mem: mem.clone(),
                ixfun: ixfun.clone(),
            };
            self.summaries.insert(copied.clone(), summary.clone());
            body.stms.push(Stm::new(
                Pattern::of_values(vec![PatElem::with_summary(
                    copied.clone(),
                    pe.ty.clone(),
                    summary,
                )]),
                Exp::BasicOp(BasicOp::Copy(res)),
            ));
            body.result[pos] = SubExp::Var(copied);
        }
        Ok(body)
    }

    /// Give each array merge parameter a memory merge parameter in the
    /// context part and a direct index function into it
    #[allow(clippy::too_many_arguments)]
    fn allocate_loop(
        &mut self,
        pattern: Pattern,
        mut ctx_merge: Vec<(Param, SubExp)>,
        val_merge: Vec<(Param, SubExp)>,
        form: crate::ir::LoopForm,
        body: Body,
        space: Space,
        out: &mut Vec<Stm>,
    ) -> Result<()> {
        let mut new_val = Vec::with_capacity(val_merge.len());
        let mut mem_params: Vec<(usize, VName, SubExp)> = Vec::new();

        for (i, (p, init)) in val_merge.into_iter().enumerate() {
            match &p.ty {
                Type::Array { elem, shape, .. } => {
                    // Allocation requires a loop-invariant size; every
                    // dimension must already be in scope here.
                    let mem_init = match &init {
                        SubExp::Var(v) => self.summary_of(v)?,
                        SubExp::Constant(_) => {
                            return Err(Error::internal(
                                PASS,
                                "array merge parameter initialized by a constant".to_string(),
                            ))
                        }
                    };
                    // A non-direct initializer is first copied into a
                    // fresh direct block.
                    let (init, init_mem) = match &mem_init {
                        MemSummary::Array { mem, ixfun } if ixfun.is_direct() => {
                            (init.clone(), mem.clone())
                        }
                        MemSummary::Array { .. } => {
                            let mem = self.alloc_block(
                                p.name.base(),
                                &shape.dims,
                                *elem,
                                space,
                                out,
                            );
                            let summary = MemSummary::Array {
                                mem: mem.clone(),
                                ixfun: IxFun::iota(shape.dims.clone()),
                            };
                            let copied = self.ns.newname(&p.name);
                            self.summaries.insert(copied.clone(), summary.clone());
                            let src = match init {
                                SubExp::Var(ref v) => v.clone(),
                                SubExp::Constant(_) => unreachable!("checked above"),
                            };
                            out.push(Stm::new(
                                Pattern::of_values(vec![PatElem::with_summary(
                                    copied.clone(),
                                    p.ty.clone(),
                                    summary,
                                )]),
                                Exp::BasicOp(BasicOp::Copy(src)),
                            ));
                            (SubExp::Var(copied), mem)
                        }
                        MemSummary::Scalar => {
                            return Err(Error::internal(
                                PASS,
                                "array merge parameter with scalar initializer".to_string(),
                            ))
                        }
                    };

                    let mem_param = self.ns.fresh(format!("{}_mem", p.name.base()));
                    let elem_bytes = SubExp::int32(elem.bytes() as i32);
                    ctx_merge.push((
                        Param::new(
                            mem_param.clone(),
                            Type::Mem {
                                size: elem_bytes.clone(),
                                space,
                            },
                        ),
                        SubExp::Var(init_mem),
                    ));
                    let summary = MemSummary::Array {
                        mem: mem_param.clone(),
                        ixfun: IxFun::iota(shape.dims.clone()),
                    };
                    self.summaries.insert(p.name.clone(), summary.clone());
                    self.summaries
                        .insert(mem_param.clone(), MemSummary::Scalar);
                    mem_params.push((i, mem_param, elem_bytes));
                    new_val.push((
                        Param {
                            summary: Some(summary),
                            ..p
                        },
                        init,
                    ));
                }
                _ => {
                    self.summaries.insert(p.name.clone(), MemSummary::Scalar);
                    new_val.push((
                        Param {
                            summary: Some(MemSummary::Scalar),
                            ..p
                        },
                        init,
                    ));
                }
            }
        }
        for (p, _) in &ctx_merge {
            self.summaries
                .entry(p.name.clone())
                .or_insert(MemSummary::Scalar);
        }

        let n_old_ctx = ctx_merge.len() - mem_params.len();
        let mut body = self.allocate_body(body, space)?;

        // The body re-supplies each memory merge parameter with the block
        // its corresponding value result lives in.
        let mut mem_results = Vec::with_capacity(mem_params.len());
        for (val_idx, _, _) in &mem_params {
            let pos = n_old_ctx + val_idx;
            let res_mem = match body.result.get(pos) {
                Some(SubExp::Var(v)) => match self.summary_of(v)? {
                    MemSummary::Array { mem, .. } => mem,
                    MemSummary::Scalar => {
                        return Err(Error::internal(
                            PASS,
                            format!("loop result {} lost its array summary", v),
                        ))
                    }
                },
                _ => {
                    return Err(Error::internal(
                        PASS,
                        "array loop result is not a variable".to_string(),
                    ))
                }
            };
            mem_results.push(SubExp::Var(res_mem));
        }
        // Context results precede value results, new memory context last
        // among the context.
        let mut result = Vec::with_capacity(body.result.len() + mem_results.len());
        result.extend(body.result.iter().take(n_old_ctx).cloned());
        result.extend(mem_results);
        result.extend(body.result.iter().skip(n_old_ctx).cloned());
        body.result = result;

        // The pattern grows matching context elements: sizes first, then
        // memory, then values.
        let mut context = pattern.context.clone();
        for (val_idx, mem_param, elem_bytes) in &mem_params {
            let out_mem = self.ns.fresh(format!("{}_out_mem", mem_param.base()));
            self.summaries.insert(out_mem.clone(), MemSummary::Scalar);
            context.push(PatElem::new(
                out_mem.clone(),
                Type::Mem {
                    size: elem_bytes.clone(),
                    space,
                },
            ));
            // The loop's value result now lives in the returned block.
            let pe = &pattern.values[n_old_ctx + val_idx];
            if let Type::Array { shape, .. } = &pe.ty {
                self.summaries.insert(
                    pe.name.clone(),
                    MemSummary::Array {
                        mem: out_mem,
                        ixfun: IxFun::iota(shape.dims.clone()),
                    },
                );
            }
        }
        let mut values = Vec::with_capacity(pattern.values.len());
        for pe in &pattern.values {
            let summary = self
                .summaries
                .get(&pe.name)
                .cloned()
                .unwrap_or(MemSummary::Scalar);
            self.summaries.insert(pe.name.clone(), summary.clone());
            values.push(PatElem {
                summary: Some(summary),
                ..pe.clone()
            });
        }

        out.push(Stm::new(
            Pattern::new(context, values),
            Exp::DoLoop {
                ctx_merge,
                val_merge: new_val,
                form,
                body,
            },
        ));
        Ok(())
    }

    /// Kernels allocate their results in the global space; their inputs
    /// point into the host arrays' blocks at the per-thread indices
    fn allocate_kernel(
        &mut self,
        pattern: Pattern,
        kop: KernelOp,
        out: &mut Vec<Stm>,
    ) -> Result<()> {
        match kop {
            KernelOp::Kernel(mut k) => {
                let mut inputs = Vec::with_capacity(k.inputs.len());
                for mut inp in k.inputs {
                    let summary = match &inp.param.ty {
                        Type::Array { .. } | Type::Prim(_) => match self.summary_of(&inp.array)? {
                            MemSummary::Array { mem, ixfun } => {
                                let derived = ixfun.index(inp.indices.clone());
                                if inp.param.ty.rank() == 0 {
                                    MemSummary::Scalar
                                } else {
                                    MemSummary::Array { mem, ixfun: derived }
                                }
                            }
                            MemSummary::Scalar => MemSummary::Scalar,
                        },
                        Type::Mem { .. } => MemSummary::Scalar,
                    };
                    self.summaries.insert(inp.param.name.clone(), summary.clone());
                    inp.param.summary = Some(summary);
                    inputs.push(inp);
                }
                k.inputs = inputs;
                k.body = self.allocate_body(k.body, Space::Global)?;
                let pattern = self.bind_fresh_pattern(&pattern, Space::Global, out)?;
                out.push(Stm::new(pattern, Exp::Op(Op::Kernel(KernelOp::Kernel(k)))));
                Ok(())
            }
            KernelOp::ReduceKernel(mut k) => {
                // Accumulators stage through workgroup-local blocks of
                // one slot per thread in the group.
                for ne in &k.neutrals {
                    let elem = match ne {
                        SubExp::Constant(v) => v.prim_type(),
                        SubExp::Var(_) => PrimType::INDEX,
                    };
                    let mut b = StmBuilder::new(self.ns);
                    let bytes = b.binop(
                        "local_bytes",
                        BinOp::Mul(IntType::I32),
                        k.workgroup_size.clone(),
                        SubExp::int32(elem.bytes() as i32),
                    );
                    let mem = b.names().fresh("red_local_mem");
                    b.let_into(
                        mem.clone(),
                        Type::Mem {
                            size: SubExp::Var(bytes.clone()),
                            space: Space::Local,
                        },
                        Exp::BasicOp(BasicOp::Alloc {
                            size: SubExp::Var(bytes),
                            space: Space::Local,
                        }),
                    );
                    out.extend(b.into_stms());
                    self.summaries.insert(mem.clone(), MemSummary::Scalar);
                    k.uses.push(mem);
                }
                let pattern = self.bind_fresh_pattern(&pattern, Space::Default, out)?;
                out.push(Stm::new(
                    pattern,
                    Exp::Op(Op::Kernel(KernelOp::ReduceKernel(k))),
                ));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::static_shapes;
    use crate::names::NameSource;

    fn i32t() -> Type {
        Type::Prim(PrimType::Int(IntType::I32))
    }

    /// fun main(xs: [4]i32) = let ys = iota(4) in ys
    fn iota_program(ns: &mut NameSource) -> Program {
        let xs = ns.fresh("xs");
        let ys = ns.fresh("ys");
        let arr_ty = Type::array(PrimType::Int(IntType::I32), vec![SubExp::int32(4)]);
        Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![arr_ty.clone()]),
                params: vec![Param::new(xs, arr_ty.clone())],
                body: Body::new(
                    vec![Stm::new(
                        Pattern::single(ys.clone(), arr_ty),
                        Exp::BasicOp(BasicOp::Iota {
                            n: SubExp::int32(4),
                        }),
                    )],
                    vec![SubExp::Var(ys)],
                ),
            }],
        )
    }

    fn find_allocs(body: &Body) -> usize {
        body.stms
            .iter()
            .filter(|s| matches!(s.exp, Exp::BasicOp(BasicOp::Alloc { .. })))
            .count()
    }

    #[test]
    fn test_fresh_array_gets_alloc_and_summary() {
        let mut ns = NameSource::new(100);
        let prog = iota_program(&mut ns);
        let out = explicit_allocations(prog, &mut ns).unwrap();
        assert_eq!(out.lore, Lore::ExplicitMemory);
        let body = &out.funs[0].body;
        assert_eq!(find_allocs(body), 1);
        // The iota's pattern element now carries a direct summary.
        let iota_stm = body
            .stms
            .iter()
            .find(|s| matches!(s.exp, Exp::BasicOp(BasicOp::Iota { .. })))
            .unwrap();
        match &iota_stm.pattern.values[0].summary {
            Some(MemSummary::Array { ixfun, .. }) => assert!(ixfun.is_direct()),
            other => panic!("expected array summary, got {:?}", other),
        }
    }

    #[test]
    fn test_array_params_gain_memory_params() {
        let mut ns = NameSource::new(100);
        let prog = iota_program(&mut ns);
        let out = explicit_allocations(prog, &mut ns).unwrap();
        let params = &out.funs[0].params;
        assert_eq!(params.len(), 2);
        assert!(matches!(params[0].ty, Type::Mem { .. }));
        assert!(matches!(params[1].ty, Type::Array { .. }));
        assert!(params[1].summary.is_some());
    }

    #[test]
    fn test_rearrange_derives_permuted_ixfun() {
        let mut ns = NameSource::new(100);
        let xs = ns.fresh("xs");
        let ts = ns.fresh("ts");
        let arr_ty = Type::array(
            PrimType::Int(IntType::I32),
            vec![SubExp::int32(2), SubExp::int32(3)],
        );
        let t_ty = Type::array(
            PrimType::Int(IntType::I32),
            vec![SubExp::int32(3), SubExp::int32(2)],
        );
        let prog = Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![t_ty.clone()]),
                params: vec![Param::new(xs.clone(), arr_ty)],
                body: Body::new(
                    vec![Stm::new(
                        Pattern::single(ts.clone(), t_ty),
                        Exp::BasicOp(BasicOp::Rearrange {
                            array: xs,
                            perm: vec![1, 0],
                        }),
                    )],
                    vec![SubExp::Var(ts)],
                ),
            }],
        );
        let out = explicit_allocations(prog, &mut ns).unwrap();
        let body = &out.funs[0].body;
        // No allocation: a rearrangement is a view.
        assert_eq!(find_allocs(body), 0);
        match &body.stms[0].pattern.values[0].summary {
            Some(MemSummary::Array { ixfun, .. }) => {
                let (_, perm) = ixfun.rearrange_with_offset().unwrap();
                assert_eq!(perm, vec![1, 0]);
            }
            other => panic!("expected array summary, got {:?}", other),
        }
    }
}
