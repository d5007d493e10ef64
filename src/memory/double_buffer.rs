//! Double buffering of loop-carried memory
//!
//! After explicit allocation, a loop iteration reads its array merge
//! parameters from one block and produces results in blocks allocated
//! inside the body. Hoisting those interior allocations out of the loop
//! would make every iteration write the block it is simultaneously
//! reading. This pass stages each array merge parameter through a
//! dedicated buffer: the produced array is copied into the buffer at the
//! end of the iteration and the buffer-backed array is what the loop
//! carries.
//!
//! Inside kernels the initial merge value is staged through the buffer
//! too, which makes the memory block the loop returns non-existential —
//! a prerequisite for later memory expansion.

use crate::error::{Error, Result};
use crate::ir::build::StmBuilder;
use crate::ir::kernel::KernelOp;
use crate::ir::traverse::{rewrite_op_inner, rewrite_stm_inner, StmRewriter};
use crate::ir::types::{SubExp, Type};
use crate::ir::{BasicOp, Body, Exp, FunDef, Lore, Op, Param, PatElem, Pattern, Program, Stm};
use crate::memory::{IxFun, MemSummary};
use crate::names::{NameSource, VName};
use crate::pass::Pass;
use rustc_hash::FxHashMap;
use tracing::debug;

const PASS: &str = "double-buffer";

/// Double buffering as a pipeline pass
pub fn pass() -> Pass {
    Pass::new(PASS, Lore::ExplicitMemory, Lore::ExplicitMemory, double_buffer)
}

/// Rewrite every qualifying loop in the program
pub fn double_buffer(prog: Program, ns: &mut NameSource) -> Result<Program> {
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
            let mut db = Buffering {
                ns: &mut *ns,
                summaries: FxHashMap::default(),
                in_kernel: false,
            };
            for p in &params {
                if let Some(s) = &p.summary {
                    db.summaries.insert(p.name.clone(), s.clone());
                }
            }
            Ok(FunDef {
                name,
                rettype,
                params,
                body: db.rewrite_body(body)?,
            })
        })
        .collect::<Result<_>>()?;
    Ok(Program::new(Lore::ExplicitMemory, funs))
}

/// Statement rewriter staging loop-carried arrays; kernel interiors set
/// a flag that also stages the initial merge values
struct Buffering<'a> {
    ns: &'a mut NameSource,
    summaries: FxHashMap<VName, MemSummary>,
    in_kernel: bool,
}

impl StmRewriter for Buffering<'_> {
    fn rewrite_stm(&mut self, stm: Stm) -> Result<Vec<Stm>> {
        match stm.exp {
            Exp::DoLoop {
                ctx_merge,
                val_merge,
                form,
                body,
            } => {
                let body = self.rewrite_body(body)?;
                self.record_pattern(&stm.pattern);
                self.buffer_loop(stm.pattern, ctx_merge, val_merge, form, body)
            }
            _ => {
                let stms = rewrite_stm_inner(self, stm)?;
                for s in &stms {
                    self.record_pattern(&s.pattern);
                }
                Ok(stms)
            }
        }
    }

    fn rewrite_op(&mut self, op: Op) -> Result<Op> {
        if let Op::Kernel(KernelOp::Kernel(k)) = &op {
            for inp in &k.inputs {
                if let Some(s) = &inp.param.summary {
                    self.summaries.insert(inp.param.name.clone(), s.clone());
                }
            }
        }
        let was_in_kernel = self.in_kernel;
        if matches!(op, Op::Kernel(_)) {
            self.in_kernel = true;
        }
        let op = rewrite_op_inner(self, op);
        self.in_kernel = was_in_kernel;
        op
    }
}

impl Buffering<'_> {
    fn record_pattern(&mut self, pattern: &Pattern) {
        for pe in pattern.elems() {
            if let Some(s) = &pe.summary {
                self.summaries.insert(pe.name.clone(), s.clone());
            }
        }
    }

    /// Stage each array merge parameter through a fresh buffer
    fn buffer_loop(
        &mut self,
        pattern: Pattern,
        ctx_merge: Vec<(Param, SubExp)>,
        mut val_merge: Vec<(Param, SubExp)>,
        form: crate::ir::LoopForm,
        mut body: Body,
    ) -> Result<Vec<Stm>> {
        let in_kernel = self.in_kernel;
        let mut out = Vec::new();
        // Memory context parameters were appended by the allocator in
        // value order; pair them back up with their array parameters.
        let n_plain_ctx = ctx_merge
            .iter()
            .take_while(|(p, _)| !matches!(p.ty, Type::Mem { .. }))
            .count();
        let mem_merge: Vec<usize> = (n_plain_ctx..ctx_merge.len()).collect();
        let array_positions: Vec<usize> = val_merge
            .iter()
            .enumerate()
            .filter(|(_, (p, _))| p.ty.rank() > 0)
            .map(|(i, _)| i)
            .collect();
        if mem_merge.len() != array_positions.len() {
            return Err(Error::internal(
                PASS,
                "memory context does not pair with array merge parameters".to_string(),
            ));
        }

        let mut ctx_merge = ctx_merge;
        for (mem_i, (&ctx_idx, &val_idx)) in mem_merge.iter().zip(&array_positions).enumerate() {
            let (p, init) = val_merge[val_idx].clone();
            let (elem, dims) = match &p.ty {
                Type::Array { elem, shape, .. } => (*elem, shape.dims.clone()),
                _ => continue,
            };
            debug!(param = %p.name, "double-buffering a merge parameter");

            // The buffer lives just before the loop.
            let mut b = StmBuilder::new(self.ns);
            let bytes = b.byte_size("dbuf_bytes", &dims, elem);
            let buffer = b.names().fresh(format!("{}_dbuf", p.name.base()));
            let mem_ty = Type::Mem {
                size: bytes.clone(),
                space: match &ctx_merge[ctx_idx].0.ty {
                    Type::Mem { space, .. } => *space,
                    _ => Default::default(),
                },
            };
            b.let_into(
                buffer.clone(),
                mem_ty,
                Exp::BasicOp(BasicOp::Alloc {
                    size: bytes,
                    space: match &ctx_merge[ctx_idx].0.ty {
                        Type::Mem { space, .. } => *space,
                        _ => Default::default(),
                    },
                }),
            );
            out.extend(b.into_stms());
            self.summaries.insert(buffer.clone(), MemSummary::Scalar);

            // In kernels the initial value is staged through the buffer
            // as well, so the loop's memory never escapes existentially.
            if in_kernel {
                let src = match &init {
                    SubExp::Var(v) => v.clone(),
                    SubExp::Constant(_) => {
                        return Err(Error::internal(
                            PASS,
                            "array merge parameter initialized by a constant".to_string(),
                        ))
                    }
                };
                let staged_init = self.ns.newname(&src);
                let summary = MemSummary::Array {
                    mem: buffer.clone(),
                    ixfun: IxFun::iota(dims.clone()),
                };
                self.summaries.insert(staged_init.clone(), summary.clone());
                out.push(Stm::new(
                    Pattern::of_values(vec![PatElem::with_summary(
                        staged_init.clone(),
                        p.ty.clone(),
                        summary,
                    )]),
                    Exp::BasicOp(BasicOp::Copy(src)),
                ));
                val_merge[val_idx].1 = SubExp::Var(staged_init);
                ctx_merge[ctx_idx].1 = SubExp::Var(buffer.clone());
            }

            // The iteration's produced array is copied into the buffer
            // and the buffer-backed array is what the loop carries.
            let res_pos = n_plain_ctx + mem_merge.len() + val_idx;
            let produced = match body.result.get(res_pos) {
                Some(SubExp::Var(v)) => v.clone(),
                _ => {
                    return Err(Error::internal(
                        PASS,
                        "array loop result is not a variable".to_string(),
                    ))
                }
            };
            let staged = self.ns.fresh(format!("{}_staged", p.name.base()));
            let summary = MemSummary::Array {
                mem: buffer.clone(),
                ixfun: IxFun::iota(dims.clone()),
            };
            self.summaries.insert(staged.clone(), summary.clone());
            body.stms.push(Stm::new(
                Pattern::of_values(vec![PatElem::with_summary(
                    staged.clone(),
                    p.ty.clone(),
                    summary,
                )]),
                Exp::BasicOp(BasicOp::Copy(produced)),
            ));
            body.result[res_pos] = SubExp::Var(staged);
            // The memory the loop returns is now the buffer.
            body.result[n_plain_ctx + mem_i] = SubExp::Var(buffer.clone());
        }

        out.push(Stm::new(
            pattern,
            Exp::DoLoop {
                ctx_merge,
                val_merge,
                form,
                body,
            },
        ));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{IntType, PrimType};
    use crate::ir::types::static_shapes;
    use crate::ir::LoopForm;
    use crate::names::NameSource;

    /// A loop carrying one [4]i32 array already in explicit memory
    fn loop_program(ns: &mut NameSource) -> Program {
        let arr_ty = Type::array(PrimType::Int(IntType::I32), vec![SubExp::int32(4)]);
        let init = ns.fresh("init");
        let init_mem = ns.fresh("init_mem");
        let mem_ty = Type::Mem {
            size: SubExp::int32(16),
            space: Default::default(),
        };

        let acc = ns.fresh("acc");
        let acc_mem = ns.fresh("acc_mem");
        let i = ns.fresh("i");
        let produced = ns.fresh("produced");
        let produced_mem = ns.fresh("produced_mem");

        let body = Body::new(
            vec![
                Stm::new(
                    Pattern::single(produced_mem.clone(), mem_ty.clone()),
                    Exp::BasicOp(BasicOp::Alloc {
                        size: SubExp::int32(16),
                        space: Default::default(),
                    }),
                ),
                Stm::new(
                    Pattern::of_values(vec![PatElem::with_summary(
                        produced.clone(),
                        arr_ty.clone(),
                        MemSummary::Array {
                            mem: produced_mem.clone(),
                            ixfun: IxFun::iota(vec![SubExp::int32(4)]),
                        },
                    )]),
                    Exp::BasicOp(BasicOp::Copy(acc.clone())),
                ),
            ],
            vec![SubExp::Var(produced_mem), SubExp::Var(produced)],
        );

        let out = ns.fresh("out");
        let out_mem = ns.fresh("out_mem");
        let loop_stm = Stm::new(
            Pattern::new(
                vec![PatElem::new(out_mem.clone(), mem_ty.clone())],
                vec![PatElem::with_summary(
                    out.clone(),
                    arr_ty.clone(),
                    MemSummary::Array {
                        mem: out_mem,
                        ixfun: IxFun::iota(vec![SubExp::int32(4)]),
                    },
                )],
            ),
            Exp::DoLoop {
                ctx_merge: vec![(
                    Param::new(acc_mem.clone(), mem_ty.clone()),
                    SubExp::Var(init_mem.clone()),
                )],
                val_merge: vec![(
                    Param::with_summary(
                        acc.clone(),
                        arr_ty.clone(),
                        MemSummary::Array {
                            mem: acc_mem,
                            ixfun: IxFun::iota(vec![SubExp::int32(4)]),
                        },
                    ),
                    SubExp::Var(init.clone()),
                )],
                form: LoopForm::For {
                    var: i,
                    bound: SubExp::int32(10),
                },
                body,
            },
        );

        Program::new(
            Lore::ExplicitMemory,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![arr_ty.clone()]),
                params: vec![
                    Param::new(init_mem, mem_ty),
                    Param::with_summary(
                        init.clone(),
                        arr_ty,
                        MemSummary::Array {
                            mem: VName::new("init_mem", 1),
                            ixfun: IxFun::iota(vec![SubExp::int32(4)]),
                        },
                    ),
                ],
                body: Body::new(vec![loop_stm], vec![SubExp::Var(out)]),
            }],
        )
    }

    #[test]
    fn test_buffer_allocated_before_loop() {
        let mut ns = NameSource::new(100);
        let prog = loop_program(&mut ns);
        let out = double_buffer(prog, &mut ns).unwrap();
        let body = &out.funs[0].body;
        // An alloc now precedes the loop.
        let loop_idx = body
            .stms
            .iter()
            .position(|s| matches!(s.exp, Exp::DoLoop { .. }))
            .unwrap();
        assert!(body.stms[..loop_idx]
            .iter()
            .any(|s| matches!(s.exp, Exp::BasicOp(BasicOp::Alloc { .. }))));
    }

    #[test]
    fn test_iteration_result_staged_through_buffer() {
        let mut ns = NameSource::new(100);
        let prog = loop_program(&mut ns);
        let out = double_buffer(prog, &mut ns).unwrap();
        let body = &out.funs[0].body;
        let Exp::DoLoop { body: loop_body, .. } = &body
            .stms
            .iter()
            .find(|s| matches!(s.exp, Exp::DoLoop { .. }))
            .unwrap()
            .exp
        else {
            unreachable!()
        };
        // The last body statement is the staging copy, and the result
        // references it.
        let last = loop_body.stms.last().unwrap();
        assert!(matches!(last.exp, Exp::BasicOp(BasicOp::Copy(_))));
        let staged = &last.pattern.values[0].name;
        assert!(loop_body.result.contains(&SubExp::Var(staged.clone())));
    }
}
