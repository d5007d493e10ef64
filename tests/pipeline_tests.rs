//! End-to-end pipeline tests

mod common;

use common::*;
use weft::ir::prim::{BinOp, IntType, PrimType};
use weft::ir::types::{static_shapes, SubExp, Type, Uniqueness};
use weft::ir::{BasicOp, Body, Exp, Lambda, Op, Param, Pattern, Soac, Stm};
use weft::pass::{PassConfig, PassManager};
use weft::{NameSource, VName};

/// iota(n), map (+2), scatter into a unique destination: the classic
/// smoke-test program shape.
fn smoke_program(ns: &mut NameSource, n: i32) -> (weft::Program, VName) {
    let dst = ns.fresh("dst");
    let base = ns.fresh("base");
    let mapped = ns.fresh("mapped");
    let idx = ns.fresh("idx");
    let written = ns.fresh("written");

    let iota_stm = Stm::new(
        Pattern::single(base.clone(), arr_i32(n)),
        Exp::BasicOp(BasicOp::Iota {
            n: SubExp::int32(n),
        }),
    );
    let idx_stm = Stm::new(
        Pattern::single(idx.clone(), arr_i32(n)),
        Exp::BasicOp(BasicOp::Iota {
            n: SubExp::int32(n),
        }),
    );
    let map_s = map_stm(ns, &mapped, &base, n, 2);

    let ip = ns.fresh("ip");
    let vp = ns.fresh("vp");
    let write_stm = Stm::new(
        Pattern::single(written.clone(), arr_i32(n)),
        Exp::Op(Op::Soac(Soac::Write {
            width: SubExp::int32(n),
            lambda: Lambda::new(
                vec![Param::new(ip.clone(), i32t()), Param::new(vp.clone(), i32t())],
                Body::result_only(vec![SubExp::Var(ip), SubExp::Var(vp)]),
                vec![i32t(), i32t()],
            ),
            arrays: vec![idx, mapped],
            dests: vec![dst.clone()],
        })),
    );

    let prog = program_with(
        vec![Param::new(
            dst.clone(),
            Type::Array {
                elem: PrimType::Int(IntType::I32),
                shape: weft::ir::types::Shape::new(vec![SubExp::int32(n)]),
                uniqueness: Uniqueness::Unique,
            },
        )],
        vec![arr_i32(n)],
        vec![iota_stm, idx_stm, map_s, write_stm],
        vec![SubExp::Var(written.clone())],
    );
    (prog, written)
}

#[test]
fn test_map_write_fusion_leaves_one_write() {
    let mut ns = NameSource::new(0);
    let (prog, _) = smoke_program(&mut ns, 16);
    let pipeline = weft::enabling_pipeline().unwrap();
    let out = PassManager::new().run(&pipeline, prog, &mut ns).unwrap();
    let body = &out.funs[0].body;
    assert_eq!(
        count_exps(body, |e| matches!(
            e,
            Exp::Op(Op::Soac(Soac::Write { .. }))
        )),
        1
    );
    assert_eq!(
        count_exps(body, |e| matches!(e, Exp::Op(Op::Soac(Soac::Map { .. })))),
        0
    );
}

#[test]
fn test_sequential_pipeline_reaches_explicit_memory() {
    let mut ns = NameSource::new(0);
    let (prog, _) = smoke_program(&mut ns, 9337);
    let pipeline = weft::sequential_pipeline().unwrap();
    let out = PassManager::new().run(&pipeline, prog, &mut ns).unwrap();
    assert_eq!(out.lore, weft::Lore::ExplicitMemory);
    // No SOAC survives sequentialization.
    assert_eq!(
        count_exps(&out.funs[0].body, |e| matches!(e, Exp::Op(Op::Soac(_)))),
        0
    );
    // Every array-typed binding carries a memory summary.
    fn all_arrays_summarized(body: &Body) -> bool {
        body.stms.iter().all(|s| {
            let here = s
                .pattern
                .values
                .iter()
                .all(|pe| pe.ty.rank() == 0 || pe.summary.is_some());
            let inner = match &s.exp {
                Exp::DoLoop { body, .. } => all_arrays_summarized(body),
                Exp::If {
                    tbranch, fbranch, ..
                } => all_arrays_summarized(tbranch) && all_arrays_summarized(fbranch),
                _ => true,
            };
            here && inner
        })
    }
    assert!(all_arrays_summarized(&out.funs[0].body));
}

#[test]
fn test_allocs_precede_uses_of_their_blocks() {
    let mut ns = NameSource::new(0);
    let (prog, _) = smoke_program(&mut ns, 64);
    let pipeline = weft::sequential_pipeline().unwrap();
    let out = PassManager::new().run(&pipeline, prog, &mut ns).unwrap();

    fn check_body(body: &Body, known: &mut Vec<VName>) {
        for stm in &body.stms {
            for pe in stm.pattern.elems() {
                if let Some(s) = &pe.summary {
                    if let Some(mem) = s.mem() {
                        assert!(
                            known.contains(mem),
                            "block {} used before its allocation",
                            mem
                        );
                    }
                }
            }
            match &stm.exp {
                Exp::DoLoop {
                    ctx_merge, body, ..
                } => {
                    let mut inner = known.clone();
                    for (p, _) in ctx_merge {
                        inner.push(p.name.clone());
                    }
                    check_body(body, &mut inner);
                }
                Exp::If {
                    tbranch, fbranch, ..
                } => {
                    check_body(tbranch, &mut known.clone());
                    check_body(fbranch, &mut known.clone());
                }
                _ => {}
            }
            for pe in stm.pattern.elems() {
                if matches!(pe.ty, Type::Mem { .. }) {
                    known.push(pe.name.clone());
                }
            }
        }
    }
    let mut known: Vec<VName> = out.funs[0]
        .params
        .iter()
        .filter(|p| matches!(p.ty, Type::Mem { .. }))
        .map(|p| p.name.clone())
        .collect();
    check_body(&out.funs[0].body, &mut known);
}

#[test]
fn test_name_source_is_monotonic_across_the_pipeline() {
    let mut ns = NameSource::new(0);
    let (prog, _) = smoke_program(&mut ns, 32);
    let before = ns.cursor();
    let pipeline = weft::sequential_pipeline().unwrap();
    PassManager::new().run(&pipeline, prog, &mut ns).unwrap();
    assert!(ns.cursor() >= before);
}

#[test]
fn test_failing_program_names_the_pass_and_writes_nothing() {
    // A program that consumes a nonunique parameter fails checking after
    // the very first pass.
    let mut ns = NameSource::new(0);
    let xs = ns.fresh("xs");
    let x = ns.fresh("x");
    let prog = program_with(
        vec![Param::new(xs.clone(), arr_i32(4))],
        vec![arr_i32(4)],
        vec![Stm::new(
            Pattern::single(x.clone(), arr_i32(4)),
            Exp::BasicOp(BasicOp::Update {
                array: xs,
                indices: vec![SubExp::int32(0)],
                value: SubExp::int32(1),
            }),
        )],
        vec![SubExp::Var(x)],
    );
    let pipeline = weft::sequential_pipeline().unwrap();
    let err = PassManager::new().run(&pipeline, prog, &mut ns).unwrap_err();
    assert_eq!(err.kind(), "UniquenessError");
    assert!(err.to_string().starts_with("simplify:"));
}

#[test]
fn test_verbose_failures_attach_the_program() {
    let mut ns = NameSource::new(0);
    let xs = ns.fresh("xs");
    let x = ns.fresh("x");
    let prog = program_with(
        vec![Param::new(xs.clone(), arr_i32(4))],
        vec![arr_i32(4)],
        vec![Stm::new(
            Pattern::single(x.clone(), arr_i32(4)),
            Exp::BasicOp(BasicOp::Update {
                array: xs,
                indices: vec![SubExp::int32(0)],
                value: SubExp::int32(1),
            }),
        )],
        vec![SubExp::Var(x)],
    );
    let pipeline = weft::sequential_pipeline().unwrap();
    let manager = PassManager::with_config(PassConfig {
        check_types: true,
        check_uniqueness: true,
        verbose: true,
    });
    let err = manager.run(&pipeline, prog, &mut ns).unwrap_err();
    assert!(err.to_string().contains("program at point of failure"));
}

#[test]
fn test_renamer_is_structurally_idempotent() {
    let mut ns = NameSource::new(0);
    let (prog, _) = smoke_program(&mut ns, 8);
    let once = weft::ir::rename::rename_program(prog, &mut ns);
    let twice = weft::ir::rename::rename_program(once.clone(), &mut ns);
    // Same shape: statement counts and expression structure agree.
    assert_eq!(once.funs.len(), twice.funs.len());
    assert_eq!(once.funs[0].body.stms.len(), twice.funs[0].body.stms.len());
    for (a, b) in once.funs[0].body.stms.iter().zip(&twice.funs[0].body.stms) {
        assert_eq!(
            std::mem::discriminant(&a.exp),
            std::mem::discriminant(&b.exp)
        );
    }
    weft::typecheck::check_program(&twice).unwrap();
}

#[test]
fn test_interchange_round_trip_preserves_the_program() {
    let mut ns = NameSource::new(0);
    let (prog, _) = smoke_program(&mut ns, 8);
    let unit = weft::interchange::CompilationUnit::new(prog, ns.cursor());
    let text = weft::interchange::to_json(&unit).unwrap();
    let back = weft::interchange::from_json(&text).unwrap();
    assert_eq!(back.program.funs[0].body, unit.program.funs[0].body);
    assert_eq!(back.name_seed, unit.name_seed);
}

#[test]
fn test_gpu_pipeline_produces_kernels_for_simple_maps() {
    // A pure map program distributes to a kernel (or a recognized host
    // operation) rather than sequential loops.
    let mut ns = NameSource::new(0);
    let input = ns.fresh("input");
    let mapped = ns.fresh("mapped");
    let stm = map_stm(&mut ns, &mapped, &input, 128, 1);
    let prog = program_with(
        vec![Param::new(input.clone(), arr_i32(128))],
        vec![arr_i32(128)],
        vec![stm],
        vec![SubExp::Var(mapped)],
    );
    let pipeline = weft::gpu_pipeline().unwrap();
    let out = PassManager::new().run(&pipeline, prog, &mut ns).unwrap();
    assert_eq!(out.lore, weft::Lore::ExplicitMemory);
    let kernels = count_exps(&out.funs[0].body, |e| matches!(e, Exp::Op(Op::Kernel(_))));
    let loops = count_exps(&out.funs[0].body, |e| matches!(e, Exp::DoLoop { .. }));
    assert!(kernels > 0 || loops == 0, "map neither distributed nor recognized");
}

#[test]
fn test_fused_smoke_program_still_typechecks_every_stage() {
    // The checked pass manager re-typechecks after every pass; a clean
    // run certifies every intermediate program.
    let mut ns = NameSource::new(0);
    let (prog, _) = smoke_program(&mut ns, 9337);
    let pipeline = weft::sequential_pipeline().unwrap();
    let manager = PassManager::with_config(PassConfig {
        check_types: true,
        check_uniqueness: true,
        verbose: false,
    });
    manager.run(&pipeline, prog, &mut ns).unwrap();
}

#[test]
fn test_reduce_of_map_survives_the_enabling_pipeline() {
    let mut ns = NameSource::new(0);
    let input = ns.fresh("input");
    let mapped = ns.fresh("mapped");
    let map_s = map_stm(&mut ns, &mapped, &input, 32, 2);

    let a = ns.fresh("a");
    let b = ns.fresh("b");
    let s = ns.fresh("s");
    let r = ns.fresh("r");
    let red_stm = Stm::new(
        Pattern::single(r.clone(), i32t()),
        Exp::Op(Op::Soac(Soac::Reduce {
            width: SubExp::int32(32),
            lambda: Lambda::new(
                vec![Param::new(a.clone(), i32t()), Param::new(b.clone(), i32t())],
                Body::new(
                    vec![Stm::new(
                        Pattern::single(s.clone(), i32t()),
                        Exp::BasicOp(BasicOp::BinOp(
                            BinOp::Add(IntType::I32),
                            SubExp::Var(a),
                            SubExp::Var(b),
                        )),
                    )],
                    vec![SubExp::Var(s)],
                ),
                vec![i32t()],
            ),
            inputs: vec![(SubExp::int32(0), mapped)],
        })),
    );
    let prog = program_with(
        vec![Param::new(input.clone(), arr_i32(32))],
        vec![i32t()],
        vec![map_s, red_stm],
        vec![SubExp::Var(r)],
    );
    let pipeline = weft::enabling_pipeline().unwrap();
    let out = PassManager::new().run(&pipeline, prog, &mut ns).unwrap();
    // The map disappeared into a redomap.
    assert_eq!(
        count_exps(&out.funs[0].body, |e| matches!(
            e,
            Exp::Op(Op::Soac(Soac::Redomap { .. }))
        )),
        1
    );
    assert_eq!(
        static_shapes(vec![i32t()]).len(),
        out.funs[0].rettype.len()
    );
}
