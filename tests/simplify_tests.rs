//! Integration tests for the simplifier

mod common;

use common::*;
use pretty_assertions::assert_eq;
use weft::ir::prim::{BinOp, IntType, PrimValue};
use weft::ir::types::{static_shapes, SubExp};
use weft::ir::{BasicOp, Body, Exp, LoopForm, Param, Pattern, Stm};
use weft::simplify::simplify_program;
use weft::NameSource;

#[test]
fn test_scalar_constant_folding_chain() {
    // let x = 1 + 2 in x * 0  ==>  the body is the constant 0
    let mut ns = NameSource::new(0);
    let x = ns.fresh("x");
    let y = ns.fresh("y");
    let prog = program_with(
        vec![],
        vec![i32t()],
        vec![
            binop_stm(&x, BinOp::Add(IntType::I32), SubExp::int32(1), SubExp::int32(2)),
            binop_stm(&y, BinOp::Mul(IntType::I32), SubExp::Var(x), SubExp::int32(0)),
        ],
        vec![SubExp::Var(y)],
    );
    let out = simplify_program(prog, &mut ns).unwrap();
    let body = &out.funs[0].body;
    assert!(body.stms.is_empty());
    assert_eq!(body.result, vec![SubExp::Constant(PrimValue::int32(0))]);
}

#[test]
fn test_branch_invariant_hoisted_once() {
    // if c then (let x = y+1 in x*2) else (let x' = y+1 in x'+2)
    // The shared y+1 must end up bound once, outside the branch.
    let mut ns = NameSource::new(0);
    let c = ns.fresh("c");
    let y = ns.fresh("y");
    let x1 = ns.fresh("x");
    let r1 = ns.fresh("r1");
    let x2 = ns.fresh("x");
    let r2 = ns.fresh("r2");
    let out_name = ns.fresh("out");

    let tbranch = Body::new(
        vec![
            binop_stm(&x1, BinOp::Add(IntType::I32), SubExp::Var(y.clone()), SubExp::int32(1)),
            binop_stm(&r1, BinOp::Mul(IntType::I32), SubExp::Var(x1.clone()), SubExp::int32(2)),
        ],
        vec![SubExp::Var(r1)],
    );
    let fbranch = Body::new(
        vec![
            binop_stm(&x2, BinOp::Add(IntType::I32), SubExp::Var(y.clone()), SubExp::int32(1)),
            binop_stm(&r2, BinOp::Add(IntType::I32), SubExp::Var(x2.clone()), SubExp::int32(2)),
        ],
        vec![SubExp::Var(r2)],
    );
    let prog = program_with(
        vec![
            Param::new(c.clone(), weft::ir::types::Type::Prim(weft::ir::prim::PrimType::Bool)),
            Param::new(y.clone(), i32t()),
        ],
        vec![i32t()],
        vec![Stm::new(
            Pattern::single(out_name.clone(), i32t()),
            Exp::If {
                cond: SubExp::Var(c),
                tbranch,
                fbranch,
                rettype: static_shapes(vec![i32t()]),
            },
        )],
        vec![SubExp::Var(out_name)],
    );

    let out = simplify_program(prog, &mut ns).unwrap();
    let body = &out.funs[0].body;
    // y+1 appears exactly once in the whole function.
    let adds_of_one = count_exps(body, |e| {
        matches!(
            e,
            Exp::BasicOp(BasicOp::BinOp(BinOp::Add(_), SubExp::Var(_), se))
                if se.constant() == Some(PrimValue::int32(1))
        )
    });
    assert_eq!(adds_of_one, 1);
    // And it is bound at the top level, before the conditional.
    assert!(matches!(
        body.stms.first().map(|s| &s.exp),
        Some(Exp::BasicOp(BasicOp::BinOp(BinOp::Add(_), _, _)))
    ));
}

#[test]
fn test_copy_of_iota_is_reduced() {
    let mut ns = NameSource::new(0);
    let t = ns.fresh("t");
    let copied = ns.fresh("copied");
    let prog = program_with(
        vec![],
        vec![arr_i32(5)],
        vec![
            Stm::new(
                Pattern::single(t.clone(), arr_i32(5)),
                Exp::BasicOp(BasicOp::Iota {
                    n: SubExp::int32(5),
                }),
            ),
            Stm::new(
                Pattern::single(copied.clone(), arr_i32(5)),
                Exp::BasicOp(BasicOp::Copy(t)),
            ),
        ],
        vec![SubExp::Var(copied)],
    );
    let out = simplify_program(prog, &mut ns).unwrap();
    let body = &out.funs[0].body;
    assert_eq!(
        count_exps(body, |e| matches!(e, Exp::BasicOp(BasicOp::Copy(_)))),
        0
    );
    assert_eq!(
        count_exps(body, |e| matches!(e, Exp::BasicOp(BasicOp::Iota { .. }))),
        1
    );
}

#[test]
fn test_copy_of_rearrange_is_preserved() {
    // The copy after a transposition is the coalescing point; the
    // simplifier must keep it.
    let mut ns = NameSource::new(0);
    let a = ns.fresh("a");
    let t = ns.fresh("t");
    let copied = ns.fresh("copied");
    let mat = weft::ir::types::Type::array(
        weft::ir::prim::PrimType::Int(IntType::I32),
        vec![SubExp::int32(2), SubExp::int32(3)],
    );
    let mat_t = weft::ir::types::Type::array(
        weft::ir::prim::PrimType::Int(IntType::I32),
        vec![SubExp::int32(3), SubExp::int32(2)],
    );
    let prog = program_with(
        vec![Param::new(a.clone(), mat)],
        vec![mat_t.clone()],
        vec![
            Stm::new(
                Pattern::single(t.clone(), mat_t.clone()),
                Exp::BasicOp(BasicOp::Rearrange {
                    array: a,
                    perm: vec![1, 0],
                }),
            ),
            Stm::new(
                Pattern::single(copied.clone(), mat_t),
                Exp::BasicOp(BasicOp::Copy(t)),
            ),
        ],
        vec![SubExp::Var(copied)],
    );
    let out = simplify_program(prog, &mut ns).unwrap();
    let body = &out.funs[0].body;
    assert_eq!(
        count_exps(body, |e| matches!(e, Exp::BasicOp(BasicOp::Copy(_)))),
        1
    );
}

#[test]
fn test_single_iteration_loop_unrolls() {
    // loop {acc = 0} for i < 1 do acc + 5  ==>  straight-line 5
    let mut ns = NameSource::new(0);
    let acc = ns.fresh("acc");
    let i = ns.fresh("i");
    let next = ns.fresh("next");
    let r = ns.fresh("r");
    let loop_body = Body::new(
        vec![binop_stm(
            &next,
            BinOp::Add(IntType::I32),
            SubExp::Var(acc.clone()),
            SubExp::int32(5),
        )],
        vec![SubExp::Var(next)],
    );
    let prog = program_with(
        vec![],
        vec![i32t()],
        vec![Stm::new(
            Pattern::single(r.clone(), i32t()),
            Exp::DoLoop {
                ctx_merge: vec![],
                val_merge: vec![(Param::new(acc, i32t()), SubExp::int32(0))],
                form: LoopForm::For {
                    var: i,
                    bound: SubExp::int32(1),
                },
                body: loop_body,
            },
        )],
        vec![SubExp::Var(r)],
    );
    let out = simplify_program(prog, &mut ns).unwrap();
    let body = &out.funs[0].body;
    assert_eq!(
        count_exps(body, |e| matches!(e, Exp::DoLoop { .. })),
        0
    );
    assert_eq!(body.result, vec![SubExp::Constant(PrimValue::int32(5))]);
    // The unrolled form still typechecks.
    weft::typecheck::check_program(&out).unwrap();
}

#[test]
fn test_zero_trip_loop_yields_initializers() {
    let mut ns = NameSource::new(0);
    let acc = ns.fresh("acc");
    let i = ns.fresh("i");
    let r = ns.fresh("r");
    let prog = program_with(
        vec![],
        vec![i32t()],
        vec![Stm::new(
            Pattern::single(r.clone(), i32t()),
            Exp::DoLoop {
                ctx_merge: vec![],
                val_merge: vec![(Param::new(acc.clone(), i32t()), SubExp::int32(7))],
                form: LoopForm::For {
                    var: i,
                    bound: SubExp::int32(0),
                },
                body: Body::result_only(vec![SubExp::Var(acc)]),
            },
        )],
        vec![SubExp::Var(r)],
    );
    let out = simplify_program(prog, &mut ns).unwrap();
    assert_eq!(
        out.funs[0].body.result,
        vec![SubExp::Constant(PrimValue::int32(7))]
    );
}

#[test]
fn test_zero_sized_iota_is_preserved() {
    let mut ns = NameSource::new(0);
    let t = ns.fresh("empty");
    let prog = program_with(
        vec![],
        vec![arr_i32(0)],
        vec![Stm::new(
            Pattern::single(t.clone(), arr_i32(0)),
            Exp::BasicOp(BasicOp::Iota {
                n: SubExp::int32(0),
            }),
        )],
        vec![SubExp::Var(t)],
    );
    let out = simplify_program(prog, &mut ns).unwrap();
    assert_eq!(
        count_exps(&out.funs[0].body, |e| matches!(
            e,
            Exp::BasicOp(BasicOp::Iota { .. })
        )),
        1
    );
    weft::typecheck::check_program(&out).unwrap();
}

#[test]
fn test_constant_branch_is_inlined() {
    let mut ns = NameSource::new(0);
    let r = ns.fresh("r");
    let prog = program_with(
        vec![],
        vec![i32t()],
        vec![Stm::new(
            Pattern::single(r.clone(), i32t()),
            Exp::If {
                cond: SubExp::Constant(PrimValue::Bool(true)),
                tbranch: Body::result_only(vec![SubExp::int32(1)]),
                fbranch: Body::result_only(vec![SubExp::int32(2)]),
                rettype: static_shapes(vec![i32t()]),
            },
        )],
        vec![SubExp::Var(r)],
    );
    let out = simplify_program(prog, &mut ns).unwrap();
    assert_eq!(
        out.funs[0].body.result,
        vec![SubExp::Constant(PrimValue::int32(1))]
    );
}

#[test]
fn test_simplify_is_idempotent_on_structure() {
    let mut ns = NameSource::new(0);
    let x = ns.fresh("x");
    let y = ns.fresh("y");
    let p = ns.fresh("p");
    let prog = program_with(
        vec![Param::new(p.clone(), i32t())],
        vec![i32t()],
        vec![
            binop_stm(&x, BinOp::Add(IntType::I32), SubExp::Var(p.clone()), SubExp::int32(0)),
            binop_stm(&y, BinOp::Mul(IntType::I32), SubExp::Var(x), SubExp::Var(p)),
        ],
        vec![SubExp::Var(y)],
    );
    let once = simplify_program(prog, &mut ns).unwrap();
    let twice = simplify_program(once.clone(), &mut ns).unwrap();
    assert_eq!(once.funs[0].body, twice.funs[0].body);
}

#[test]
fn test_dead_code_is_removed() {
    let mut ns = NameSource::new(0);
    let p = ns.fresh("p");
    let dead = ns.fresh("dead");
    let live = ns.fresh("live");
    let prog = program_with(
        vec![Param::new(p.clone(), i32t())],
        vec![i32t()],
        vec![
            binop_stm(&dead, BinOp::Add(IntType::I32), SubExp::Var(p.clone()), SubExp::int32(1)),
            binop_stm(&live, BinOp::Mul(IntType::I32), SubExp::Var(p), SubExp::int32(3)),
        ],
        vec![SubExp::Var(live)],
    );
    let out = simplify_program(prog, &mut ns).unwrap();
    assert_eq!(out.funs[0].body.stms.len(), 1);
}
