//! Integration tests for alias and uniqueness checking

mod common;

use common::*;
use weft::ir::prim::{IntType, PrimType};
use weft::ir::types::{static_shapes, SubExp, Type, Uniqueness};
use weft::ir::{BasicOp, Body, Exp, LoopForm, Param, Pattern, Stm};
use weft::typecheck::{check_program, check_program_with, CheckConfig};
use weft::NameSource;

/// A loop whose body consumes an array that is free in the loop (not a
/// merge parameter)
fn loop_consuming_free_array(ns: &mut NameSource) -> weft::Program {
    let xs = ns.fresh("xs");
    let acc = ns.fresh("acc");
    let i = ns.fresh("i");
    let clobbered = ns.fresh("clobbered");
    let r = ns.fresh("r");

    let loop_body = Body::new(
        vec![Stm::new(
            Pattern::single(clobbered.clone(), arr_i32(4)),
            Exp::BasicOp(BasicOp::Update {
                array: xs.clone(),
                indices: vec![SubExp::Var(i.clone())],
                value: SubExp::int32(0),
            }),
        )],
        vec![SubExp::Var(acc.clone())],
    );
    program_with(
        vec![Param::new(
            xs.clone(),
            Type::Array {
                elem: PrimType::Int(IntType::I32),
                shape: weft::ir::types::Shape::new(vec![SubExp::int32(4)]),
                uniqueness: Uniqueness::Unique,
            },
        )],
        vec![i32t()],
        vec![Stm::new(
            Pattern::single(r.clone(), i32t()),
            Exp::DoLoop {
                ctx_merge: vec![],
                val_merge: vec![(Param::new(acc, i32t()), SubExp::int32(0))],
                form: LoopForm::For {
                    var: i,
                    bound: SubExp::int32(4),
                },
                body: loop_body,
            },
        )],
        vec![SubExp::Var(r)],
    )
}

#[test]
fn test_loop_body_consuming_free_array_is_rejected() {
    let mut ns = NameSource::new(0);
    let prog = loop_consuming_free_array(&mut ns);
    let err = check_program(&prog).unwrap_err();
    assert_eq!(err.kind(), "UniquenessError");
    // The diagnostic cites the offending statement's binding.
    assert!(err.to_string().contains("clobbered"));
}

#[test]
fn test_inhibited_checking_accepts_the_same_program() {
    let mut ns = NameSource::new(0);
    let prog = loop_consuming_free_array(&mut ns);
    let cfg = CheckConfig {
        check_uniqueness: false,
    };
    check_program_with(&prog, &cfg).unwrap();
}

#[test]
fn test_use_after_consumption_is_rejected() {
    // let x = xs with [0] <- 1; let y = xs[1]  -- xs is gone
    let mut ns = NameSource::new(0);
    let xs = ns.fresh("xs");
    let x = ns.fresh("x");
    let y = ns.fresh("y");
    let prog = program_with(
        vec![Param::new(
            xs.clone(),
            Type::Array {
                elem: PrimType::Int(IntType::I32),
                shape: weft::ir::types::Shape::new(vec![SubExp::int32(4)]),
                uniqueness: Uniqueness::Unique,
            },
        )],
        vec![i32t()],
        vec![
            Stm::new(
                Pattern::single(x.clone(), arr_i32(4)),
                Exp::BasicOp(BasicOp::Update {
                    array: xs.clone(),
                    indices: vec![SubExp::int32(0)],
                    value: SubExp::int32(1),
                }),
            ),
            Stm::new(
                Pattern::single(y.clone(), i32t()),
                Exp::BasicOp(BasicOp::Index {
                    array: xs,
                    indices: vec![SubExp::int32(1)],
                }),
            ),
        ],
        vec![SubExp::Var(y)],
    );
    let err = check_program(&prog).unwrap_err();
    assert_eq!(err.kind(), "UniquenessError");
}

#[test]
fn test_consuming_nonunique_parameter_is_rejected() {
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
    let err = check_program(&prog).unwrap_err();
    assert_eq!(err.kind(), "UniquenessError");
}

#[test]
fn test_consumption_through_an_alias_is_rejected() {
    // A reshape aliases its source; updating the reshape consumes the
    // nonunique source underneath.
    let mut ns = NameSource::new(0);
    let xs = ns.fresh("xs");
    let view = ns.fresh("view");
    let x = ns.fresh("x");
    let prog = program_with(
        vec![Param::new(xs.clone(), arr_i32(4))],
        vec![arr_i32(4)],
        vec![
            Stm::new(
                Pattern::single(view.clone(), arr_i32(4)),
                Exp::BasicOp(BasicOp::Reshape {
                    array: xs,
                    new_dims: vec![SubExp::int32(4)],
                }),
            ),
            Stm::new(
                Pattern::single(x.clone(), arr_i32(4)),
                Exp::BasicOp(BasicOp::Update {
                    array: view,
                    indices: vec![SubExp::int32(0)],
                    value: SubExp::int32(1),
                }),
            ),
        ],
        vec![SubExp::Var(x)],
    );
    let err = check_program(&prog).unwrap_err();
    assert_eq!(err.kind(), "UniquenessError");
}

#[test]
fn test_consuming_a_fresh_local_is_allowed() {
    // Arrays with fresh storage (iota) may be updated freely.
    let mut ns = NameSource::new(0);
    let t = ns.fresh("t");
    let x = ns.fresh("x");
    let prog = program_with(
        vec![],
        vec![arr_i32(4)],
        vec![
            Stm::new(
                Pattern::single(t.clone(), arr_i32(4)),
                Exp::BasicOp(BasicOp::Iota {
                    n: SubExp::int32(4),
                }),
            ),
            Stm::new(
                Pattern::single(x.clone(), arr_i32(4)),
                Exp::BasicOp(BasicOp::Update {
                    array: t,
                    indices: vec![SubExp::int32(0)],
                    value: SubExp::int32(9),
                }),
            ),
        ],
        vec![SubExp::Var(x)],
    );
    check_program(&prog).unwrap();
}

#[test]
fn test_double_consumption_is_rejected() {
    let mut ns = NameSource::new(0);
    let xs = ns.fresh("xs");
    let a = ns.fresh("a");
    let b = ns.fresh("b");
    let prog = program_with(
        vec![Param::new(
            xs.clone(),
            Type::Array {
                elem: PrimType::Int(IntType::I32),
                shape: weft::ir::types::Shape::new(vec![SubExp::int32(4)]),
                uniqueness: Uniqueness::Unique,
            },
        )],
        vec![arr_i32(4)],
        vec![
            Stm::new(
                Pattern::single(a.clone(), arr_i32(4)),
                Exp::BasicOp(BasicOp::Update {
                    array: xs.clone(),
                    indices: vec![SubExp::int32(0)],
                    value: SubExp::int32(1),
                }),
            ),
            Stm::new(
                Pattern::single(b.clone(), arr_i32(4)),
                Exp::BasicOp(BasicOp::Update {
                    array: xs,
                    indices: vec![SubExp::int32(1)],
                    value: SubExp::int32(2),
                }),
            ),
        ],
        vec![SubExp::Var(b)],
    );
    let err = check_program(&prog).unwrap_err();
    assert_eq!(err.kind(), "UniquenessError");
}

#[test]
fn test_static_type_errors_are_reported() {
    // A boolean where an i32 is expected.
    let mut ns = NameSource::new(0);
    let x = ns.fresh("x");
    let prog = program_with(
        vec![],
        vec![i32t()],
        vec![Stm::new(
            Pattern::single(x.clone(), i32t()),
            Exp::BasicOp(BasicOp::BinOp(
                weft::ir::prim::BinOp::Add(IntType::I32),
                SubExp::int32(1),
                SubExp::Constant(weft::ir::prim::PrimValue::Bool(true)),
            )),
        )],
        vec![SubExp::Var(x)],
    );
    let err = check_program(&prog).unwrap_err();
    assert_eq!(err.kind(), "TypeError");
}
