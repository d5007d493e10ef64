//! Shared builders for integration tests
//!
//! Small helpers for constructing IR programs the way the front-end
//! would deliver them.
#![allow(dead_code)]

use weft::ir::prim::{BinOp, IntType, PrimType};
use weft::ir::types::{static_shapes, SubExp, Type};
use weft::ir::{
    BasicOp, Body, Exp, FunDef, Lambda, Lore, Op, Param, Pattern, Program, Soac, Stm,
};
use weft::{NameSource, VName};

pub fn i32t() -> Type {
    Type::Prim(PrimType::Int(IntType::I32))
}

pub fn arr_i32(n: i32) -> Type {
    Type::array(PrimType::Int(IntType::I32), vec![SubExp::int32(n)])
}

/// A one-function program over the given parameters
pub fn program_with(
    params: Vec<Param>,
    rettype: Vec<Type>,
    stms: Vec<Stm>,
    result: Vec<SubExp>,
) -> Program {
    Program::new(
        Lore::Soacs,
        vec![FunDef {
            name: "main".into(),
            rettype: static_shapes(rettype),
            params,
            body: Body::new(stms, result),
        }],
    )
}

/// `let <name> = <x> <op> <y>`
pub fn binop_stm(name: &VName, op: BinOp, x: SubExp, y: SubExp) -> Stm {
    Stm::new(
        Pattern::single(name.clone(), Type::Prim(op.operand_type())),
        Exp::BasicOp(BasicOp::BinOp(op, x, y)),
    )
}

/// A single-parameter i32 lambda computing `param + delta`
pub fn add_lambda(ns: &mut NameSource, delta: i32) -> Lambda {
    let x = ns.fresh("x");
    let y = ns.fresh("y");
    Lambda::new(
        vec![Param::new(x.clone(), i32t())],
        Body::new(
            vec![binop_stm(
                &y,
                BinOp::Add(IntType::I32),
                SubExp::Var(x),
                SubExp::int32(delta),
            )],
            vec![SubExp::Var(y)],
        ),
        vec![i32t()],
    )
}

/// `let <out> = map (\x -> x + delta) <input>` at the given width
pub fn map_stm(ns: &mut NameSource, out: &VName, input: &VName, width: i32, delta: i32) -> Stm {
    let lambda = add_lambda(ns, delta);
    Stm::new(
        Pattern::single(out.clone(), arr_i32(width)),
        Exp::Op(Op::Soac(Soac::Map {
            width: SubExp::int32(width),
            lambda,
            arrays: vec![input.clone()],
        })),
    )
}

/// Count constructs satisfying `pred` anywhere in a body
pub fn count_exps(body: &Body, pred: fn(&Exp) -> bool) -> usize {
    let mut n = 0;
    for stm in &body.stms {
        if pred(&stm.exp) {
            n += 1;
        }
        match &stm.exp {
            Exp::If {
                tbranch, fbranch, ..
            } => {
                n += count_exps(tbranch, pred);
                n += count_exps(fbranch, pred);
            }
            Exp::DoLoop { body, .. } => n += count_exps(body, pred),
            Exp::Op(Op::Soac(Soac::Map { lambda, .. })) => n += count_exps(&lambda.body, pred),
            _ => {}
        }
    }
    n
}
