//! Criterion benchmarks for the simplifier

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use weft::ir::prim::{BinOp, IntType, PrimType};
use weft::ir::types::{static_shapes, SubExp, Type};
use weft::ir::{BasicOp, Body, Exp, FunDef, Lore, Pattern, Program, Stm};
use weft::simplify::simplify_program;
use weft::NameSource;

/// A long straight-line chain of foldable arithmetic
fn chain_program(ns: &mut NameSource, len: usize) -> Program {
    let i32t = Type::Prim(PrimType::Int(IntType::I32));
    let mut stms = Vec::with_capacity(len);
    let mut prev = SubExp::int32(1);
    for _ in 0..len {
        let name = ns.fresh("t");
        stms.push(Stm::new(
            Pattern::single(name.clone(), i32t.clone()),
            Exp::BasicOp(BasicOp::BinOp(
                BinOp::Add(IntType::I32),
                prev,
                SubExp::int32(1),
            )),
        ));
        prev = SubExp::Var(name);
    }
    Program::new(
        Lore::Soacs,
        vec![FunDef {
            name: "main".into(),
            rettype: static_shapes(vec![i32t]),
            params: vec![],
            body: Body::new(stms, vec![prev]),
        }],
    )
}

fn bench_constant_folding(c: &mut Criterion) {
    c.bench_function("simplify_chain_256", |b| {
        b.iter(|| {
            let mut ns = NameSource::new(0);
            let prog = chain_program(&mut ns, 256);
            black_box(simplify_program(black_box(prog), &mut ns).unwrap())
        })
    });
}

fn bench_idempotent_rerun(c: &mut Criterion) {
    let mut ns = NameSource::new(0);
    let simplified = simplify_program(chain_program(&mut ns, 256), &mut ns).unwrap();
    c.bench_function("simplify_already_simplified", |b| {
        b.iter(|| {
            let mut ns2 = NameSource::new(ns.cursor());
            black_box(simplify_program(black_box(simplified.clone()), &mut ns2).unwrap())
        })
    });
}

criterion_group!(benches, bench_constant_folding, bench_idempotent_rerun);
criterion_main!(benches);
