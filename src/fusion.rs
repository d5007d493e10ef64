//! Producer/consumer SOAC fusion
//!
//! Vertical fusion: when a map's output feeds exactly one later SOAC over
//! the same width, the producer's lambda is spliced into the consumer and
//! the intermediate array disappears. Covered shapes: map into map, map
//! into scatter, and map into reduce (which becomes a redomap).

use crate::error::Result;
use crate::ir::free::free_in_stm;
use crate::ir::traverse::{rewrite_body_inner, StmRewriter};
use crate::ir::types::SubExp;
use crate::ir::{BasicOp, Body, Exp, FunDef, Lambda, Lore, Op, Param, Pattern, Program, Soac, Stm};
use crate::names::{NameSource, VName};
use crate::pass::Pass;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Fusion as a pipeline pass
pub fn pass() -> Pass {
    Pass::new("fuse-soacs", Lore::Soacs, Lore::Soacs, fuse_soacs)
}

/// Fuse SOAC chains throughout the program
pub fn fuse_soacs(prog: Program, _ns: &mut NameSource) -> Result<Program> {
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
                body: Fuser.rewrite_body(body)?,
            })
        })
        .collect::<Result<_>>()?;
    Ok(Program::new(Lore::Soacs, funs))
}

/// Statement rewriter that fuses each body's chains after the generic
/// descent has fused everything nested inside it
struct Fuser;

impl StmRewriter for Fuser {
    fn rewrite_body(&mut self, body: Body) -> Result<Body> {
        // Fuse inside nested bodies first, innermost chains outward.
        let Body { mut stms, result } = rewrite_body_inner(self, body)?;
        loop {
            let Some((producer_idx, consumer_idx, fused)) = find_fusible(&stms, &result) else {
                break;
            };
            debug!("fused a map into its consumer");
            stms[consumer_idx] = fused;
            stms.remove(producer_idx);
        }
        Ok(Body::new(stms, result))
    }
}

/// A single-output map producer eligible for fusion
struct Producer<'a> {
    out: &'a VName,
    width: &'a SubExp,
    lambda: &'a Lambda,
    arrays: &'a [VName],
}

fn as_producer(stm: &Stm) -> Option<Producer<'_>> {
    let Exp::Op(Op::Soac(Soac::Map {
        width,
        lambda,
        arrays,
    })) = &stm.exp
    else {
        return None;
    };
    if stm.pattern.values.len() != 1 || !stm.pattern.context.is_empty() {
        return None;
    }
    Some(Producer {
        out: &stm.pattern.values[0].name,
        width,
        lambda,
        arrays,
    })
}

/// Count how many statements (and the body result) reference each name
fn use_counts(stms: &[Stm], result: &[SubExp]) -> FxHashMap<VName, usize> {
    let mut counts: FxHashMap<VName, usize> = FxHashMap::default();
    for stm in stms {
        for v in free_in_stm(stm) {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    for se in result {
        if let SubExp::Var(v) = se {
            *counts.entry(v.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Find one producer/consumer pair and build the fused statement
fn find_fusible(stms: &[Stm], result: &[SubExp]) -> Option<(usize, usize, Stm)> {
    let counts = use_counts(stms, result);
    for (i, pstm) in stms.iter().enumerate() {
        let Some(producer) = as_producer(pstm) else {
            continue;
        };
        if counts.get(producer.out).copied().unwrap_or(0) != 1 {
            continue;
        }
        for (j, cstm) in stms.iter().enumerate().skip(i + 1) {
            if let Some(fused) = try_fuse(&producer, cstm) {
                return Some((i, j, fused));
            }
        }
    }
    None
}

fn try_fuse(producer: &Producer<'_>, consumer: &Stm) -> Option<Stm> {
    let Exp::Op(Op::Soac(soac)) = &consumer.exp else {
        return None;
    };
    match soac {
        Soac::Map {
            width,
            lambda,
            arrays,
        } if width == producer.width => {
            let (lambda, arrays) = splice_into(producer, lambda, arrays)?;
            Some(Stm::new(
                consumer.pattern.clone(),
                Exp::Op(Op::Soac(Soac::Map {
                    width: width.clone(),
                    lambda,
                    arrays,
                })),
            ))
        }
        Soac::Write {
            width,
            lambda,
            arrays,
            dests,
        } if width == producer.width => {
            let (lambda, arrays) = splice_into(producer, lambda, arrays)?;
            Some(Stm::new(
                consumer.pattern.clone(),
                Exp::Op(Op::Soac(Soac::Write {
                    width: width.clone(),
                    lambda,
                    arrays,
                    dests: dests.clone(),
                })),
            ))
        }
        // map feeding a reduce is exactly a redomap
        Soac::Reduce {
            width,
            lambda,
            inputs,
        } if width == producer.width
            && inputs.len() == 1
            && inputs[0].1 == *producer.out =>
        {
            Some(Stm::new(
                consumer.pattern.clone(),
                Exp::Op(Op::Soac(Soac::Redomap {
                    width: width.clone(),
                    red_lambda: lambda.clone(),
                    map_lambda: producer.lambda.clone(),
                    neutrals: vec![inputs[0].0.clone()],
                    arrays: producer.arrays.to_vec(),
                })),
            ))
        }
        _ => None,
    }
}

/// Splice the producer's lambda in front of the consumer's, replacing the
/// consumer parameter that received the produced array
fn splice_into(
    producer: &Producer<'_>,
    lambda: &Lambda,
    arrays: &[VName],
) -> Option<(Lambda, Vec<VName>)> {
    let positions: Vec<usize> = arrays
        .iter()
        .enumerate()
        .filter(|(_, a)| *a == producer.out)
        .map(|(k, _)| k)
        .collect();
    let [pos] = positions.as_slice() else {
        return None;
    };

    let mut params = Vec::with_capacity(lambda.params.len() - 1 + producer.lambda.params.len());
    let mut new_arrays = Vec::with_capacity(params.capacity());
    let mut replaced: Option<&Param> = None;
    for (k, (p, a)) in lambda.params.iter().zip(arrays).enumerate() {
        if k == *pos {
            replaced = Some(p);
            params.extend(producer.lambda.params.iter().cloned());
            new_arrays.extend(producer.arrays.iter().cloned());
        } else {
            params.push(p.clone());
            new_arrays.push(a.clone());
        }
    }
    let replaced = replaced?;

    let mut stms = producer.lambda.body.stms.clone();
    stms.push(Stm::new(
        Pattern::single(replaced.name.clone(), replaced.ty.clone()),
        Exp::BasicOp(BasicOp::SubExp(producer.lambda.body.result[0].clone())),
    ));
    stms.extend(lambda.body.stms.iter().cloned());

    Some((
        Lambda::new(
            params,
            Body::new(stms, lambda.body.result.clone()),
            lambda.rettype.clone(),
        ),
        new_arrays,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{BinOp, IntType, PrimType};
    use crate::ir::types::{static_shapes, Type};
    use crate::names::NameSource;

    fn i32t() -> Type {
        Type::Prim(PrimType::Int(IntType::I32))
    }

    fn add_map(ns: &mut NameSource, input: &VName, width: SubExp, delta: i32) -> (Stm, VName) {
        let x = ns.fresh("x");
        let y = ns.fresh("y");
        let out = ns.fresh("mapped");
        let out_ty = Type::array(PrimType::Int(IntType::I32), vec![width.clone()]);
        let stm = Stm::new(
            Pattern::single(out.clone(), out_ty),
            Exp::Op(Op::Soac(Soac::Map {
                width,
                lambda: Lambda::new(
                    vec![Param::new(x.clone(), i32t())],
                    Body::new(
                        vec![Stm::new(
                            Pattern::single(y.clone(), i32t()),
                            Exp::BasicOp(BasicOp::BinOp(
                                BinOp::Add(IntType::I32),
                                SubExp::Var(x),
                                SubExp::int32(delta),
                            )),
                        )],
                        vec![SubExp::Var(y)],
                    ),
                    vec![i32t()],
                ),
                arrays: vec![input.clone()],
            })),
        );
        (stm, out)
    }

    fn count_constructs(body: &Body, pred: fn(&Soac) -> bool) -> usize {
        body.stms
            .iter()
            .filter(|s| match &s.exp {
                Exp::Op(Op::Soac(soac)) => pred(soac),
                _ => false,
            })
            .count()
    }

    #[test]
    fn test_map_fuses_into_write() {
        let mut ns = NameSource::new(0);
        let w = SubExp::int32(8);
        let v = ns.fresh("v");
        let idx = ns.fresh("idx");
        let dst = ns.fresh("dst");
        let arr_ty = Type::array(PrimType::Int(IntType::I32), vec![w.clone()]);

        let (map_stm, mapped) = add_map(&mut ns, &v, w.clone(), 4);

        let ip = ns.fresh("ip");
        let vp = ns.fresh("vp");
        let written = ns.fresh("written");
        let write_stm = Stm::new(
            Pattern::single(written.clone(), arr_ty.clone()),
            Exp::Op(Op::Soac(Soac::Write {
                width: w.clone(),
                lambda: Lambda::new(
                    vec![Param::new(ip.clone(), i32t()), Param::new(vp.clone(), i32t())],
                    Body::result_only(vec![SubExp::Var(ip), SubExp::Var(vp)]),
                    vec![i32t(), i32t()],
                ),
                arrays: vec![idx.clone(), mapped],
                dests: vec![dst.clone()],
            })),
        );

        let prog = Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![arr_ty.clone()]),
                params: vec![
                    Param::new(v, arr_ty.clone()),
                    Param::new(idx, arr_ty.clone()),
                    Param::new(
                        dst,
                        Type::unique_array(PrimType::Int(IntType::I32), vec![w.clone()]),
                    ),
                ],
                body: Body::new(vec![map_stm, write_stm], vec![SubExp::Var(written)]),
            }],
        );

        let mut ns2 = NameSource::new(1000);
        let fused = fuse_soacs(prog, &mut ns2).unwrap();
        let body = &fused.funs[0].body;
        // After fusion there is exactly one Write construct and no Map.
        assert_eq!(
            count_constructs(body, |s| matches!(s, Soac::Write { .. })),
            1
        );
        assert_eq!(
            count_constructs(body, |s| matches!(s, Soac::Map { .. })),
            0
        );
    }

    #[test]
    fn test_map_reduce_becomes_redomap() {
        let mut ns = NameSource::new(0);
        let w = SubExp::int32(8);
        let v = ns.fresh("v");
        let (map_stm, mapped) = add_map(&mut ns, &v, w.clone(), 2);

        let a = ns.fresh("a");
        let bparam = ns.fresh("b");
        let s = ns.fresh("s");
        let r = ns.fresh("r");
        let red_stm = Stm::new(
            Pattern::single(r.clone(), i32t()),
            Exp::Op(Op::Soac(Soac::Reduce {
                width: w.clone(),
                lambda: Lambda::new(
                    vec![Param::new(a.clone(), i32t()), Param::new(bparam.clone(), i32t())],
                    Body::new(
                        vec![Stm::new(
                            Pattern::single(s.clone(), i32t()),
                            Exp::BasicOp(BasicOp::BinOp(
                                BinOp::Add(IntType::I32),
                                SubExp::Var(a),
                                SubExp::Var(bparam),
                            )),
                        )],
                        vec![SubExp::Var(s)],
                    ),
                    vec![i32t()],
                ),
                inputs: vec![(SubExp::int32(0), mapped)],
            })),
        );

        let arr_ty = Type::array(PrimType::Int(IntType::I32), vec![w.clone()]);
        let prog = Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![i32t()]),
                params: vec![Param::new(v, arr_ty)],
                body: Body::new(vec![map_stm, red_stm], vec![SubExp::Var(r)]),
            }],
        );

        let mut ns2 = NameSource::new(1000);
        let fused = fuse_soacs(prog, &mut ns2).unwrap();
        let body = &fused.funs[0].body;
        assert_eq!(body.stms.len(), 1);
        assert!(matches!(
            body.stms[0].exp,
            Exp::Op(Op::Soac(Soac::Redomap { .. }))
        ));
    }

    #[test]
    fn test_shared_output_is_not_fused() {
        // The map output is used twice; fusion must refuse.
        let mut ns = NameSource::new(0);
        let w = SubExp::int32(4);
        let v = ns.fresh("v");
        let (map_stm, mapped) = add_map(&mut ns, &v, w.clone(), 1);
        let arr_ty = Type::array(PrimType::Int(IntType::I32), vec![w.clone()]);

        let (second_map, out2) = add_map(&mut ns, &mapped, w.clone(), 2);
        let prog = Program::new(
            Lore::Soacs,
            vec![FunDef {
                name: "main".into(),
                rettype: static_shapes(vec![arr_ty.clone(), arr_ty.clone()]),
                params: vec![Param::new(v, arr_ty)],
                body: Body::new(
                    vec![map_stm, second_map],
                    vec![SubExp::Var(mapped), SubExp::Var(out2)],
                ),
            }],
        );

        let mut ns2 = NameSource::new(1000);
        let fused = fuse_soacs(prog, &mut ns2).unwrap();
        assert_eq!(fused.funs[0].body.stms.len(), 2);
    }
}
