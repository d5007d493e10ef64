//! Pretty-printing of the IR
//!
//! The textual form shown in `--verbose` dumps and error attachments.
//! One statement per line, bodies indented two spaces.

use crate::ir::kernel::KernelOp;
use crate::ir::types::Diet;
use crate::ir::{BasicOp, Body, Exp, FunDef, Lambda, LoopForm, Op, Param, Pattern, Program, Soac};
use std::fmt;

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- lore: {}", self.lore)?;
        for (i, fun) in self.funs.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", fun)?;
        }
        Ok(())
    }
}

impl fmt::Display for FunDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fun {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") : (")?;
        for (i, t) in self.rettype.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", t)?;
        }
        writeln!(f, ") =")?;
        fmt_body(f, &self.body, 1)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)?;
        if let Some(s) = &self.summary {
            write!(f, "@{}", s)?;
        }
        Ok(())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{{")?;
            for (i, pe) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", pe.name, pe.ty)?;
            }
            write!(f, "}} ")?;
        }
        for (i, pe) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", pe.name, pe.ty)?;
            if let Some(s) = &pe.summary {
                write!(f, "@{}", s)?;
            }
        }
        Ok(())
    }
}

fn indent(f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
    for _ in 0..level {
        write!(f, "  ")?;
    }
    Ok(())
}

pub(crate) fn fmt_body(f: &mut fmt::Formatter<'_>, body: &Body, level: usize) -> fmt::Result {
    for stm in &body.stms {
        indent(f, level)?;
        write!(f, "let {} = ", stm.pattern)?;
        fmt_exp(f, &stm.exp, level)?;
        writeln!(f)?;
    }
    indent(f, level)?;
    write!(f, "in (")?;
    for (i, se) in body.result.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", se)?;
    }
    writeln!(f, ")")
}

fn fmt_exp(f: &mut fmt::Formatter<'_>, exp: &Exp, level: usize) -> fmt::Result {
    match exp {
        Exp::BasicOp(op) => fmt_basic_op(f, op),
        Exp::Apply { func, args, .. } => {
            write!(f, "{}(", func)?;
            for (i, (se, diet)) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match diet {
                    Diet::Consume => write!(f, "*{}", se)?,
                    Diet::Observe => write!(f, "{}", se)?,
                }
            }
            write!(f, ")")
        }
        Exp::If {
            cond,
            tbranch,
            fbranch,
            rettype,
        } => {
            write!(f, "if {} : (", cond)?;
            for (i, t) in rettype.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", t)?;
            }
            writeln!(f, ") then")?;
            fmt_body(f, tbranch, level + 1)?;
            indent(f, level)?;
            writeln!(f, "else")?;
            fmt_body(f, fbranch, level + 1)?;
            indent(f, level)?;
            write!(f, "fi")
        }
        Exp::DoLoop {
            ctx_merge,
            val_merge,
            form,
            body,
        } => {
            write!(f, "loop {{")?;
            for (i, (p, init)) in ctx_merge.iter().chain(val_merge.iter()).enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} = {}", p, init)?;
            }
            write!(f, "}} ")?;
            match form {
                LoopForm::For { var, bound } => writeln!(f, "for {} < {} do", var, bound)?,
                LoopForm::While { cond } => writeln!(f, "while {} do", cond)?,
            }
            fmt_body(f, body, level + 1)?;
            indent(f, level)?;
            write!(f, "done")
        }
        Exp::Op(Op::Soac(soac)) => fmt_soac(f, soac, level),
        Exp::Op(Op::Kernel(kop)) => fmt_kernel_op(f, kop, level),
    }
}

fn fmt_names(f: &mut fmt::Formatter<'_>, names: &[crate::names::VName]) -> fmt::Result {
    for (i, v) in names.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", v)?;
    }
    Ok(())
}

fn fmt_basic_op(f: &mut fmt::Formatter<'_>, op: &BasicOp) -> fmt::Result {
    match op {
        BasicOp::SubExp(se) => write!(f, "{}", se),
        BasicOp::ArrayLit { elems, elem_ty } => {
            write!(f, "[")?;
            for (i, se) in elems.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", se)?;
            }
            write!(f, "] : {}", elem_ty)
        }
        BasicOp::UnOp(op, x) => write!(f, "{}({})", op, x),
        BasicOp::BinOp(op, x, y) => write!(f, "{}({}, {})", op, x, y),
        BasicOp::CmpOp(op, x, y) => write!(f, "{}({}, {})", op, x, y),
        BasicOp::ConvOp(op, x) => write!(f, "{}({})", op, x),
        BasicOp::Index { array, indices } => {
            write!(f, "{}[", array)?;
            for (i, se) in indices.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", se)?;
            }
            write!(f, "]")
        }
        BasicOp::Update {
            array,
            indices,
            value,
        } => {
            write!(f, "{} with [", array)?;
            for (i, se) in indices.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", se)?;
            }
            write!(f, "] <- {}", value)
        }
        BasicOp::Iota { n } => write!(f, "iota({})", n),
        BasicOp::Replicate { n, value } => write!(f, "replicate({}, {})", n, value),
        BasicOp::Scratch { elem, dims } => {
            write!(f, "scratch({}", elem)?;
            for d in dims {
                write!(f, ", {}", d)?;
            }
            write!(f, ")")
        }
        BasicOp::Reshape { array, new_dims } => {
            write!(f, "reshape((")?;
            for (i, d) in new_dims.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", d)?;
            }
            write!(f, "), {})", array)
        }
        BasicOp::Rearrange { array, perm } => write!(f, "rearrange({:?}, {})", perm, array),
        BasicOp::Rotate { array, offsets } => {
            write!(f, "rotate((")?;
            for (i, d) in offsets.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", d)?;
            }
            write!(f, "), {})", array)
        }
        BasicOp::Split { sizes, array } => {
            write!(f, "split((")?;
            for (i, d) in sizes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", d)?;
            }
            write!(f, "), {})", array)
        }
        BasicOp::Concat { first, rest, total } => {
            write!(f, "concat({}", first)?;
            for v in rest {
                write!(f, ", {}", v)?;
            }
            write!(f, ") : [{}]", total)
        }
        BasicOp::Copy(v) => write!(f, "copy({})", v),
        BasicOp::Assert { cond, msg, .. } => write!(f, "assert({}, {:?})", cond, msg),
        BasicOp::Alloc { size, space } => write!(f, "alloc({}, @{})", size, space),
    }
}

fn fmt_lambda(f: &mut fmt::Formatter<'_>, lam: &Lambda, level: usize) -> fmt::Result {
    write!(f, "fn (")?;
    for (i, p) in lam.params.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", p)?;
    }
    writeln!(f, ") =>")?;
    fmt_body(f, &lam.body, level + 1)?;
    indent(f, level)?;
    Ok(())
}

fn fmt_soac(f: &mut fmt::Formatter<'_>, soac: &Soac, level: usize) -> fmt::Result {
    match soac {
        Soac::Map {
            width,
            lambda,
            arrays,
        } => {
            write!(f, "map[{}] ", width)?;
            fmt_lambda(f, lambda, level)?;
            write!(f, "(")?;
            fmt_names(f, arrays)?;
            write!(f, ")")
        }
        Soac::Reduce {
            width,
            lambda,
            inputs,
        } => {
            write!(f, "reduce[{}] ", width)?;
            fmt_lambda(f, lambda, level)?;
            write!(f, "(")?;
            for (i, (ne, arr)) in inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "({}, {})", ne, arr)?;
            }
            write!(f, ")")
        }
        Soac::Scan {
            width,
            lambda,
            inputs,
        } => {
            write!(f, "scan[{}] ", width)?;
            fmt_lambda(f, lambda, level)?;
            write!(f, "(")?;
            for (i, (ne, arr)) in inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "({}, {})", ne, arr)?;
            }
            write!(f, ")")
        }
        Soac::Redomap {
            width,
            red_lambda,
            map_lambda,
            neutrals,
            arrays,
        } => {
            write!(f, "redomap[{}] ", width)?;
            fmt_lambda(f, red_lambda, level)?;
            write!(f, " ")?;
            fmt_lambda(f, map_lambda, level)?;
            write!(f, "(")?;
            for (i, ne) in neutrals.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", ne)?;
            }
            write!(f, "; ")?;
            fmt_names(f, arrays)?;
            write!(f, ")")
        }
        Soac::Stream {
            width,
            accs,
            lambda,
            arrays,
        } => {
            write!(f, "stream[{}] ", width)?;
            fmt_lambda(f, lambda, level)?;
            write!(f, "(")?;
            for (i, se) in accs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", se)?;
            }
            write!(f, "; ")?;
            fmt_names(f, arrays)?;
            write!(f, ")")
        }
        Soac::Write {
            width,
            lambda,
            arrays,
            dests,
        } => {
            write!(f, "write[{}] ", width)?;
            fmt_lambda(f, lambda, level)?;
            write!(f, "(")?;
            fmt_names(f, arrays)?;
            write!(f, "; ")?;
            fmt_names(f, dests)?;
            write!(f, ")")
        }
    }
}

fn fmt_kernel_op(f: &mut fmt::Formatter<'_>, kop: &KernelOp, level: usize) -> fmt::Result {
    match kop {
        KernelOp::Kernel(k) => {
            write!(f, "kernel[")?;
            for (i, (v, w)) in k.space.dims.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} < {}", v, w)?;
            }
            writeln!(f, "] (threads = {})", k.space.num_threads)?;
            for inp in &k.inputs {
                indent(f, level + 1)?;
                write!(f, "input {} <- {}[", inp.param, inp.array)?;
                for (i, se) in inp.indices.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", se)?;
                }
                writeln!(f, "]")?;
            }
            fmt_body(f, &k.body, level + 1)?;
            indent(f, level)?;
            write!(f, "endkernel")
        }
        KernelOp::ReduceKernel(k) => {
            writeln!(
                f,
                "reduce_kernel (threads = {}, workgroup = {}, wave = {})",
                k.space.num_threads, k.workgroup_size, k.wave_width
            )?;
            indent(f, level + 1)?;
            write!(f, "op ")?;
            fmt_lambda(f, &k.red_lambda, level + 1)?;
            writeln!(f)?;
            indent(f, level + 1)?;
            write!(f, "fold ")?;
            fmt_lambda(f, &k.fold_lambda, level + 1)?;
            writeln!(f)?;
            indent(f, level + 1)?;
            write!(f, "(")?;
            for (i, ne) in k.neutrals.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", ne)?;
            }
            write!(f, "; ")?;
            fmt_names(f, &k.arrays)?;
            writeln!(f, ")")?;
            indent(f, level)?;
            write!(f, "endkernel")
        }
    }
}

/// Pretty-print a full program to a string
pub fn pretty_program(prog: &Program) -> String {
    prog.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prim::{IntType, PrimType};
    use crate::ir::types::{static_shapes, SubExp, Type};
    use crate::ir::{Lore, Pattern, Stm};
    use crate::names::VName;

    #[test]
    fn test_pretty_simple_fun() {
        let x = VName::new("x", 0);
        let y = VName::new("y", 1);
        let fun = FunDef {
            name: "main".into(),
            rettype: static_shapes(vec![Type::Prim(PrimType::Int(IntType::I32))]),
            params: vec![Param::new(x.clone(), Type::Prim(PrimType::Int(IntType::I32)))],
            body: Body::new(
                vec![Stm::new(
                    Pattern::single(y.clone(), Type::Prim(PrimType::Int(IntType::I32))),
                    Exp::BasicOp(BasicOp::SubExp(SubExp::Var(x))),
                )],
                vec![SubExp::Var(y)],
            ),
        };
        let prog = Program::new(Lore::Soacs, vec![fun]);
        let text = prog.to_string();
        assert!(text.contains("fun main(x_0: i32)"));
        assert!(text.contains("let y_1: i32 = x_0"));
        assert!(text.contains("in (y_1)"));
    }
}
