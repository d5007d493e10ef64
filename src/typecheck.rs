//! The IR typechecker
//!
//! Revalidates an intermediate program: single assignment, scope
//! correctness, type agreement between patterns and expressions, shape
//! context resolution, and — unless disabled — the uniqueness rules. The
//! pass manager reruns this after every pass when checking is enabled.
//! Like the alias analysis, the checker returns per-construct facts
//! rather than rebuilding terms, so it matches the structure directly
//! instead of going through the rewriting traversals.

use crate::alias::{self, AliasEnv};
use crate::error::{Error, Result};
use crate::ir::free::free_in_stm;
use crate::ir::prim::PrimType;
use crate::ir::types::{Diet, ExtType, SubExp, Type};
use crate::ir::{
    BasicOp, Body, Exp, FunDef, KernelOp, Lambda, LoopForm, Lore, Op, Param, Pattern, Program,
    Soac, Stm,
};
use crate::names::VName;
use rustc_hash::{FxHashMap, FxHashSet};

/// Typechecker configuration
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Enforce consumption rules; `--inhibit-uniqueness-checking` clears it
    pub check_uniqueness: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            check_uniqueness: true,
        }
    }
}

/// Check a whole program under the default configuration
pub fn check_program(prog: &Program) -> Result<()> {
    check_program_with(prog, &CheckConfig::default())
}

/// Check a whole program
pub fn check_program_with(prog: &Program, cfg: &CheckConfig) -> Result<()> {
    let sigs = prog
        .funs
        .iter()
        .map(|f| (f.name.clone(), f))
        .collect::<FxHashMap<_, _>>();
    for fun in &prog.funs {
        let mut checker = Checker {
            lore: prog.lore,
            cfg,
            sigs: &sigs,
            scope: FxHashMap::default(),
            bound: FxHashSet::default(),
            aliases: AliasEnv::new(),
            consumed: FxHashSet::default(),
            nonconsumable: FxHashSet::default(),
        };
        checker
            .check_fun(fun)
            .map_err(|e| annotate_fun(e, &fun.name))?;
    }
    Ok(())
}

fn annotate_fun(e: Error, fun: &str) -> Error {
    match e {
        Error::TypeError { message, location } => Error::TypeError {
            message: format!("in function {}: {}", fun, message),
            location,
        },
        Error::UniquenessError { message, location } => Error::UniquenessError {
            message: format!("in function {}: {}", fun, message),
            location,
        },
        other => other,
    }
}

struct Checker<'a> {
    lore: Lore,
    cfg: &'a CheckConfig,
    sigs: &'a FxHashMap<String, &'a FunDef>,
    scope: FxHashMap<VName, Type>,
    /// Every name bound anywhere in the current function (single assignment)
    bound: FxHashSet<VName>,
    aliases: AliasEnv,
    consumed: FxHashSet<VName>,
    /// Names that may never be consumed (nonunique parameters, loop-free
    /// variables while inside the loop)
    nonconsumable: FxHashSet<VName>,
}

impl Checker<'_> {
    fn check_fun(&mut self, fun: &FunDef) -> Result<()> {
        for p in &fun.params {
            self.bind_name(&p.name, &p.ty)?;
            self.aliases.bind_fresh(p.name.clone());
            if !p.ty.unique() && p.ty.rank() > 0 {
                self.nonconsumable.insert(p.name.clone());
            }
        }
        let result_types = self.check_body(&fun.body)?;

        // The leading results supply the shape context of the return type.
        let n_ext = count_exts(&fun.rettype);
        if result_types.len() != n_ext + fun.rettype.len() {
            return Err(Error::type_error(format!(
                "function returns {} values but its type expects {} plus {} context",
                result_types.len(),
                fun.rettype.len(),
                n_ext
            )));
        }
        let ctx: Vec<SubExp> = fun.body.result.iter().take(n_ext).cloned().collect();
        for (rt, actual) in fun.rettype.iter().zip(result_types.iter().skip(n_ext)) {
            let want = rt.instantiate(&ctx).ok_or_else(|| {
                Error::shape_context_error(format!(
                    "existential in return type {} not discharged by the result shape list",
                    rt
                ))
            })?;
            if !types_match(&want, actual) {
                return Err(Error::type_error(format!(
                    "function body returns {} but type says {}",
                    actual, want
                )));
            }
        }
        Ok(())
    }

    fn bind_name(&mut self, name: &VName, ty: &Type) -> Result<()> {
        if !self.bound.insert(name.clone()) {
            return Err(Error::type_error(format!(
                "single assignment violated: {} bound twice",
                name
            )));
        }
        self.scope.insert(name.clone(), ty.clone());
        Ok(())
    }

    fn lookup(&self, v: &VName) -> Result<Type> {
        self.scope
            .get(v)
            .cloned()
            .ok_or_else(|| Error::type_error(format!("use of {} outside its scope", v)))
    }

    fn subexp_type(&self, se: &SubExp) -> Result<Type> {
        match se {
            SubExp::Constant(v) => Ok(Type::Prim(v.prim_type())),
            SubExp::Var(v) => self.lookup(v),
        }
    }

    fn require_prim(&self, se: &SubExp, want: PrimType, what: &str) -> Result<()> {
        let t = self.subexp_type(se)?;
        if t != Type::Prim(want) {
            return Err(Error::type_error(format!(
                "{} must be {} but {} has type {}",
                what, want, se, t
            )));
        }
        Ok(())
    }

    fn check_body(&mut self, body: &Body) -> Result<Vec<Type>> {
        for stm in &body.stms {
            self.check_stm(stm)?;
        }
        let mut types = Vec::with_capacity(body.result.len());
        for se in &body.result {
            if self.cfg.check_uniqueness {
                if let SubExp::Var(v) = se {
                    if self.consumed.contains(v) {
                        return Err(Error::uniqueness_error(format!(
                            "result uses {} after it was consumed",
                            v
                        )));
                    }
                }
            }
            types.push(self.subexp_type(se)?);
        }
        Ok(types)
    }

    fn check_stm(&mut self, stm: &Stm) -> Result<()> {
        // No use of a consumed name.
        if self.cfg.check_uniqueness {
            for v in free_in_stm(stm) {
                if self.consumed.contains(&v) {
                    return Err(Error::uniqueness_error(format!(
                        "statement binding [{}] uses {} after it was consumed",
                        pattern_names(&stm.pattern),
                        v
                    )));
                }
            }
        }

        let rettype = self.check_exp(&stm.exp)?;

        // Consumption happens when the expression executes.
        if self.cfg.check_uniqueness {
            let info = alias::analyze_exp(&self.aliases, &stm.exp);
            for v in &info.consumed {
                if self.nonconsumable.contains(v) {
                    return Err(Error::uniqueness_error(format!(
                        "statement binding [{}] consumes {}, which is not consumable here",
                        pattern_names(&stm.pattern),
                        v
                    )));
                }
                if self.consumed.contains(v) {
                    return Err(Error::uniqueness_error(format!(
                        "statement binding [{}] consumes {} twice",
                        pattern_names(&stm.pattern),
                        v
                    )));
                }
            }
            self.consumed.extend(info.consumed);
        }

        self.bind_stm_pattern(stm, &rettype)
    }

    /// Bind the pattern, instantiating existentials from its context part
    fn bind_stm_pattern(&mut self, stm: &Stm, rettype: &[ExtType]) -> Result<()> {
        let pat = &stm.pattern;
        let n_ext = count_exts(rettype);
        let size_ctx: Vec<&crate::ir::PatElem> = pat
            .context
            .iter()
            .filter(|pe| matches!(pe.ty, Type::Prim(_)))
            .collect();
        if size_ctx.len() != n_ext {
            return Err(Error::shape_context_error(format!(
                "pattern [{}] has {} size-context elements but the expression has {} existentials",
                pattern_names(pat),
                size_ctx.len(),
                n_ext
            )));
        }
        for pe in &pat.context {
            match &pe.ty {
                Type::Prim(PrimType::Int(_)) => {}
                Type::Mem { .. } if self.lore == Lore::ExplicitMemory => {}
                other => {
                    return Err(Error::type_error(format!(
                        "context element {} has type {}, expected a size{}",
                        pe.name,
                        other,
                        if self.lore == Lore::ExplicitMemory {
                            " or memory block"
                        } else {
                            ""
                        }
                    )))
                }
            }
        }

        // Memory context elements absorb the Mem-typed results (loops
        // re-supplying their memory merge parameters); everything else
        // binds to the value elements.
        let mem_ctx: Vec<&crate::ir::PatElem> = pat
            .context
            .iter()
            .filter(|pe| matches!(pe.ty, Type::Mem { .. }))
            .collect();
        let (mem_rets, val_rets): (Vec<&ExtType>, Vec<&ExtType>) = if mem_ctx.is_empty() {
            (Vec::new(), rettype.iter().collect())
        } else {
            rettype
                .iter()
                .partition(|rt| matches!(rt, ExtType::Mem { .. }))
        };
        if mem_rets.len() != mem_ctx.len() {
            return Err(Error::type_error(format!(
                "pattern [{}] has {} memory-context elements but the expression returns {} blocks",
                pattern_names(pat),
                mem_ctx.len(),
                mem_rets.len()
            )));
        }
        if pat.values.len() != val_rets.len() {
            return Err(Error::type_error(format!(
                "pattern [{}] binds {} values but the expression returns {}",
                pattern_names(pat),
                pat.values.len(),
                val_rets.len()
            )));
        }

        let ctx: Vec<SubExp> = size_ctx
            .iter()
            .map(|pe| SubExp::Var(pe.name.clone()))
            .collect();

        // Context binds first: value types may reference the sizes.
        for pe in &pat.context {
            self.bind_name(&pe.name, &pe.ty)?;
        }
        for (pe, rt) in pat.values.iter().zip(val_rets) {
            let want = rt.instantiate(&ctx).ok_or_else(|| {
                Error::shape_context_error(format!(
                    "existential in {} not discharged by the pattern context",
                    rt
                ))
            })?;
            if !types_match(&pe.ty, &want) {
                return Err(Error::type_error(format!(
                    "pattern element {} declares {} but the expression produces {}",
                    pe.name, pe.ty, want
                )));
            }
            self.bind_name(&pe.name, &pe.ty)?;
        }

        let info = alias::analyze_exp(&self.aliases, &stm.exp);
        alias::bind_pattern(&mut self.aliases, pat, &info.results);
        Ok(())
    }

    fn check_exp(&mut self, exp: &Exp) -> Result<Vec<ExtType>> {
        match exp {
            Exp::BasicOp(op) => self.check_basic_op(op),
            Exp::Apply {
                func,
                args,
                rettype,
            } => self.check_apply(func, args, rettype),
            Exp::If {
                cond,
                tbranch,
                fbranch,
                rettype,
            } => {
                self.require_prim(cond, PrimType::Bool, "branch condition")?;
                let t_types = self.check_branch(tbranch)?;
                let f_types = self.check_branch(fbranch)?;
                // The leading branch results supply the shape context for
                // any existentials in the result type.
                let want = count_exts(rettype) + rettype.len();
                for (bt, branch) in [(&t_types, "then"), (&f_types, "else")] {
                    if bt.len() != want {
                        return Err(Error::type_error(format!(
                            "{}-branch returns {} values, expected {}",
                            branch,
                            bt.len(),
                            want
                        )));
                    }
                }
                Ok(rettype.clone())
            }
            Exp::DoLoop {
                ctx_merge,
                val_merge,
                form,
                body,
            } => self.check_loop(ctx_merge, val_merge, form, body),
            Exp::Op(Op::Soac(soac)) => self.check_soac(soac),
            Exp::Op(Op::Kernel(kop)) => self.check_kernel_op(kop),
        }
    }

    /// Check a branch body in an isolated clone of the environment
    fn check_branch(&mut self, body: &Body) -> Result<Vec<Type>> {
        let mut inner = Checker {
            lore: self.lore,
            cfg: self.cfg,
            sigs: self.sigs,
            scope: self.scope.clone(),
            bound: std::mem::take(&mut self.bound),
            aliases: self.aliases.clone(),
            consumed: self.consumed.clone(),
            nonconsumable: self.nonconsumable.clone(),
        };
        let result = inner.check_body(body);
        self.bound = inner.bound;
        // Consumption inside a branch binds on the whole conditional.
        self.consumed.extend(inner.consumed);
        result
    }

    fn check_loop(
        &mut self,
        ctx_merge: &[(Param, SubExp)],
        val_merge: &[(Param, SubExp)],
        form: &LoopForm,
        body: &Body,
    ) -> Result<Vec<ExtType>> {
        for (p, init) in ctx_merge.iter().chain(val_merge) {
            let init_ty = self.subexp_type(init)?;
            if !types_match(&p.ty, &init_ty) {
                return Err(Error::type_error(format!(
                    "merge parameter {} has type {} but initial value {} has type {}",
                    p.name, p.ty, init, init_ty
                )));
            }
            if self.cfg.check_uniqueness && p.ty.unique() {
                if let SubExp::Var(v) = init {
                    for a in self.aliases.closure(v) {
                        if self.nonconsumable.contains(&a) {
                            return Err(Error::uniqueness_error(format!(
                                "unique merge parameter {} consumes {}, which is not consumable",
                                p.name, a
                            )));
                        }
                    }
                }
            }
        }

        let mut inner = Checker {
            lore: self.lore,
            cfg: self.cfg,
            sigs: self.sigs,
            scope: self.scope.clone(),
            bound: std::mem::take(&mut self.bound),
            aliases: self.aliases.clone(),
            consumed: self.consumed.clone(),
            // Everything bound outside is off-limits for consumption
            // inside the loop; only merge parameters may be consumed.
            nonconsumable: self
                .scope
                .keys()
                .cloned()
                .chain(self.nonconsumable.iter().cloned())
                .collect(),
        };
        for (p, _) in ctx_merge.iter().chain(val_merge) {
            inner.bind_name(&p.name, &p.ty)?;
            inner.aliases.bind_fresh(p.name.clone());
        }
        match form {
            LoopForm::For { var, bound } => {
                inner.require_prim(bound, PrimType::INDEX, "loop bound")?;
                inner.bind_name(var, &Type::Prim(PrimType::INDEX))?;
            }
            LoopForm::While { cond } => {
                let is_merge = ctx_merge
                    .iter()
                    .chain(val_merge)
                    .any(|(p, _)| p.name == *cond);
                if !is_merge {
                    return Err(Error::type_error(format!(
                        "while-condition {} is not a merge parameter",
                        cond
                    )));
                }
                if inner.lookup(cond)? != Type::Prim(PrimType::Bool) {
                    return Err(Error::type_error(format!(
                        "while-condition {} is not boolean",
                        cond
                    )));
                }
            }
        }

        let body_types = inner.check_body(body)?;
        self.bound = inner.bound;

        let merge_types: Vec<Type> = ctx_merge
            .iter()
            .chain(val_merge)
            .map(|(p, _)| p.ty.clone())
            .collect();
        if body_types.len() != merge_types.len() {
            return Err(Error::type_error(format!(
                "loop body returns {} values but the loop has {} merge parameters",
                body_types.len(),
                merge_types.len()
            )));
        }
        for (got, want) in body_types.iter().zip(&merge_types) {
            if !types_match(got, want) {
                return Err(Error::type_error(format!(
                    "loop body re-supplies {} where the merge parameter expects {}",
                    got, want
                )));
            }
        }
        Ok(merge_types.into_iter().map(ExtType::from).collect())
    }

    fn check_apply(
        &mut self,
        func: &str,
        args: &[(SubExp, Diet)],
        rettype: &[ExtType],
    ) -> Result<Vec<ExtType>> {
        let fun = self.sigs.get(func).ok_or_else(|| {
            Error::type_error(format!("call to unknown function {}", func))
        })?;
        if args.len() != fun.params.len() {
            return Err(Error::type_error(format!(
                "{} takes {} arguments, called with {}",
                func,
                fun.params.len(),
                args.len()
            )));
        }
        for ((se, diet), p) in args.iter().zip(&fun.params) {
            let at = self.subexp_type(se)?;
            if !ranks_match(&at, &p.ty) {
                return Err(Error::type_error(format!(
                    "argument {} of {} has type {}, expected {}",
                    se, func, at, p.ty
                )));
            }
            if self.cfg.check_uniqueness && *diet == Diet::Consume {
                if let SubExp::Var(v) = se {
                    for a in self.aliases.closure(v) {
                        if self.nonconsumable.contains(&a) {
                            return Err(Error::uniqueness_error(format!(
                                "call to {} consumes {}, which is not consumable",
                                func, a
                            )));
                        }
                    }
                }
            }
        }
        Ok(rettype.to_vec())
    }

    fn check_soac(&mut self, soac: &Soac) -> Result<Vec<ExtType>> {
        if self.lore != Lore::Soacs {
            return Err(Error::type_error(format!(
                "SOAC encountered in {} lore",
                self.lore
            )));
        }
        let width = soac.width().clone();
        self.require_prim(&width, PrimType::INDEX, "SOAC width")?;
        match soac {
            Soac::Map {
                lambda, arrays, ..
            } => {
                let elem_types = self.input_row_types(arrays, &width)?;
                self.check_lambda(lambda, &elem_types)?;
                Ok(lambda
                    .rettype
                    .iter()
                    .map(|t| self.lifted(t, &width))
                    .collect())
            }
            Soac::Reduce { lambda, inputs, .. } | Soac::Scan { lambda, inputs, .. } => {
                let arrays: Vec<VName> = inputs.iter().map(|(_, a)| a.clone()).collect();
                let elem_types = self.input_row_types(&arrays, &width)?;
                let acc_types: Vec<Type> = inputs
                    .iter()
                    .map(|(ne, _)| self.subexp_type(ne))
                    .collect::<Result<_>>()?;
                let mut lam_args = acc_types.clone();
                lam_args.extend(elem_types);
                self.check_lambda(lambda, &lam_args)?;
                if matches!(soac, Soac::Scan { .. }) {
                    Ok(acc_types
                        .iter()
                        .map(|t| self.lifted(t, &width))
                        .collect())
                } else {
                    Ok(acc_types.into_iter().map(ExtType::from).collect())
                }
            }
            Soac::Redomap {
                red_lambda,
                map_lambda,
                neutrals,
                arrays,
                ..
            } => {
                let elem_types = self.input_row_types(arrays, &width)?;
                self.check_lambda(map_lambda, &elem_types)?;
                let acc_types: Vec<Type> = neutrals
                    .iter()
                    .map(|ne| self.subexp_type(ne))
                    .collect::<Result<_>>()?;
                let mut red_args = acc_types.clone();
                red_args.extend(acc_types.clone());
                self.check_lambda(red_lambda, &red_args)?;
                Ok(acc_types.into_iter().map(ExtType::from).collect())
            }
            Soac::Stream {
                accs,
                lambda,
                arrays,
                ..
            } => {
                // Chunk size, accumulators, then whole-array chunks. The
                // chunk-array parameter types name the chunk size, so the
                // lambda is checked against its own declared parameter
                // types after a rank check on the actual inputs.
                if lambda.params.len() != 1 + accs.len() + arrays.len() {
                    return Err(Error::type_error(format!(
                        "stream lambda takes {} parameters but is given {} inputs",
                        lambda.params.len(),
                        1 + accs.len() + arrays.len()
                    )));
                }
                let acc_types: Vec<Type> = accs
                    .iter()
                    .map(|se| self.subexp_type(se))
                    .collect::<Result<_>>()?;
                for (p, a) in lambda.params[1 + accs.len()..].iter().zip(arrays) {
                    let at = self.lookup(a)?;
                    if !ranks_match(&p.ty, &at) {
                        return Err(Error::type_error(format!(
                            "stream chunk parameter {} does not fit input {}",
                            p.name, a
                        )));
                    }
                }
                let lam_args: Vec<Type> =
                    lambda.params.iter().map(|p| p.ty.clone()).collect();
                self.check_lambda(lambda, &lam_args)?;
                Ok(acc_types.into_iter().map(ExtType::from).collect())
            }
            Soac::Write {
                lambda,
                arrays,
                dests,
                ..
            } => {
                let elem_types = self.input_row_types(arrays, &width)?;
                self.check_lambda(lambda, &elem_types)?;
                let mut out = Vec::with_capacity(dests.len());
                for d in dests {
                    let dt = self.lookup(d)?;
                    if dt.rank() == 0 {
                        return Err(Error::type_error(format!(
                            "scatter destination {} is not an array",
                            d
                        )));
                    }
                    out.push(ExtType::from(dt));
                }
                // The lambda yields one index per destination, then the
                // values to write.
                if lambda.rettype.len() != dests.len() * 2 {
                    return Err(Error::type_error(format!(
                        "scatter lambda returns {} values for {} destinations",
                        lambda.rettype.len(),
                        dests.len()
                    )));
                }
                Ok(out)
            }
        }
    }

    fn check_kernel_op(&mut self, kop: &KernelOp) -> Result<Vec<ExtType>> {
        if self.lore == Lore::Soacs {
            return Err(Error::type_error("kernel encountered in soacs lore".to_string()));
        }
        match kop {
            KernelOp::Kernel(k) => {
                for (_, w) in &k.space.dims {
                    self.require_prim(w, PrimType::INDEX, "kernel dimension width")?;
                }
                for u in &k.uses {
                    self.lookup(u)?;
                }
                let mut inner = Checker {
                    lore: self.lore,
                    cfg: self.cfg,
                    sigs: self.sigs,
                    scope: self.scope.clone(),
                    bound: std::mem::take(&mut self.bound),
                    aliases: self.aliases.clone(),
                    consumed: self.consumed.clone(),
                    nonconsumable: self.nonconsumable.clone(),
                };
                for (v, _) in &k.space.dims {
                    inner.bind_name(v, &Type::Prim(PrimType::INDEX))?;
                }
                inner.bind_name(&k.space.flat_id, &Type::Prim(PrimType::INDEX))?;
                for inp in &k.inputs {
                    self.scope
                        .get(&inp.array)
                        .ok_or_else(|| {
                            Error::type_error(format!(
                                "kernel input reads {} which is not in scope",
                                inp.array
                            ))
                        })?;
                    inner.bind_name(&inp.param.name, &inp.param.ty)?;
                    inner.aliases.bind_fresh(inp.param.name.clone());
                }
                let body_types = inner.check_body(&k.body)?;
                self.bound = inner.bound;
                if body_types.len() != k.returns.len() {
                    return Err(Error::type_error(format!(
                        "kernel body returns {} values, expected {}",
                        body_types.len(),
                        k.returns.len()
                    )));
                }
                Ok(k.returns.iter().cloned().map(ExtType::from).collect())
            }
            KernelOp::ReduceKernel(k) => {
                let acc_types: Vec<Type> = k
                    .neutrals
                    .iter()
                    .map(|se| self.subexp_type(se))
                    .collect::<Result<_>>()?;
                let mut red_args = acc_types.clone();
                red_args.extend(acc_types.clone());
                self.check_lambda(&k.red_lambda, &red_args)?;
                Ok(acc_types.into_iter().map(ExtType::from).collect())
            }
        }
    }

    fn check_lambda(&mut self, lambda: &Lambda, arg_types: &[Type]) -> Result<()> {
        if lambda.params.len() != arg_types.len() {
            return Err(Error::type_error(format!(
                "lambda takes {} parameters but is applied to {} values",
                lambda.params.len(),
                arg_types.len()
            )));
        }
        let mut inner = Checker {
            lore: self.lore,
            cfg: self.cfg,
            sigs: self.sigs,
            scope: self.scope.clone(),
            bound: std::mem::take(&mut self.bound),
            aliases: self.aliases.clone(),
            consumed: self.consumed.clone(),
            // Lambdas never consume what they close over.
            nonconsumable: self
                .scope
                .keys()
                .cloned()
                .chain(self.nonconsumable.iter().cloned())
                .collect(),
        };
        for (p, at) in lambda.params.iter().zip(arg_types) {
            if !types_match(&p.ty, at) {
                self.bound = inner.bound;
                return Err(Error::type_error(format!(
                    "lambda parameter {} has type {} but receives {}",
                    p.name, p.ty, at
                )));
            }
            inner.bind_name(&p.name, &p.ty)?;
            inner.aliases.bind_fresh(p.name.clone());
        }
        let body_types = inner.check_body(&lambda.body)?;
        self.bound = inner.bound;
        if body_types.len() != lambda.rettype.len() {
            return Err(Error::type_error(format!(
                "lambda body returns {} values, its type says {}",
                body_types.len(),
                lambda.rettype.len()
            )));
        }
        for (got, want) in body_types.iter().zip(&lambda.rettype) {
            if !types_match(got, want) {
                return Err(Error::type_error(format!(
                    "lambda body returns {} where its type says {}",
                    got, want
                )));
            }
        }
        Ok(())
    }

    /// The row types of SOAC inputs, checking the outer dimension is the
    /// combinator width
    fn input_row_types(&self, arrays: &[VName], width: &SubExp) -> Result<Vec<Type>> {
        arrays
            .iter()
            .map(|a| {
                let t = self.lookup(a)?;
                match t.shape().and_then(|s| s.outer_dim()) {
                    Some(d) if d == width => {}
                    Some(d) => {
                        return Err(Error::type_error(format!(
                            "SOAC input {} has outer dimension {} but the width is {}",
                            a, d, width
                        )))
                    }
                    None => {
                        return Err(Error::type_error(format!(
                            "SOAC input {} is not an array",
                            a
                        )))
                    }
                }
                t.row_type().ok_or_else(|| {
                    Error::type_error(format!("SOAC input {} is not an array", a))
                })
            })
            .collect()
    }

    fn lifted(&self, t: &Type, width: &SubExp) -> ExtType {
        match t.array_of(width.clone()) {
            Some(arr) => ExtType::from(arr),
            None => ExtType::from(t.clone()),
        }
    }

    fn check_basic_op(&mut self, op: &BasicOp) -> Result<Vec<ExtType>> {
        use BasicOp::*;
        let one = |t: Type| Ok(vec![ExtType::from(t)]);
        match op {
            SubExp(se) => one(self.subexp_type(se)?),
            ArrayLit { elems, elem_ty } => {
                for se in elems {
                    let t = self.subexp_type(se)?;
                    if !types_match(&t, elem_ty) {
                        return Err(Error::type_error(format!(
                            "array literal element {} has type {}, expected {}",
                            se, t, elem_ty
                        )));
                    }
                }
                let n = crate::ir::types::SubExp::int32(elems.len() as i32);
                one(elem_ty.array_of(n).ok_or_else(|| {
                    Error::type_error("array literal of memory blocks".to_string())
                })?)
            }
            UnOp(op, x) => {
                self.require_prim(x, op.operand_type(), "unary operand")?;
                one(Type::Prim(op.operand_type()))
            }
            BinOp(op, x, y) => {
                self.require_prim(x, op.operand_type(), "left operand")?;
                self.require_prim(y, op.operand_type(), "right operand")?;
                one(Type::Prim(op.operand_type()))
            }
            CmpOp(op, x, y) => {
                self.require_prim(x, op.operand_type(), "left operand")?;
                self.require_prim(y, op.operand_type(), "right operand")?;
                one(Type::Prim(PrimType::Bool))
            }
            ConvOp(op, x) => {
                let (from, to) = op.types();
                self.require_prim(x, from, "conversion operand")?;
                one(Type::Prim(to))
            }
            Index { array, indices } => {
                let t = self.lookup(array)?;
                let rank = t.rank();
                if rank == 0 {
                    return Err(Error::type_error(format!("indexing non-array {}", array)));
                }
                if indices.len() > rank {
                    return Err(Error::type_error(format!(
                        "indexing {} with {} indices but rank is {}",
                        array,
                        indices.len(),
                        rank
                    )));
                }
                for i in indices {
                    self.require_prim(i, PrimType::INDEX, "index")?;
                }
                let mut t = t;
                for _ in 0..indices.len() {
                    t = t.row_type().ok_or_else(|| {
                        Error::type_error(format!("indexing {} too deep", array))
                    })?;
                }
                one(t)
            }
            Update {
                array,
                indices,
                value,
            } => {
                let t = self.lookup(array)?;
                if indices.len() > t.rank() {
                    return Err(Error::type_error(format!(
                        "updating {} with {} indices but rank is {}",
                        array,
                        indices.len(),
                        t.rank()
                    )));
                }
                for i in indices {
                    self.require_prim(i, PrimType::INDEX, "index")?;
                }
                let mut slot = t.clone();
                for _ in 0..indices.len() {
                    slot = slot.row_type().ok_or_else(|| {
                        Error::type_error(format!("updating {} too deep", array))
                    })?;
                }
                let vt = self.subexp_type(value)?;
                if !types_match(&vt, &slot) {
                    return Err(Error::type_error(format!(
                        "update value has type {}, slot expects {}",
                        vt, slot
                    )));
                }
                one(t)
            }
            Iota { n } => {
                self.require_prim(n, PrimType::INDEX, "iota length")?;
                one(Type::array(PrimType::INDEX, vec![n.clone()]))
            }
            Replicate { n, value } => {
                self.require_prim(n, PrimType::INDEX, "replicate count")?;
                let vt = self.subexp_type(value)?;
                one(vt.array_of(n.clone()).ok_or_else(|| {
                    Error::type_error("replicating a memory block".to_string())
                })?)
            }
            Scratch { elem, dims } => {
                for d in dims {
                    self.require_prim(d, PrimType::INDEX, "scratch dimension")?;
                }
                one(Type::array(*elem, dims.clone()))
            }
            Reshape { array, new_dims } => {
                let t = self.lookup(array)?;
                let elem = t.elem_type().ok_or_else(|| {
                    Error::type_error(format!("reshaping non-array {}", array))
                })?;
                if t.rank() == 0 {
                    return Err(Error::type_error(format!("reshaping non-array {}", array)));
                }
                for d in new_dims {
                    self.require_prim(d, PrimType::INDEX, "reshape dimension")?;
                }
                one(Type::array(elem, new_dims.clone()))
            }
            Rearrange { array, perm } => {
                let t = self.lookup(array)?;
                let shape = t.shape().ok_or_else(|| {
                    Error::type_error(format!("rearranging non-array {}", array))
                })?;
                if !is_permutation(perm, shape.rank()) {
                    return Err(Error::type_error(format!(
                        "rearrange permutation {:?} is not a permutation of rank {}",
                        perm,
                        shape.rank()
                    )));
                }
                let dims = perm.iter().map(|&i| shape.dims[i].clone()).collect();
                one(Type::array(t.elem_type().unwrap_or(PrimType::Bool), dims))
            }
            Rotate { array, offsets } => {
                let t = self.lookup(array)?;
                if offsets.len() != t.rank() {
                    return Err(Error::type_error(format!(
                        "rotating rank-{} array {} with {} offsets",
                        t.rank(),
                        array,
                        offsets.len()
                    )));
                }
                for o in offsets {
                    self.require_prim(o, PrimType::INDEX, "rotate offset")?;
                }
                one(t)
            }
            Split { sizes, array } => {
                let t = self.lookup(array)?;
                let shape = t.shape().ok_or_else(|| {
                    Error::type_error(format!("splitting non-array {}", array))
                })?;
                let elem = t.elem_type().unwrap_or(PrimType::Bool);
                let mut out = Vec::with_capacity(sizes.len());
                for s in sizes {
                    self.require_prim(s, PrimType::INDEX, "split size")?;
                    let mut dims = vec![s.clone()];
                    dims.extend(shape.dims.iter().skip(1).cloned());
                    out.push(ExtType::from(Type::array(elem, dims)));
                }
                Ok(out)
            }
            Concat { first, rest, total } => {
                let t = self.lookup(first)?;
                let row = t.row_type().ok_or_else(|| {
                    Error::type_error(format!("concatenating non-array {}", first))
                })?;
                for r in rest {
                    let rt = self.lookup(r)?;
                    match rt.row_type() {
                        Some(rrow) if types_match(&rrow, &row) => {}
                        _ => {
                            return Err(Error::type_error(format!(
                                "concat operand {} does not match the row type of {}",
                                r, first
                            )))
                        }
                    }
                }
                self.require_prim(total, PrimType::INDEX, "concat size")?;
                one(row.array_of(total.clone()).ok_or_else(|| {
                    Error::type_error("concatenating memory blocks".to_string())
                })?)
            }
            Copy(v) => {
                let t = self.lookup(v)?;
                if t.rank() == 0 {
                    return Err(Error::type_error(format!("copying non-array {}", v)));
                }
                one(t)
            }
            Assert { cond, .. } => {
                self.require_prim(cond, PrimType::Bool, "assertion condition")?;
                one(Type::Prim(PrimType::Cert))
            }
            Alloc { size, space } => {
                if self.lore != Lore::ExplicitMemory {
                    return Err(Error::type_error(format!(
                        "alloc encountered in {} lore",
                        self.lore
                    )));
                }
                self.require_prim(size, PrimType::INDEX, "allocation size")?;
                one(Type::Mem {
                    size: size.clone(),
                    space: *space,
                })
            }
        }
    }
}

fn pattern_names(pat: &Pattern) -> String {
    pat.names()
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn count_exts(ts: &[ExtType]) -> usize {
    let mut seen = FxHashSet::default();
    for t in ts {
        for i in t.ext_indices() {
            seen.insert(i);
        }
    }
    seen.len()
}

/// Structural type equality, ignoring uniqueness
pub fn types_match(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Prim(x), Type::Prim(y)) => x == y,
        (
            Type::Array {
                elem: ea,
                shape: sa,
                ..
            },
            Type::Array {
                elem: eb,
                shape: sb,
                ..
            },
        ) => ea == eb && sa == sb,
        // Block sizes are runtime values; only the address space is part
        // of the type identity.
        (Type::Mem { space: pa, .. }, Type::Mem { space: pb, .. }) => pa == pb,
        _ => false,
    }
}

/// Rank-and-element agreement: used for call arguments, whose shapes the
/// callee re-binds
fn ranks_match(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Prim(x), Type::Prim(y)) => x == y,
        (Type::Array { elem: ea, .. }, Type::Array { elem: eb, .. }) => {
            ea == eb && a.rank() == b.rank()
        }
        _ => false,
    }
}

fn is_permutation(perm: &[usize], rank: usize) -> bool {
    if perm.len() != rank {
        return false;
    }
    let mut seen = vec![false; rank];
    for &p in perm {
        if p >= rank || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}
