//! The renamer
//!
//! Re-tags every binding site in a program (and all uses of those
//! bindings) with fresh names, re-establishing tag uniqueness after
//! transformations that duplicate code. Structurally idempotent: renaming
//! a renamed program yields the same program shape, with tags advanced.

use crate::ir::subst::{substitute_names_body, substitute_names_lambda};
use crate::ir::traverse::{walk_exp, Walker};
use crate::ir::{Body, Exp, FunDef, Lambda, Program};
use crate::names::{NameSource, VName};
use rustc_hash::FxHashMap;

#[derive(Default)]
struct BinderCollector {
    binders: Vec<VName>,
}

impl Walker for BinderCollector {
    fn walk_binder(&mut self, v: &VName) {
        self.binders.push(v.clone());
    }
}

fn binder_subst(binders: &[VName], ns: &mut NameSource) -> FxHashMap<VName, VName> {
    let mut subst = FxHashMap::default();
    for b in binders {
        subst.insert(b.clone(), ns.newname(b));
    }
    subst
}

/// Rename every binding in a program
pub fn rename_program(prog: Program, ns: &mut NameSource) -> Program {
    let funs = prog
        .funs
        .into_iter()
        .map(|f| rename_fun(f, ns))
        .collect();
    Program {
        lore: prog.lore,
        funs,
    }
}

/// Rename every binding in a function definition
pub fn rename_fun(fun: FunDef, ns: &mut NameSource) -> FunDef {
    let mut c = BinderCollector::default();
    for p in &fun.params {
        c.walk_binder(&p.name);
    }
    c.walk_body(&fun.body);
    let subst = binder_subst(&c.binders, ns);

    let mut m = RenameMapper { subst: &subst };
    let params = fun
        .params
        .into_iter()
        .map(|p| match crate::ir::traverse::map_param(&mut m, p) {
            Ok(p) => p,
            Err(e) => unreachable!("renaming failed: {}", e),
        })
        .collect();
    FunDef {
        name: fun.name,
        rettype: fun.rettype,
        params,
        body: substitute_names_body(&subst, fun.body),
    }
}

/// Duplicate a body with fresh names for everything it binds.
///
/// Used by rewrites that inline or unroll: the duplicate can be spliced
/// next to the original without violating single assignment.
pub fn rename_body(body: Body, ns: &mut NameSource) -> Body {
    let mut c = BinderCollector::default();
    c.walk_body(&body);
    let subst = binder_subst(&c.binders, ns);
    substitute_names_body(&subst, body)
}

/// Duplicate an expression with fresh names for everything it binds
pub fn rename_exp(exp: Exp, ns: &mut NameSource) -> Exp {
    let mut c = BinderCollector::default();
    walk_exp(&mut c, &exp);
    let subst = binder_subst(&c.binders, ns);
    crate::ir::subst::substitute_names_exp(&subst, exp)
}

/// Duplicate a lambda with fresh names for everything it binds
pub fn rename_lambda(lambda: Lambda, ns: &mut NameSource) -> Lambda {
    let mut c = BinderCollector::default();
    c.walk_lambda(&lambda);
    let subst = binder_subst(&c.binders, ns);
    substitute_names_lambda(&subst, lambda)
}

struct RenameMapper<'a> {
    subst: &'a FxHashMap<VName, VName>,
}

impl crate::ir::traverse::Mapper for RenameMapper<'_> {
    fn map_vname(&mut self, v: VName) -> crate::error::Result<VName> {
        Ok(self.subst.get(&v).cloned().unwrap_or(v))
    }
}
