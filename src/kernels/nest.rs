//! Kernel nests
//!
//! While the extraction walk descends through nested maps it maintains a
//! stack of [`MapNesting`]s, outermost first; each contributes one
//! dimension to the flat index space of the kernel being built.
//! [`construct_kernel`] turns a completed nest plus an innermost body into
//! the kernel operation and its flattening prologue.

use crate::error::{Error, Result};
use crate::ir::build::StmBuilder;
use crate::ir::free::free_in_body;
use crate::ir::kernel::{Kernel, KernelInput, KernelOp, KernelSpace};
use crate::ir::types::{SubExp, Type};
use crate::ir::{Body, Exp, Param, PatElem, Pattern, Stm};
use crate::names::{NameSource, VName};
use rustc_hash::{FxHashMap, FxHashSet};

const PASS: &str = "kernel-extraction";

/// One level of enclosing map
#[derive(Debug, Clone)]
pub struct MapNesting {
    /// The fresh thread-index variable for this dimension
    pub index_var: VName,
    /// The dimension width (the map's width)
    pub width: SubExp,
    /// Lambda parameter paired with the array it draws from
    pub inputs: Vec<(Param, VName)>,
}

/// The result pattern expected outside the nest
#[derive(Debug, Clone)]
pub struct Target {
    pub pattern: Pattern,
}

/// A nonempty stack of map nestings, outermost first
#[derive(Debug, Clone, Default)]
pub struct KernelNest {
    nestings: Vec<MapNesting>,
}

impl KernelNest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, nesting: MapNesting) {
        self.nestings.push(nesting);
    }

    pub fn depth(&self) -> usize {
        self.nestings.len()
    }

    pub fn nestings(&self) -> &[MapNesting] {
        &self.nestings
    }

    /// The thread-index variables, outermost first
    pub fn index_vars(&self) -> Vec<VName> {
        self.nestings.iter().map(|n| n.index_var.clone()).collect()
    }

    /// Is the name a lambda parameter at some nesting level?
    pub fn param_level(&self, v: &VName) -> Option<usize> {
        for (level, n) in self.nestings.iter().enumerate() {
            if n.inputs.iter().any(|(p, _)| p.name == *v) {
                return Some(level);
            }
        }
        None
    }
}

/// Emit the flattening prologue and build the kernel operation.
///
/// The prologue multiplies the nesting widths into the flat thread count.
/// Kernel inputs are computed per nesting level — a parameter at level
/// `k` reads its array at the enclosing indices that array depends on —
/// and deduplicated. Host-side `uses` are the free names of the body not
/// covered by inputs or index variables.
pub fn construct_kernel(
    nest: &KernelNest,
    body: Body,
    returns: Vec<Type>,
    ns: &mut NameSource,
) -> Result<(Vec<Stm>, KernelOp)> {
    if nest.depth() == 0 {
        return Err(Error::internal(PASS, "empty kernel nest".to_string()));
    }

    let mut b = StmBuilder::new(ns);
    let widths: Vec<SubExp> = nest.nestings.iter().map(|n| n.width.clone()).collect();
    let num_threads = b.product("num_threads", &widths);

    // Resolve each nesting input to a kernel input on an outer array. A
    // level-k parameter whose array is itself a parameter of an enclosing
    // level extends that input's index list.
    let mut inputs: Vec<KernelInput> = Vec::new();
    let mut seen: FxHashSet<(VName, Vec<String>)> = FxHashSet::default();
    for (level, nesting) in nest.nestings.iter().enumerate() {
        for (param, array) in &nesting.inputs {
            let (root, mut indices) = resolve_source(nest, array, level);
            indices.push(SubExp::Var(nesting.index_var.clone()));
            let key = (
                param.name.clone(),
                indices.iter().map(|se| se.to_string()).collect(),
            );
            if seen.insert(key) {
                inputs.push(KernelInput {
                    param: param.clone(),
                    array: root,
                    indices,
                });
            }
        }
    }

    let space = KernelSpace {
        dims: nest
            .nestings
            .iter()
            .map(|n| (n.index_var.clone(), n.width.clone()))
            .collect(),
        flat_id: b.names().fresh("flat_tid"),
        num_threads,
    };

    // Host-side variables: free in the body, not fed through inputs and
    // not thread indices.
    let bound_inside: FxHashSet<VName> = inputs
        .iter()
        .map(|inp| inp.param.name.clone())
        .chain(space.dims.iter().map(|(v, _)| v.clone()))
        .chain(std::iter::once(space.flat_id.clone()))
        .collect();
    let mut uses: Vec<VName> = free_in_body(&body)
        .into_iter()
        .filter(|v| !bound_inside.contains(v))
        .collect();
    for inp in &inputs {
        uses.push(inp.array.clone());
        for se in &inp.indices {
            if let SubExp::Var(v) = se {
                if !bound_inside.contains(v) {
                    uses.push(v.clone());
                }
            }
        }
    }
    uses.sort();
    uses.dedup();

    let kernel = KernelOp::Kernel(Kernel {
        space,
        uses,
        inputs,
        returns,
        body,
        workgroup_size: None,
    });
    Ok((b.into_stms(), kernel))
}

/// Chase a nesting input back to its outermost source array, collecting
/// the enclosing indices it is read at
fn resolve_source(nest: &KernelNest, array: &VName, level: usize) -> (VName, Vec<SubExp>) {
    // If the array is a parameter of an enclosing nesting, the element it
    // denotes is that nesting's array at that nesting's index.
    for k in (0..level).rev() {
        for (p, a) in &nest.nestings[k].inputs {
            if p.name == *array {
                let (root, mut indices) = resolve_source(nest, a, k);
                indices.push(SubExp::Var(nest.nestings[k].index_var.clone()));
                return (root, indices);
            }
        }
    }
    (array.clone(), Vec::new())
}

/// Re-expand identity-mapped outputs that were elided from the kernel.
///
/// A map body returning a variable bound outside the nest produces the
/// same value in every thread; rather than returning it from the kernel,
/// the target is expanded back at the use site as a replicate over the
/// nest widths.
pub fn expand_target(
    target: &Target,
    elided: &FxHashMap<usize, SubExp>,
    widths: &[SubExp],
    ns: &mut NameSource,
) -> Result<(Vec<Stm>, Vec<PatElem>)> {
    let mut out = Vec::new();
    let mut kept = Vec::new();
    for (i, pe) in target.pattern.values.iter().enumerate() {
        match elided.get(&i) {
            None => kept.push(pe.clone()),
            Some(se) => {
                // Replicate once per nest dimension, innermost first.
                let mut value = se.clone();
                let mut ty = strip_dims(&pe.ty, widths.len())?;
                for w in widths.iter().rev() {
                    ty = ty.array_of(w.clone()).ok_or_else(|| {
                        Error::internal(PASS, "replicating a memory block".to_string())
                    })?;
                    let name = ns.fresh("rep");
                    out.push(Stm::new(
                        Pattern::single(name.clone(), ty.clone()),
                        Exp::BasicOp(crate::ir::BasicOp::Replicate {
                            n: w.clone(),
                            value,
                        }),
                    ));
                    value = SubExp::Var(name);
                }
                // The last replicate binds the target name itself.
                if let Some(last) = out.last_mut() {
                    last.pattern = Pattern::single(pe.name.clone(), pe.ty.clone());
                }
            }
        }
    }
    Ok((out, kept))
}

fn strip_dims(ty: &Type, n: usize) -> Result<Type> {
    let mut t = ty.clone();
    for _ in 0..n {
        t = t
            .row_type()
            .ok_or_else(|| Error::internal(PASS, "target rank too small".to_string()))?;
    }
    Ok(t)
}

/// Does this body (transitively) consume anything? Consumption blocks
/// distribution past the consuming statement.
pub fn body_consumes(body: &Body) -> bool {
    let env = crate::alias::AliasEnv::new();
    let mut seeded = env;
    for v in free_in_body(body) {
        seeded.bind_fresh(v);
    }
    let (_, consumed) = crate::alias::analyze_body(&seeded, body);
    !consumed.is_empty()
}
