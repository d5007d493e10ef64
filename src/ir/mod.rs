//! Intermediate representation of Weft programs
//!
//! A program is an ordered list of function definitions over a single
//! concrete IR. The *lore* — which decorations and which `Op` payloads are
//! legal — is tracked as a value on the program rather than as a type
//! parameter; passes that cross a lore boundary rewrite the decorations and
//! the `Op` nodes and retag the program.
//!
//! Descent into the IR goes through the traversal framework in
//! [`traverse`]: substitution and the renamer are `Mapper` clients, the
//! free-variable computation is a `Walker`, and the transformation
//! passes (fusion, first-order transform, kernel extraction, double
//! buffering, in-place lowering) are `StmRewriter` clients. The two
//! analyses and the two scope-threading engines that instead match on
//! the structure directly are named in DESIGN.md.

pub mod build;
pub mod free;
pub mod kernel;
pub mod pretty;
pub mod prim;
pub mod rename;
pub mod subst;
pub mod traverse;
pub mod types;

use crate::error::SrcLoc;
use crate::memory::MemSummary;
use crate::names::VName;
use prim::{BinOp, CmpOp, ConvOp, PrimType, UnOp};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use types::{Diet, ExtType, Space, SubExp, Type};

pub use kernel::{KernelInput, KernelOp, KernelSpace};

/// The decoration variant a program is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lore {
    /// Early stage: `Op` is the SOAC family, no memory information
    Soacs,
    /// After kernel extraction: `Op` is the kernel family
    Kernels,
    /// After allocation: arrays carry memory summaries
    ExplicitMemory,
}

impl std::fmt::Display for Lore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lore::Soacs => write!(f, "soacs"),
            Lore::Kernels => write!(f, "kernels"),
            Lore::ExplicitMemory => write!(f, "explicit-memory"),
        }
    }
}

/// A complete program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub lore: Lore,
    pub funs: Vec<FunDef>,
}

impl Program {
    pub fn new(lore: Lore, funs: Vec<FunDef>) -> Self {
        Self { lore, funs }
    }

    /// Look up a function by name
    pub fn find_fun(&self, name: &str) -> Option<&FunDef> {
        self.funs.iter().find(|f| f.name == name)
    }

    /// Retag the program into another lore.
    ///
    /// This is the value-level counterpart of rephrasing: callers are
    /// responsible for having rewritten `Op` nodes and decorations first.
    pub fn with_lore(mut self, lore: Lore) -> Self {
        self.lore = lore;
        self
    }
}

/// A function definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunDef {
    pub name: String,
    /// Return types; may contain existentials discharged by the leading
    /// positions of the body result (the shape context)
    pub rettype: Vec<ExtType>,
    pub params: Vec<Param>,
    pub body: Body,
}

/// A function or lambda parameter
///
/// Uniqueness is part of the declared type. In the ExplicitMemory lore an
/// array parameter carries a memory summary pointing into a separate
/// memory-block parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: VName,
    pub ty: Type,
    pub summary: Option<MemSummary>,
}

impl Param {
    pub fn new(name: VName, ty: Type) -> Self {
        Self {
            name,
            ty,
            summary: None,
        }
    }

    pub fn with_summary(name: VName, ty: Type, summary: MemSummary) -> Self {
        Self {
            name,
            ty,
            summary: Some(summary),
        }
    }
}

/// A sequence of statements terminated by a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub stms: Vec<Stm>,
    pub result: Vec<SubExp>,
}

impl Body {
    pub fn new(stms: Vec<Stm>, result: Vec<SubExp>) -> Self {
        Self { stms, result }
    }

    /// A body with no statements
    pub fn result_only(result: Vec<SubExp>) -> Self {
        Self {
            stms: Vec::new(),
            result,
        }
    }
}

/// One element of a pattern: a named output cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatElem {
    pub name: VName,
    pub ty: Type,
    /// ExplicitMemory decoration; `None` in earlier lores and for scalars
    pub summary: Option<MemSummary>,
}

impl PatElem {
    pub fn new(name: VName, ty: Type) -> Self {
        Self {
            name,
            ty,
            summary: None,
        }
    }

    pub fn with_summary(name: VName, ty: Type, summary: MemSummary) -> Self {
        Self {
            name,
            ty,
            summary: Some(summary),
        }
    }
}

/// The pattern of a statement
///
/// `context` binds existential sizes and (in ExplicitMemory) memory blocks,
/// in that order; `values` binds the proper results. The ordering within
/// `context` — size elements before memory elements — is a load-bearing
/// convention consumed by the allocator and downstream passes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pattern {
    pub context: Vec<PatElem>,
    pub values: Vec<PatElem>,
}

impl Pattern {
    pub fn new(context: Vec<PatElem>, values: Vec<PatElem>) -> Self {
        Self { context, values }
    }

    /// A pattern with no context part
    pub fn of_values(values: Vec<PatElem>) -> Self {
        Self {
            context: Vec::new(),
            values,
        }
    }

    /// A pattern binding a single value
    pub fn single(name: VName, ty: Type) -> Self {
        Self::of_values(vec![PatElem::new(name, ty)])
    }

    /// All elements, context first
    pub fn elems(&self) -> impl Iterator<Item = &PatElem> {
        self.context.iter().chain(self.values.iter())
    }

    /// All elements, mutably
    pub fn elems_mut(&mut self) -> impl Iterator<Item = &mut PatElem> {
        self.context.iter_mut().chain(self.values.iter_mut())
    }

    /// All bound names, context first
    pub fn names(&self) -> Vec<VName> {
        self.elems().map(|pe| pe.name.clone()).collect()
    }

    /// The shape context available for instantiating existentials: the
    /// context names as sub-expressions
    pub fn context_subexps(&self) -> Vec<SubExp> {
        self.context
            .iter()
            .map(|pe| SubExp::Var(pe.name.clone()))
            .collect()
    }
}

/// A statement: a pattern bound to an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stm {
    pub pattern: Pattern,
    pub exp: Exp,
}

impl Stm {
    pub fn new(pattern: Pattern, exp: Exp) -> Self {
        Self { pattern, exp }
    }
}

/// The loop form of a `DoLoop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoopForm {
    /// `for i < bound`
    For { var: VName, bound: SubExp },
    /// `while cond`, where `cond` is a boolean merge parameter
    While { cond: VName },
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Exp {
    BasicOp(BasicOp),
    /// Call to another function with a diet-annotated argument list
    Apply {
        func: String,
        args: Vec<(SubExp, Diet)>,
        rettype: Vec<ExtType>,
    },
    /// Two-branch conditional with an explicit result-type list
    If {
        cond: SubExp,
        tbranch: Body,
        fbranch: Body,
        rettype: Vec<ExtType>,
    },
    /// A loop with merge parameters split into context (shape) and value
    /// parts; the body result re-supplies the merge parameters
    DoLoop {
        ctx_merge: Vec<(Param, SubExp)>,
        val_merge: Vec<(Param, SubExp)>,
        form: LoopForm,
        body: Body,
    },
    /// Lore-parametric payload
    Op(Op),
}

impl Exp {
    /// Is this expression free of side effects and certain failure?
    ///
    /// Safe expressions may be hoisted, CSEd, and removed when dead.
    /// `Assert` can fail, `Alloc` has an observable effect, `Apply` may do
    /// either, and `Update` consumes.
    pub fn is_safe(&self) -> bool {
        match self {
            Exp::BasicOp(op) => !matches!(
                op,
                BasicOp::Assert { .. } | BasicOp::Alloc { .. } | BasicOp::Update { .. }
            ),
            Exp::Apply { .. } => false,
            Exp::If { .. } | Exp::DoLoop { .. } => false,
            Exp::Op(_) => false,
        }
    }
}

/// Pure scalar operations and array-shape manipulations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BasicOp {
    /// A bare sub-expression
    SubExp(SubExp),
    /// An array literal; the element type is explicit so empty literals
    /// are well-typed
    ArrayLit { elems: Vec<SubExp>, elem_ty: Type },
    UnOp(UnOp, SubExp),
    BinOp(BinOp, SubExp, SubExp),
    CmpOp(CmpOp, SubExp, SubExp),
    ConvOp(ConvOp, SubExp),
    /// Indexing, possibly partial: the result keeps the un-indexed
    /// trailing dimensions
    Index { array: VName, indices: Vec<SubExp> },
    /// In-place update; consumes `array`
    Update {
        array: VName,
        indices: Vec<SubExp>,
        value: SubExp,
    },
    /// `[0, 1, ..., n-1]` at type i32
    Iota { n: SubExp },
    /// `n` copies of `value`
    Replicate { n: SubExp, value: SubExp },
    /// Uninitialized storage of the given element type and dimensions
    Scratch { elem: PrimType, dims: Vec<SubExp> },
    /// Change the shape; total element count must be preserved
    Reshape { array: VName, new_dims: Vec<SubExp> },
    /// Permute the dimensions
    Rearrange { array: VName, perm: Vec<usize> },
    /// Rotate each dimension by an offset
    Rotate { array: VName, offsets: Vec<SubExp> },
    /// Split the outer dimension into consecutive chunks
    Split { sizes: Vec<SubExp>, array: VName },
    /// Concatenate along the outer dimension; `total` is the result size
    Concat {
        first: VName,
        rest: Vec<VName>,
        total: SubExp,
    },
    /// A defensive copy with fresh storage
    Copy(VName),
    /// Runtime-checked precondition producing a `cert`
    Assert {
        cond: SubExp,
        msg: String,
        loc: SrcLoc,
    },
    /// A fresh memory block (ExplicitMemory only)
    Alloc { size: SubExp, space: Space },
}

/// The lore-parametric operation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Second-order array combinators (Soacs lore)
    Soac(Soac),
    /// Flat GPU kernels (Kernels and ExplicitMemory lores)
    Kernel(KernelOp),
}

/// An anonymous function used by SOACs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub body: Body,
    pub rettype: Vec<Type>,
}

impl Lambda {
    pub fn new(params: Vec<Param>, body: Body, rettype: Vec<Type>) -> Self {
        Self {
            params,
            body,
            rettype,
        }
    }
}

/// Second-order array combinators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Soac {
    /// Apply `lambda` to corresponding elements of `arrays`
    Map {
        width: SubExp,
        lambda: Lambda,
        arrays: Vec<VName>,
    },
    /// Fold with an associative operator; `inputs` pairs each neutral
    /// element with its array
    Reduce {
        width: SubExp,
        lambda: Lambda,
        inputs: Vec<(SubExp, VName)>,
    },
    /// Inclusive prefix sums
    Scan {
        width: SubExp,
        lambda: Lambda,
        inputs: Vec<(SubExp, VName)>,
    },
    /// Fused reduce-of-map; `red_lambda` folds what `map_lambda` produces
    Redomap {
        width: SubExp,
        red_lambda: Lambda,
        map_lambda: Lambda,
        neutrals: Vec<SubExp>,
        arrays: Vec<VName>,
    },
    /// Chunked sequential fold over the input; flattened to `Redomap`
    /// before kernel extraction
    Stream {
        width: SubExp,
        accs: Vec<SubExp>,
        lambda: Lambda,
        arrays: Vec<VName>,
    },
    /// Scatter: `lambda` produces index/value pairs written into `dests`,
    /// which are consumed
    Write {
        width: SubExp,
        lambda: Lambda,
        arrays: Vec<VName>,
        dests: Vec<VName>,
    },
}

impl Soac {
    /// The width of the combinator's parallel dimension
    pub fn width(&self) -> &SubExp {
        match self {
            Soac::Map { width, .. }
            | Soac::Reduce { width, .. }
            | Soac::Scan { width, .. }
            | Soac::Redomap { width, .. }
            | Soac::Stream { width, .. }
            | Soac::Write { width, .. } => width,
        }
    }
}

/// A typing scope: what each in-scope name is
pub type Scope = FxHashMap<VName, Type>;

/// Extend a scope with the bindings of a pattern
pub fn scope_of_pattern(scope: &mut Scope, pattern: &Pattern) {
    for pe in pattern.elems() {
        scope.insert(pe.name.clone(), pe.ty.clone());
    }
}

/// Extend a scope with parameter bindings
pub fn scope_of_params(scope: &mut Scope, params: &[Param]) {
    for p in params {
        scope.insert(p.name.clone(), p.ty.clone());
    }
}

/// Extend a scope with the bindings introduced by a loop form
pub fn scope_of_loop_form(scope: &mut Scope, form: &LoopForm) {
    if let LoopForm::For { var, .. } = form {
        scope.insert(var.clone(), Type::Prim(PrimType::INDEX));
    }
}
