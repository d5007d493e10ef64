//! Kernel operations: the `Op` payload after kernel extraction
//!
//! A kernel is a flat index space (one dimension per extracted map nest),
//! a set of inputs sliced per thread, and a body producing one return
//! value set per thread. Reduce kernels additionally carry the reduction
//! operator and the workgroup template parameters.

use crate::ir::types::{SubExp, Type};
use crate::ir::{Body, Lambda, Param};
use crate::names::VName;
use serde::{Deserialize, Serialize};

/// The index space of a kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpace {
    /// `(index variable, dimension width)` pairs, outermost first; each
    /// extracted map nesting contributes one
    pub dims: Vec<(VName, SubExp)>,
    /// Name bound to the flat thread id inside the body
    pub flat_id: VName,
    /// Exact number of threads to launch: the product of the widths
    pub num_threads: SubExp,
}

impl KernelSpace {
    /// The rank of the index space
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The per-dimension index variables
    pub fn index_vars(&self) -> Vec<VName> {
        self.dims.iter().map(|(v, _)| v.clone()).collect()
    }
}

/// One value fed into a kernel body
///
/// `indices` picks the per-thread slice out of `array`; an empty list
/// feeds the whole array (or a scalar) to every thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelInput {
    /// The parameter the kernel body binds
    pub param: Param,
    /// The source array on the host side
    pub array: VName,
    /// Index expressions, usually the per-dimension thread indices
    pub indices: Vec<SubExp>,
}

/// The kernel family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelOp {
    /// A flat map kernel
    Kernel(Kernel),
    /// A reduction with an explicit workgroup/wave template
    ReduceKernel(ReduceKernel),
}

impl KernelOp {
    /// Host-side variables the kernel body references
    pub fn uses(&self) -> &[VName] {
        match self {
            KernelOp::Kernel(k) => &k.uses,
            KernelOp::ReduceKernel(k) => &k.uses,
        }
    }

    /// Exact number of threads to launch
    pub fn num_threads(&self) -> &SubExp {
        match self {
            KernelOp::Kernel(k) => &k.space.num_threads,
            KernelOp::ReduceKernel(k) => &k.space.num_threads,
        }
    }
}

/// A flat map kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    pub space: KernelSpace,
    /// Host-side free variables of the body, deduplicated
    pub uses: Vec<VName>,
    /// Per-thread inputs, deduplicated
    pub inputs: Vec<KernelInput>,
    /// Per-thread return types
    pub returns: Vec<Type>,
    pub body: Body,
    /// When `Some`, the code generator must honor it
    pub workgroup_size: Option<SubExp>,
}

/// A reduction kernel with the wave/workgroup template
///
/// Each thread folds a strided slice of the input with `fold_lambda`, then
/// workgroups combine partial results with `red_lambda`: cross-wave rounds
/// barrier between steps, in-wave rounds (strides below `wave_width`) run
/// lock-step and skip the barrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceKernel {
    pub space: KernelSpace,
    pub uses: Vec<VName>,
    /// The associative combining operator
    pub red_lambda: Lambda,
    /// The per-element transformation folded by each thread
    pub fold_lambda: Lambda,
    pub neutrals: Vec<SubExp>,
    pub arrays: Vec<VName>,
    pub workgroup_size: SubExp,
    /// The configurable lock-step width of the target hardware
    pub wave_width: SubExp,
}
