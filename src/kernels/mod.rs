//! Kernel extraction and flattening
//!
//! Turns nested `map`/`reduce`/`redomap` structure into flat GPU-style
//! kernels: each surviving map nest becomes one kernel whose index space
//! is the Cartesian product of the per-map widths. Degenerate kernels are
//! peepholed back into host-level array operations.

pub mod extract;
pub mod nest;

pub use extract::extract_kernels_with;

use crate::error::Result;
use crate::ir::kernel::{Kernel, KernelOp};
use crate::ir::types::SubExp;
use crate::ir::{BasicOp, Lore, Program};
use crate::names::NameSource;
use crate::pass::Pass;

/// Kernel extraction configuration
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Threads per workgroup
    pub workgroup_size: i32,
    /// Lock-step width of the target hardware; in-wave reduction rounds
    /// skip the barrier
    pub wave_width: i32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            workgroup_size: 256,
            wave_width: 32,
        }
    }
}

/// Kernel extraction as a pipeline pass
pub fn pass() -> Pass {
    Pass::new("kernel-extraction", Lore::Soacs, Lore::Kernels, extract_kernels)
}

/// Extract kernels under the default configuration
pub fn extract_kernels(prog: Program, ns: &mut NameSource) -> Result<Program> {
    extract_kernels_with(prog, ns, &KernelConfig::default())
}

/// Recognize a kernel that degenerates to a host-level operation.
///
/// A kernel whose body immediately returns its sole input is a relayout:
/// the identity index order is a `Copy` (or a `Reshape` when the ranks
/// disagree), a permuted index order is a `Rearrange`.
pub fn peephole(kop: &KernelOp) -> Option<BasicOp> {
    let KernelOp::Kernel(k) = kop else {
        return None;
    };
    degenerate_kernel(k)
}

fn degenerate_kernel(k: &Kernel) -> Option<BasicOp> {
    if !k.body.stms.is_empty() || k.body.result.len() != 1 || k.inputs.len() != 1 {
        return None;
    }
    let input = &k.inputs[0];
    if k.body.result[0].var() != Some(&input.param.name) {
        return None;
    }
    // The input must be read at exactly the thread indices, in some order.
    let space_vars: Vec<_> = k.space.dims.iter().map(|(v, _)| v.clone()).collect();
    if input.indices.len() != space_vars.len() {
        return None;
    }
    let mut perm = Vec::with_capacity(space_vars.len());
    for idx in &input.indices {
        let v = idx.var()?;
        let pos = space_vars.iter().position(|sv| sv == v)?;
        if perm.contains(&pos) {
            return None;
        }
        perm.push(pos);
    }
    // indices[d] = space_vars[perm[d]] means source dimension d is driven
    // by output dimension perm[d]; the output permutation is the inverse.
    let mut inverse = vec![0; perm.len()];
    for (d, &p) in perm.iter().enumerate() {
        inverse[p] = d;
    }
    if inverse.iter().enumerate().all(|(i, &p)| i == p) {
        // Identity order: a plain copy, unless the element rank changed
        // through the flattening, which makes it a reshape.
        if input.param.ty.rank() == 0 {
            Some(BasicOp::Copy(input.array.clone()))
        } else {
            let dims: Vec<SubExp> = k
                .space
                .dims
                .iter()
                .map(|(_, w)| w.clone())
                .chain(
                    input
                        .param
                        .ty
                        .shape()
                        .map(|s| s.dims.clone())
                        .unwrap_or_default(),
                )
                .collect();
            Some(BasicOp::Reshape {
                array: input.array.clone(),
                new_dims: dims,
            })
        }
    } else {
        Some(BasicOp::Rearrange {
            array: input.array.clone(),
            perm: inverse,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::kernel::KernelSpace;
    use crate::ir::prim::{IntType, PrimType};
    use crate::ir::types::Type;
    use crate::ir::{Body, Param};
    use crate::names::VName;

    fn copy_kernel(perm_order: &[usize]) -> KernelOp {
        let i = VName::new("i", 1);
        let j = VName::new("j", 2);
        let vars = [i.clone(), j.clone()];
        let p = VName::new("elem", 3);
        let arr = VName::new("arr", 4);
        KernelOp::Kernel(Kernel {
            space: KernelSpace {
                dims: vec![
                    (i.clone(), SubExp::int32(10)),
                    (j.clone(), SubExp::int32(20)),
                ],
                flat_id: VName::new("flat", 5),
                num_threads: SubExp::int32(200),
            },
            uses: vec![arr.clone()],
            inputs: vec![crate::ir::kernel::KernelInput {
                param: Param::new(p.clone(), Type::Prim(PrimType::Int(IntType::I32))),
                array: arr,
                indices: perm_order
                    .iter()
                    .map(|&k| SubExp::Var(vars[k].clone()))
                    .collect(),
            }],
            returns: vec![Type::Prim(PrimType::Int(IntType::I32))],
            body: Body::result_only(vec![SubExp::Var(p)]),
            workgroup_size: None,
        })
    }

    #[test]
    fn test_identity_kernel_is_copy() {
        let k = copy_kernel(&[0, 1]);
        assert!(matches!(peephole(&k), Some(BasicOp::Copy(_))));
    }

    #[test]
    fn test_swapped_kernel_is_rearrange() {
        let k = copy_kernel(&[1, 0]);
        match peephole(&k) {
            Some(BasicOp::Rearrange { perm, .. }) => assert_eq!(perm, vec![1, 0]),
            other => panic!("expected rearrange, got {:?}", other),
        }
    }
}
