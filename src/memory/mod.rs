//! Explicit memory representation and the lowering passes that use it
//!
//! After the explicit-allocations pass, every array value is backed by a
//! named memory block and an index function describing its layout within
//! that block. This module defines the per-value [`MemSummary`] decoration
//! and hosts the allocation, double-buffering, and in-place-lowering
//! passes.

pub mod alloc;
pub mod double_buffer;
pub mod in_place;
pub mod ixfun;

pub use alloc::explicit_allocations;
pub use double_buffer::double_buffer;
pub use in_place::in_place_lowering;
pub use ixfun::IxFun;

use crate::names::VName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The ExplicitMemory decoration of a let-bound name or parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemSummary {
    /// A scalar; lives in a register, no block
    Scalar,
    /// An array stored in `mem`, laid out according to `ixfun`
    Array { mem: VName, ixfun: IxFun },
}

impl MemSummary {
    /// The memory block, when there is one
    pub fn mem(&self) -> Option<&VName> {
        match self {
            MemSummary::Scalar => None,
            MemSummary::Array { mem, .. } => Some(mem),
        }
    }

    /// The index function, when there is one
    pub fn ixfun(&self) -> Option<&IxFun> {
        match self {
            MemSummary::Scalar => None,
            MemSummary::Array { ixfun, .. } => Some(ixfun),
        }
    }
}

impl fmt::Display for MemSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemSummary::Scalar => write!(f, "scalar"),
            MemSummary::Array { mem, ixfun } => write!(f, "{}->{}", mem, ixfun),
        }
    }
}
