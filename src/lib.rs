//! Weft: the optimizing compiler core for a data-parallel array language
//!
//! Weft is a statically typed, purely functional array language whose
//! compiler turns high-level nested-parallel programs into efficient
//! sequential or GPU code. This crate is the middle of that compiler:
//! a typed SSA-style IR, the alias/uniqueness analysis gating in-place
//! updates, a rewrite-rule simplifier, SOAC fusion, kernel extraction,
//! explicit memory allocation, double buffering, and in-place lowering —
//! all sequenced by a pass manager that re-typechecks between passes.
//!
//! The source-language front-end and the concrete code emitters live
//! elsewhere; they hand in (and take out) programs conforming to the IR
//! in [`ir`].
//!
//! # Example
//!
//! ```no_run
//! use weft::{interchange, PassManager};
//!
//! fn main() -> weft::Result<()> {
//!     let unit = interchange::load(std::path::Path::new("prog.json"))?;
//!     let mut ns = unit.name_source();
//!     let pipeline = weft::sequential_pipeline()?;
//!     let prog = PassManager::new().run(&pipeline, unit.program, &mut ns)?;
//!     println!("{}", prog);
//!     Ok(())
//! }
//! ```

pub mod alias;
pub mod firstorder;
pub mod fusion;
pub mod interchange;
pub mod ir;
pub mod kernels;
pub mod memory;
pub mod names;
pub mod pass;
pub mod simplify;
pub mod typecheck;

mod error;

pub use error::{Error, Result, SrcLoc};
pub use ir::{Lore, Program};
pub use names::{NameSource, VName};
pub use pass::{Pass, PassConfig, PassManager, Pipeline};

/// Weft version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The standard sequential pipeline: simplify, fuse, lower in-place
/// updates, sequentialize the SOACs, and make memory explicit.
pub fn sequential_pipeline() -> Result<Pipeline> {
    Pipeline::new()
        .then(simplify::soacs_pass())?
        .then(fusion::pass())?
        .then(simplify::soacs_pass())?
        .then(memory::in_place::pass())?
        .then(firstorder::pass())?
        .then(simplify::soacs_pass())?
        .then(memory::alloc::soacs_pass())?
        .then(memory::double_buffer::pass())?
        .then(simplify::memory_pass())
}

/// The GPU pipeline: like the sequential one, but nested SOACs are
/// flattened into kernels before allocation.
pub fn gpu_pipeline() -> Result<Pipeline> {
    Pipeline::new()
        .then(simplify::soacs_pass())?
        .then(fusion::pass())?
        .then(simplify::soacs_pass())?
        .then(memory::in_place::pass())?
        .then(kernels::pass())?
        .then(simplify::kernels_pass())?
        .then(memory::in_place::kernels_pass())?
        .then(memory::alloc::pass())?
        .then(memory::double_buffer::pass())?
        .then(simplify::memory_pass())
}

/// Only the enabling optimizations: simplification and fusion, staying
/// in the SOACS lore.
pub fn enabling_pipeline() -> Result<Pipeline> {
    Pipeline::new()
        .then(simplify::soacs_pass())?
        .then(fusion::pass())?
        .then(simplify::soacs_pass())
}
