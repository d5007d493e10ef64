//! The pass manager
//!
//! Composes passes into pipelines and keeps the global invariants: lore
//! boundaries must match, the typechecker is rerun between passes when
//! checking is enabled, and the name source only moves forward.

use crate::error::{Error, Result};
use crate::ir::{Lore, Program};
use crate::names::NameSource;
use crate::typecheck::{check_program_with, CheckConfig};
use tracing::debug;

/// A named program transformation with declared lore boundaries
#[derive(Clone)]
pub struct Pass {
    pub name: &'static str,
    pub input: Lore,
    pub output: Lore,
    run: fn(Program, &mut NameSource) -> Result<Program>,
}

impl Pass {
    pub const fn new(
        name: &'static str,
        input: Lore,
        output: Lore,
        run: fn(Program, &mut NameSource) -> Result<Program>,
    ) -> Self {
        Self {
            name,
            input,
            output,
            run,
        }
    }
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

/// A sequence of passes with matching lore boundaries
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    passes: Vec<Pass>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pass, validating the lore boundary
    pub fn then(mut self, pass: Pass) -> Result<Self> {
        if let Some(last) = self.passes.last() {
            if last.output != pass.input {
                return Err(Error::internal(
                    "pipeline",
                    format!(
                        "pass {} produces {} but pass {} expects {}",
                        last.name, last.output, pass.name, pass.input
                    ),
                ));
            }
        }
        self.passes.push(pass);
        Ok(self)
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// The lore the pipeline expects, if it has any passes
    pub fn input_lore(&self) -> Option<Lore> {
        self.passes.first().map(|p| p.input)
    }
}

/// Pass manager configuration
#[derive(Debug, Clone)]
pub struct PassConfig {
    /// Rerun the typechecker after every pass
    pub check_types: bool,
    /// Enforce consumption rules while checking
    pub check_uniqueness: bool,
    /// Attach program dumps to failures
    pub verbose: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            check_types: true,
            check_uniqueness: true,
            verbose: false,
        }
    }
}

/// Runs pipelines; owns nothing but the configuration
#[derive(Debug, Clone, Default)]
pub struct PassManager {
    config: PassConfig,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PassConfig) -> Self {
        Self { config }
    }

    /// Run every pass in order. A failing pass halts the pipeline and the
    /// error names the pass; in verbose mode the program at the point of
    /// failure is attached.
    pub fn run(
        &self,
        pipeline: &Pipeline,
        mut prog: Program,
        ns: &mut NameSource,
    ) -> Result<Program> {
        if let Some(want) = pipeline.input_lore() {
            if prog.lore != want {
                return Err(Error::internal(
                    "pipeline",
                    format!("program is in {} lore but the pipeline expects {}", prog.lore, want),
                ));
            }
        }

        for pass in pipeline.passes() {
            debug!(pass = pass.name, lore = %prog.lore, "running pass");
            let cursor_before = ns.cursor();
            let dump_in = if self.config.verbose {
                Some(prog.to_string())
            } else {
                None
            };

            let out = (pass.run)(prog, ns).map_err(|e| e.in_pass(pass.name, dump_in))?;

            if ns.cursor() < cursor_before {
                return Err(Error::internal(
                    pass.name,
                    "name source moved backwards across the pass".to_string(),
                ));
            }
            if out.lore != pass.output {
                return Err(Error::internal(
                    pass.name,
                    format!(
                        "pass declared output lore {} but produced {}",
                        pass.output, out.lore
                    ),
                ));
            }

            if self.config.check_types {
                let cfg = CheckConfig {
                    check_uniqueness: self.config.check_uniqueness,
                };
                check_program_with(&out, &cfg).map_err(|e| {
                    let dump = if self.config.verbose {
                        Some(out.to_string())
                    } else {
                        None
                    };
                    e.in_pass(pass.name, dump)
                })?;
            }
            prog = out;
        }
        Ok(prog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(p: Program, _ns: &mut NameSource) -> Result<Program> {
        Ok(p)
    }

    fn to_kernels(p: Program, _ns: &mut NameSource) -> Result<Program> {
        Ok(p.with_lore(Lore::Kernels))
    }

    fn failing(_p: Program, _ns: &mut NameSource) -> Result<Program> {
        Err(Error::type_error("induced failure"))
    }

    fn empty_prog() -> Program {
        Program::new(Lore::Soacs, vec![])
    }

    #[test]
    fn test_pipeline_rejects_mismatched_lores() {
        let a = Pass::new("a", Lore::Soacs, Lore::Kernels, to_kernels);
        let b = Pass::new("b", Lore::Soacs, Lore::Soacs, identity);
        let err = Pipeline::new().then(a).unwrap().then(b).unwrap_err();
        assert_eq!(err.kind(), "InternalError");
    }

    #[test]
    fn test_failure_names_the_pass() {
        let p = Pipeline::new()
            .then(Pass::new("doomed", Lore::Soacs, Lore::Soacs, failing))
            .unwrap();
        let mut ns = NameSource::new(0);
        let err = PassManager::new().run(&p, empty_prog(), &mut ns).unwrap_err();
        assert!(err.to_string().starts_with("doomed:"));
    }

    #[test]
    fn test_lore_mismatch_at_runtime_is_internal_error() {
        // Declares Soacs output but actually produces Kernels.
        let p = Pipeline::new()
            .then(Pass::new("liar", Lore::Soacs, Lore::Soacs, to_kernels))
            .unwrap();
        let mut ns = NameSource::new(0);
        let err = PassManager::new().run(&p, empty_prog(), &mut ns).unwrap_err();
        assert_eq!(err.kind(), "InternalError");
    }

    #[test]
    fn test_successful_run_crosses_lores() {
        let p = Pipeline::new()
            .then(Pass::new("extract", Lore::Soacs, Lore::Kernels, to_kernels))
            .unwrap()
            .then(Pass::new("noop", Lore::Kernels, Lore::Kernels, identity))
            .unwrap();
        let mut ns = NameSource::new(0);
        let out = PassManager::new().run(&p, empty_prog(), &mut ns).unwrap();
        assert_eq!(out.lore, Lore::Kernels);
    }
}
