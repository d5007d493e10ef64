//! Front-end interchange
//!
//! The front-end delivers a typed, renamed program as an in-process
//! value; for the CLI driver and for golden tests, the same value travels
//! as JSON. The unit carries the program and the name-source seed, which
//! the front-end guarantees is strictly greater than any tag occurring in
//! the program.

use crate::error::{Error, Result};
use crate::ir::Program;
use crate::names::NameSource;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A program plus its name-source seed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub program: Program,
    pub name_seed: u64,
}

impl CompilationUnit {
    pub fn new(program: Program, name_seed: u64) -> Self {
        Self { program, name_seed }
    }

    /// The name source this unit's tags continue from
    pub fn name_source(&self) -> NameSource {
        NameSource::new(self.name_seed)
    }
}

/// Read a compilation unit from a JSON file
pub fn load(path: &Path) -> Result<CompilationUnit> {
    let text = std::fs::read_to_string(path)?;
    let unit: CompilationUnit = serde_json::from_str(&text)?;
    Ok(unit)
}

/// Parse a compilation unit from a JSON string
pub fn from_json(text: &str) -> Result<CompilationUnit> {
    Ok(serde_json::from_str(text)?)
}

/// Serialize a compilation unit to JSON
pub fn to_json(unit: &CompilationUnit) -> Result<String> {
    serde_json::to_string_pretty(unit).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Lore;

    #[test]
    fn test_json_round_trip() {
        let unit = CompilationUnit::new(Program::new(Lore::Soacs, vec![]), 42);
        let text = to_json(&unit).unwrap();
        let back = from_json(&text).unwrap();
        assert_eq!(back.name_seed, 42);
        assert_eq!(back.program.lore, Lore::Soacs);
        assert!(back.program.funs.is_empty());
    }
}
