//! Post-use information for bottom-up rules

use crate::names::VName;
use bitflags::bitflags;
use rustc_hash::FxHashMap;

bitflags! {
    /// How a name is used after its binding point
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Usage: u8 {
        /// Read by a later statement
        const OBSERVED  = 0b001;
        /// Consumed by a later statement
        const CONSUMED  = 0b010;
        /// Referenced by the body result
        const IN_RESULT = 0b100;
    }
}

/// Usage of every name, filled in while ascending
#[derive(Debug, Clone, Default)]
pub struct UsageTable {
    table: FxHashMap<VName, Usage>,
}

impl UsageTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, v: VName, u: Usage) {
        self.table
            .entry(v)
            .and_modify(|e| *e |= u)
            .or_insert(u);
    }

    pub fn observe(&mut self, v: VName) {
        self.add(v, Usage::OBSERVED);
    }

    pub fn consume(&mut self, v: VName) {
        self.add(v, Usage::CONSUMED);
    }

    pub fn in_result(&mut self, v: VName) {
        self.add(v, Usage::IN_RESULT);
    }

    /// Is the name used at all?
    pub fn is_used(&self, v: &VName) -> bool {
        self.table.contains_key(v)
    }

    /// Is the name consumed somewhere after its binding?
    pub fn is_consumed(&self, v: &VName) -> bool {
        self.table
            .get(v)
            .map(|u| u.contains(Usage::CONSUMED))
            .unwrap_or(false)
    }

    pub fn usage_of(&self, v: &VName) -> Usage {
        self.table.get(v).copied().unwrap_or(Usage::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usages_accumulate() {
        let v = VName::new("x", 1);
        let mut ut = UsageTable::new();
        assert!(!ut.is_used(&v));
        ut.observe(v.clone());
        ut.consume(v.clone());
        assert!(ut.is_used(&v));
        assert!(ut.is_consumed(&v));
        assert!(ut.usage_of(&v).contains(Usage::OBSERVED | Usage::CONSUMED));
    }
}
