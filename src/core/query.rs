//! Type queries: the rule-matching key of one instruction instance.

use std::fmt;

use super::types::LowLevelType;

/// Size and alignment of one memory operand, both in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemDesc {
    pub size_in_bits: u32,
    pub align_in_bits: u32,
}

impl MemDesc {
    pub const fn new(size_in_bits: u32, align_in_bits: u32) -> Self {
        Self { size_in_bits, align_in_bits }
    }
}

/// One type per type index of the opcode plus the memory descriptors of memory
/// opcodes.
///
/// A query is built fresh from the current operand types for every
/// legalization attempt and mutated as rules fire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeQuery {
    pub types: Vec<LowLevelType>,
    pub mem: Vec<MemDesc>,
}

impl TypeQuery {
    pub fn new(types: impl Into<Vec<LowLevelType>>) -> Self {
        Self { types: types.into(), mem: Vec::new() }
    }

    pub fn with_mem(types: impl Into<Vec<LowLevelType>>, mem: impl Into<Vec<MemDesc>>) -> Self {
        Self { types: types.into(), mem: mem.into() }
    }

    /// Number of type slots.
    pub fn arity(&self) -> usize {
        self.types.len()
    }

    /// Type at `type_idx`, if the query has that slot.
    pub fn get(&self, type_idx: usize) -> Option<LowLevelType> {
        self.types.get(type_idx).copied()
    }

    pub fn set(&mut self, type_idx: usize, ty: LowLevelType) {
        self.types[type_idx] = ty;
    }
}

impl fmt::Display for TypeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, ty) in self.types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str("]")?;
        for mem in &self.mem {
            write!(f, " mem({}, {})", mem.size_in_bits, mem.align_in_bits)?;
        }
        Ok(())
    }
}
