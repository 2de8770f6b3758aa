// This module describes the example GPU target as the legalizer sees it: the hardware
// generation, the feature flags derived from it that gate which type shapes are legal
// (16-bit instructions, packed 16-bit vector instructions, the flat address space,
// aperture registers), and the address space layout. Address spaces 1 (global),
// 4 (constant) and 0 (flat) hold 64-bit pointers that all address the same memory, so
// casts among them only reinterpret bits; 3 (local) and 5 (private) are 32-bit segment
// pointers whose null value is all ones. Subtarget implements TargetCapabilities so the
// generic engine and the cast lowering can ask these questions without knowing the
// target.

//! GPU subtarget description and target capabilities.

use std::fmt;
use std::str::FromStr;

use crate::core::{LowLevelType, TargetCapabilities, TargetOpcode};

/// Address space numbers.
pub mod addr_space {
    pub const FLAT: u32 = 0;
    pub const GLOBAL: u32 = 1;
    pub const REGION: u32 = 2;
    pub const LOCAL: u32 = 3;
    pub const CONSTANT: u32 = 4;
    pub const PRIVATE: u32 = 5;
    pub const CONSTANT_32BIT: u32 = 6;
}

/// Reads a hardware register; the immediate selects register, offset and width.
pub const S_GETREG_B32: TargetOpcode = TargetOpcode { id: 1, name: "S_GETREG_B32" };

/// Hardware generations, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Generation {
    SouthernIslands,
    SeaIslands,
    VolcanicIslands,
    Gfx9,
}

impl Generation {
    pub const ALL: [Generation; 4] = [
        Generation::SouthernIslands,
        Generation::SeaIslands,
        Generation::VolcanicIslands,
        Generation::Gfx9,
    ];

    pub const fn short_name(self) -> &'static str {
        match self {
            Generation::SouthernIslands => "si",
            Generation::SeaIslands => "ci",
            Generation::VolcanicIslands => "vi",
            Generation::Gfx9 => "gfx9",
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for Generation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Generation::ALL
            .into_iter()
            .find(|g| g.short_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown generation '{s}' (expected si, ci, vi or gfx9)"))
    }
}

/// Feature set of one GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subtarget {
    generation: Generation,
    aperture_regs: bool,
}

impl Subtarget {
    /// A subtarget with the default features of `generation`.
    pub fn new(generation: Generation) -> Self {
        Self { generation, aperture_regs: generation >= Generation::Gfx9 }
    }

    /// Override whether the segment apertures are readable from hardware registers.
    pub fn with_aperture_regs(mut self, aperture_regs: bool) -> Self {
        self.aperture_regs = aperture_regs && self.generation >= Generation::Gfx9;
        self
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn has_16bit_insts(&self) -> bool {
        self.generation >= Generation::VolcanicIslands
    }

    /// Packed math on pairs of 16-bit values.
    pub fn has_vop3p_insts(&self) -> bool {
        self.generation >= Generation::Gfx9
    }

    pub fn has_flat_address_space(&self) -> bool {
        self.generation >= Generation::SeaIslands
    }

    /// 96-bit loads and stores.
    pub fn has_dwordx3_mem(&self) -> bool {
        self.generation >= Generation::SeaIslands
    }

    /// Pointer type of an address space.
    pub fn pointer(&self, addr_space: u32) -> LowLevelType {
        LowLevelType::pointer(addr_space, self.pointer_size_in_bits(addr_space))
    }
}

fn is_flat_global(addr_space: u32) -> bool {
    matches!(addr_space, addr_space::FLAT | addr_space::GLOBAL | addr_space::CONSTANT)
}

impl TargetCapabilities for Subtarget {
    fn pointer_size_in_bits(&self, addr_space: u32) -> u32 {
        match addr_space {
            addr_space::LOCAL | addr_space::PRIVATE | addr_space::REGION | addr_space::CONSTANT_32BIT => 32,
            _ => 64,
        }
    }

    fn null_pointer_value(&self, addr_space: u32) -> u64 {
        match addr_space {
            addr_space::LOCAL | addr_space::PRIVATE | addr_space::REGION => 0xffff_ffff,
            _ => 0,
        }
    }

    fn is_noop_addrspace_cast(&self, src: u32, dst: u32) -> bool {
        is_flat_global(src) && is_flat_global(dst)
    }

    fn has_aperture_regs(&self) -> bool {
        self.aperture_regs
    }

    fn target_opcode(&self, name: &str) -> Option<TargetOpcode> {
        (name == S_GETREG_B32.name).then_some(S_GETREG_B32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_features() {
        let si = Subtarget::new(Generation::SouthernIslands);
        assert!(!si.has_flat_address_space());
        assert!(!si.has_16bit_insts());

        let vi = Subtarget::new(Generation::VolcanicIslands);
        assert!(vi.has_16bit_insts());
        assert!(!vi.has_vop3p_insts());
        assert!(!vi.has_aperture_regs());

        let gfx9 = Subtarget::new(Generation::Gfx9);
        assert!(gfx9.has_vop3p_insts());
        assert!(gfx9.has_aperture_regs());
        assert!(!gfx9.with_aperture_regs(false).has_aperture_regs());
        assert!(!vi.with_aperture_regs(true).has_aperture_regs());
    }

    #[test]
    fn test_address_spaces() {
        let st = Subtarget::new(Generation::Gfx9);
        assert_eq!(st.pointer(addr_space::LOCAL), LowLevelType::pointer(3, 32));
        assert_eq!(st.pointer(addr_space::FLAT), LowLevelType::pointer(0, 64));
        assert_eq!(st.null_pointer_value(addr_space::PRIVATE), 0xffff_ffff);
        assert_eq!(st.null_pointer_value(addr_space::GLOBAL), 0);
        assert!(st.is_noop_addrspace_cast(addr_space::GLOBAL, addr_space::FLAT));
        assert!(st.is_noop_addrspace_cast(addr_space::FLAT, addr_space::CONSTANT));
        assert!(!st.is_noop_addrspace_cast(addr_space::LOCAL, addr_space::FLAT));
    }

    #[test]
    fn test_generation_from_str() {
        assert_eq!("GFX9".parse::<Generation>(), Ok(Generation::Gfx9));
        assert_eq!("ci".parse::<Generation>(), Ok(Generation::SeaIslands));
        assert!("gfx10".parse::<Generation>().is_err());
        assert_eq!(Generation::VolcanicIslands.to_string(), "vi");
    }
}
