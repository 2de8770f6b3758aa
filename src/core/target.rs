//! Target capability queries consumed by the legalizer and the MIR tools.

use super::opcode::TargetOpcode;

/// Facts about a target that legalization rules and custom lowerings depend on.
///
/// Implementations are immutable descriptions shared by every worker.
pub trait TargetCapabilities: Send + Sync {
    /// Width of a pointer into `addr_space`.
    fn pointer_size_in_bits(&self, addr_space: u32) -> u32;

    /// Bit pattern of the null pointer of `addr_space`.
    fn null_pointer_value(&self, _addr_space: u32) -> u64 {
        0
    }

    /// Whether casting between the two address spaces keeps the representation.
    fn is_noop_addrspace_cast(&self, src_as: u32, dst_as: u32) -> bool;

    /// Whether segment apertures can be read from hardware registers.
    fn has_aperture_regs(&self) -> bool {
        false
    }

    /// Look up an already selected target instruction by name.
    fn target_opcode(&self, _name: &str) -> Option<TargetOpcode> {
        None
    }
}
