// This module implements the custom legalization of G_ADDRSPACE_CAST. Casts between the
// 64-bit address spaces that share one representation become plain bitcasts, changed in
// place and handed back to the driver. Casting a 32-bit segment pointer (local or
// private) to a flat pointer combines the 32-bit offset with the high half of the
// segment's aperture; the aperture comes either from a hardware register or from the
// queue descriptor the dispatch preloads, which the function receives as a live-in.
// Casting a flat pointer to a segment pointer keeps its low 32 bits. Null must map to
// null in both directions, so both lowerings select against the null value of the
// destination whenever the source is the null value of its own address space.

//! Address space cast lowering.

use log::debug;

use crate::core::{
    InstId, IntPredicate, LegalizerResult, LowLevelType, MachineIrBuilder, MemDesc, Opcode,
    TargetCapabilities, ValueId,
};

use super::subtarget::{addr_space, Subtarget, S_GETREG_B32};

/// Name of the live-in holding the queue descriptor pointer.
pub const QUEUE_PTR: &str = "queue_ptr";

/// Hardware register holding the shared and private aperture bases.
const HW_REG_MEM_BASES: i64 = 15;
const HW_REG_OFFSET_SHIFT: i64 = 6;
const HW_REG_WIDTH_M1_SHIFT: i64 = 11;

/// Byte offsets of the apertures in the queue descriptor.
const QUEUE_SHARED_APERTURE: i64 = 0x40;
const QUEUE_PRIVATE_APERTURE: i64 = 0x44;

/// Alignment of the queue descriptor, in bytes.
const QUEUE_ALIGN: i64 = 64;

const S1: LowLevelType = LowLevelType::scalar(1);
const S32: LowLevelType = LowLevelType::scalar(32);
const S64: LowLevelType = LowLevelType::scalar(64);

fn is_segment(addr_space: u32) -> bool {
    matches!(addr_space, addr_space::LOCAL | addr_space::PRIVATE)
}

/// Field selector of S_GETREG_B32 reading the aperture of `addr_space`.
pub fn aperture_hw_reg_encoding(addr_space: u32) -> (i64, u32) {
    let (offset, width_m1) = if addr_space == addr_space::LOCAL { (16, 15) } else { (0, 15) };
    let encoding =
        HW_REG_MEM_BASES | (offset << HW_REG_OFFSET_SHIFT) | (i64::from(width_m1) << HW_REG_WIDTH_M1_SHIFT);
    (encoding, width_m1 + 1)
}

/// Byte offset of the aperture of `addr_space` in the queue descriptor.
pub fn queue_aperture_offset(addr_space: u32) -> i64 {
    if addr_space == addr_space::LOCAL {
        QUEUE_SHARED_APERTURE
    } else {
        QUEUE_PRIVATE_APERTURE
    }
}

/// Largest power of two dividing both `a` and `b`.
fn min_align(a: i64, b: i64) -> i64 {
    let v = a | b;
    v & v.wrapping_neg()
}

/// Emit the high 32 bits of flat addresses pointing into `addr_space`.
fn segment_aperture(st: &Subtarget, addr_space: u32, b: &mut MachineIrBuilder<'_>) -> ValueId {
    if st.has_aperture_regs() {
        let (encoding, shift) = aperture_hw_reg_encoding(addr_space);
        let getreg = st.target_opcode(S_GETREG_B32.name).unwrap_or(S_GETREG_B32);
        let field = b.build_target(getreg, S32, Vec::new(), vec![encoding]);
        let amount = b.build_constant(S32, i64::from(shift));
        return b.build_binop(Opcode::Shl, S32, field, amount);
    }

    let queue_ptr = b.mf_mut().live_in(QUEUE_PTR, st.pointer(addr_space::CONSTANT));
    let struct_offset = queue_aperture_offset(addr_space);
    let offset = b.build_constant(S64, struct_offset);
    let addr = b.build_gep(queue_ptr, offset);
    let align_bits = (min_align(QUEUE_ALIGN, struct_offset) * 8) as u32;
    b.build_load(Opcode::Load, S32, addr, MemDesc::new(32, align_bits))
}

/// Lower the address space cast `inst`.
///
/// Returns `Ok(false)` for anything but a scalar pointer cast between a
/// supported pair of address spaces.
pub fn legalize_addrspace_cast(
    st: &Subtarget,
    inst: InstId,
    b: &mut MachineIrBuilder<'_>,
) -> LegalizerResult<bool> {
    let Some(mi) = b.mf().inst(inst).cloned() else {
        return Ok(false);
    };
    if mi.opcode != Opcode::AddrspaceCast || mi.defs.len() != 1 || mi.uses.len() != 1 {
        return Ok(false);
    }
    let (dst, src) = (mi.defs[0], mi.uses[0]);
    let (dst_ty, src_ty) = (b.value_type(dst), b.value_type(src));
    if !dst_ty.is_pointer() || !src_ty.is_pointer() {
        return Ok(false);
    }
    let (Some(dst_as), Some(src_as)) = (dst_ty.address_space(), src_ty.address_space()) else {
        return Ok(false);
    };

    if st.is_noop_addrspace_cast(src_as, dst_as) {
        if let Some(mi) = b.mf_mut().inst_mut(inst) {
            mi.opcode = Opcode::Bitcast;
        }
        b.changing(inst);
        debug!("addrspace cast p{src_as} -> p{dst_as} is a bitcast");
        return Ok(true);
    }

    if src_as == addr_space::FLAT && is_segment(dst_as) {
        let segment_null = b.build_constant(dst_ty, st.null_pointer_value(dst_as) as i64);
        let flat_null = b.build_constant(src_ty, st.null_pointer_value(src_as) as i64);
        let low = b.build_extract(dst_ty, src, 0);
        let non_null = b.build_icmp(IntPredicate::Ne, S1, src, flat_null);
        b.build_into(Opcode::Select, dst, vec![non_null, low, segment_null], Vec::new());
        b.mf_mut().erase(inst);
        debug!("lowered flat -> p{dst_as} cast");
        return Ok(true);
    }

    if is_segment(src_as) && dst_as == addr_space::FLAT {
        let segment_null = b.build_constant(src_ty, st.null_pointer_value(src_as) as i64);
        let flat_null = b.build_constant(dst_ty, st.null_pointer_value(dst_as) as i64);
        let aperture = segment_aperture(st, src_as, b);
        let non_null = b.build_icmp(IntPredicate::Ne, S1, src, segment_null);
        let offset = b.build_unop(Opcode::Ptrtoint, S32, src);
        let flat = b.build_merge(dst_ty, vec![offset, aperture]);
        b.build_into(Opcode::Select, dst, vec![non_null, flat, flat_null], Vec::new());
        b.mf_mut().erase(inst);
        debug!("lowered p{src_as} -> flat cast");
        return Ok(true);
    }

    Ok(false)
}
