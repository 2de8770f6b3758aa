// This module implements LegalizerHelper, which applies a resolved action to one machine
// instruction. Retyping rewrites keep the instruction and insert conversions around it:
// widening extends the uses before the instruction and truncates the new wide defs back
// into the original values after it, narrowing does the opposite for operands that are
// only read or only written, more-elements pads vectors with undefined lanes, and
// bitcast reinterprets operands of the same size. These return Rewrite::InPlace and the
// caller resolves the same instruction again. Splitting rewrites replace the
// instruction: narrowing by parts (bitwise ops, constants, selects, add/sub through a
// carry chain, full-width loads and stores), fewer-elements and scalarize (lane-wise
// ops and memory ops split into element chunks), and lowering into other generic
// opcodes. These emit a replacement sequence in front of the instruction, erase it and
// return Rewrite::Replaced. Everything the helper does not know how to rewrite is an
// UnableToLegalize error naming the opcode and the action.

//! Instruction rewrites for non-terminal actions and lowering.

use log::trace;

use crate::core::{
    InsertPoint, InstId, IntPredicate, LegalizerError, LegalizerResult, LowLevelType,
    MachineFunction, MachineInst, MachineIrBuilder, MemDesc, Opcode, OperandRef, ValueId,
};

use super::action::{Action, ActionKind};

/// What a rewrite did to the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// The instruction was retyped and must be resolved again.
    InPlace,
    /// The instruction was erased and replaced by new instructions.
    Replaced,
}

/// How a use is brought to a wider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extension {
    Any,
    Sign,
    Zero,
    Float,
}

impl Extension {
    fn opcode(self) -> Opcode {
        match self {
            Extension::Any => Opcode::Anyext,
            Extension::Sign => Opcode::Sext,
            Extension::Zero => Opcode::Zext,
            Extension::Float => Opcode::Fpext,
        }
    }
}

fn unable(opcode: Opcode, kind: ActionKind, reason: impl Into<String>) -> LegalizerError {
    LegalizerError::UnableToLegalize { opcode, action: kind.name(), reason: reason.into() }
}

/// Whether the values of `type_idx` of `opcode` are floating point.
fn is_fp_operand(opcode: Opcode, type_idx: usize) -> bool {
    use Opcode::*;
    match opcode {
        Fptrunc | Fpext => true,
        Fptosi | Fptoui | Fcmp => type_idx == 1,
        Sitofp | Uitofp => type_idx == 0,
        op => op.is_floating_point(),
    }
}

/// Extension used when widening use `use_idx` of `inst`.
fn use_extension(inst: &MachineInst, use_idx: usize, type_idx: usize) -> Extension {
    use Opcode::*;
    if is_fp_operand(inst.opcode, type_idx) {
        return Extension::Float;
    }
    match inst.opcode {
        Ashr if use_idx == 0 => Extension::Sign,
        Shl if use_idx == 0 => Extension::Any,
        Ashr | Lshr | Shl => Extension::Zero,
        Icmp => {
            let signed = inst
                .imms
                .first()
                .and_then(|&code| IntPredicate::from_code(code))
                .is_some_and(IntPredicate::is_signed);
            if signed {
                Extension::Sign
            } else {
                Extension::Zero
            }
        }
        Sitofp | Sext | Gep => Extension::Sign,
        Uitofp | Zext | Inttoptr | Ctlz | CtlzZeroUndef | Cttz | CttzZeroUndef | Ctpop => Extension::Zero,
        InsertVectorElt | ExtractVectorElt if type_idx == 2 => Extension::Zero,
        _ => Extension::Any,
    }
}

/// Applies actions to instructions of one function.
pub struct LegalizerHelper<'f> {
    b: MachineIrBuilder<'f>,
}

impl<'f> LegalizerHelper<'f> {
    pub fn new(mf: &'f mut MachineFunction) -> Self {
        Self { b: MachineIrBuilder::new(mf) }
    }

    pub fn builder(&mut self) -> &mut MachineIrBuilder<'f> {
        &mut self.b
    }

    pub fn mf(&self) -> &MachineFunction {
        self.b.mf()
    }

    /// Apply a non-terminal action or `Lower` to `inst`.
    pub fn apply(&mut self, inst: InstId, action: Action) -> LegalizerResult<Rewrite> {
        trace!("applying {action} to {inst:?}");
        match action {
            Action::WidenScalar { type_idx, new_type } => self.widen_scalar(inst, type_idx, new_type),
            Action::NarrowScalar { type_idx, new_type } => self.narrow_scalar(inst, type_idx, new_type),
            Action::MoreElements { type_idx, new_type } => self.more_elements(inst, type_idx, new_type),
            Action::FewerElements { type_idx, new_type } | Action::Scalarize { type_idx, new_type } => {
                self.fewer_elements(inst, action.kind(), type_idx, new_type)
            }
            Action::Bitcast { type_idx, new_type } => self.bitcast(inst, type_idx, new_type),
            Action::Lower => self.lower(inst),
            Action::Legal | Action::Custom | Action::Unsupported => {
                let opcode = self.fetch(inst).map_or(Opcode::ImplicitDef, |mi| mi.opcode);
                Err(unable(opcode, action.kind(), "not a rewrite"))
            }
        }
    }

    fn fetch(&self, inst: InstId) -> Option<MachineInst> {
        self.b.mf().inst(inst).cloned()
    }

    fn store_back(&mut self, inst: InstId, mi: MachineInst) {
        if let Some(slot) = self.b.mf_mut().inst_mut(inst) {
            *slot = mi;
        }
    }

    fn erase(&mut self, inst: InstId) -> Rewrite {
        self.b.mf_mut().erase(inst);
        Rewrite::Replaced
    }

    /// Type of the first operand mapped to `type_idx`.
    fn slot_type(&self, mi: &MachineInst, type_idx: usize) -> Option<LowLevelType> {
        mi.operands()
            .find(|(op, _)| mi.opcode.type_index(*op) == type_idx)
            .map(|(_, v)| self.b.value_type(v))
    }

    /// Address of the piece `byte_offset` bytes past `base`.
    fn piece_address(&mut self, base: ValueId, byte_offset: u32) -> ValueId {
        if byte_offset == 0 {
            return base;
        }
        let ptr_bits = self.b.value_type(base).size_in_bits();
        let offset = self.b.build_constant(LowLevelType::scalar(ptr_bits), i64::from(byte_offset));
        self.b.build_gep(base, offset)
    }

    // Widening.

    /// Widen the scalars (or vector elements) of `type_idx` to `wide`.
    pub fn widen_scalar(&mut self, inst: InstId, type_idx: usize, wide: LowLevelType) -> LegalizerResult<Rewrite> {
        use Opcode::*;
        let Some(mi) = self.fetch(inst) else {
            return Ok(Rewrite::Replaced);
        };
        let opcode = mi.opcode;
        let fail = |reason: &str| unable(opcode, ActionKind::WidenScalar, reason);

        match opcode {
            MergeValues | UnmergeValues | Extract | Insert | BuildVector | ConcatVectors | Bitcast
            | AddrspaceCast => return Err(fail("operand sizes are tied to each other")),
            Uaddo | Saddo | Usubo | Ssubo | Uadde | Sadde | Usube | Ssube if type_idx == 0 => {
                return Err(fail("overflow arithmetic cannot be widened"));
            }
            Umulh | Smulh => return self.widen_mulh(inst, &mi, wide),
            op if op.is_memory() && op != Load && op != Sextload && op != Zextload && op != Store => {
                return Err(fail("atomic operations cannot be widened"));
            }
            _ => {}
        }

        let narrow = self.slot_type(&mi, type_idx).ok_or_else(|| fail("type index has no operand"))?;
        if narrow.address_space().is_some() || wide.address_space().is_some() {
            return Err(fail("pointers cannot be widened"));
        }
        if narrow.num_elements() != wide.num_elements()
            || wide.scalar_size_in_bits() <= narrow.scalar_size_in_bits()
        {
            return Err(fail("new type is not a wider scalar"));
        }

        let cttz_guard = match (opcode, type_idx) {
            (Cttz, 1) => Some(
                guard_bits(narrow.scalar_size_in_bits()).ok_or_else(|| fail("count source too wide for the guard bit"))?,
            ),
            _ => None,
        };
        let operands = mi.operands_of_type_index(type_idx);
        let mut new_mi = mi.clone();

        self.b.set_insert_point(InsertPoint::Before(inst));
        for &op in &operands {
            let OperandRef::Use(i) = op else { continue };
            let v = mi.uses[i];
            let ext = use_extension(&mi, i, type_idx);
            let mut widened = self.b.build_unop(ext.opcode(), wide, v);
            if let Some(guard) = cttz_guard {
                // Stops the count at the original width when the source is zero.
                let bit = self.b.build_constant(wide, guard);
                widened = self.b.build_binop(Or, wide, widened, bit);
            }
            new_mi.uses[i] = widened;
        }

        self.b.set_insert_point(InsertPoint::After(inst));
        if matches!(opcode, Ctlz | CtlzZeroUndef) && type_idx == 1 {
            let def = mi.defs[0];
            let def_ty = self.b.value_type(def);
            let count = self.b.new_value(def_ty);
            new_mi.defs[0] = count;
            let diff = wide.scalar_size_in_bits() - narrow.scalar_size_in_bits();
            let diff = self.b.build_constant(def_ty, i64::from(diff));
            self.b.build_into(Sub, def, vec![count, diff], Vec::new());
        }
        let trunc = if is_fp_operand(opcode, type_idx) { Fptrunc } else { Trunc };
        for &op in &operands {
            let OperandRef::Def(i) = op else { continue };
            let wide_def = self.b.new_value(wide);
            self.b.build_into(trunc, mi.defs[i], vec![wide_def], Vec::new());
            new_mi.defs[i] = wide_def;
        }

        self.store_back(inst, new_mi);
        Ok(Rewrite::InPlace)
    }

    /// High multiply through a full multiply at `wide`.
    fn widen_mulh(&mut self, inst: InstId, mi: &MachineInst, wide: LowLevelType) -> LegalizerResult<Rewrite> {
        let signed = mi.opcode == Opcode::Smulh;
        let narrow = self.b.value_type(mi.defs[0]);
        if !narrow.is_scalar() || !wide.is_scalar() || wide.size_in_bits() < 2 * narrow.size_in_bits() {
            return Err(unable(mi.opcode, ActionKind::WidenScalar, "needs a type of twice the width"));
        }
        let (ext, shift) = if signed { (Opcode::Sext, Opcode::Ashr) } else { (Opcode::Zext, Opcode::Lshr) };

        self.b.set_insert_point(InsertPoint::Before(inst));
        let lhs = self.b.build_unop(ext, wide, mi.uses[0]);
        let rhs = self.b.build_unop(ext, wide, mi.uses[1]);
        let product = self.b.build_binop(Opcode::Mul, wide, lhs, rhs);
        let amount = self.b.build_constant(wide, i64::from(narrow.size_in_bits()));
        let high = self.b.build_binop(shift, wide, product, amount);
        self.b.build_into(Opcode::Trunc, mi.defs[0], vec![high], Vec::new());
        Ok(self.erase(inst))
    }

    // Narrowing.

    /// Narrow the scalar of `type_idx` to `narrow`.
    pub fn narrow_scalar(&mut self, inst: InstId, type_idx: usize, narrow: LowLevelType) -> LegalizerResult<Rewrite> {
        use Opcode::*;
        let Some(mi) = self.fetch(inst) else {
            return Ok(Rewrite::Replaced);
        };
        let opcode = mi.opcode;
        let fail = |reason: &str| unable(opcode, ActionKind::NarrowScalar, reason);

        let wide = self.slot_type(&mi, type_idx).ok_or_else(|| fail("type index has no operand"))?;
        if !wide.is_scalar() || !narrow.is_scalar() || narrow.size_in_bits() >= wide.size_in_bits() {
            return Err(fail("new type is not a narrower scalar"));
        }
        let mem_size = mi.mem.first().map(|m| m.size_in_bits);
        let fits_narrow = mem_size.is_some_and(|size| size <= narrow.size_in_bits());

        match (opcode, type_idx) {
            (Trunc, 1) => {
                if narrow.size_in_bits() <= self.b.value_type(mi.defs[0]).size_in_bits() {
                    return Err(fail("source would not be wider than the result"));
                }
                self.truncate_uses(inst, mi, type_idx, narrow)
            }
            (Shl | Lshr | Ashr | Inttoptr | Gep, 1) | (InsertVectorElt | ExtractVectorElt, 2) => {
                self.truncate_uses(inst, mi, type_idx, narrow)
            }
            (Store, 0) if fits_narrow => self.truncate_uses(inst, mi, type_idx, narrow),
            (Ptrtoint | Ctlz | CtlzZeroUndef | Cttz | CttzZeroUndef | Ctpop, 0) => {
                self.narrow_def(inst, mi, narrow, Zext)
            }
            (Load, 0) if fits_narrow => self.narrow_def(inst, mi, narrow, Anyext),
            (Sextload, 0) if fits_narrow => self.narrow_def(inst, mi, narrow, Sext),
            (Zextload, 0) if fits_narrow => self.narrow_def(inst, mi, narrow, Zext),
            (Anyext | Sext | Zext, 0) => self.narrow_extension(inst, mi, wide, narrow),
            _ => self.narrow_by_parts(inst, mi, type_idx, wide, narrow),
        }
    }

    fn truncate_uses(
        &mut self,
        inst: InstId,
        mut mi: MachineInst,
        type_idx: usize,
        narrow: LowLevelType,
    ) -> LegalizerResult<Rewrite> {
        self.b.set_insert_point(InsertPoint::Before(inst));
        for op in mi.operands_of_type_index(type_idx) {
            if let OperandRef::Use(i) = op {
                mi.uses[i] = self.b.build_unop(Opcode::Trunc, narrow, mi.uses[i]);
            }
        }
        self.store_back(inst, mi);
        Ok(Rewrite::InPlace)
    }

    /// Compute the def at `narrow`, then extend into the original value.
    fn narrow_def(
        &mut self,
        inst: InstId,
        mut mi: MachineInst,
        narrow: LowLevelType,
        ext: Opcode,
    ) -> LegalizerResult<Rewrite> {
        self.b.set_insert_point(InsertPoint::After(inst));
        let def = mi.defs[0];
        let narrow_def = self.b.new_value(narrow);
        self.b.build_into(ext, def, vec![narrow_def], Vec::new());
        mi.defs[0] = narrow_def;
        self.store_back(inst, mi);
        Ok(Rewrite::InPlace)
    }

    /// Extension into a multiple of `narrow`: low part extended, high parts
    /// filled with sign bits, zeros or undefined bits.
    fn narrow_extension(
        &mut self,
        inst: InstId,
        mi: MachineInst,
        wide: LowLevelType,
        narrow: LowLevelType,
    ) -> LegalizerResult<Rewrite> {
        let fail = |reason: &str| unable(mi.opcode, ActionKind::NarrowScalar, reason);
        let src = mi.uses[0];
        let src_ty = self.b.value_type(src);
        if !src_ty.is_scalar() || src_ty.size_in_bits() > narrow.size_in_bits() {
            return Err(fail("source is wider than the part type"));
        }
        if wide.size_in_bits() % narrow.size_in_bits() != 0 {
            return Err(fail("result is not a multiple of the part type"));
        }
        let num_parts = wide.size_in_bits() / narrow.size_in_bits();

        self.b.set_insert_point(InsertPoint::Before(inst));
        let lo = if src_ty == narrow { src } else { self.b.build_unop(mi.opcode, narrow, src) };
        let hi = match mi.opcode {
            Opcode::Sext => {
                let amount = self.b.build_constant(narrow, i64::from(narrow.size_in_bits() - 1));
                self.b.build_binop(Opcode::Ashr, narrow, lo, amount)
            }
            Opcode::Zext => self.b.build_constant(narrow, 0),
            _ => self.b.build_undef(narrow),
        };
        let mut parts = vec![lo];
        parts.extend(std::iter::repeat(hi).take(num_parts as usize - 1));
        self.b.build_into(Opcode::MergeValues, mi.defs[0], parts, Vec::new());
        Ok(self.erase(inst))
    }

    fn narrow_by_parts(
        &mut self,
        inst: InstId,
        mi: MachineInst,
        type_idx: usize,
        wide: LowLevelType,
        narrow: LowLevelType,
    ) -> LegalizerResult<Rewrite> {
        use Opcode::*;
        let fail = |reason: &str| unable(mi.opcode, ActionKind::NarrowScalar, reason);
        let part_bits = narrow.size_in_bits();
        if wide.size_in_bits() % part_bits != 0 {
            return Err(fail("type is not a multiple of the part type"));
        }
        let num_parts = wide.size_in_bits() / part_bits;
        let full_width_mem = mi.mem.first().is_some_and(|m| m.size_in_bits == wide.size_in_bits());

        self.b.set_insert_point(InsertPoint::Before(inst));
        match mi.opcode {
            And | Or | Xor => {
                let lhs = self.b.build_unmerge(narrow, mi.uses[0], num_parts);
                let rhs = self.b.build_unmerge(narrow, mi.uses[1], num_parts);
                let parts = lhs
                    .into_iter()
                    .zip(rhs)
                    .map(|(l, r)| self.b.build_binop(mi.opcode, narrow, l, r))
                    .collect();
                self.b.build_into(MergeValues, mi.defs[0], parts, Vec::new());
            }
            ImplicitDef => {
                let parts = (0..num_parts).map(|_| self.b.build_undef(narrow)).collect();
                self.b.build_into(MergeValues, mi.defs[0], parts, Vec::new());
            }
            Constant => {
                let imm = mi.imms.first().copied().ok_or_else(|| fail("constant without a value"))?;
                let parts = (0..num_parts)
                    .map(|i| self.b.build_constant(narrow, constant_part(imm, i, part_bits)))
                    .collect();
                self.b.build_into(MergeValues, mi.defs[0], parts, Vec::new());
            }
            Select if type_idx == 0 => {
                let cond = mi.uses[0];
                let t = self.b.build_unmerge(narrow, mi.uses[1], num_parts);
                let f = self.b.build_unmerge(narrow, mi.uses[2], num_parts);
                let parts = t
                    .into_iter()
                    .zip(f)
                    .map(|(t, f)| self.b.build_select(narrow, cond, t, f))
                    .collect();
                self.b.build_into(MergeValues, mi.defs[0], parts, Vec::new());
            }
            Add | Sub => {
                let (first, chained) = if mi.opcode == Add { (Uaddo, Uadde) } else { (Usubo, Usube) };
                let carry_ty = LowLevelType::scalar(1);
                let lhs = self.b.build_unmerge(narrow, mi.uses[0], num_parts);
                let rhs = self.b.build_unmerge(narrow, mi.uses[1], num_parts);
                let mut parts = Vec::with_capacity(num_parts as usize);
                let mut carry = None;
                for (l, r) in lhs.into_iter().zip(rhs) {
                    let op = if carry.is_none() { first } else { chained };
                    let (res, carry_out) = self.b.build_carry_op(op, narrow, carry_ty, l, r, carry);
                    parts.push(res);
                    carry = Some(carry_out);
                }
                self.b.build_into(MergeValues, mi.defs[0], parts, Vec::new());
            }
            Load if type_idx == 0 && full_width_mem && part_bits % 8 == 0 => {
                let align = mi.mem[0].align_in_bits;
                let mut parts = Vec::with_capacity(num_parts as usize);
                for i in 0..num_parts {
                    let offset = i * part_bits;
                    let addr = self.piece_address(mi.uses[0], offset / 8);
                    let mem = MemDesc::new(part_bits, piece_align(align, offset));
                    parts.push(self.b.build_load(Load, narrow, addr, mem));
                }
                self.b.build_into(MergeValues, mi.defs[0], parts, Vec::new());
            }
            Store if type_idx == 0 && full_width_mem && part_bits % 8 == 0 => {
                let align = mi.mem[0].align_in_bits;
                let parts = self.b.build_unmerge(narrow, mi.uses[0], num_parts);
                for (i, part) in (0..num_parts).zip(parts) {
                    let offset = i * part_bits;
                    let addr = self.piece_address(mi.uses[1], offset / 8);
                    self.b.build_store(part, addr, MemDesc::new(part_bits, piece_align(align, offset)));
                }
            }
            _ => return Err(fail("no way to split this operation into parts")),
        }
        Ok(self.erase(inst))
    }

    // Vector element count changes.

    /// Pad the vector of `type_idx` to `wide` with undefined lanes.
    pub fn more_elements(&mut self, inst: InstId, type_idx: usize, wide: LowLevelType) -> LegalizerResult<Rewrite> {
        use Opcode::*;
        let Some(mi) = self.fetch(inst) else {
            return Ok(Rewrite::Replaced);
        };
        let opcode = mi.opcode;
        let fail = |reason: &str| unable(opcode, ActionKind::MoreElements, reason);

        let old = self.slot_type(&mi, type_idx).ok_or_else(|| fail("type index has no operand"))?;
        if !old.is_vector()
            || !wide.is_vector()
            || old.scalar_type() != wide.scalar_type()
            || wide.num_elements() <= old.num_elements()
        {
            return Err(fail("new type is not a longer vector of the same element"));
        }

        let mut new_mi = mi.clone();
        if opcode == BuildVector && type_idx == 0 {
            self.b.set_insert_point(InsertPoint::Before(inst));
            for _ in old.num_elements()..wide.num_elements() {
                let pad = self.b.build_undef(old.scalar_type());
                new_mi.uses.push(pad);
            }
        } else {
            let supported = opcode.is_lane_wise()
                || matches!((opcode, type_idx), (Extract, 1) | (Insert, 0));
            if !supported {
                return Err(fail("operation is not lane-wise"));
            }
            let mismatched = mi.operands().any(|(op, v)| {
                let ty = self.b.value_type(v);
                opcode.type_index(op) != type_idx && ty.is_vector() && ty.num_elements() == old.num_elements()
            });
            if mismatched {
                return Err(fail("another operand has the same lanes"));
            }

            self.b.set_insert_point(InsertPoint::Before(inst));
            for op in mi.operands_of_type_index(type_idx) {
                if let OperandRef::Use(i) = op {
                    let undef = self.b.build_undef(wide);
                    new_mi.uses[i] = self.b.build_insert(undef, mi.uses[i], 0);
                }
            }
        }

        self.b.set_insert_point(InsertPoint::After(inst));
        for op in mi.operands_of_type_index(type_idx) {
            if let OperandRef::Def(i) = op {
                let wide_def = self.b.new_value(wide);
                self.b.build_into(Extract, mi.defs[i], vec![wide_def], vec![0]);
                new_mi.defs[i] = wide_def;
            }
        }

        self.store_back(inst, new_mi);
        Ok(Rewrite::InPlace)
    }

    /// Split the vector of `type_idx` into chunks of `narrow`'s element count.
    pub fn fewer_elements(
        &mut self,
        inst: InstId,
        kind: ActionKind,
        type_idx: usize,
        narrow: LowLevelType,
    ) -> LegalizerResult<Rewrite> {
        use Opcode::*;
        let Some(mi) = self.fetch(inst) else {
            return Ok(Rewrite::Replaced);
        };
        let opcode = mi.opcode;
        let fail = |reason: &str| unable(opcode, kind, reason);

        let old = self.slot_type(&mi, type_idx).ok_or_else(|| fail("type index has no operand"))?;
        if !old.is_vector()
            || old.scalar_type() != narrow.scalar_type()
            || narrow.num_elements() >= old.num_elements()
        {
            return Err(fail("new type is not a shorter vector of the same element"));
        }
        let lanes = old.num_elements();
        let chunk = narrow.num_elements();
        let chunks: Vec<(u32, u32)> = (0..lanes)
            .step_by(chunk as usize)
            .map(|start| (start, chunk.min(lanes - start)))
            .collect();
        let elem = old.scalar_type();
        let elem_bits = elem.size_in_bits();
        let full_width_mem = mi.mem.first().is_some_and(|m| m.size_in_bits == old.size_in_bits());

        self.b.set_insert_point(InsertPoint::Before(inst));
        match opcode {
            Load if type_idx == 0 && full_width_mem && elem_bits % 8 == 0 => {
                let align = mi.mem[0].align_in_bits;
                let mut pieces = Vec::with_capacity(chunks.len());
                for &(start, len) in &chunks {
                    let offset = start * elem_bits;
                    let addr = self.piece_address(mi.uses[0], offset / 8);
                    let ty = LowLevelType::scalar_or_vector(len, elem);
                    let mem = MemDesc::new(len * elem_bits, piece_align(align, offset));
                    pieces.push(self.b.build_load(Load, ty, addr, mem));
                }
                self.rebuild_vector(mi.defs[0], pieces);
            }
            Store if type_idx == 0 && full_width_mem && elem_bits % 8 == 0 => {
                let align = mi.mem[0].align_in_bits;
                let elems = self.b.build_unmerge(elem, mi.uses[0], lanes);
                for &(start, len) in &chunks {
                    let offset = start * elem_bits;
                    let piece = self.gather(&elems[start as usize..(start + len) as usize], elem);
                    let addr = self.piece_address(mi.uses[1], offset / 8);
                    self.b.build_store(piece, addr, MemDesc::new(len * elem_bits, piece_align(align, offset)));
                }
            }
            op if op.is_lane_wise() => {
                let mut split_uses = Vec::with_capacity(mi.uses.len());
                for &u in &mi.uses {
                    let ty = self.b.value_type(u);
                    if !ty.is_vector() {
                        split_uses.push(None);
                        continue;
                    }
                    if ty.num_elements() != lanes {
                        return Err(fail("operands have different lane counts"));
                    }
                    split_uses.push(Some((ty.scalar_type(), self.b.build_unmerge(ty.scalar_type(), u, lanes))));
                }
                let mut def_elems = Vec::with_capacity(mi.defs.len());
                for &d in &mi.defs {
                    let ty = self.b.value_type(d);
                    if ty.num_elements() != lanes {
                        return Err(fail("result does not have the split lane count"));
                    }
                    def_elems.push(ty.scalar_type());
                }

                let mut def_pieces: Vec<Vec<ValueId>> = vec![Vec::new(); mi.defs.len()];
                for &(start, len) in &chunks {
                    let range = start as usize..(start + len) as usize;
                    let uses = mi
                        .uses
                        .iter()
                        .zip(&split_uses)
                        .map(|(&u, split)| match split {
                            Some((elem, elems)) => self.gather(&elems[range.clone()], *elem),
                            None => u,
                        })
                        .collect();
                    let defs: Vec<ValueId> = def_elems
                        .iter()
                        .map(|&elem| self.b.new_value(LowLevelType::scalar_or_vector(len, elem)))
                        .collect();
                    for (pieces, &d) in def_pieces.iter_mut().zip(&defs) {
                        pieces.push(d);
                    }
                    self.b.insert(MachineInst::new(opcode, defs, uses).with_imms(mi.imms.clone()));
                }
                for (&def, pieces) in mi.defs.iter().zip(def_pieces) {
                    self.rebuild_vector(def, pieces);
                }
            }
            _ => return Err(fail("operation is not lane-wise")),
        }
        Ok(self.erase(inst))
    }

    /// A single element, or a vector built from `elems`.
    fn gather(&mut self, elems: &[ValueId], elem: LowLevelType) -> ValueId {
        match elems {
            [single] => *single,
            _ => {
                let ty = LowLevelType::vector_of(elems.len() as u32, elem);
                self.b.build_build_vector(ty, elems.to_vec())
            }
        }
    }

    /// Define `def` as the concatenation of `pieces`.
    fn rebuild_vector(&mut self, def: ValueId, pieces: Vec<ValueId>) {
        let mut elems = Vec::new();
        for piece in pieces {
            let ty = self.b.value_type(piece);
            if ty.is_vector() {
                elems.extend(self.b.build_unmerge(ty.scalar_type(), piece, ty.num_elements()));
            } else {
                elems.push(piece);
            }
        }
        self.b.build_into(Opcode::BuildVector, def, elems, Vec::new());
    }

    // Reinterpretation and lowering.

    /// Operate on `type_idx` as `new_type`, which has the same size.
    pub fn bitcast(&mut self, inst: InstId, type_idx: usize, new_type: LowLevelType) -> LegalizerResult<Rewrite> {
        let Some(mi) = self.fetch(inst) else {
            return Ok(Rewrite::Replaced);
        };
        let fail = |reason: &str| unable(mi.opcode, ActionKind::Bitcast, reason);
        let old = self.slot_type(&mi, type_idx).ok_or_else(|| fail("type index has no operand"))?;
        if old.size_in_bits() != new_type.size_in_bits() || old == new_type {
            return Err(fail("bitcast must keep the size and change the type"));
        }

        let operands = mi.operands_of_type_index(type_idx);
        let mut new_mi = mi.clone();
        self.b.set_insert_point(InsertPoint::Before(inst));
        for &op in &operands {
            if let OperandRef::Use(i) = op {
                new_mi.uses[i] = self.b.build_unop(Opcode::Bitcast, new_type, mi.uses[i]);
            }
        }
        self.b.set_insert_point(InsertPoint::After(inst));
        for &op in &operands {
            if let OperandRef::Def(i) = op {
                let cast_def = self.b.new_value(new_type);
                self.b.build_into(Opcode::Bitcast, mi.defs[i], vec![cast_def], Vec::new());
                new_mi.defs[i] = cast_def;
            }
        }
        self.store_back(inst, new_mi);
        Ok(Rewrite::InPlace)
    }

    /// Replace `inst` by an equivalent sequence of other generic operations.
    pub fn lower(&mut self, inst: InstId) -> LegalizerResult<Rewrite> {
        use Opcode::*;
        let Some(mi) = self.fetch(inst) else {
            return Ok(Rewrite::Replaced);
        };
        let fail = |reason: &str| unable(mi.opcode, ActionKind::Lower, reason);

        self.b.set_insert_point(InsertPoint::Before(inst));
        match mi.opcode {
            Fsub => {
                let rhs_ty = self.b.value_type(mi.uses[1]);
                let neg = self.b.build_unop(Fneg, rhs_ty, mi.uses[1]);
                self.b.build_into(Fadd, mi.defs[0], vec![mi.uses[0], neg], Vec::new());
            }
            Sextload | Zextload => {
                let mem = mi.mem.first().copied().ok_or_else(|| fail("load without a memory operand"))?;
                let dst = self.b.value_type(mi.defs[0]);
                if !dst.is_scalar() || mem.size_in_bits > dst.size_in_bits() {
                    return Err(fail("extending load needs a scalar result at least as wide as memory"));
                }
                if mem.size_in_bits == dst.size_in_bits() {
                    self.b.insert(
                        MachineInst::new(Load, vec![mi.defs[0]], vec![mi.uses[0]]).with_mem(vec![mem]),
                    );
                } else {
                    let loaded = self.b.build_load(Load, LowLevelType::scalar(mem.size_in_bits), mi.uses[0], mem);
                    let ext = if mi.opcode == Sextload { Sext } else { Zext };
                    self.b.build_into(ext, mi.defs[0], vec![loaded], Vec::new());
                }
            }
            Fpext => {
                let src_ty = self.b.value_type(mi.uses[0]);
                let dst_ty = self.b.value_type(mi.defs[0]);
                if src_ty != LowLevelType::scalar(16) || dst_ty != LowLevelType::scalar(64) {
                    return Err(fail("only half to double extensions are split"));
                }
                let single = self.b.build_unop(Fpext, LowLevelType::scalar(32), mi.uses[0]);
                self.b.build_into(Fpext, mi.defs[0], vec![single], Vec::new());
            }
            _ => return Err(fail("no lowering for this operation")),
        }
        Ok(self.erase(inst))
    }
}

/// Bits `[index * part_bits, (index + 1) * part_bits)` of a sign-extended constant.
/// Immediate with every bit from `width` upward set, when it fits an i64.
fn guard_bits(width: u32) -> Option<i64> {
    (width < 64).then(|| -1i64 << width)
}

fn constant_part(imm: i64, index: u32, part_bits: u32) -> i64 {
    let shift = (index * part_bits).min(127);
    let bits = i128::from(imm) >> shift;
    if part_bits >= 64 {
        bits as i64
    } else {
        (bits & ((1i128 << part_bits) - 1)) as i64
    }
}

/// Alignment of a piece `offset_bits` into an access aligned to `align_bits`.
fn piece_align(align_bits: u32, offset_bits: u32) -> u32 {
    if offset_bits == 0 {
        align_bits
    } else {
        align_bits.min(1 << offset_bits.trailing_zeros())
    }
}
