// This module implements MachineIrBuilder, the instruction emission interface used by
// the lowering and custom legalization paths. A builder borrows a MachineFunction
// mutably and keeps an insertion point (before or after an existing instruction, or at
// the end of the function). Instructions emitted after an instruction are chained, so a
// sequence built at After(x) appears in emission order directly behind x. Every emitted
// instruction is recorded so the legalizer driver can push it onto its worklist, and
// instructions changed in place (for example a cast whose opcode was rewritten) can be
// reported through changing() so they are legalized again. The build_* helpers cover
// the generic opcodes the legalizer itself needs to synthesize.

//! Instruction emission for lowering and custom legalization.

use super::function::{InstId, MachineFunction, MachineInst, ValueId};
use super::opcode::{IntPredicate, Opcode, TargetOpcode};
use super::query::MemDesc;
use super::types::LowLevelType;

/// Where the builder places the next instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    Before(InstId),
    After(InstId),
    End,
}

/// Emits machine instructions into a function.
pub struct MachineIrBuilder<'f> {
    mf: &'f mut MachineFunction,
    point: InsertPoint,
    created: Vec<InstId>,
    changed: Vec<InstId>,
}

impl<'f> MachineIrBuilder<'f> {
    pub fn new(mf: &'f mut MachineFunction) -> Self {
        Self { mf, point: InsertPoint::End, created: Vec::new(), changed: Vec::new() }
    }

    /// Builder positioned immediately before `inst`.
    pub fn before(mf: &'f mut MachineFunction, inst: InstId) -> Self {
        let mut b = Self::new(mf);
        b.point = InsertPoint::Before(inst);
        b
    }

    pub fn set_insert_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    pub fn insert_point(&self) -> InsertPoint {
        self.point
    }

    pub fn mf(&self) -> &MachineFunction {
        self.mf
    }

    pub fn mf_mut(&mut self) -> &mut MachineFunction {
        self.mf
    }

    pub fn value_type(&self, value: ValueId) -> LowLevelType {
        self.mf.value_type(value)
    }

    pub fn new_value(&mut self, ty: LowLevelType) -> ValueId {
        self.mf.new_value(ty)
    }

    /// Insert `inst` at the insertion point.
    pub fn insert(&mut self, inst: MachineInst) -> InstId {
        let id = match self.point {
            InsertPoint::Before(pos) => self.mf.insert_before(pos, inst),
            InsertPoint::After(pos) => {
                let id = self.mf.insert_after(pos, inst);
                self.point = InsertPoint::After(id);
                id
            }
            InsertPoint::End => self.mf.append(inst),
        };
        self.created.push(id);
        id
    }

    /// Record that `inst` was modified in place and must be legalized again.
    pub fn changing(&mut self, inst: InstId) {
        if !self.changed.contains(&inst) {
            self.changed.push(inst);
        }
    }

    /// Instructions emitted so far, in emission order.
    pub fn created(&self) -> &[InstId] {
        &self.created
    }

    pub fn take_created(&mut self) -> Vec<InstId> {
        std::mem::take(&mut self.created)
    }

    pub fn take_changed(&mut self) -> Vec<InstId> {
        std::mem::take(&mut self.changed)
    }

    /// Emit an instruction defining an existing value.
    pub fn build_into(
        &mut self,
        opcode: Opcode,
        def: ValueId,
        uses: Vec<ValueId>,
        imms: Vec<i64>,
    ) -> InstId {
        self.insert(MachineInst::new(opcode, vec![def], uses).with_imms(imms))
    }

    /// Emit an instruction with a single fresh def of type `ty`.
    pub fn build(
        &mut self,
        opcode: Opcode,
        ty: LowLevelType,
        uses: Vec<ValueId>,
        imms: Vec<i64>,
    ) -> ValueId {
        let def = self.mf.new_value(ty);
        self.build_into(opcode, def, uses, imms);
        def
    }

    pub fn build_unop(&mut self, opcode: Opcode, ty: LowLevelType, src: ValueId) -> ValueId {
        self.build(opcode, ty, vec![src], Vec::new())
    }

    pub fn build_binop(
        &mut self,
        opcode: Opcode,
        ty: LowLevelType,
        lhs: ValueId,
        rhs: ValueId,
    ) -> ValueId {
        self.build(opcode, ty, vec![lhs, rhs], Vec::new())
    }

    pub fn build_constant(&mut self, ty: LowLevelType, value: i64) -> ValueId {
        self.build(Opcode::Constant, ty, Vec::new(), vec![value])
    }

    pub fn build_undef(&mut self, ty: LowLevelType) -> ValueId {
        self.build(Opcode::ImplicitDef, ty, Vec::new(), Vec::new())
    }

    pub fn build_icmp(
        &mut self,
        pred: IntPredicate,
        ty: LowLevelType,
        lhs: ValueId,
        rhs: ValueId,
    ) -> ValueId {
        self.build(Opcode::Icmp, ty, vec![lhs, rhs], vec![pred.code()])
    }

    pub fn build_select(
        &mut self,
        ty: LowLevelType,
        cond: ValueId,
        if_true: ValueId,
        if_false: ValueId,
    ) -> ValueId {
        self.build(Opcode::Select, ty, vec![cond, if_true, if_false], Vec::new())
    }

    /// Bits `[offset, offset + size(ty))` of `src`.
    pub fn build_extract(&mut self, ty: LowLevelType, src: ValueId, offset: u32) -> ValueId {
        self.build(Opcode::Extract, ty, vec![src], vec![i64::from(offset)])
    }

    /// `base` with the bits at `offset` replaced by `value`.
    pub fn build_insert(&mut self, base: ValueId, value: ValueId, offset: u32) -> ValueId {
        let ty = self.value_type(base);
        self.build(Opcode::Insert, ty, vec![base, value], vec![i64::from(offset)])
    }

    pub fn build_merge(&mut self, ty: LowLevelType, parts: Vec<ValueId>) -> ValueId {
        self.build(Opcode::MergeValues, ty, parts, Vec::new())
    }

    /// Split `src` into `count` pieces of type `part`, lowest bits first.
    pub fn build_unmerge(&mut self, part: LowLevelType, src: ValueId, count: u32) -> Vec<ValueId> {
        let defs: Vec<ValueId> = (0..count).map(|_| self.mf.new_value(part)).collect();
        self.insert(MachineInst::new(Opcode::UnmergeValues, defs.clone(), vec![src]));
        defs
    }

    pub fn build_build_vector(&mut self, ty: LowLevelType, elems: Vec<ValueId>) -> ValueId {
        self.build(Opcode::BuildVector, ty, elems, Vec::new())
    }

    pub fn build_gep(&mut self, base: ValueId, offset: ValueId) -> ValueId {
        let ty = self.value_type(base);
        self.build(Opcode::Gep, ty, vec![base, offset], Vec::new())
    }

    pub fn build_load(
        &mut self,
        opcode: Opcode,
        ty: LowLevelType,
        addr: ValueId,
        mem: MemDesc,
    ) -> ValueId {
        let def = self.mf.new_value(ty);
        self.insert(MachineInst::new(opcode, vec![def], vec![addr]).with_mem(vec![mem]));
        def
    }

    pub fn build_store(&mut self, value: ValueId, addr: ValueId, mem: MemDesc) -> InstId {
        self.insert(MachineInst::new(Opcode::Store, Vec::new(), vec![value, addr]).with_mem(vec![mem]))
    }

    /// Overflow arithmetic: returns the value and the carry out.
    pub fn build_carry_op(
        &mut self,
        opcode: Opcode,
        ty: LowLevelType,
        carry_ty: LowLevelType,
        lhs: ValueId,
        rhs: ValueId,
        carry_in: Option<ValueId>,
    ) -> (ValueId, ValueId) {
        let res = self.mf.new_value(ty);
        let carry = self.mf.new_value(carry_ty);
        let mut uses = vec![lhs, rhs];
        uses.extend(carry_in);
        self.insert(MachineInst::new(opcode, vec![res, carry], uses));
        (res, carry)
    }

    /// Emit an already selected target instruction with one def.
    pub fn build_target(
        &mut self,
        opcode: TargetOpcode,
        ty: LowLevelType,
        uses: Vec<ValueId>,
        imms: Vec<i64>,
    ) -> ValueId {
        self.build(Opcode::Target(opcode), ty, uses, imms)
    }
}
