// This module implements MachineFunction, the per-function container of generic machine
// IR that the legalizer rewrites. It owns two pieces of state: the register/type
// bookkeeping (every virtual value has a LowLevelType and an optional printable name,
// new values can be allocated on demand) and the instruction list (instructions live in
// a slot vector indexed by InstId, while a separate order vector records program order
// so instructions can be inserted before or after any existing instruction and erased
// without invalidating other ids). Function arguments and live-in registers are plain
// values defined outside the instruction list. The Display implementation prints the
// MIR text format understood by crate::mir::parser.

//! Machine functions: instruction container and value type bookkeeping.

use std::fmt;

use super::opcode::Opcode;
use super::query::{MemDesc, TypeQuery};
use super::opcode::OperandRef;
use super::types::LowLevelType;

/// Handle of a virtual value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of an instruction. Stays valid (but dead) after erasure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A machine instruction.
///
/// Value operands are split into defs and uses; immediates (constants,
/// compare predicates, bit offsets, target encodings) and memory operands are
/// kept separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInst {
    pub opcode: Opcode,
    pub defs: Vec<ValueId>,
    pub uses: Vec<ValueId>,
    pub imms: Vec<i64>,
    pub mem: Vec<MemDesc>,
}

impl MachineInst {
    pub fn new(opcode: Opcode, defs: Vec<ValueId>, uses: Vec<ValueId>) -> Self {
        Self { opcode, defs, uses, imms: Vec::new(), mem: Vec::new() }
    }

    pub fn with_imms(mut self, imms: Vec<i64>) -> Self {
        self.imms = imms;
        self
    }

    pub fn with_mem(mut self, mem: Vec<MemDesc>) -> Self {
        self.mem = mem;
        self
    }

    /// All value operands with their position, defs first.
    pub fn operands(&self) -> impl Iterator<Item = (OperandRef, ValueId)> + '_ {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, v)| (OperandRef::Def(i), *v))
            .chain(self.uses.iter().enumerate().map(|(i, v)| (OperandRef::Use(i), *v)))
    }

    /// Operand positions whose type index is `type_idx`.
    pub fn operands_of_type_index(&self, type_idx: usize) -> Vec<OperandRef> {
        self.operands()
            .filter(|(op, _)| self.opcode.type_index(*op) == type_idx)
            .map(|(op, _)| op)
            .collect()
    }
}

#[derive(Debug, Clone)]
struct ValueInfo {
    ty: LowLevelType,
    name: Option<String>,
}

/// Generic machine IR of one function.
#[derive(Debug, Clone)]
pub struct MachineFunction {
    name: String,
    values: Vec<ValueInfo>,
    args: Vec<ValueId>,
    live_ins: Vec<(String, ValueId)>,
    insts: Vec<Option<MachineInst>>,
    order: Vec<InstId>,
}

impl MachineFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            args: Vec::new(),
            live_ins: Vec::new(),
            insts: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allocate a fresh value of the given type.
    pub fn new_value(&mut self, ty: LowLevelType) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo { ty, name: None });
        id
    }

    pub fn new_named_value(&mut self, ty: LowLevelType, name: impl Into<String>) -> ValueId {
        let id = self.new_value(ty);
        self.values[id.index()].name = Some(name.into());
        id
    }

    /// Add a function argument.
    pub fn add_arg(&mut self, ty: LowLevelType, name: impl Into<String>) -> ValueId {
        let id = self.new_named_value(ty, name);
        self.args.push(id);
        id
    }

    /// Add a function argument printed by its index.
    pub fn add_unnamed_arg(&mut self, ty: LowLevelType) -> ValueId {
        let id = self.new_value(ty);
        self.args.push(id);
        id
    }

    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    /// Value holding a preloaded live-in register, created on first request.
    pub fn live_in(&mut self, name: &str, ty: LowLevelType) -> ValueId {
        if let Some((_, id)) = self.live_ins.iter().find(|(n, _)| n == name) {
            return *id;
        }
        let id = self.new_named_value(ty, name);
        self.live_ins.push((name.to_string(), id));
        id
    }

    pub fn live_ins(&self) -> &[(String, ValueId)] {
        &self.live_ins
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn value_type(&self, value: ValueId) -> LowLevelType {
        self.values[value.index()].ty
    }

    pub fn set_value_type(&mut self, value: ValueId, ty: LowLevelType) {
        self.values[value.index()].ty = ty;
    }

    pub fn value_name(&self, value: ValueId) -> Option<&str> {
        self.values[value.index()].name.as_deref()
    }

    /// Look a value up by its printable name.
    pub fn find_value(&self, name: &str) -> Option<ValueId> {
        self.values
            .iter()
            .position(|v| v.name.as_deref() == Some(name))
            .map(|i| ValueId(i as u32))
    }

    pub fn inst(&self, id: InstId) -> Option<&MachineInst> {
        self.insts.get(id.index()).and_then(|i| i.as_ref())
    }

    pub fn inst_mut(&mut self, id: InstId) -> Option<&mut MachineInst> {
        self.insts.get_mut(id.index()).and_then(|i| i.as_mut())
    }

    /// Append an instruction at the end of the function.
    pub fn append(&mut self, inst: MachineInst) -> InstId {
        let id = self.alloc_inst(inst);
        self.order.push(id);
        id
    }

    /// Insert an instruction immediately before `pos`.
    pub fn insert_before(&mut self, pos: InstId, inst: MachineInst) -> InstId {
        let at = self.position(pos).unwrap_or(self.order.len());
        let id = self.alloc_inst(inst);
        self.order.insert(at, id);
        id
    }

    /// Insert an instruction immediately after `pos`.
    pub fn insert_after(&mut self, pos: InstId, inst: MachineInst) -> InstId {
        let at = self.position(pos).map_or(self.order.len(), |p| p + 1);
        let id = self.alloc_inst(inst);
        self.order.insert(at, id);
        id
    }

    /// Remove an instruction from the function.
    pub fn erase(&mut self, id: InstId) -> Option<MachineInst> {
        let at = self.position(id)?;
        self.order.remove(at);
        self.insts[id.index()].take()
    }

    /// Index of `id` in program order.
    pub fn position(&self, id: InstId) -> Option<usize> {
        self.order.iter().position(|&i| i == id)
    }

    /// Live instruction ids in program order.
    pub fn inst_ids(&self) -> Vec<InstId> {
        self.order.clone()
    }

    /// Live instructions in program order.
    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &MachineInst)> + '_ {
        self.order
            .iter()
            .filter_map(move |&id| self.inst(id).map(|inst| (id, inst)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Build the type query of an instruction from the current operand types.
    ///
    /// Each type index takes the type of the first operand mapped to it.
    pub fn type_query(&self, id: InstId) -> Option<TypeQuery> {
        let inst = self.inst(id)?;
        let arity = inst.opcode.num_type_indices();
        let mut types: Vec<Option<LowLevelType>> = vec![None; arity];
        for (op, value) in inst.operands() {
            let idx = inst.opcode.type_index(op);
            if idx < arity && types[idx].is_none() {
                types[idx] = Some(self.value_type(value));
            }
        }
        let types = types.into_iter().collect::<Option<Vec<_>>>()?;
        Some(TypeQuery::with_mem(types, inst.mem.clone()))
    }

    fn alloc_inst(&mut self, inst: MachineInst) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(Some(inst));
        id
    }

    /// Printable name of a value: its own name, or its index.
    pub fn display_value(&self, value: ValueId) -> String {
        match self.value_name(value) {
            Some(name) => format!("%{name}"),
            None => format!("%{}", value.0),
        }
    }

    fn fmt_typed_values(&self, f: &mut fmt::Formatter<'_>, values: &[ValueId]) -> fmt::Result {
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", self.display_value(*v), self.value_type(*v))?;
        }
        Ok(())
    }
}

impl fmt::Display for MachineFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        self.fmt_typed_values(f, &self.args)?;
        f.write_str(")")?;
        if !self.live_ins.is_empty() {
            f.write_str(" liveins(")?;
            let ids: Vec<ValueId> = self.live_ins.iter().map(|(_, id)| *id).collect();
            self.fmt_typed_values(f, &ids)?;
            f.write_str(")")?;
        }
        f.write_str(" {\n")?;
        for (_, inst) in self.instructions() {
            f.write_str("  ")?;
            if !inst.defs.is_empty() {
                self.fmt_typed_values(f, &inst.defs)?;
                f.write_str(" = ")?;
            }
            f.write_str(inst.opcode.name())?;
            let mut first = true;
            let operands = inst
                .uses
                .iter()
                .map(|v| self.display_value(*v))
                .chain(inst.imms.iter().map(|imm| imm.to_string()));
            for operand in operands {
                f.write_str(if first { " " } else { ", " })?;
                f.write_str(&operand)?;
                first = false;
            }
            if !inst.mem.is_empty() {
                f.write_str(" ::")?;
                for (i, mem) in inst.mem.iter().enumerate() {
                    f.write_str(if i == 0 { " " } else { ", " })?;
                    write!(f, "({}, {})", mem.size_in_bits, mem.align_in_bits)?;
                }
            }
            f.write_str("\n")?;
        }
        f.write_str("}\n")
    }
}
