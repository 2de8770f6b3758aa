// This module defines the opcode vocabulary of generic machine IR. Generic opcodes are
// target independent operations (G_ADD, G_LOAD, G_ADDRSPACE_CAST, ...) whose operand
// types are still free; target opcodes are already selected machine instructions that
// the legalizer leaves alone. Every generic opcode has an operand layout describing how
// its def and use operands map onto type indices, which is what turns an instruction
// into a TypeQuery: a G_ADD has a single type index shared by all operands, a G_ICMP
// has the result type and the compared type, a G_INSERT_VECTOR_ELT has three. The
// integer compare predicate encoding used by G_ICMP lives here as well.

//! Generic and target opcodes.

use std::fmt;

/// Which operand a type index is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandRef {
    Def(usize),
    Use(usize),
}

/// How the operands of an opcode map onto type indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandLayout {
    /// All operands share type index 0.
    Uniform,
    /// Defs use index 0, uses index 1.
    DefsUses,
    /// Defs and the first use use index 0, remaining uses index 1.
    FirstUseSame,
    /// Overflow arithmetic: value (0) and carry (1).
    Carry,
    /// Condition is index 1, everything else index 0.
    Select,
    /// Stored value is index 0, address index 1.
    Store,
    /// Address is index 1, values index 0.
    Atomic,
    /// Vector (0), element (1), index (2).
    InsertElt,
    /// Element (0), vector (1), index (2).
    ExtractElt,
    /// No type indices; already selected.
    Opaque,
}

impl OperandLayout {
    pub const fn num_type_indices(self) -> usize {
        match self {
            OperandLayout::Opaque => 0,
            OperandLayout::Uniform => 1,
            OperandLayout::InsertElt | OperandLayout::ExtractElt => 3,
            _ => 2,
        }
    }

    /// Type index of the given operand.
    pub const fn type_index(self, operand: OperandRef) -> usize {
        use OperandLayout::*;
        use OperandRef::*;
        match (self, operand) {
            (Opaque, _) | (Uniform, _) => 0,
            (DefsUses, Def(_)) => 0,
            (DefsUses, Use(_)) => 1,
            (FirstUseSame, Def(_)) | (FirstUseSame, Use(0)) => 0,
            (FirstUseSame, Use(_)) => 1,
            (Carry, Def(i)) => if i == 0 { 0 } else { 1 },
            (Carry, Use(i)) => if i < 2 { 0 } else { 1 },
            (Select, Use(0)) => 1,
            (Select, _) => 0,
            (Store, Use(i)) => if i == 0 { 0 } else { 1 },
            (Store, Def(_)) => 0,
            (Atomic, Use(0)) => 1,
            (Atomic, _) => 0,
            (InsertElt, Def(_)) | (InsertElt, Use(0)) => 0,
            (InsertElt, Use(i)) => if i == 1 { 1 } else { 2 },
            (ExtractElt, Def(_)) => 0,
            (ExtractElt, Use(i)) => if i == 0 { 1 } else { 2 },
        }
    }
}

/// An already selected machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetOpcode {
    pub id: u16,
    pub name: &'static str,
}

macro_rules! generic_opcodes {
    ($($variant:ident => $name:literal, $layout:ident;)*) => {
        /// Opcode of a machine instruction.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opcode {
            $($variant,)*
            Target(TargetOpcode),
        }

        impl Opcode {
            /// Every generic opcode, in declaration order.
            pub const GENERIC: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub const fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                    Opcode::Target(t) => t.name,
                }
            }

            pub const fn layout(self) -> OperandLayout {
                match self {
                    $(Opcode::$variant => OperandLayout::$layout,)*
                    Opcode::Target(_) => OperandLayout::Opaque,
                }
            }

            /// Look up a generic opcode by its printed name.
            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

generic_opcodes! {
    Add => "G_ADD", Uniform;
    Sub => "G_SUB", Uniform;
    Mul => "G_MUL", Uniform;
    Umulh => "G_UMULH", Uniform;
    Smulh => "G_SMULH", Uniform;
    And => "G_AND", Uniform;
    Or => "G_OR", Uniform;
    Xor => "G_XOR", Uniform;
    Uaddo => "G_UADDO", Carry;
    Saddo => "G_SADDO", Carry;
    Usubo => "G_USUBO", Carry;
    Ssubo => "G_SSUBO", Carry;
    Uadde => "G_UADDE", Carry;
    Sadde => "G_SADDE", Carry;
    Usube => "G_USUBE", Carry;
    Ssube => "G_SSUBE", Carry;
    Bitcast => "G_BITCAST", DefsUses;
    Constant => "G_CONSTANT", Uniform;
    Fconstant => "G_FCONSTANT", Uniform;
    ImplicitDef => "G_IMPLICIT_DEF", Uniform;
    FrameIndex => "G_FRAME_INDEX", Uniform;
    BlockAddr => "G_BLOCK_ADDR", Uniform;
    Brcond => "G_BRCOND", Uniform;
    Fadd => "G_FADD", Uniform;
    Fsub => "G_FSUB", Uniform;
    Fmul => "G_FMUL", Uniform;
    Fma => "G_FMA", Uniform;
    Fneg => "G_FNEG", Uniform;
    Fabs => "G_FABS", Uniform;
    Fcanonicalize => "G_FCANONICALIZE", Uniform;
    Fsqrt => "G_FSQRT", Uniform;
    Fpow => "G_FPOW", Uniform;
    Fexp => "G_FEXP", Uniform;
    Fexp2 => "G_FEXP2", Uniform;
    Flog => "G_FLOG", Uniform;
    Flog2 => "G_FLOG2", Uniform;
    Flog10 => "G_FLOG10", Uniform;
    IntrinsicTrunc => "G_INTRINSIC_TRUNC", Uniform;
    IntrinsicRound => "G_INTRINSIC_ROUND", Uniform;
    Bswap => "G_BSWAP", Uniform;
    Fptrunc => "G_FPTRUNC", DefsUses;
    Fpext => "G_FPEXT", DefsUses;
    Sext => "G_SEXT", DefsUses;
    Zext => "G_ZEXT", DefsUses;
    Anyext => "G_ANYEXT", DefsUses;
    Trunc => "G_TRUNC", DefsUses;
    Sitofp => "G_SITOFP", DefsUses;
    Uitofp => "G_UITOFP", DefsUses;
    Fptosi => "G_FPTOSI", DefsUses;
    Fptoui => "G_FPTOUI", DefsUses;
    Gep => "G_GEP", FirstUseSame;
    Icmp => "G_ICMP", DefsUses;
    Fcmp => "G_FCMP", DefsUses;
    Ctlz => "G_CTLZ", DefsUses;
    CtlzZeroUndef => "G_CTLZ_ZERO_UNDEF", DefsUses;
    Cttz => "G_CTTZ", DefsUses;
    CttzZeroUndef => "G_CTTZ_ZERO_UNDEF", DefsUses;
    Ctpop => "G_CTPOP", DefsUses;
    Inttoptr => "G_INTTOPTR", DefsUses;
    Ptrtoint => "G_PTRTOINT", DefsUses;
    AddrspaceCast => "G_ADDRSPACE_CAST", DefsUses;
    Load => "G_LOAD", DefsUses;
    Sextload => "G_SEXTLOAD", DefsUses;
    Zextload => "G_ZEXTLOAD", DefsUses;
    Store => "G_STORE", Store;
    AtomicrmwXchg => "G_ATOMICRMW_XCHG", Atomic;
    AtomicrmwAdd => "G_ATOMICRMW_ADD", Atomic;
    AtomicrmwSub => "G_ATOMICRMW_SUB", Atomic;
    AtomicrmwAnd => "G_ATOMICRMW_AND", Atomic;
    AtomicrmwOr => "G_ATOMICRMW_OR", Atomic;
    AtomicrmwXor => "G_ATOMICRMW_XOR", Atomic;
    AtomicrmwMax => "G_ATOMICRMW_MAX", Atomic;
    AtomicrmwMin => "G_ATOMICRMW_MIN", Atomic;
    AtomicrmwUmax => "G_ATOMICRMW_UMAX", Atomic;
    AtomicrmwUmin => "G_ATOMICRMW_UMIN", Atomic;
    AtomicCmpxchg => "G_ATOMIC_CMPXCHG", Atomic;
    Select => "G_SELECT", Select;
    Shl => "G_SHL", FirstUseSame;
    Lshr => "G_LSHR", FirstUseSame;
    Ashr => "G_ASHR", FirstUseSame;
    ExtractVectorElt => "G_EXTRACT_VECTOR_ELT", ExtractElt;
    InsertVectorElt => "G_INSERT_VECTOR_ELT", InsertElt;
    Extract => "G_EXTRACT", DefsUses;
    Insert => "G_INSERT", FirstUseSame;
    BuildVector => "G_BUILD_VECTOR", DefsUses;
    ConcatVectors => "G_CONCAT_VECTORS", DefsUses;
    MergeValues => "G_MERGE_VALUES", DefsUses;
    UnmergeValues => "G_UNMERGE_VALUES", DefsUses;
}

impl Opcode {
    pub const fn is_generic(self) -> bool {
        !matches!(self, Opcode::Target(_))
    }

    pub const fn num_type_indices(self) -> usize {
        self.layout().num_type_indices()
    }

    pub const fn type_index(self, operand: OperandRef) -> usize {
        self.layout().type_index(operand)
    }

    /// Fewest defs and uses a well-formed instance has.
    pub const fn min_operands(self) -> (usize, usize) {
        use Opcode::*;
        match self {
            Target(_) => (0, 0),
            Constant | Fconstant | ImplicitDef | FrameIndex | BlockAddr => (1, 0),
            Brcond => (0, 1),
            Store => (0, 2),
            Uaddo | Saddo | Usubo | Ssubo => (2, 2),
            Uadde | Sadde | Usube | Ssube => (2, 3),
            Fma | Select | InsertVectorElt | AtomicCmpxchg => (1, 3),
            Add | Sub | Mul | Umulh | Smulh | And | Or | Xor | Fadd | Fsub | Fmul | Fpow | Gep | Shl
            | Lshr | Ashr | Icmp | Fcmp | ExtractVectorElt | Insert | AtomicrmwXchg | AtomicrmwAdd
            | AtomicrmwSub | AtomicrmwAnd | AtomicrmwOr | AtomicrmwXor | AtomicrmwMax | AtomicrmwMin
            | AtomicrmwUmax | AtomicrmwUmin => (1, 2),
            _ => (1, 1),
        }
    }

    /// Opcodes that carry memory operand descriptors.
    pub const fn is_memory(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Load | Sextload | Zextload | Store | AtomicrmwXchg | AtomicrmwAdd | AtomicrmwSub
                | AtomicrmwAnd | AtomicrmwOr | AtomicrmwXor | AtomicrmwMax | AtomicrmwMin
                | AtomicrmwUmax | AtomicrmwUmin | AtomicCmpxchg
        )
    }

    /// Floating point opcodes, whose values change width through fpext/fptrunc.
    pub const fn is_floating_point(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Fconstant | Fadd | Fsub | Fmul | Fma | Fneg | Fabs | Fcanonicalize | Fsqrt | Fpow
                | Fexp | Fexp2 | Flog | Flog2 | Flog10 | IntrinsicTrunc | IntrinsicRound
        )
    }

    /// Opcodes that compute every vector lane independently from the same lane of
    /// their operands, so a vector instance can be split into narrower pieces.
    pub const fn is_lane_wise(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Add | Sub | Mul | Umulh | Smulh | And | Or | Xor | Fadd | Fsub | Fmul | Fma | Fneg
                | Fabs | Fcanonicalize | Fsqrt | Fpow | Fexp | Fexp2 | Flog | Flog2 | Flog10
                | IntrinsicTrunc | IntrinsicRound | Bswap | Fptrunc | Fpext | Sext | Zext
                | Anyext | Trunc | Sitofp | Uitofp | Fptosi | Fptoui | Icmp | Fcmp | Ctlz
                | CtlzZeroUndef | Cttz | CttzZeroUndef | Ctpop | Inttoptr | Ptrtoint
                | AddrspaceCast | Select | Shl | Lshr | Ashr | Gep | ImplicitDef
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer comparison predicate carried as the immediate of `G_ICMP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq = 32,
    Ne = 33,
    Ugt = 34,
    Uge = 35,
    Ult = 36,
    Ule = 37,
    Sgt = 38,
    Sge = 39,
    Slt = 40,
    Sle = 41,
}

impl IntPredicate {
    pub fn from_code(code: i64) -> Option<Self> {
        use IntPredicate::*;
        Some(match code {
            32 => Eq,
            33 => Ne,
            34 => Ugt,
            35 => Uge,
            36 => Ult,
            37 => Ule,
            38 => Sgt,
            39 => Sge,
            40 => Slt,
            41 => Sle,
            _ => return None,
        })
    }

    pub const fn code(self) -> i64 {
        self as i64
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, IntPredicate::Sgt | IntPredicate::Sge | IntPredicate::Slt | IntPredicate::Sle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_indices() {
        assert_eq!(Opcode::Add.num_type_indices(), 1);
        assert_eq!(Opcode::Icmp.type_index(OperandRef::Def(0)), 0);
        assert_eq!(Opcode::Icmp.type_index(OperandRef::Use(1)), 1);
        assert_eq!(Opcode::Uadde.type_index(OperandRef::Def(1)), 1);
        assert_eq!(Opcode::Uadde.type_index(OperandRef::Use(1)), 0);
        assert_eq!(Opcode::Uadde.type_index(OperandRef::Use(2)), 1);
        assert_eq!(Opcode::Select.type_index(OperandRef::Use(0)), 1);
        assert_eq!(Opcode::Select.type_index(OperandRef::Use(2)), 0);
        assert_eq!(Opcode::Store.type_index(OperandRef::Use(1)), 1);
        assert_eq!(Opcode::InsertVectorElt.type_index(OperandRef::Use(2)), 2);
        assert_eq!(Opcode::ExtractVectorElt.type_index(OperandRef::Use(0)), 1);
        assert_eq!(Opcode::Shl.type_index(OperandRef::Use(1)), 1);
    }

    #[test]
    fn test_names_round_trip() {
        for &op in Opcode::GENERIC {
            assert_eq!(Opcode::from_name(op.name()), Some(op));
        }
        assert_eq!(Opcode::from_name("S_GETREG_B32"), None);
    }

    #[test]
    fn test_min_operands_cover_every_type_index() {
        for &op in Opcode::GENERIC {
            let (defs, uses) = op.min_operands();
            let mut covered = vec![false; op.num_type_indices()];
            let operands = (0..defs).map(OperandRef::Def).chain((0..uses).map(OperandRef::Use));
            for operand in operands {
                covered[op.type_index(operand)] = true;
            }
            assert!(covered.iter().all(|&c| c), "{op}");
        }
        assert_eq!(Opcode::Uadde.min_operands(), (2, 3));
        assert_eq!(Opcode::Store.min_operands(), (0, 2));
    }

    #[test]
    fn test_target_opcode_is_opaque() {
        let op = Opcode::Target(TargetOpcode { id: 1, name: "S_NOP" });
        assert!(!op.is_generic());
        assert_eq!(op.num_type_indices(), 0);
        assert_eq!(op.to_string(), "S_NOP");
    }
}
