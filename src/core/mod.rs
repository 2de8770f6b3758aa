// This module serves as the central hub for the legalizer's core infrastructure: the
// representation of generic machine IR and everything the rule engine consumes from
// the surrounding code generator. It exports the low-level type system (scalars,
// pointers and vectors), the opcode vocabulary with its operand-to-type-index layouts,
// type queries, the machine function container and its instruction builder, the
// target capability trait, the error type shared by all legalizer components, and
// arena-based session management with legalization statistics. Nothing in here knows
// about rules or actions; those live in crate::legalizer.

//! Core legalizer infrastructure.
//!
//! # Key Components
//!
//! ## Types (`types`, `query`)
//! - `LowLevelType`: scalar, pointer or vector shape of a value
//! - `TypeQuery`: one type per type index plus memory descriptors
//!
//! ## Machine IR (`opcode`, `function`, `builder`)
//! - Generic opcodes and their operand layouts
//! - `MachineFunction` with value type bookkeeping
//! - `MachineIrBuilder` for emitting replacement sequences
//!
//! ## Session Management (`session`)
//! - Arena-based string interning using `bumpalo`
//! - Per-opcode and per-action statistics

pub mod builder;
pub mod error;
pub mod function;
pub mod opcode;
pub mod query;
pub mod session;
pub mod target;
pub mod test_utils;
pub mod types;

pub use builder::{InsertPoint, MachineIrBuilder};
pub use error::{LegalizerError, LegalizerResult};
pub use function::{InstId, MachineFunction, MachineInst, ValueId};
pub use opcode::{IntPredicate, Opcode, OperandLayout, OperandRef, TargetOpcode};
pub use query::{MemDesc, TypeQuery};
pub use session::{LegalizerSession, LegalizerStats};
pub use target::TargetCapabilities;
pub use types::{ElementType, LowLevelType};
