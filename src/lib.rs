//! gisel-legalize - target-description-driven type legalization for generic machine IR.
//!
//! A target describes, per generic opcode, which operand type combinations it
//! can execute and what to do with all the others: widen or narrow scalars,
//! add or remove vector elements, reinterpret through a bitcast, lower to
//! other operations, or hand the instruction to a target hook. The legalizer
//! resolves every instruction against those rules and rewrites it until only
//! legal instructions remain.
//!
//! # Primary Usage
//!
//! ```ignore
//! use gisel_legalize::amdgpu::{AmdgpuLegalizer, Generation, Subtarget};
//! use gisel_legalize::core::LegalizerSession;
//! use gisel_legalize::legalizer::Legalizer;
//! use gisel_legalize::mir::parse_function;
//! use bumpalo::Bump;
//!
//! let subtarget = Subtarget::new(Generation::Gfx9);
//! let target = AmdgpuLegalizer::new(subtarget)?;
//! let mut mf = parse_function(text, &subtarget)?;
//!
//! let arena = Bump::new();
//! let session = LegalizerSession::new(&arena);
//! Legalizer::new(&target).legalize_function(&session, &mut mf)?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Low-level types, opcodes, machine functions, the IR builder, errors and sessions
//! - [`legalizer`] - Rule sets, the frozen rule table and its verifier, the helper and the driver
//! - [`amdgpu`] - Example GPU target with its rule table and address space cast lowering
//! - [`mir`] - MIR text parser and reference interpreter

pub mod amdgpu;
pub mod core;
pub mod legalizer;
pub mod mir;

// Re-export common types from organized modules
pub use core::{
    // Types and queries
    LowLevelType, MemDesc, TypeQuery,
    // Machine IR
    InstId, MachineFunction, MachineInst, MachineIrBuilder, Opcode, TargetOpcode, ValueId,
    // Target interface
    TargetCapabilities,
    // Errors and sessions
    LegalizerError, LegalizerResult, LegalizerSession, LegalizerStats,
};
pub use legalizer::{
    Action, LegalizationOutcome, Legalizer, LegalizerConfig, LegalizerInfo, LegalizerInfoBuilder,
    TargetLegalizer,
};
