// This module defines error types for the legalizer using the thiserror crate for
// idiomatic Rust error handling. LegalizerError is the main error enum. Its variants fall
// into two groups: malformed rule tables, detected by LegalizerInfo::verify before any
// function is legalized (empty rule sets, missing fallbacks, shape arity mismatches, type
// indices out of range, mutations that do not change the type or move it the wrong way),
// and runtime failures while legalizing an instruction (no rule matches, the iteration
// cap is exceeded, a custom hook fails, or the helper cannot perform a rewrite). All of
// them are fatal for the function being legalized. The module also provides
// LegalizerResult<T> as a convenience alias for Result<T, LegalizerError>.

//! Error types for the legalizer.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use super::opcode::Opcode;
use super::types::LowLevelType;

/// Main error type for rule table construction and legalization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LegalizerError {
    #[error("No rules defined for {opcode}")]
    EmptyRuleSet { opcode: Opcode },

    #[error("Rule set for {opcode} has no always-matching fallback rule")]
    MissingFallback { opcode: Opcode },

    #[error("{opcode} has {expected} type indices but a shape or alias uses {found}")]
    ArityMismatch {
        opcode: Opcode,
        expected: usize,
        found: usize,
    },

    #[error("Rule {rule} of {opcode} refers to type index {type_idx}, opcode has {arity}")]
    TypeIndexOutOfRange {
        opcode: Opcode,
        rule: usize,
        type_idx: usize,
        arity: usize,
    },

    #[error("{opcode}: {action} leaves type index {type_idx} unchanged for {query}")]
    NoOpMutation {
        opcode: Opcode,
        action: &'static str,
        type_idx: usize,
        query: String,
    },

    #[error("{opcode}: {action} moves type index {type_idx} from {from} to {to}")]
    MutationDirection {
        opcode: Opcode,
        action: &'static str,
        type_idx: usize,
        from: LowLevelType,
        to: LowLevelType,
    },

    #[error("Unable to legalize {opcode} with types {query}")]
    Unsupported { opcode: Opcode, query: String },

    #[error("Legalization of {opcode} did not converge within {cap} steps")]
    IterationCapExceeded { opcode: Opcode, cap: usize },

    #[error("Custom legalization of {opcode} failed")]
    CustomFailed { opcode: Opcode },

    #[error("Cannot apply {action} to {opcode}: {reason}")]
    UnableToLegalize {
        opcode: Opcode,
        action: &'static str,
        reason: String,
    },
}

impl LegalizerError {
    /// Whether the error was raised while checking a rule table.
    pub fn is_malformed_table(&self) -> bool {
        matches!(
            self,
            LegalizerError::EmptyRuleSet { .. }
                | LegalizerError::MissingFallback { .. }
                | LegalizerError::ArityMismatch { .. }
                | LegalizerError::TypeIndexOutOfRange { .. }
                | LegalizerError::MutationDirection { .. }
        )
    }
}

/// Result type alias for legalizer operations.
pub type LegalizerResult<T> = Result<T, LegalizerError>;
