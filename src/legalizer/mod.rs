// This module groups the target-independent legalizer engine. Rule tables are built
// through LegalizerInfoBuilder and the fluent RuleSet API (rule_set, predicate,
// mutation), frozen into LegalizerInfo (info) and checked by the verifier (verify).
// LegalizerHelper (helper) turns resolved actions into instruction rewrites, and the
// driver (driver) runs the per-instruction fixpoint loop, the per-function worklist and
// the parallel per-function driver. Targets plug in through the TargetLegalizer trait.

//! Target-independent legalizer engine.

pub mod action;
pub mod config;
pub mod driver;
pub mod helper;
pub mod info;
pub mod mutation;
pub mod predicate;
pub mod rule_set;
pub mod verify;

pub use action::{Action, ActionKind, LegalizationOutcome};
pub use config::LegalizerConfig;
pub use driver::{legalize_functions_parallel, FunctionResult, InstLegalization, Legalizer};
pub use helper::{LegalizerHelper, Rewrite};
pub use info::{LegalizerInfo, LegalizerInfoBuilder, QueryResolution, TargetLegalizer};
pub use mutation::{Mutation, MutationFn};
pub use predicate::{Predicate, PredicateFn, Shape};
pub use rule_set::{Rule, RuleSet};
