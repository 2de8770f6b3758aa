// This module implements the legalizer driver. Legalizer pairs a target with the
// per-instruction fixpoint loop: build the type query from the current operand types,
// resolve it, and either stop (Legal), fail (Unsupported), hand the instruction to the
// target hook (Custom) or to the helper (Lower and every mutating action). In-place
// rewrites loop on the same instruction until the configured iteration cap; splitting
// rewrites end the loop. Instructions emitted along the way are not legalized
// recursively. legalize_function runs an explicit worklist over a function instead:
// the original instructions in program order, then everything the rewrites created or
// changed, each tagged with the generation that spawned it so runaway expansion is cut
// off at the configured depth. A function is legalized completely or reported failed
// and left as it was.
// legalize_functions_parallel fans independent functions out over rayon with one
// session per task and merges the statistics.

//! Instruction and function legalization drivers.

use std::collections::VecDeque;

use bumpalo::Bump;
use log::{debug, trace, warn};
use rayon::prelude::*;

use crate::core::{
    InsertPoint, InstId, LegalizerError, LegalizerResult, LegalizerSession, LegalizerStats, MachineFunction,
};

use super::action::{Action, LegalizationOutcome};
use super::helper::{LegalizerHelper, Rewrite};
use super::info::{LegalizerInfo, TargetLegalizer};

/// Result of legalizing one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstLegalization {
    pub outcome: LegalizationOutcome,
    /// Instructions emitted by rewrites, in emission order.
    pub created: Vec<InstId>,
    /// Existing instructions modified by the target hook.
    pub changed: Vec<InstId>,
}

/// Legalizes machine functions for one target.
pub struct Legalizer<'t> {
    target: &'t dyn TargetLegalizer,
}

impl<'t> Legalizer<'t> {
    pub fn new(target: &'t dyn TargetLegalizer) -> Self {
        Self { target }
    }

    pub fn info(&self) -> &'t LegalizerInfo {
        self.target.legalizer_info()
    }

    /// Legalize `inst` until it is legal, replaced or handled by the target.
    pub fn legalize_instruction(
        &self,
        session: &LegalizerSession<'_>,
        mf: &mut MachineFunction,
        inst: InstId,
    ) -> LegalizerResult<InstLegalization> {
        let info = self.info();
        let cap = info.config().max_iterations;
        let mut created = Vec::new();
        let mut changed = Vec::new();
        let mut last_opcode = None;

        for _ in 0..cap {
            let Some(opcode) = mf.inst(inst).map(|i| i.opcode) else {
                return Ok(InstLegalization { outcome: LegalizationOutcome::Lowered, created, changed });
            };
            last_opcode = Some(opcode);
            let query = mf.type_query(inst).ok_or_else(|| LegalizerError::Unsupported {
                opcode,
                query: "<missing operands>".to_string(),
            })?;
            let action = info.get_action(opcode, &query);
            trace!("{opcode} {query}: {action}");

            if action == Action::Legal {
                return Ok(InstLegalization { outcome: LegalizationOutcome::Legal, created, changed });
            }
            if action == Action::Unsupported {
                return Err(LegalizerError::Unsupported { opcode, query: query.to_string() });
            }
            if let Some((type_idx, new_type)) = action.mutation() {
                if query.get(type_idx) == Some(new_type) {
                    return Err(LegalizerError::NoOpMutation {
                        opcode,
                        action: action.name(),
                        type_idx,
                        query: query.to_string(),
                    });
                }
            }
            session.record_action(action.name());

            let mut helper = LegalizerHelper::new(mf);
            let outcome = if action == Action::Custom {
                helper.builder().set_insert_point(InsertPoint::Before(inst));
                if !self.target.legalize_custom(inst, helper.builder())? {
                    return Err(LegalizerError::CustomFailed { opcode });
                }
                Some(LegalizationOutcome::Custom)
            } else {
                match helper.apply(inst, action)? {
                    Rewrite::InPlace => None,
                    Rewrite::Replaced => Some(LegalizationOutcome::Lowered),
                }
            };
            created.extend(helper.builder().take_created());
            changed.extend(helper.builder().take_changed());

            if let Some(outcome) = outcome {
                return Ok(InstLegalization { outcome, created, changed });
            }
        }

        match last_opcode {
            Some(opcode) => Err(LegalizerError::IterationCapExceeded { opcode, cap }),
            None => Ok(InstLegalization { outcome: LegalizationOutcome::Legal, created, changed }),
        }
    }

    /// Legalize every generic instruction of `mf`.
    ///
    /// Stops at the first error and restores `mf` to its state on entry.
    pub fn legalize_function(&self, session: &LegalizerSession<'_>, mf: &mut MachineFunction) -> LegalizerResult<()> {
        session.set_current_function(mf.name());
        let snapshot = mf.clone();
        let result = self.run_worklist(session, mf);
        if result.is_err() {
            *mf = snapshot;
        }
        session.record_function(mf.name(), result.is_ok(), mf.len());
        match &result {
            Ok(()) => debug!("legalized {} ({} instructions)", mf.name(), mf.len()),
            Err(err) => warn!("failed to legalize {}: {err}", mf.name()),
        }
        result
    }

    fn run_worklist(&self, session: &LegalizerSession<'_>, mf: &mut MachineFunction) -> LegalizerResult<()> {
        let max_depth = self.info().config().max_depth;
        let mut worklist: VecDeque<(InstId, usize)> = mf.inst_ids().into_iter().map(|id| (id, 0)).collect();

        while let Some((inst, depth)) = worklist.pop_front() {
            let Some(opcode) = mf.inst(inst).map(|i| i.opcode) else {
                continue;
            };
            if !opcode.is_generic() {
                continue;
            }
            if depth > max_depth {
                return Err(LegalizerError::IterationCapExceeded { opcode, cap: max_depth });
            }

            let res = self.legalize_instruction(session, mf, inst)?;
            session.record_instruction(opcode);
            session.record_created(res.created.len());
            for next in res.created.into_iter().chain(res.changed) {
                worklist.push_back((next, depth + 1));
            }
        }
        Ok(())
    }
}

/// Outcome of one function in a parallel run.
#[derive(Debug)]
pub struct FunctionResult {
    pub function: MachineFunction,
    pub result: LegalizerResult<()>,
}

/// Legalize independent functions in parallel against one shared target.
///
/// Results keep the input order. Every task runs with its own session;
/// the returned statistics are the merge of all of them.
pub fn legalize_functions_parallel(
    target: &dyn TargetLegalizer,
    functions: Vec<MachineFunction>,
) -> (Vec<FunctionResult>, LegalizerStats) {
    let per_function: Vec<(FunctionResult, LegalizerStats)> = functions
        .into_par_iter()
        .map(|mut function| {
            let arena = Bump::new();
            let session = LegalizerSession::new(&arena);
            let result = Legalizer::new(target).legalize_function(&session, &mut function);
            (FunctionResult { function, result }, session.stats())
        })
        .collect();

    let mut stats = LegalizerStats::default();
    let results = per_function
        .into_iter()
        .map(|(result, function_stats)| {
            stats.merge(&function_stats);
            result
        })
        .collect();
    (results, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::{with_session, TestContext};
    use crate::core::{LowLevelType, MachineInst, Opcode};
    use crate::legalizer::{LegalizerConfig, LegalizerInfoBuilder, Mutation, Predicate};

    const S16: LowLevelType = LowLevelType::scalar(16);
    const S32: LowLevelType = LowLevelType::scalar(32);
    const S64: LowLevelType = LowLevelType::scalar(64);

    fn table(config: LegalizerConfig) -> LegalizerInfo {
        let mut b = LegalizerInfoBuilder::new(config);
        b.get_action_definitions_builder(&[Opcode::Add, Opcode::Sub])
            .legal_for([S32])
            .clamp_scalar(0, S32, S32);
        b.get_action_definitions_builder(&[Opcode::Anyext, Opcode::Zext, Opcode::Sext])
            .legal_for([(S32, S16), (S64, S32)]);
        b.get_action_definitions_builder(&[Opcode::Trunc]).legal_for([(S16, S32), (S32, S64)]);
        b.get_action_definitions_builder(&[Opcode::Uaddo, Opcode::Uadde])
            .legal_for([(S32, LowLevelType::scalar(1))]);
        b.get_action_definitions_builder(&[Opcode::MergeValues, Opcode::UnmergeValues])
            .legal();
        b.compute_tables()
    }

    fn add_function(ty: LowLevelType) -> (MachineFunction, InstId) {
        let mut mf = MachineFunction::new("add");
        let a = mf.add_arg(ty, "a");
        let d = mf.new_value(ty);
        let add = mf.append(MachineInst::new(Opcode::Add, vec![d], vec![a, a]));
        (mf, add)
    }

    #[test]
    fn test_instruction_widened_in_place() {
        let info = table(LegalizerConfig::default());
        let (mut mf, add) = add_function(S16);
        let res = with_session(|session| Legalizer::new(&info).legalize_instruction(session, &mut mf, add));
        let res = res.unwrap();
        assert_eq!(res.outcome, LegalizationOutcome::Legal);
        assert_eq!(res.created.len(), 3);
        assert_eq!(mf.type_query(add).unwrap().types, vec![S32]);
    }

    #[test]
    fn test_function_worklist_legalizes_created_instructions() {
        let info = table(LegalizerConfig::default());
        let (mut mf, _) = add_function(S64);
        let ctx = TestContext::new();
        let session = ctx.create_session();

        Legalizer::new(&info).legalize_function(&session, &mut mf).unwrap();
        for (id, inst) in mf.instructions() {
            let q = mf.type_query(id).unwrap();
            assert_eq!(info.get_action(inst.opcode, &q), Action::Legal, "{}", inst.opcode);
        }

        let stats = session.stats();
        assert_eq!(stats.functions_legalized, 1);
        assert_eq!(stats.action_counts["NarrowScalar"], 1);
        assert!(stats.instructions_created >= 4);
        assert!(ctx.memory_used() > 0);
    }

    #[test]
    fn test_unsupported_fails_function() {
        let info = table(LegalizerConfig::default());
        let mut mf = MachineFunction::new("mul");
        let a = mf.add_arg(S32, "a");
        let d = mf.new_value(S32);
        mf.append(MachineInst::new(Opcode::Mul, vec![d], vec![a, a]));

        let err = with_session(|session| Legalizer::new(&info).legalize_function(session, &mut mf));
        assert_eq!(err, Err(LegalizerError::Unsupported { opcode: Opcode::Mul, query: "[s32]".to_string() }));
    }

    #[test]
    fn test_failed_function_is_restored() {
        let info = table(LegalizerConfig::default());
        let mut mf = MachineFunction::new("f");
        let a = mf.add_arg(S16, "a");
        let x = mf.add_arg(S32, "x");
        let b = mf.new_value(S16);
        let c = mf.new_value(S32);
        mf.append(MachineInst::new(Opcode::Add, vec![b], vec![a, a]));
        mf.append(MachineInst::new(Opcode::Mul, vec![c], vec![x, x]));
        let before = mf.to_string();

        let ctx = TestContext::new();
        let session = ctx.create_session();
        let err = Legalizer::new(&info).legalize_function(&session, &mut mf);
        assert_eq!(err, Err(LegalizerError::Unsupported { opcode: Opcode::Mul, query: "[s32]".to_string() }));
        assert_eq!(mf.to_string(), before);
        assert_eq!(mf.len(), 2);
        assert_eq!(session.stats().functions_failed, 1);
    }

    #[test]
    fn test_instruction_iteration_cap() {
        let mut b = LegalizerInfoBuilder::new(LegalizerConfig::default().with_max_iterations(4));
        b.get_action_definitions_builder(&[Opcode::Add]).widen_scalar_if(
            Predicate::IsScalar(0),
            Mutation::custom(&[0], |q| (0, LowLevelType::scalar(q.types[0].size_in_bits() * 2))),
        );
        let info = b.compute_tables();
        let (mut mf, add) = add_function(S16);
        let err = with_session(|session| Legalizer::new(&info).legalize_instruction(session, &mut mf, add));
        assert_eq!(err, Err(LegalizerError::IterationCapExceeded { opcode: Opcode::Add, cap: 4 }));
    }

    #[test]
    fn test_custom_without_hook_fails() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add]).custom();
        let info = b.compute_tables();
        let (mut mf, add) = add_function(S32);
        let err = with_session(|session| Legalizer::new(&info).legalize_instruction(session, &mut mf, add));
        assert_eq!(err, Err(LegalizerError::CustomFailed { opcode: Opcode::Add }));
    }

    #[test]
    fn test_parallel_driver_keeps_order_and_merges_stats() {
        let info = table(LegalizerConfig::default());
        let functions: Vec<MachineFunction> = [S16, S32, S64, S16]
            .into_iter()
            .map(|ty| add_function(ty).0)
            .collect();

        let (results, stats) = legalize_functions_parallel(&info, functions);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.result.is_ok()));
        assert_eq!(stats.functions_legalized, 4);
        assert_eq!(stats.action_counts["WidenScalar"], 2);
        assert_eq!(stats.action_counts["NarrowScalar"], 1);
    }
}
