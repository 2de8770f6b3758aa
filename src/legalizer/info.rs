// This module implements the legalizer table. LegalizerInfoBuilder collects rule sets
// while a target description is constructed: get_action_definitions_builder hands out
// the rule set of a group of opcodes, where the first opcode owns the set and the rest
// alias it, and asking again for an opcode that already has a set extends it.
// compute_tables freezes the builder into LegalizerInfo, an immutable value that is
// Send + Sync and is passed by shared reference to every legalization call, so several
// targets can coexist in one process. LegalizerInfo provides the resolver (get_action),
// the query-level fixpoint loop (legalize_query) bounded by the configured iteration
// cap, and the table verifier in verify.rs. TargetLegalizer is the seam between the
// target-agnostic driver and a concrete target: it exposes the table and the custom
// legalization hook.

//! Legalizer tables, the resolver and the query-level fixpoint loop.

use hashbrown::HashMap;
use log::{trace, warn};

use crate::core::{InstId, LegalizerError, LegalizerResult, MachineIrBuilder, Opcode, TypeQuery};

use super::action::{Action, LegalizationOutcome};
use super::config::LegalizerConfig;
use super::rule_set::RuleSet;

/// Collects rule sets during target construction.
#[derive(Debug, Default)]
pub struct LegalizerInfoBuilder {
    config: LegalizerConfig,
    /// Rule sets in creation order with their owning opcode.
    rule_sets: Vec<(Opcode, RuleSet)>,
    /// Opcode → index into `rule_sets`.
    table: HashMap<Opcode, usize>,
    /// Target of calls with an empty opcode list.
    detached: RuleSet,
}

impl LegalizerInfoBuilder {
    pub fn new(config: LegalizerConfig) -> Self {
        Self { config, rule_sets: Vec::new(), table: HashMap::new(), detached: RuleSet::new() }
    }

    pub fn config(&self) -> &LegalizerConfig {
        &self.config
    }

    /// Rule set shared by `opcodes`.
    ///
    /// The first opcode owns the set; if it already has one that set is
    /// extended. The remaining opcodes are bound to the same set.
    pub fn get_action_definitions_builder(&mut self, opcodes: &[Opcode]) -> &mut RuleSet {
        let Some((&first, rest)) = opcodes.split_first() else {
            warn!("rule set requested for an empty opcode list");
            return &mut self.detached;
        };

        let idx = match self.table.get(&first) {
            Some(&idx) => idx,
            None => {
                self.rule_sets.push((first, RuleSet::new()));
                let idx = self.rule_sets.len() - 1;
                self.table.insert(first, idx);
                idx
            }
        };

        for &op in rest {
            match self.table.insert(op, idx) {
                Some(old) if old != idx => {
                    warn!("{op} rebound from the rule set of {} to {}", self.rule_sets[old].0, first);
                }
                _ => {}
            }
        }

        &mut self.rule_sets[idx].1
    }

    /// Freeze the rule sets into an immutable table.
    pub fn compute_tables(self) -> LegalizerInfo {
        let mut aliases: Vec<Vec<Opcode>> = vec![Vec::new(); self.rule_sets.len()];
        let mut table: Vec<(Opcode, usize)> = self.table.into_iter().collect();
        table.sort();
        for &(op, idx) in &table {
            if op != self.rule_sets[idx].0 {
                aliases[idx].push(op);
            }
        }
        LegalizerInfo {
            config: self.config,
            rule_sets: self.rule_sets,
            aliases,
            table: table.into_iter().collect(),
        }
    }
}

/// Result of resolving a query to a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResolution {
    pub outcome: LegalizationOutcome,
    /// The query after every applied mutation.
    pub query: TypeQuery,
    /// Non-terminal actions applied, in order.
    pub steps: Vec<Action>,
}

/// Immutable legalization rules of one target.
#[derive(Debug)]
pub struct LegalizerInfo {
    pub(super) config: LegalizerConfig,
    pub(super) rule_sets: Vec<(Opcode, RuleSet)>,
    /// Opcodes aliasing each rule set, excluding its owner.
    pub(super) aliases: Vec<Vec<Opcode>>,
    pub(super) table: HashMap<Opcode, usize>,
}

impl LegalizerInfo {
    pub fn config(&self) -> &LegalizerConfig {
        &self.config
    }

    /// Rule set used for `opcode`.
    pub fn rule_set(&self, opcode: Opcode) -> Option<&RuleSet> {
        self.table.get(&opcode).map(|&idx| &self.rule_sets[idx].1)
    }

    /// Opcodes with rules, sorted.
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut ops: Vec<Opcode> = self.table.keys().copied().collect();
        ops.sort();
        ops
    }

    /// Action of the first rule of `opcode` matching `query`.
    ///
    /// Opcodes without rules and queries no rule matches resolve to
    /// `Unsupported`.
    pub fn get_action(&self, opcode: Opcode, query: &TypeQuery) -> Action {
        match self.rule_set(opcode) {
            Some(rs) if query.arity() == opcode.num_type_indices() => rs.resolve(query),
            _ => Action::Unsupported,
        }
    }

    /// Resolve `query` until a terminal outcome, applying every mutation.
    pub fn legalize_query(&self, opcode: Opcode, query: TypeQuery) -> LegalizerResult<QueryResolution> {
        let mut query = query;
        let mut steps = Vec::new();

        for _ in 0..self.config.max_iterations {
            let action = self.get_action(opcode, &query);
            trace!("{opcode} {query}: {action}");

            let outcome = match action {
                Action::Legal => Some(LegalizationOutcome::Legal),
                Action::Lower => Some(LegalizationOutcome::Lowered),
                Action::Custom => Some(LegalizationOutcome::Custom),
                Action::Unsupported => {
                    return Err(LegalizerError::Unsupported { opcode, query: query.to_string() });
                }
                _ => None,
            };
            if let Some(outcome) = outcome {
                return Ok(QueryResolution { outcome, query, steps });
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
                if type_idx >= query.arity() {
                    return Err(LegalizerError::TypeIndexOutOfRange {
                        opcode,
                        rule: steps.len(),
                        type_idx,
                        arity: query.arity(),
                    });
                }
                query.set(type_idx, new_type);
                steps.push(action);
            }
        }

        Err(LegalizerError::IterationCapExceeded { opcode, cap: self.config.max_iterations })
    }
}

/// A target as seen by the legalizer driver.
pub trait TargetLegalizer: Send + Sync {
    fn legalizer_info(&self) -> &LegalizerInfo;

    /// Legalize an instruction whose rules resolved to `Custom`.
    ///
    /// The builder is positioned before `inst`. Returns `Ok(false)` when
    /// the hook does not handle the instruction.
    fn legalize_custom(&self, _inst: InstId, _b: &mut MachineIrBuilder<'_>) -> LegalizerResult<bool> {
        Ok(false)
    }
}

impl TargetLegalizer for LegalizerInfo {
    fn legalizer_info(&self) -> &LegalizerInfo {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LowLevelType;
    use crate::legalizer::{Mutation, Predicate};

    const S16: LowLevelType = LowLevelType::scalar(16);
    const S32: LowLevelType = LowLevelType::scalar(32);

    fn add_table() -> LegalizerInfo {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add, Opcode::Sub])
            .legal_for([S32])
            .clamp_scalar(0, S32, S32);
        b.compute_tables()
    }

    #[test]
    fn test_aliases_share_rules() {
        let info = add_table();
        let q = TypeQuery::new([S16]);
        assert_eq!(info.get_action(Opcode::Sub, &q), info.get_action(Opcode::Add, &q));
        assert_eq!(info.get_action(Opcode::Mul, &q), Action::Unsupported);
        assert_eq!(info.opcodes(), vec![Opcode::Add, Opcode::Sub]);
    }

    #[test]
    fn test_asking_again_extends() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add]).legal_for([S32]);
        b.get_action_definitions_builder(&[Opcode::Add]).lower();
        let info = b.compute_tables();
        assert_eq!(info.rule_set(Opcode::Add).map(RuleSet::len), Some(2));
        assert_eq!(info.get_action(Opcode::Add, &TypeQuery::new([S16])), Action::Lower);
    }

    #[test]
    fn test_legalize_query_widens_then_legal() {
        let info = add_table();
        let res = info.legalize_query(Opcode::Add, TypeQuery::new([S16])).unwrap();
        assert_eq!(res.outcome, LegalizationOutcome::Legal);
        assert_eq!(res.query.types, vec![S32]);
        assert_eq!(res.steps, vec![Action::WidenScalar { type_idx: 0, new_type: S32 }]);
    }

    #[test]
    fn test_cycle_hits_iteration_cap() {
        let mut b = LegalizerInfoBuilder::new(LegalizerConfig::default().with_max_iterations(8));
        b.get_action_definitions_builder(&[Opcode::Add])
            .widen_scalar_if(Predicate::TypeIs(0, S16), Mutation::ChangeTo(0, S32))
            .narrow_scalar_if(Predicate::TypeIs(0, S32), Mutation::ChangeTo(0, S16));
        let info = b.compute_tables();
        let err = info.legalize_query(Opcode::Add, TypeQuery::new([S16])).unwrap_err();
        assert_eq!(err, LegalizerError::IterationCapExceeded { opcode: Opcode::Add, cap: 8 });
    }

    #[test]
    fn test_noop_mutation_is_fatal() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add])
            .widen_scalar_if(Predicate::Always, Mutation::ChangeTo(0, S32));
        let info = b.compute_tables();
        let err = info.legalize_query(Opcode::Add, TypeQuery::new([S32])).unwrap_err();
        assert!(matches!(err, LegalizerError::NoOpMutation { type_idx: 0, .. }));
    }

    #[test]
    fn test_frozen_table_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LegalizerInfo>();
    }
}
