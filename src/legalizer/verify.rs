// This module implements the table verifier run once after compute_tables and before
// any function is legalized. Structural checks come first: every rule set has rules,
// every opcode bound to a set has the same number of type indices as its owner, every
// exact shape has that arity, and every type index a predicate or mutation reads is in
// range. Optionally every set must end with an always-matching fallback rule. Then the
// mutations are probed: for each rule set a finite set of queries is built from the
// declared shapes and from a universe of common types plus every type the table names
// (placed in every type index at once), and the first matching rule of each probe is
// applied. A mutation that leaves its type unchanged would loop forever; one that moves
// in the wrong direction (a widen that shrinks, a split that adds elements) signals a
// malformed rule as well. Both are fatal. Cycles spanning several rules are left to the
// runtime iteration cap.

//! Legalizer table verification.

use log::debug;

use crate::core::{LegalizerError, LegalizerResult, LowLevelType, MemDesc, Opcode, TypeQuery};

use super::action::{Action, ActionKind};
use super::info::LegalizerInfo;
use super::rule_set::RuleSet;

/// Types probed in every type index of every rule set.
const PROBE_TYPES: &[LowLevelType] = &[
    LowLevelType::scalar(1),
    LowLevelType::scalar(8),
    LowLevelType::scalar(16),
    LowLevelType::scalar(24),
    LowLevelType::scalar(32),
    LowLevelType::scalar(48),
    LowLevelType::scalar(64),
    LowLevelType::scalar(96),
    LowLevelType::scalar(128),
    LowLevelType::scalar(256),
    LowLevelType::vector(2, 16),
    LowLevelType::vector(3, 16),
    LowLevelType::vector(4, 16),
    LowLevelType::vector(2, 32),
    LowLevelType::vector(3, 32),
    LowLevelType::vector(4, 32),
    LowLevelType::vector(2, 64),
    LowLevelType::vector(3, 64),
];

/// Alignment of the memory descriptor attached to probe queries.
const PROBE_ALIGN: u32 = 32;

impl LegalizerInfo {
    /// Check the table for structural defects and misbehaving mutations.
    pub fn verify(&self) -> LegalizerResult<()> {
        let universe = self.probe_universe();

        for (idx, (owner, rule_set)) in self.rule_sets.iter().enumerate() {
            if !self.table.values().any(|&i| i == idx) {
                continue;
            }
            self.verify_structure(*owner, &self.aliases[idx], rule_set)?;
            if self.config.probe_mutations {
                verify_mutations(*owner, rule_set, &universe)?;
            }
        }

        debug!("verified {} rule sets over {} probe types", self.rule_sets.len(), universe.len());
        Ok(())
    }

    fn verify_structure(&self, owner: Opcode, aliases: &[Opcode], rule_set: &RuleSet) -> LegalizerResult<()> {
        if rule_set.is_empty() {
            return Err(LegalizerError::EmptyRuleSet { opcode: owner });
        }

        let arity = owner.num_type_indices();
        for &alias in aliases {
            if alias.num_type_indices() != arity {
                return Err(LegalizerError::ArityMismatch {
                    opcode: alias,
                    expected: arity,
                    found: alias.num_type_indices(),
                });
            }
        }

        for (rule_idx, rule) in rule_set.rules().iter().enumerate() {
            for (shape, _) in rule.predicate.shapes() {
                if shape.arity() != arity {
                    return Err(LegalizerError::ArityMismatch {
                        opcode: owner,
                        expected: arity,
                        found: shape.arity(),
                    });
                }
            }
            if let Some(&type_idx) = rule.type_indices().iter().find(|&&i| i >= arity) {
                return Err(LegalizerError::TypeIndexOutOfRange {
                    opcode: owner,
                    rule: rule_idx,
                    type_idx,
                    arity,
                });
            }
            if rule.kind.needs_mutation() && rule.mutation.is_none() {
                return Err(LegalizerError::UnableToLegalize {
                    opcode: owner,
                    action: rule.kind.name(),
                    reason: format!("rule {rule_idx} has no mutation"),
                });
            }
        }

        if self.config.require_fallback && !rule_set.has_fallback() {
            return Err(LegalizerError::MissingFallback { opcode: owner });
        }
        Ok(())
    }

    /// Probe types plus every type the table names.
    fn probe_universe(&self) -> Vec<LowLevelType> {
        let mut universe = PROBE_TYPES.to_vec();
        for (_, rule_set) in &self.rule_sets {
            for rule in rule_set.rules() {
                rule.predicate.collect_types(&mut universe);
                if let Some(m) = &rule.mutation {
                    m.collect_types(&mut universe);
                }
            }
        }
        universe
    }
}

fn probe_mem(opcode: Opcode, first: LowLevelType) -> Vec<MemDesc> {
    if opcode.is_memory() {
        vec![MemDesc::new(first.size_in_bits(), PROBE_ALIGN)]
    } else {
        Vec::new()
    }
}

fn probe_queries(opcode: Opcode, rule_set: &RuleSet, universe: &[LowLevelType]) -> Vec<TypeQuery> {
    let arity = opcode.num_type_indices();
    let mut probes = Vec::new();
    if arity == 0 {
        return probes;
    }

    for rule in rule_set.rules() {
        for (shape, mem) in rule.predicate.shapes() {
            let mem = match mem {
                Some((size, align)) => vec![MemDesc::new(size, align)],
                None => probe_mem(opcode, shape.0[0]),
            };
            probes.push(TypeQuery::with_mem(shape.0.clone(), mem));
        }
    }
    for &ty in universe {
        probes.push(TypeQuery::with_mem(vec![ty; arity], probe_mem(opcode, ty)));
    }
    probes
}

fn verify_mutations(opcode: Opcode, rule_set: &RuleSet, universe: &[LowLevelType]) -> LegalizerResult<()> {
    for probe in probe_queries(opcode, rule_set, universe) {
        let Some((rule_idx, rule)) = rule_set.find(&probe) else {
            continue;
        };
        let action = rule.action(&probe);
        let Some((type_idx, new_type)) = action.mutation() else {
            continue;
        };
        let Some(old_type) = probe.get(type_idx) else {
            return Err(LegalizerError::TypeIndexOutOfRange {
                opcode,
                rule: rule_idx,
                type_idx,
                arity: probe.arity(),
            });
        };
        if old_type == new_type {
            return Err(LegalizerError::NoOpMutation {
                opcode,
                action: action.name(),
                type_idx,
                query: probe.to_string(),
            });
        }
        if !moves_in_direction(action, old_type, new_type) {
            return Err(LegalizerError::MutationDirection {
                opcode,
                action: action.name(),
                type_idx,
                from: old_type,
                to: new_type,
            });
        }
    }
    Ok(())
}

/// Whether `from → to` is a step in the direction `action` promises.
fn moves_in_direction(action: Action, from: LowLevelType, to: LowLevelType) -> bool {
    match action.kind() {
        ActionKind::WidenScalar => to.scalar_size_in_bits() > from.scalar_size_in_bits(),
        ActionKind::NarrowScalar => to.scalar_size_in_bits() < from.scalar_size_in_bits(),
        ActionKind::MoreElements => to.num_elements() > from.num_elements(),
        ActionKind::FewerElements | ActionKind::Scalarize => to.num_elements() < from.num_elements(),
        ActionKind::Bitcast => to.size_in_bits() == from.size_in_bits(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legalizer::{LegalizerConfig, LegalizerInfoBuilder, Mutation, Predicate};

    const S16: LowLevelType = LowLevelType::scalar(16);
    const S32: LowLevelType = LowLevelType::scalar(32);
    const S64: LowLevelType = LowLevelType::scalar(64);

    #[test]
    fn test_well_formed_table_verifies() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add, Opcode::Sub])
            .legal_for([S32])
            .clamp_scalar(0, S32, S32)
            .scalarize(0);
        b.get_action_definitions_builder(&[Opcode::Icmp])
            .legal_for([(LowLevelType::scalar(1), S32)])
            .clamp_scalar(1, S32, S32);
        assert_eq!(b.compute_tables().verify(), Ok(()));
    }

    #[test]
    fn test_empty_rule_set() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add]);
        let err = b.compute_tables().verify().unwrap_err();
        assert_eq!(err, LegalizerError::EmptyRuleSet { opcode: Opcode::Add });
        assert!(err.is_malformed_table());
    }

    #[test]
    fn test_shape_arity_mismatch() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add]).legal_for([(S32, S32)]);
        assert_eq!(
            b.compute_tables().verify(),
            Err(LegalizerError::ArityMismatch { opcode: Opcode::Add, expected: 1, found: 2 })
        );
    }

    #[test]
    fn test_alias_arity_mismatch() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add, Opcode::Icmp]).legal();
        assert_eq!(
            b.compute_tables().verify(),
            Err(LegalizerError::ArityMismatch { opcode: Opcode::Icmp, expected: 1, found: 2 })
        );
    }

    #[test]
    fn test_type_index_out_of_range() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add]).clamp_scalar(1, S32, S64);
        assert_eq!(
            b.compute_tables().verify(),
            Err(LegalizerError::TypeIndexOutOfRange {
                opcode: Opcode::Add,
                rule: 0,
                type_idx: 1,
                arity: 1
            })
        );
    }

    #[test]
    fn test_missing_fallback_only_when_required() {
        let build = |config: LegalizerConfig| {
            let mut b = LegalizerInfoBuilder::new(config);
            b.get_action_definitions_builder(&[Opcode::Add]).legal_for([S32]);
            b.compute_tables()
        };
        assert_eq!(build(LegalizerConfig::default()).verify(), Ok(()));
        assert_eq!(
            build(LegalizerConfig::default().with_require_fallback(true)).verify(),
            Err(LegalizerError::MissingFallback { opcode: Opcode::Add })
        );
    }

    #[test]
    fn test_noop_mutation_detected() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add])
            .widen_scalar_if(Predicate::IsScalar(0), Mutation::ChangeTo(0, S32));
        let err = b.compute_tables().verify().unwrap_err();
        assert!(matches!(err, LegalizerError::NoOpMutation { opcode: Opcode::Add, type_idx: 0, .. }));
    }

    #[test]
    fn test_wrong_direction_detected() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::Add])
            .legal_for([S16])
            .widen_scalar_if(Predicate::TypeIs(0, S32), Mutation::ChangeTo(0, S16));
        assert_eq!(
            b.compute_tables().verify(),
            Err(LegalizerError::MutationDirection {
                opcode: Opcode::Add,
                action: "WidenScalar",
                type_idx: 0,
                from: S32,
                to: S16
            })
        );
    }

    #[test]
    fn test_growing_split_detected() {
        let mut b = LegalizerInfoBuilder::default();
        b.get_action_definitions_builder(&[Opcode::And])
            .legal_for([S32])
            .fewer_elements_if(Predicate::IsVector(0), Mutation::OneMoreElement(0));
        let err = b.compute_tables().verify().unwrap_err();
        assert!(matches!(err, LegalizerError::MutationDirection { action: "FewerElements", .. }));
    }
}
