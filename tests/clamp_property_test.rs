//! Property tests for rule resolution: clamps converge into their range,
//! resolution is deterministic, and the GPU table never loops.

use gisel_legalize::amdgpu::{build_legalizer_info, Generation, Subtarget};
use gisel_legalize::{
    Action, LegalizationOutcome, LegalizerConfig, LegalizerError, LegalizerInfo, LegalizerInfoBuilder, LowLevelType,
    Opcode, TypeQuery,
};
use proptest::prelude::*;

fn clamp_table(min: u32, max: u32) -> LegalizerInfo {
    let mut b = LegalizerInfoBuilder::new(LegalizerConfig::default());
    b.get_action_definitions_builder(&[Opcode::Add])
        .clamp_scalar(0, LowLevelType::scalar(min), LowLevelType::scalar(max))
        .legal();
    b.compute_tables()
}

fn bounds() -> impl Strategy<Value = (u32, u32)> {
    (1u32..=128, 1u32..=128).prop_map(|(a, b)| (a.min(b), a.max(b)))
}

proptest! {
    #[test]
    fn prop_clamp_lands_in_range((min, max) in bounds(), width in 1u32..=512) {
        let info = clamp_table(min, max);
        let res = info.legalize_query(Opcode::Add, TypeQuery::new([LowLevelType::scalar(width)])).unwrap();
        prop_assert_eq!(res.outcome, LegalizationOutcome::Legal);
        let bits = res.query.types[0].size_in_bits();
        prop_assert!((min..=max).contains(&bits));
        if (min..=max).contains(&width) {
            prop_assert!(res.steps.is_empty());
        } else {
            prop_assert_eq!(res.steps.len(), 1);
            let expected = if width < min { min } else { max };
            prop_assert_eq!(bits, expected);
        }
    }

    #[test]
    fn prop_resolution_is_deterministic(width in 1u32..=256, lanes in 1u32..=8) {
        let st = Subtarget::new(Generation::Gfx9);
        let info = build_legalizer_info(&st, LegalizerConfig::default()).unwrap();
        let ty = if lanes == 1 { LowLevelType::scalar(width) } else { LowLevelType::vector(lanes, width) };
        let q = TypeQuery::new([ty]);
        for opcode in [Opcode::Add, Opcode::And, Opcode::Fadd, Opcode::ImplicitDef] {
            prop_assert_eq!(info.get_action(opcode, &q), info.get_action(opcode, &q));
        }
    }

    #[test]
    fn prop_gpu_scalar_rules_terminate(width in 1u32..=256, gen_idx in 0usize..4) {
        let generation = Generation::ALL[gen_idx];
        let info = build_legalizer_info(&Subtarget::new(generation), LegalizerConfig::default()).unwrap();
        let q = TypeQuery::new([LowLevelType::scalar(width)]);
        for opcode in [Opcode::Add, Opcode::And, Opcode::Fadd, Opcode::Constant, Opcode::ImplicitDef] {
            match info.legalize_query(opcode, q.clone()) {
                Ok(res) => {
                    prop_assert_eq!(res.outcome, LegalizationOutcome::Legal);
                    prop_assert_eq!(info.get_action(opcode, &res.query), Action::Legal);
                    prop_assert!(res.steps.len() <= info.config().max_iterations);
                }
                Err(LegalizerError::Unsupported { .. }) => {}
                Err(err) => prop_assert!(false, "{} on s{}: {}", opcode, width, err),
            }
        }
    }
}

#[test]
fn test_clamp_ignores_pointers_and_vectors() {
    let info = clamp_table(32, 64);
    let ptr = LowLevelType::pointer(3, 32);
    assert_eq!(info.get_action(Opcode::Add, &TypeQuery::new([ptr])), Action::Legal);
    let vec = LowLevelType::vector(4, 8);
    assert_eq!(info.get_action(Opcode::Add, &TypeQuery::new([vec])), Action::Legal);
}
