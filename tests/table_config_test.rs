//! Table verification and the iteration limits of the legalizer configuration.

use bumpalo::Bump;
use gisel_legalize::amdgpu::{build_legalizer_info, AmdgpuLegalizer, Generation, Subtarget};
use gisel_legalize::legalizer::{Mutation, Predicate};
use gisel_legalize::mir::parse_function;
use gisel_legalize::{
    LegalizerConfig, LegalizerError, LegalizerInfoBuilder, LegalizerSession, Legalizer, LowLevelType, Opcode,
    TypeQuery,
};

const S16: LowLevelType = LowLevelType::scalar(16);
const S32: LowLevelType = LowLevelType::scalar(32);

#[test]
fn test_gpu_table_verifies_for_every_generation() {
    for generation in Generation::ALL {
        for aperture_regs in [false, true] {
            let st = Subtarget::new(generation).with_aperture_regs(aperture_regs);
            let info = build_legalizer_info(&st, LegalizerConfig::default()).unwrap();
            assert!(info.verify().is_ok(), "{generation}");
            assert!(!info.opcodes().is_empty());
        }
    }
}

#[test]
fn test_gpu_table_has_no_fallback_everywhere() {
    let config = LegalizerConfig::default().with_require_fallback(true);
    let err = build_legalizer_info(&Subtarget::new(Generation::Gfx9), config).unwrap_err();
    assert!(matches!(err, LegalizerError::MissingFallback { .. }));
    assert!(err.is_malformed_table());
}

#[test]
fn test_cycle_between_rules_hits_iteration_cap() {
    let mut b = LegalizerInfoBuilder::new(LegalizerConfig::default().with_max_iterations(8));
    b.get_action_definitions_builder(&[Opcode::Add])
        .widen_scalar_if(Predicate::TypeIs(0, S16), Mutation::ChangeTo(0, S32))
        .narrow_scalar_if(Predicate::TypeIs(0, S32), Mutation::ChangeTo(0, S16));
    let info = b.compute_tables();
    assert!(info.verify().is_ok());
    assert_eq!(
        info.legalize_query(Opcode::Add, TypeQuery::new([S16])).unwrap_err(),
        LegalizerError::IterationCapExceeded { opcode: Opcode::Add, cap: 8 }
    );
}

#[test]
fn test_max_depth_bounds_rewrites_of_rewrites() {
    let st = Subtarget::new(Generation::Gfx9);
    let text = "add(%a:s64) {\n  %b:s64 = G_ADD %a, %a\n}\n";
    let arena = Bump::new();

    let shallow = AmdgpuLegalizer::with_config(st, LegalizerConfig::default().with_max_depth(0)).unwrap();
    let mut mf = parse_function(text, &st).unwrap();
    let session = LegalizerSession::new(&arena);
    let err = Legalizer::new(&shallow).legalize_function(&session, &mut mf).unwrap_err();
    assert!(matches!(err, LegalizerError::IterationCapExceeded { cap: 0, .. }));
    assert_eq!(session.stats().functions_failed, 1);

    let deep = AmdgpuLegalizer::with_config(st, LegalizerConfig::default().with_max_depth(1)).unwrap();
    let mut mf = parse_function(text, &st).unwrap();
    let session = LegalizerSession::new(&arena);
    Legalizer::new(&deep).legalize_function(&session, &mut mf).unwrap();
    assert_eq!(session.stats().functions_legalized, 1);
}

#[test]
fn test_in_place_rewrites_count_against_iterations() {
    let st = Subtarget::new(Generation::Gfx9);
    let target = AmdgpuLegalizer::with_config(st, LegalizerConfig::default().with_max_iterations(1)).unwrap();
    let mut mf = parse_function("add(%a:s16) {\n  %b:s16 = G_ADD %a, %a\n}\n", &st).unwrap();
    let arena = Bump::new();
    let session = LegalizerSession::new(&arena);
    let err = Legalizer::new(&target).legalize_function(&session, &mut mf).unwrap_err();
    assert_eq!(err, LegalizerError::IterationCapExceeded { opcode: Opcode::Add, cap: 1 });
}
