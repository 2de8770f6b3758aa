//! Legalized functions must compute what the original functions computed.
//!
//! Every case runs the function through the reference interpreter before and
//! after legalization and compares the observable values.

use bumpalo::Bump;
use gisel_legalize::amdgpu::{addr_space, AmdgpuLegalizer, Generation, Subtarget};
use gisel_legalize::legalizer::legalize_functions_parallel;
use gisel_legalize::mir::{interp, parse_function, parse_functions, MemoryEnv};
use gisel_legalize::{
    Action, LegalizerConfig, LegalizerError, LegalizerInfoBuilder, LegalizerSession, Legalizer, LowLevelType,
    MachineFunction, Opcode, TargetLegalizer,
};
use pretty_assertions::assert_eq;

fn target(generation: Generation) -> (Subtarget, AmdgpuLegalizer) {
    let _ = env_logger::builder().is_test(true).try_init();
    let st = Subtarget::new(generation);
    (st, AmdgpuLegalizer::new(st).unwrap())
}

/// Parse `text`, legalize it and check that nothing illegal is left.
fn legalize(generation: Generation, text: &str) -> (MachineFunction, MachineFunction) {
    let (st, target) = target(generation);
    let original = parse_function(text, &st).unwrap();
    let mut mf = original.clone();
    let arena = Bump::new();
    let session = LegalizerSession::new(&arena);
    Legalizer::new(&target).legalize_function(&session, &mut mf).unwrap();
    assert_all_legal(&target, &mf);
    (original, mf)
}

fn assert_all_legal(target: &AmdgpuLegalizer, mf: &MachineFunction) {
    for (id, inst) in mf.instructions().filter(|(_, i)| i.opcode.is_generic()) {
        let query = mf.type_query(id).unwrap();
        assert_eq!(
            target.legalizer_info().get_action(inst.opcode, &query),
            Action::Legal,
            "{} {:?} in\n{}",
            inst.opcode,
            query.types,
            mf
        );
    }
}

/// Compare the value named `result` of both functions for every argument list.
fn assert_same_results(original: &MachineFunction, legal: &MachineFunction, result: &str, inputs: &[Vec<Vec<u128>>]) {
    let before_id = original.find_value(result).unwrap();
    let after_id = legal.find_value(result).unwrap();
    for args in inputs {
        let before = interp::run(original, args, &mut MemoryEnv::new()).unwrap();
        let after = interp::run(legal, args, &mut MemoryEnv::new()).unwrap();
        assert_eq!(before.get(before_id), after.get(after_id), "args {args:x?}");
    }
}

fn scalar_pairs(values: &[u128]) -> Vec<Vec<Vec<u128>>> {
    values
        .iter()
        .flat_map(|&a| values.iter().map(move |&b| vec![vec![a], vec![b]]))
        .collect()
}

#[test]
fn test_s64_add_becomes_carry_chain() {
    let text = "add(%a:s64, %b:s64) {\n  %r:s64 = G_ADD %a, %b\n}\n";
    let (original, mf) = legalize(Generation::Gfx9, text);
    let opcodes: Vec<_> = mf.instructions().map(|(_, i)| i.opcode).collect();
    assert!(opcodes.contains(&Opcode::Uaddo));
    assert!(opcodes.contains(&Opcode::Uadde));
    assert_eq!(opcodes.last(), Some(&Opcode::MergeValues));

    let values = [0, 1, 0xffff_ffff, 0x1_0000_0000, u64::MAX as u128, 0x8000_0000_7fff_ffff];
    assert_same_results(&original, &mf, "r", &scalar_pairs(&values));
}

#[test]
fn test_s128_sub_splits_into_four_parts() {
    let text = "sub(%a:s128, %b:s128) {\n  %r:s128 = G_SUB %a, %b\n}\n";
    let (original, mf) = legalize(Generation::SeaIslands, text);
    let subs = mf.instructions().filter(|(_, i)| i.opcode == Opcode::Usube).count();
    assert_eq!(subs, 3);

    let values = [0, 1, u128::MAX, 1 << 64, (1 << 96) - 1, 0x0123_4567_89ab_cdef_0011_2233_4455_6677];
    assert_same_results(&original, &mf, "r", &scalar_pairs(&values));
}

#[test]
fn test_s16_add_is_widened() {
    let text = "add(%a:s16, %b:s16) {\n  %r:s16 = G_ADD %a, %b\n}\n";
    let (original, mf) = legalize(Generation::VolcanicIslands, text);
    assert!(mf.instructions().any(|(_, i)| i.opcode == Opcode::Anyext));
    assert!(mf.instructions().any(|(_, i)| i.opcode == Opcode::Trunc));

    let values = [0, 1, 0x7fff, 0x8000, 0xffff];
    assert_same_results(&original, &mf, "r", &scalar_pairs(&values));
}

#[test]
fn test_cttz_widened_from_odd_width_counts_to_source_width() {
    let s32 = LowLevelType::scalar(32);
    let s64 = LowLevelType::scalar(64);
    let mut b = LegalizerInfoBuilder::new(LegalizerConfig::default());
    b.get_action_definitions_builder(&[Opcode::Cttz])
        .legal_for([(s32, s64)])
        .widen_scalar_to_next_pow2(1, 32);
    b.get_action_definitions_builder(&[Opcode::Zext, Opcode::Or, Opcode::Constant]).legal();
    let info = b.compute_tables();

    let st = Subtarget::new(Generation::Gfx9);
    let original = parse_function("cttz(%a:s63) {\n  %c:s32 = G_CTTZ %a\n}\n", &st).unwrap();
    let mut mf = original.clone();
    let arena = Bump::new();
    let session = LegalizerSession::new(&arena);
    Legalizer::new(&info).legalize_function(&session, &mut mf).unwrap();
    assert!(mf.instructions().any(|(_, i)| i.opcode == Opcode::Or));

    let inputs: Vec<_> = [0, 1, 1 << 40, 1 << 62, (1 << 63) - 1].iter().map(|&v| vec![vec![v]]).collect();
    assert_same_results(&original, &mf, "c", &inputs);
    let zero = interp::run(&mf, &[vec![0]], &mut MemoryEnv::new()).unwrap();
    assert_eq!(zero.scalar(mf.find_value("c").unwrap()), Some(63));
}

#[test]
fn test_wide_vector_and_is_split() {
    let text = "and(%a:<4 x s32>, %b:<4 x s32>) {\n  %r:<4 x s32> = G_AND %a, %b\n}\n";
    let (original, mf) = legalize(Generation::Gfx9, text);
    let ands: Vec<_> = mf
        .instructions()
        .filter(|(_, i)| i.opcode == Opcode::And)
        .map(|(_, i)| mf.value_type(i.defs[0]).to_string())
        .collect();
    assert_eq!(ands, vec!["<2 x s32>", "<2 x s32>"]);

    let inputs = vec![
        vec![vec![0xffff_ffff, 0, 0x1234_5678, 0xf0f0_f0f0], vec![0x0f0f_0f0f, 0xffff_ffff, 0xffff_0000, 0xff00_ff00]],
        vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]],
    ];
    assert_same_results(&original, &mf, "r", &inputs);
}

#[test]
fn test_dwordx3_load_split_before_sea_islands() {
    let text = "load(%p:p1) {\n  %v:<3 x s32> = G_LOAD %p :: (96, 32)\n}\n";
    let (original, mf) = legalize(Generation::SouthernIslands, text);
    let loads: Vec<_> = mf
        .instructions()
        .filter(|(_, i)| i.opcode == Opcode::Load)
        .map(|(_, i)| (mf.value_type(i.defs[0]).to_string(), i.mem[0].size_in_bits))
        .collect();
    assert_eq!(loads, vec![("<2 x s32>".to_string(), 64), ("s32".to_string(), 32)]);

    let mut env = MemoryEnv::new();
    env.write(addr_space::GLOBAL, 0x100, 0x3333_3333_2222_2222_1111_1111, 12);
    let args = [vec![0x100]];
    let before = interp::run(&original, &args, &mut env).unwrap();
    let after = interp::run(&mf, &args, &mut env).unwrap();
    let v = original.find_value("v").unwrap();
    assert_eq!(before.get(v), Some(&[0x1111_1111, 0x2222_2222, 0x3333_3333][..]));
    assert_eq!(after.get(mf.find_value("v").unwrap()), before.get(v));

    // Sea Islands reads all three dwords at once.
    let (_, mf) = legalize(Generation::SeaIslands, text);
    assert_eq!(mf.len(), 1);
}

#[test]
fn test_dwordx3_store_split_before_sea_islands() {
    let text = "store(%v:<3 x s32>, %p:p1) {\n  G_STORE %v, %p :: (96, 32)\n}\n";
    let (original, mf) = legalize(Generation::SouthernIslands, text);
    assert_eq!(mf.instructions().filter(|(_, i)| i.opcode == Opcode::Store).count(), 2);

    let args = [vec![0xaaaa, 0xbbbb, 0xcccc], vec![0x40]];
    let mut before = MemoryEnv::new();
    let mut after = MemoryEnv::new();
    interp::run(&original, &args, &mut before).unwrap();
    interp::run(&mf, &args, &mut after).unwrap();
    for offset in [0, 4, 8] {
        assert_eq!(
            before.read(addr_space::GLOBAL, 0x40 + offset, 4),
            after.read(addr_space::GLOBAL, 0x40 + offset, 4)
        );
    }
    assert_eq!(after.read(addr_space::GLOBAL, 0x48, 4), Some(0xcccc));
}

#[test]
fn test_already_legal_function_is_untouched() {
    let text = "f(%a:s32, %b:s32) {\n  %c:s32 = G_ADD %a, %b\n  %d:s1 = G_ICMP %c, %b, 32\n  %e:s32 = G_SELECT %d, %a, %c\n}\n";
    let (original, mf) = legalize(Generation::Gfx9, text);
    assert_eq!(mf.to_string(), original.to_string());
}

#[test]
fn test_parallel_driver_keeps_order_and_merges_stats() {
    let (st, target) = target(Generation::Gfx9);
    let text = "\
a(%x:s64) {\n  %y:s64 = G_ADD %x, %x\n}\n\
b(%x:s32) {\n  %y:s32 = G_MUL %x, %x\n}\n\
c(%x:p3) {\n  %y:p0 = G_ADDRSPACE_CAST %x\n}\n\
d(%x:s16) {\n  %y:s16 = G_ADD %x, %x\n}\n";
    let functions = parse_functions(text, &st).unwrap();
    let (results, stats) = legalize_functions_parallel(&target, functions);

    let names: Vec<_> = results.iter().map(|r| r.function.name().to_string()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
    assert!(results.iter().all(|r| r.result.is_ok()));
    assert_eq!(stats.functions_legalized, 4);
    assert_eq!(stats.functions_failed, 0);
    assert_eq!(stats.action_counts.get("NarrowScalar"), Some(&1));
    assert_eq!(stats.action_counts.get("WidenScalar"), Some(&1));
    assert_eq!(stats.action_counts.get("Custom"), Some(&1));
    for result in &results {
        assert_all_legal(&target, &result.function);
    }
}

#[test]
fn test_parallel_driver_reports_failures_per_function() {
    let (st, target) = target(Generation::SouthernIslands);
    let text = "\
ok(%x:s32) {\n  %y:s32 = G_ADD %x, %x\n}\n\
bad(%x:p3) {\n  %y:p0 = G_ADDRSPACE_CAST %x\n}\n";
    let functions = parse_functions(text, &st).unwrap();
    let (results, stats) = legalize_functions_parallel(&target, functions);
    assert!(results[0].result.is_ok());
    assert!(matches!(
        results[1].result,
        Err(LegalizerError::Unsupported { opcode: Opcode::AddrspaceCast, .. })
    ));
    assert_eq!(stats.functions_legalized, 1);
    assert_eq!(stats.functions_failed, 1);
}
