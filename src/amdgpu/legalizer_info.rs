// This module builds the legalization table of the example GPU target. Every generic
// opcode the target accepts gets a rule set through the fluent builder: exact legal
// shapes first, then the clamps and splits that move other shapes toward them, and a
// few custom predicates where legality depends on more than one type index (memory
// access sizes, vector element indexing, merge/unmerge piece sizes). Feature flags of
// the subtarget decide which shapes are legal: 16-bit instructions enable s16 math,
// packed instructions enable <2 x s16>, and the flat address space enables flat memory
// access and address space casts. The finished table is verified once at construction.
// AmdgpuLegalizer owns the table and implements TargetLegalizer, routing the Custom
// action of G_ADDRSPACE_CAST to the cast lowering.

//! Legalization rules of the example GPU target.

use log::debug;

use crate::core::{
    InstId, LegalizerResult, LowLevelType, MachineIrBuilder, Opcode, TypeQuery,
};
use crate::legalizer::{
    LegalizerConfig, LegalizerInfo, LegalizerInfoBuilder, Mutation, Predicate, TargetLegalizer,
};

use super::addrspace_cast::legalize_addrspace_cast;
use super::subtarget::{addr_space, Generation, Subtarget};

const S1: LowLevelType = LowLevelType::scalar(1);
const S8: LowLevelType = LowLevelType::scalar(8);
const S16: LowLevelType = LowLevelType::scalar(16);
const S24: LowLevelType = LowLevelType::scalar(24);
const S32: LowLevelType = LowLevelType::scalar(32);
const S64: LowLevelType = LowLevelType::scalar(64);
const S128: LowLevelType = LowLevelType::scalar(128);
const S256: LowLevelType = LowLevelType::scalar(256);
const S512: LowLevelType = LowLevelType::scalar(512);

const V2S16: LowLevelType = LowLevelType::vector(2, 16);
const V4S16: LowLevelType = LowLevelType::vector(4, 16);
const V8S16: LowLevelType = LowLevelType::vector(8, 16);

const V2S32: LowLevelType = LowLevelType::vector(2, 32);
const V3S32: LowLevelType = LowLevelType::vector(3, 32);
const V4S32: LowLevelType = LowLevelType::vector(4, 32);
const V5S32: LowLevelType = LowLevelType::vector(5, 32);
const V6S32: LowLevelType = LowLevelType::vector(6, 32);
const V7S32: LowLevelType = LowLevelType::vector(7, 32);
const V8S32: LowLevelType = LowLevelType::vector(8, 32);
const V9S32: LowLevelType = LowLevelType::vector(9, 32);
const V10S32: LowLevelType = LowLevelType::vector(10, 32);
const V11S32: LowLevelType = LowLevelType::vector(11, 32);
const V12S32: LowLevelType = LowLevelType::vector(12, 32);
const V13S32: LowLevelType = LowLevelType::vector(13, 32);
const V14S32: LowLevelType = LowLevelType::vector(14, 32);
const V15S32: LowLevelType = LowLevelType::vector(15, 32);
const V16S32: LowLevelType = LowLevelType::vector(16, 32);

const V2S64: LowLevelType = LowLevelType::vector(2, 64);
const V3S64: LowLevelType = LowLevelType::vector(3, 64);
const V4S64: LowLevelType = LowLevelType::vector(4, 64);
const V5S64: LowLevelType = LowLevelType::vector(5, 64);
const V6S64: LowLevelType = LowLevelType::vector(6, 64);
const V7S64: LowLevelType = LowLevelType::vector(7, 64);
const V8S64: LowLevelType = LowLevelType::vector(8, 64);

const ALL_S32_VECTORS: [LowLevelType; 15] = [
    V2S32, V3S32, V4S32, V5S32, V6S32, V7S32, V8S32, V9S32, V10S32, V11S32, V12S32, V13S32,
    V14S32, V15S32, V16S32,
];

const ALL_S64_VECTORS: [LowLevelType; 7] = [V2S64, V3S64, V4S64, V5S64, V6S64, V7S64, V8S64];

const GLOBAL_PTR: LowLevelType = LowLevelType::pointer(addr_space::GLOBAL, 64);
const CONSTANT_PTR: LowLevelType = LowLevelType::pointer(addr_space::CONSTANT, 64);
const LOCAL_PTR: LowLevelType = LowLevelType::pointer(addr_space::LOCAL, 32);
const FLAT_PTR: LowLevelType = LowLevelType::pointer(addr_space::FLAT, 64);
const PRIVATE_PTR: LowLevelType = LowLevelType::pointer(addr_space::PRIVATE, 32);

const V2_LOCAL_PTR: LowLevelType = LowLevelType::vector_of(2, LOCAL_PTR);
const V4_LOCAL_PTR: LowLevelType = LowLevelType::vector_of(4, LOCAL_PTR);
const V2_PRIVATE_PTR: LowLevelType = LowLevelType::vector_of(2, PRIVATE_PTR);
const V4_PRIVATE_PTR: LowLevelType = LowLevelType::vector_of(4, PRIVATE_PTR);

const ADDR_SPACES_64: [LowLevelType; 3] = [GLOBAL_PTR, CONSTANT_PTR, FLAT_PTR];
const ADDR_SPACES_32: [LowLevelType; 2] = [LOCAL_PTR, PRIVATE_PTR];

const CODE_PTR: LowLevelType = FLAT_PTR;

/// Scalars or vectors of at most 512 bits whose elements are 32-bit multiples.
fn is_multiple_32(type_idx: usize) -> Predicate {
    Predicate::custom(&[type_idx], move |q| {
        let ty = q.types[type_idx];
        ty.size_in_bits() <= 512 && ty.scalar_size_in_bits() % 32 == 0
    })
}

/// Vector whose element is not a power of two between 8 and 64 bits.
fn not_valid_elt(type_idx: usize) -> Predicate {
    Predicate::custom(&[type_idx], move |q| {
        let ty = q.types[type_idx];
        if !ty.is_vector() {
            return false;
        }
        let elt = ty.scalar_size_in_bits();
        !(8..=64).contains(&elt) || !elt.is_power_of_two()
    })
}

fn first_mem_size(q: &TypeQuery) -> Option<u32> {
    q.mem.first().map(|m| m.size_in_bits)
}

/// Whether a load or store of `q` is directly supported.
fn is_legal_memory_access(generation: Generation, q: &TypeQuery) -> bool {
    let ty = q.types[0];
    let Some(mem_size) = first_mem_size(q) else {
        return false;
    };
    if ty.size_in_bits() < 32 {
        return false;
    }
    if ty.size_in_bits() > 32 && mem_size < ty.size_in_bits() {
        return false;
    }
    match mem_size {
        8 | 16 => ty.size_in_bits() == 32,
        32 | 64 | 128 => true,
        96 => generation >= Generation::SeaIslands,
        256 | 512 => true,
        _ => false,
    }
}

/// Round a merge/unmerge operand up to the next power of two, or to a
/// multiple of 64 bits once that is smaller.
fn widen_big_operand(big_idx: usize) -> Mutation {
    Mutation::custom(&[big_idx], move |q| {
        let size = q.types[big_idx].size_in_bits();
        let next_pow2 = (size + 1).next_power_of_two();
        if next_pow2 >= 256 {
            let rounded = (size + 1).next_multiple_of(64);
            if rounded < next_pow2 {
                return (big_idx, LowLevelType::scalar(rounded));
            }
        }
        (big_idx, LowLevelType::scalar(next_pow2))
    })
}

/// Build and verify the legalization table of `st`.
pub fn build_legalizer_info(st: &Subtarget, config: LegalizerConfig) -> LegalizerResult<LegalizerInfo> {
    let generation = st.generation();
    let mut b = LegalizerInfoBuilder::new(config);

    b.get_action_definitions_builder(&[Opcode::Brcond]).legal_for([S1]);

    b.get_action_definitions_builder(&[Opcode::Add, Opcode::Sub, Opcode::Mul, Opcode::Umulh, Opcode::Smulh])
        .legal_for([S32])
        .clamp_scalar(0, S32, S32)
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::And, Opcode::Or, Opcode::Xor])
        .legal_for([S32, S1, S64, V2S32, V2S16, V4S16])
        .clamp_scalar(0, S32, S64)
        .more_elements_if(Predicate::SmallOddVector(0, 32), Mutation::OneMoreElement(0))
        .fewer_elements_if(
            Predicate::VectorWiderThan(0, 64),
            Mutation::FewerElementsToSize { type_idx: 0, size: 64 },
        )
        .scalarize(0);

    b.get_action_definitions_builder(&[
        Opcode::Uaddo,
        Opcode::Saddo,
        Opcode::Usubo,
        Opcode::Ssubo,
        Opcode::Uadde,
        Opcode::Sadde,
        Opcode::Usube,
        Opcode::Ssube,
    ])
    .legal_for([(S32, S1)])
    .clamp_scalar(0, S32, S32);

    b.get_action_definitions_builder(&[Opcode::Bitcast])
        .legal_for_cartesian_product(&[S32, V2S16], &[S32, V2S16])
        .legal_for_cartesian_product(&[S64, V2S32, V4S16], &[S64, V2S32, V4S16])
        .legal_for_cartesian_product(&[V2S64, V4S32], &[V2S64, V4S32])
        .legal_if(Predicate::all([Predicate::IsPointer(0), Predicate::IsPointer(1)]));

    if st.has_16bit_insts() {
        b.get_action_definitions_builder(&[Opcode::Fconstant])
            .legal_for([S32, S64, S16])
            .clamp_scalar(0, S16, S64);
    } else {
        b.get_action_definitions_builder(&[Opcode::Fconstant])
            .legal_for([S32, S64])
            .clamp_scalar(0, S32, S64);
    }

    b.get_action_definitions_builder(&[Opcode::ImplicitDef])
        .legal_for([
            S1,
            S32,
            S64,
            V2S32,
            V4S32,
            V2S16,
            V4S16,
            GLOBAL_PTR,
            CONSTANT_PTR,
            LOCAL_PTR,
            FLAT_PTR,
            PRIVATE_PTR,
        ])
        .more_elements_if(Predicate::SmallOddVector(0, 32), Mutation::OneMoreElement(0))
        .clamp_scalar_or_elt(0, S32, S512)
        .legal_if(is_multiple_32(0))
        .widen_scalar_to_next_pow2(0, 32);

    b.get_action_definitions_builder(&[Opcode::Constant])
        .legal_for([S1, S32, S64, GLOBAL_PTR, LOCAL_PTR, CONSTANT_PTR, PRIVATE_PTR, FLAT_PTR])
        .clamp_scalar(0, S32, S64)
        .widen_scalar_to_next_pow2(0, 0)
        .legal_if(Predicate::IsPointer(0));

    b.get_action_definitions_builder(&[Opcode::FrameIndex]).legal_for([PRIVATE_PTR]);
    b.get_action_definitions_builder(&[Opcode::BlockAddr]).legal_for([CODE_PTR]);

    let min_fp_scalar = if st.has_16bit_insts() { S16 } else { S32 };

    let fp_ops = b.get_action_definitions_builder(&[
        Opcode::Fadd,
        Opcode::Fmul,
        Opcode::Fneg,
        Opcode::Fabs,
        Opcode::Fma,
        Opcode::Fcanonicalize,
    ]);
    fp_ops.legal_for([S32, S64]);
    if st.has_16bit_insts() {
        if st.has_vop3p_insts() {
            fp_ops.legal_for([S16, V2S16]);
        } else {
            fp_ops.legal_for([S16]);
        }
    }
    if st.has_vop3p_insts() {
        fp_ops.clamp_max_num_elements(0, S16, 2);
    }
    fp_ops.scalarize(0).clamp_scalar(0, min_fp_scalar, S64);

    let fsqrt = b.get_action_definitions_builder(&[Opcode::Fsqrt]);
    if st.has_16bit_insts() {
        fsqrt.legal_for([S32, S64, S16]);
    } else {
        fsqrt.legal_for([S32, S64]);
    }
    fsqrt.scalarize(0).clamp_scalar(0, min_fp_scalar, S64);

    b.get_action_definitions_builder(&[Opcode::Fptrunc])
        .legal_for([(S32, S64), (S16, S32)])
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::Fpext])
        .legal_for([(S64, S32), (S32, S16)])
        .lower_for([(S64, S16)])
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::Fsub])
        .legal_for([S32])
        .lower_for([S64, S16, V2S16])
        .scalarize(0)
        .clamp_scalar(0, S32, S64);

    b.get_action_definitions_builder(&[Opcode::Sext, Opcode::Zext, Opcode::Anyext])
        .legal_for([
            (S64, S32),
            (S32, S16),
            (S64, S16),
            (S32, S1),
            (S64, S1),
            (S16, S1),
            (S32, S8),
            (S128, S32),
            (S128, S64),
            (S32, S24),
        ])
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::Trunc])
        .legal_if(Predicate::all([Predicate::IsScalar(0), Predicate::IsScalar(1)]))
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::Sitofp, Opcode::Uitofp])
        .legal_for([(S32, S32), (S64, S32)])
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::Fptosi, Opcode::Fptoui])
        .legal_for([(S32, S32), (S32, S64)])
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::IntrinsicTrunc, Opcode::IntrinsicRound])
        .legal_for([S32, S64])
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::Gep])
        .legal_for_cartesian_product(&ADDR_SPACES_64, &[S64])
        .legal_for_cartesian_product(&ADDR_SPACES_32, &[S32])
        .scalarize(0);

    let pointers = [GLOBAL_PTR, LOCAL_PTR, CONSTANT_PTR, PRIVATE_PTR, FLAT_PTR];
    let mut icmp_operands = vec![S32, S64];
    icmp_operands.extend(pointers);
    b.get_action_definitions_builder(&[Opcode::Icmp])
        .legal_for_cartesian_product(&[S1], &icmp_operands)
        .widen_scalar_to_next_pow2(1, 0)
        .clamp_scalar(1, S32, S64)
        .scalarize(0)
        .legal_if(Predicate::all([Predicate::TypeIs(0, S1), Predicate::IsPointer(1)]));

    b.get_action_definitions_builder(&[Opcode::Fcmp])
        .legal_for([(S1, S32), (S1, S64)])
        .widen_scalar_to_next_pow2(1, 0)
        .clamp_scalar(1, S32, S64)
        .scalarize(0);

    b.get_action_definitions_builder(&[
        Opcode::Fpow,
        Opcode::Fexp,
        Opcode::Fexp2,
        Opcode::Flog,
        Opcode::Flog2,
        Opcode::Flog10,
    ])
    .legal_for([S32])
    .scalarize(0);

    b.get_action_definitions_builder(&[
        Opcode::Ctlz,
        Opcode::CtlzZeroUndef,
        Opcode::Cttz,
        Opcode::CttzZeroUndef,
        Opcode::Ctpop,
    ])
    .legal_for([(S32, S32), (S32, S64)])
    .clamp_scalar(0, S32, S32)
    .clamp_scalar(1, S32, S64)
    .scalarize(0)
    .widen_scalar_to_next_pow2(0, 32)
    .widen_scalar_to_next_pow2(1, 32);

    b.get_action_definitions_builder(&[Opcode::Bswap])
        .legal_for([S32])
        .clamp_scalar(0, S32, S32)
        .scalarize(0);

    b.get_action_definitions_builder(&[Opcode::Inttoptr])
        .legal_for_cartesian_product(&ADDR_SPACES_64, &[S64])
        .legal_for_cartesian_product(&ADDR_SPACES_32, &[S32])
        .scalarize(0)
        .legal_if(Predicate::SameSize(0, 1))
        .widen_scalar_if(Predicate::SmallerThan(1, 0), Mutation::ScalarSizeOf { type_idx: 1, from: 0 })
        .narrow_scalar_if(Predicate::LargerThan(1, 0), Mutation::ScalarSizeOf { type_idx: 1, from: 0 });

    b.get_action_definitions_builder(&[Opcode::Ptrtoint])
        .legal_for_cartesian_product(&[S64], &ADDR_SPACES_64)
        .legal_for_cartesian_product(&[S32], &ADDR_SPACES_32)
        .scalarize(0)
        .legal_if(Predicate::SameSize(0, 1))
        .widen_scalar_if(Predicate::SmallerThan(0, 1), Mutation::ScalarSizeOf { type_idx: 0, from: 1 })
        .narrow_scalar_if(Predicate::LargerThan(0, 1), Mutation::ScalarSizeOf { type_idx: 0, from: 1 });

    if st.has_flat_address_space() {
        b.get_action_definitions_builder(&[Opcode::AddrspaceCast])
            .scalarize(0)
            .custom();
    }

    b.get_action_definitions_builder(&[Opcode::Load, Opcode::Store])
        .narrow_scalar_if(
            Predicate::custom(&[0], |q| {
                let size = q.types[0].size_in_bits();
                size > 32 && first_mem_size(q).is_some_and(|mem| mem < size)
            }),
            Mutation::ChangeTo(0, S32),
        )
        .fewer_elements_if(
            Predicate::custom(&[0], move |q| {
                first_mem_size(q) == Some(96)
                    && q.types[0].is_vector()
                    && generation < Generation::SeaIslands
            }),
            Mutation::ChangeTo(0, V2S32),
        )
        .legal_if(Predicate::custom(&[0], move |q| is_legal_memory_access(generation, q)))
        .clamp_scalar(0, S32, S64);

    let mut ext_loads = vec![
        (S32, GLOBAL_PTR, 8, 8),
        (S32, GLOBAL_PTR, 16, 8),
        (S32, LOCAL_PTR, 8, 8),
        (S32, LOCAL_PTR, 16, 8),
        (S32, PRIVATE_PTR, 8, 8),
        (S32, PRIVATE_PTR, 16, 8),
    ];
    if st.has_flat_address_space() {
        ext_loads.extend([(S32, FLAT_PTR, 8, 8), (S32, FLAT_PTR, 16, 8)]);
    }
    b.get_action_definitions_builder(&[Opcode::Sextload, Opcode::Zextload])
        .legal_for_types_with_mem_desc(&ext_loads)
        .clamp_scalar(0, S32, S32)
        .widen_scalar_to_next_pow2(0, 0)
        .unsupported_if_mem_size_not_pow2()
        .lower();

    let atomics = b.get_action_definitions_builder(&[
        Opcode::AtomicCmpxchg,
        Opcode::AtomicrmwXchg,
        Opcode::AtomicrmwAdd,
        Opcode::AtomicrmwSub,
        Opcode::AtomicrmwAnd,
        Opcode::AtomicrmwOr,
        Opcode::AtomicrmwXor,
        Opcode::AtomicrmwMax,
        Opcode::AtomicrmwMin,
        Opcode::AtomicrmwUmax,
        Opcode::AtomicrmwUmin,
    ]);
    atomics.legal_for([(S32, GLOBAL_PTR), (S32, LOCAL_PTR), (S64, GLOBAL_PTR), (S64, LOCAL_PTR)]);
    if st.has_flat_address_space() {
        atomics.legal_for([(S32, FLAT_PTR), (S64, FLAT_PTR)]);
    }

    b.get_action_definitions_builder(&[Opcode::Select])
        .legal_for_cartesian_product(
            &[
                S32,
                S64,
                V2S32,
                V2S16,
                V4S16,
                GLOBAL_PTR,
                LOCAL_PTR,
                FLAT_PTR,
                PRIVATE_PTR,
                V2_LOCAL_PTR,
                V2_PRIVATE_PTR,
            ],
            &[S1],
        )
        .clamp_scalar(0, S32, S64)
        .more_elements_if(Predicate::SmallOddVector(0, 32), Mutation::OneMoreElement(0))
        .fewer_elements_if(Predicate::NumElementsNotEven(0), Mutation::ChangeToElement(0))
        .scalarize(1)
        .clamp_max_num_elements(0, S32, 2)
        .clamp_max_num_elements(0, LOCAL_PTR, 2)
        .clamp_max_num_elements(0, PRIVATE_PTR, 2)
        .scalarize(0)
        .legal_if(Predicate::all([Predicate::IsPointer(0), Predicate::TypeIs(1, S1)]));

    let shifts = b.get_action_definitions_builder(&[Opcode::Shl, Opcode::Lshr, Opcode::Ashr]);
    shifts.legal_for([(S32, S32), (S64, S32)]);
    if st.has_16bit_insts() {
        if st.has_vop3p_insts() {
            shifts
                .legal_for([(S16, S32), (S16, S16), (V2S16, V2S16)])
                .clamp_max_num_elements(0, S16, 2);
        } else {
            shifts.legal_for([(S16, S32), (S16, S16)]);
        }
        shifts
            .clamp_scalar(1, S16, S32)
            .clamp_scalar(0, S16, S64)
            .widen_scalar_to_next_pow2(0, 16);
    } else {
        shifts
            .clamp_scalar(1, S32, S32)
            .clamp_scalar(0, S32, S64)
            .widen_scalar_to_next_pow2(0, 32);
    }
    shifts.scalarize(0);

    for (opcode, vec_idx, elt_idx) in [(Opcode::ExtractVectorElt, 1, 0), (Opcode::InsertVectorElt, 0, 1)] {
        b.get_action_definitions_builder(&[opcode])
            .legal_if(Predicate::custom(&[vec_idx, 2], move |q| {
                let vec_size = q.types[vec_idx].size_in_bits();
                vec_size % 32 == 0 && vec_size <= 512 && q.types[2].size_in_bits() == 32
            }))
            .clamp_scalar(elt_idx, S32, S64)
            .clamp_scalar(vec_idx, S32, S64)
            .clamp_scalar(2, S32, S32);
    }

    b.get_action_definitions_builder(&[Opcode::ExtractVectorElt]).unsupported_if(Predicate::custom(
        &[0, 1],
        |q| q.types[0] != q.types[1].scalar_type(),
    ));

    for (opcode, big_idx, lit_idx) in [(Opcode::Extract, 1, 0), (Opcode::Insert, 0, 1)] {
        b.get_action_definitions_builder(&[opcode])
            .legal_if(Predicate::custom(&[big_idx, lit_idx], move |q| {
                q.types[big_idx].size_in_bits() % 32 == 0 && q.types[lit_idx].size_in_bits() % 16 == 0
            }))
            .widen_scalar_if(
                Predicate::custom(&[big_idx], move |q| q.types[big_idx].scalar_size_in_bits() < 16),
                Mutation::WidenScalarOrEltToNextPow2 { type_idx: big_idx, min: 16 },
            )
            .widen_scalar_if(
                Predicate::custom(&[lit_idx], move |q| q.types[lit_idx].scalar_size_in_bits() < 16),
                Mutation::WidenScalarOrEltToNextPow2 { type_idx: lit_idx, min: 16 },
            )
            .more_elements_if(Predicate::SmallOddVector(big_idx, 32), Mutation::OneMoreElement(big_idx));
    }

    let mut build_vector_shapes: Vec<(LowLevelType, LowLevelType)> =
        ALL_S32_VECTORS.iter().map(|&v| (v, S32)).collect();
    build_vector_shapes.extend(ALL_S64_VECTORS.iter().map(|&v| (v, S64)));
    b.get_action_definitions_builder(&[Opcode::BuildVector])
        .legal_for(build_vector_shapes)
        .clamp_num_elements(0, V16S32, V16S32)
        .clamp_num_elements(0, V2S64, V8S64)
        .min_scalar_same_as(1, 0)
        .legal_if(Predicate::custom(&[0], |q| {
            let elt = q.types[0].scalar_size_in_bits();
            elt <= 32 || elt == 64
        }));

    b.get_action_definitions_builder(&[Opcode::ConcatVectors]).legal_for([
        (V4S32, V2S32),
        (V8S32, V2S32),
        (V8S32, V4S32),
        (V4S64, V2S64),
        (V4S16, V2S16),
        (V8S16, V2S16),
        (V8S16, V4S16),
        (V4_LOCAL_PTR, V2_LOCAL_PTR),
        (V4_PRIVATE_PTR, V2_PRIVATE_PTR),
    ]);

    for (opcode, big_idx, lit_idx) in [(Opcode::MergeValues, 0, 1), (Opcode::UnmergeValues, 1, 0)] {
        b.get_action_definitions_builder(&[opcode])
            .widen_scalar_to_next_pow2(lit_idx, 16)
            .clamp_scalar(lit_idx, S16, S256)
            .widen_scalar_to_next_pow2(lit_idx, 32)
            .fewer_elements_if(not_valid_elt(0), Mutation::ChangeToElement(0))
            .fewer_elements_if(not_valid_elt(1), Mutation::ChangeToElement(1))
            .clamp_scalar(big_idx, S32, S512)
            .widen_scalar_if(
                Predicate::custom(&[big_idx], move |q| {
                    let ty = q.types[big_idx];
                    ty.is_scalar() && !ty.size_in_bits().is_power_of_two() && ty.size_in_bits() % 16 != 0
                }),
                widen_big_operand(big_idx),
            )
            .legal_if(Predicate::custom(&[big_idx, lit_idx], move |q| {
                let big = q.types[big_idx];
                let lit = q.types[lit_idx];
                if big.is_vector() && big.size_in_bits() < 32 {
                    return false;
                }
                if lit.is_vector() && lit.size_in_bits() < 32 {
                    return false;
                }
                big.size_in_bits() % 16 == 0 && lit.size_in_bits() % 16 == 0 && big.size_in_bits() <= 512
            }))
            .scalarize(0)
            .scalarize(1);
    }

    let info = b.compute_tables();
    info.verify()?;
    debug!("built legalizer table for {} ({} opcodes)", generation, info.opcodes().len());
    Ok(info)
}

/// The example GPU target: its table plus the custom lowerings.
#[derive(Debug)]
pub struct AmdgpuLegalizer {
    subtarget: Subtarget,
    info: LegalizerInfo,
}

impl AmdgpuLegalizer {
    pub fn new(subtarget: Subtarget) -> LegalizerResult<Self> {
        Self::with_config(subtarget, LegalizerConfig::default())
    }

    pub fn with_config(subtarget: Subtarget, config: LegalizerConfig) -> LegalizerResult<Self> {
        let info = build_legalizer_info(&subtarget, config)?;
        Ok(Self { subtarget, info })
    }

    pub fn subtarget(&self) -> &Subtarget {
        &self.subtarget
    }
}

impl TargetLegalizer for AmdgpuLegalizer {
    fn legalizer_info(&self) -> &LegalizerInfo {
        &self.info
    }

    fn legalize_custom(&self, inst: InstId, b: &mut MachineIrBuilder<'_>) -> LegalizerResult<bool> {
        match b.mf().inst(inst).map(|i| i.opcode) {
            Some(Opcode::AddrspaceCast) => legalize_addrspace_cast(&self.subtarget, inst, b),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MemDesc;
    use crate::legalizer::{Action, LegalizationOutcome};

    fn info(generation: Generation) -> LegalizerInfo {
        build_legalizer_info(&Subtarget::new(generation), LegalizerConfig::default()).unwrap()
    }

    #[test]
    fn test_table_verifies_for_every_generation() {
        for generation in Generation::ALL {
            let st = Subtarget::new(generation);
            assert!(build_legalizer_info(&st, LegalizerConfig::default()).is_ok(), "{generation}");
        }
    }

    #[test]
    fn test_add_widens_and_scalarizes() {
        let info = info(Generation::Gfx9);
        assert_eq!(
            info.get_action(Opcode::Add, &TypeQuery::new([S16])),
            Action::WidenScalar { type_idx: 0, new_type: S32 }
        );
        assert_eq!(
            info.get_action(Opcode::Mul, &TypeQuery::new([V2S32])),
            Action::Scalarize { type_idx: 0, new_type: S32 }
        );
    }

    #[test]
    fn test_16bit_fp_depends_on_generation() {
        let q = TypeQuery::new([S16]);
        assert_eq!(info(Generation::VolcanicIslands).get_action(Opcode::Fadd, &q), Action::Legal);
        assert_eq!(
            info(Generation::SeaIslands).get_action(Opcode::Fadd, &q),
            Action::WidenScalar { type_idx: 0, new_type: S32 }
        );
        let packed = TypeQuery::new([V2S16]);
        assert_eq!(info(Generation::Gfx9).get_action(Opcode::Fadd, &packed), Action::Legal);
        assert_eq!(
            info(Generation::VolcanicIslands).get_action(Opcode::Fadd, &packed),
            Action::Scalarize { type_idx: 0, new_type: S16 }
        );
    }

    #[test]
    fn test_addrspace_cast_needs_flat() {
        let q = TypeQuery::new([FLAT_PTR, LOCAL_PTR]);
        assert_eq!(info(Generation::SeaIslands).get_action(Opcode::AddrspaceCast, &q), Action::Custom);
        assert_eq!(
            info(Generation::SouthernIslands).get_action(Opcode::AddrspaceCast, &q),
            Action::Unsupported
        );
    }

    #[test]
    fn test_memory_access_rules() {
        let info_si = info(Generation::SouthernIslands);
        let info_ci = info(Generation::SeaIslands);
        let v3 = TypeQuery::with_mem([V3S32, GLOBAL_PTR], [MemDesc::new(96, 32)]);
        assert_eq!(
            info_si.get_action(Opcode::Load, &v3),
            Action::FewerElements { type_idx: 0, new_type: V2S32 }
        );
        assert_eq!(info_ci.get_action(Opcode::Load, &v3), Action::Legal);

        let partial = TypeQuery::with_mem([S64, GLOBAL_PTR], [MemDesc::new(32, 32)]);
        assert_eq!(
            info_ci.get_action(Opcode::Load, &partial),
            Action::NarrowScalar { type_idx: 0, new_type: S32 }
        );
        let byte = TypeQuery::with_mem([S16, GLOBAL_PTR], [MemDesc::new(16, 16)]);
        let res = info_ci.legalize_query(Opcode::Store, byte).unwrap();
        assert_eq!(res.outcome, LegalizationOutcome::Legal);
        assert_eq!(res.query.types, vec![S32, GLOBAL_PTR]);
    }

    #[test]
    fn test_extending_loads() {
        let info = info(Generation::Gfx9);
        let legal = TypeQuery::with_mem([S32, LOCAL_PTR], [MemDesc::new(8, 8)]);
        assert_eq!(info.get_action(Opcode::Sextload, &legal), Action::Legal);
        let full = TypeQuery::with_mem([S32, LOCAL_PTR], [MemDesc::new(32, 32)]);
        assert_eq!(info.get_action(Opcode::Zextload, &full), Action::Lower);
        let odd = TypeQuery::with_mem([S32, LOCAL_PTR], [MemDesc::new(24, 8)]);
        assert_eq!(info.get_action(Opcode::Zextload, &odd), Action::Unsupported);
    }

    #[test]
    fn test_pointer_int_casts() {
        let info = info(Generation::Gfx9);
        assert_eq!(info.get_action(Opcode::Ptrtoint, &TypeQuery::new([S32, LOCAL_PTR])), Action::Legal);
        assert_eq!(
            info.get_action(Opcode::Ptrtoint, &TypeQuery::new([S16, LOCAL_PTR])),
            Action::WidenScalar { type_idx: 0, new_type: S32 }
        );
        assert_eq!(
            info.get_action(Opcode::Inttoptr, &TypeQuery::new([FLAT_PTR, S128])),
            Action::NarrowScalar { type_idx: 1, new_type: S64 }
        );
    }

    #[test]
    fn test_select_and_logic_vectors() {
        let info = info(Generation::Gfx9);
        assert_eq!(
            info.get_action(Opcode::Select, &TypeQuery::new([LowLevelType::vector(3, 16), S1])),
            Action::MoreElements { type_idx: 0, new_type: V4S16 }
        );
        assert_eq!(
            info.get_action(Opcode::Select, &TypeQuery::new([V4S32, S1])),
            Action::FewerElements { type_idx: 0, new_type: V2S32 }
        );
        assert_eq!(
            info.get_action(Opcode::And, &TypeQuery::new([V4S32])),
            Action::FewerElements { type_idx: 0, new_type: V2S32 }
        );
        assert_eq!(
            info.get_action(Opcode::Xor, &TypeQuery::new([V2_LOCAL_PTR])),
            Action::Scalarize { type_idx: 0, new_type: LOCAL_PTR }
        );
    }

    #[test]
    fn test_merge_unmerge_pieces() {
        let info = info(Generation::Gfx9);
        assert_eq!(info.get_action(Opcode::MergeValues, &TypeQuery::new([FLAT_PTR, S32])), Action::Legal);
        assert_eq!(info.get_action(Opcode::UnmergeValues, &TypeQuery::new([S16, V4S16])), Action::Legal);
        assert_eq!(
            info.get_action(Opcode::MergeValues, &TypeQuery::new([S64, S8])),
            Action::WidenScalar { type_idx: 1, new_type: S16 }
        );
    }
}
